use std::sync::Arc;

use super::pipeline_metrics::PipelineMetrics;

pub fn render_prometheus(m: &Arc<PipelineMetrics>) -> String {
    let mut out = String::with_capacity(2048);

    write_counter(&mut out, "aimon_rule_evaluations_total", m.evaluations_val());
    write_counter(&mut out, "aimon_rule_evaluation_failures_total", m.evaluation_failures_val());
    write_counter(&mut out, "aimon_rule_evaluations_missed_total", m.evaluations_missed_val());
    write_counter(&mut out, "aimon_state_conflicts_total", m.state_conflicts_val());
    write_counter(&mut out, "aimon_alerts_fired_total", m.alerts_fired_val());
    write_counter(&mut out, "aimon_alerts_resolved_total", m.alerts_resolved_val());
    write_counter(&mut out, "aimon_notifications_total", m.notifications_built_val());
    write_counter(&mut out, "aimon_alerts_inhibited_total", m.alerts_inhibited_val());
    write_counter(&mut out, "aimon_deliveries_succeeded_total", m.deliveries_succeeded_val());
    write_counter(&mut out, "aimon_delivery_retries_total", m.delivery_retries_val());
    write_counter(&mut out, "aimon_deliveries_dead_lettered_total", m.deliveries_dead_lettered_val());
    write_counter(&mut out, "aimon_config_reloads_total", m.config_reloads_val());
    write_counter(&mut out, "aimon_config_reload_failures_total", m.config_reload_failures_val());

    let (sum, count) = m.evaluation_latency_vals();
    write_summary(&mut out, "aimon_rule_evaluation_latency_us", sum, count);

    let (sum, count) = m.delivery_latency_vals();
    write_summary(&mut out, "aimon_delivery_latency_us", sum, count);

    out
}

fn write_counter(out: &mut String, name: &str, val: u64) {
    use std::fmt::Write;
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {val}");
}

fn write_summary(out: &mut String, name: &str, sum: u64, count: u64) {
    use std::fmt::Write;
    let _ = writeln!(out, "# TYPE {name} summary");
    let _ = writeln!(out, "{name}_sum {sum}");
    let _ = writeln!(out, "{name}_count {count}");
}
