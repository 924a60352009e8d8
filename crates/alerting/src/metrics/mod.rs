pub mod exposition;
pub mod pipeline_metrics;

pub use pipeline_metrics::PipelineMetrics;

#[cfg(test)]
mod tests {
    use super::exposition::render_prometheus;
    use super::pipeline_metrics::PipelineMetrics;
    use std::time::Instant;

    #[test]
    fn counters_increment() {
        let m = PipelineMetrics::new();
        m.inc_evaluations();
        m.inc_evaluations();
        m.inc_evaluations_missed();
        m.add_alerts_fired(3);
        assert_eq!(m.evaluations_val(), 2);
        assert_eq!(m.evaluations_missed_val(), 1);
        assert_eq!(m.alerts_fired_val(), 3);
    }

    #[test]
    fn latency_recording() {
        let m = PipelineMetrics::new();
        let start = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        m.record_delivery_latency(start);
        let (sum, count) = m.delivery_latency_vals();
        assert!(sum > 0);
        assert_eq!(count, 1);
    }

    #[test]
    fn prometheus_output_contains_metric_names() {
        let m = PipelineMetrics::new();
        m.inc_deliveries_dead_lettered();
        m.add_delivery_retries(3);
        let output = render_prometheus(&m);
        assert!(output.contains("aimon_deliveries_dead_lettered_total 1"));
        assert!(output.contains("aimon_delivery_retries_total 3"));
        assert!(output.contains("# TYPE aimon_rule_evaluation_latency_us summary"));
    }
}
