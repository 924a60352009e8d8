use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    evaluations: AtomicU64,
    evaluation_failures: AtomicU64,
    evaluations_missed: AtomicU64,
    state_conflicts: AtomicU64,
    alerts_fired: AtomicU64,
    alerts_resolved: AtomicU64,
    notifications_built: AtomicU64,
    alerts_inhibited: AtomicU64,
    deliveries_succeeded: AtomicU64,
    delivery_retries: AtomicU64,
    deliveries_dead_lettered: AtomicU64,
    config_reloads: AtomicU64,
    config_reload_failures: AtomicU64,
    evaluation_latency_sum_us: AtomicU64,
    evaluation_latency_count: AtomicU64,
    delivery_latency_sum_us: AtomicU64,
    delivery_latency_count: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_evaluation_failures(&self) {
        self.evaluation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_evaluations_missed(&self) {
        self.evaluations_missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_state_conflicts(&self, count: u64) {
        self.state_conflicts.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_alerts_fired(&self, count: u64) {
        self.alerts_fired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_alerts_resolved(&self, count: u64) {
        self.alerts_resolved.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_notifications_built(&self) {
        self.notifications_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_alerts_inhibited(&self, count: u64) {
        self.alerts_inhibited.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_deliveries_succeeded(&self) {
        self.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_delivery_retries(&self, count: u64) {
        self.delivery_retries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_deliveries_dead_lettered(&self) {
        self.deliveries_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_config_reloads(&self) {
        self.config_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_config_reload_failures(&self) {
        self.config_reload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluation_latency(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.evaluation_latency_sum_us.fetch_add(us, Ordering::Relaxed);
        self.evaluation_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_latency(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.delivery_latency_sum_us.fetch_add(us, Ordering::Relaxed);
        self.delivery_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evaluations_val(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn evaluation_failures_val(&self) -> u64 {
        self.evaluation_failures.load(Ordering::Relaxed)
    }

    pub fn evaluations_missed_val(&self) -> u64 {
        self.evaluations_missed.load(Ordering::Relaxed)
    }

    pub fn state_conflicts_val(&self) -> u64 {
        self.state_conflicts.load(Ordering::Relaxed)
    }

    pub fn alerts_fired_val(&self) -> u64 {
        self.alerts_fired.load(Ordering::Relaxed)
    }

    pub fn alerts_resolved_val(&self) -> u64 {
        self.alerts_resolved.load(Ordering::Relaxed)
    }

    pub fn notifications_built_val(&self) -> u64 {
        self.notifications_built.load(Ordering::Relaxed)
    }

    pub fn alerts_inhibited_val(&self) -> u64 {
        self.alerts_inhibited.load(Ordering::Relaxed)
    }

    pub fn deliveries_succeeded_val(&self) -> u64 {
        self.deliveries_succeeded.load(Ordering::Relaxed)
    }

    pub fn delivery_retries_val(&self) -> u64 {
        self.delivery_retries.load(Ordering::Relaxed)
    }

    pub fn deliveries_dead_lettered_val(&self) -> u64 {
        self.deliveries_dead_lettered.load(Ordering::Relaxed)
    }

    pub fn config_reloads_val(&self) -> u64 {
        self.config_reloads.load(Ordering::Relaxed)
    }

    pub fn config_reload_failures_val(&self) -> u64 {
        self.config_reload_failures.load(Ordering::Relaxed)
    }

    pub fn evaluation_latency_vals(&self) -> (u64, u64) {
        (
            self.evaluation_latency_sum_us.load(Ordering::Relaxed),
            self.evaluation_latency_count.load(Ordering::Relaxed),
        )
    }

    pub fn delivery_latency_vals(&self) -> (u64, u64) {
        (
            self.delivery_latency_sum_us.load(Ordering::Relaxed),
            self.delivery_latency_count.load(Ordering::Relaxed),
        )
    }
}
