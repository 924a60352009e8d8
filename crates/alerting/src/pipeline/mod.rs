mod actor;

use aimon_common::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::alert::{AlertEvent, AlertInstance, AlertStore, EvaluationContext, Evaluator, RuleRunner};
use crate::config::{self, ConfigError, RuntimeConfig, ShutdownPolicy, SourceSettings};
use crate::dispatch::DispatchPool;
use crate::grouping::{GroupRegistry, GroupingEngine, Inhibitor};
use crate::metrics::PipelineMetrics;
use crate::notifier::{build_drivers, DeadLetterQueue, DeliveryError, Notifier};
use crate::routing::NotificationRouter;
use crate::source::{MemorySource, PrometheusSource, QueryError, SignalSource};
use actor::{Actor, Control, Reconfigure};

#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Delivery(DeliveryError),
    Source(QueryError),
    Stopped,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Delivery(e) => write!(f, "receiver setup: {e}"),
            Self::Source(e) => write!(f, "signal source: {e}"),
            Self::Stopped => write!(f, "pipeline stopped"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<DeliveryError> for PipelineError {
    fn from(e: DeliveryError) -> Self {
        Self::Delivery(e)
    }
}

impl From<QueryError> for PipelineError {
    fn from(e: QueryError) -> Self {
        Self::Source(e)
    }
}

pub struct Pipeline {
    runner: tokio::sync::Mutex<RuleRunner>,
    store: Arc<AlertStore>,
    events: mpsc::Sender<AlertEvent>,
    control: mpsc::Sender<Control>,
    actor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    groups: GroupRegistry,
    dlq: Arc<DeadLetterQueue>,
    metrics: Arc<PipelineMetrics>,
    clock: Arc<dyn Clock>,
    source: SourceSettings,
    memory: Option<Arc<MemorySource>>,
    on_shutdown: Mutex<ShutdownPolicy>,
}

impl Pipeline {
    /// Must be called inside a tokio runtime.
    pub fn start(config: RuntimeConfig) -> Result<Self, PipelineError> {
        let drivers = build_drivers(&config.receivers, config.delivery.timeout)?;
        let (source, memory): (Arc<dyn SignalSource>, Option<Arc<MemorySource>>) = match &config.source {
            SourceSettings::Memory { retention_ms } => {
                let m = Arc::new(MemorySource::new(*retention_ms));
                (m.clone(), Some(m))
            }
            SourceSettings::Prometheus { url, timeout } => {
                (Arc::new(PrometheusSource::new(url, *timeout)?), None)
            }
        };
        let pipeline = Self::start_with(config, source, drivers, Arc::new(SystemClock));
        Ok(match memory {
            Some(m) => pipeline.with_memory_source(m),
            None => pipeline,
        })
    }

    pub fn start_with(
        config: RuntimeConfig,
        source: Arc<dyn SignalSource>,
        drivers: HashMap<String, Arc<dyn Notifier>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = PipelineMetrics::new();
        let store = Arc::new(AlertStore::new(config.server.resolved_retention_ms));
        let dlq = Arc::new(DeadLetterQueue::new(config.delivery.dead_letter_capacity, metrics.clone()));
        let (events_tx, events_rx) = mpsc::channel(config.server.event_buffer);
        let (control_tx, control_rx) = mpsc::channel(16);

        let router = NotificationRouter::new(config.send_resolved());
        let engine = GroupingEngine::new(
            config.route,
            Inhibitor::new(config.inhibit_rules),
            router,
            metrics.clone(),
        );
        let groups = engine.registry();
        let pool = DispatchPool::start(&config.delivery, drivers, dlq.clone(), metrics.clone());

        let actor = Actor {
            engine,
            pool,
            dlq: dlq.clone(),
            metrics: metrics.clone(),
            clock: clock.clone(),
            events: events_rx,
            control: control_rx,
        };
        let actor = tokio::spawn(actor.run());

        let ctx = Arc::new(EvaluationContext {
            evaluator: Evaluator::new(source),
            store: store.clone(),
            events: events_tx.clone(),
            metrics: metrics.clone(),
            clock: clock.clone(),
        });
        let mut runner = RuleRunner::new(ctx);
        runner.start(config.rules);

        tracing::info!(listen = %config.server.listen, "alert pipeline started");

        Self {
            runner: tokio::sync::Mutex::new(runner),
            store,
            events: events_tx,
            control: control_tx,
            actor: tokio::sync::Mutex::new(Some(actor)),
            groups,
            dlq,
            metrics,
            clock,
            source: config.source,
            memory: None,
            on_shutdown: Mutex::new(config.server.on_shutdown),
        }
    }

    pub fn with_memory_source(mut self, source: Arc<MemorySource>) -> Self {
        self.memory = Some(source);
        self
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn alerts(&self) -> Vec<AlertInstance> {
        self.store.snapshot()
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dlq
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn memory_source(&self) -> Option<&Arc<MemorySource>> {
        self.memory.as_ref()
    }

    pub fn is_running(&self) -> bool {
        !self.control.is_closed()
    }

    pub async fn rule_names(&self) -> Vec<String> {
        self.runner.lock().await.rule_names()
    }

    pub async fn resolve(&self, alertname: &str, instance: Option<&str>) -> Result<usize, PipelineError> {
        let events = self.store.force_resolve(alertname, instance, self.clock.now_ms());
        tracing::info!(alertname, instance = instance.unwrap_or("*"), resolved = events.len(), "manual resolve");
        self.forward(events).await
    }

    pub async fn escalate(&self, alertname: &str, instance: Option<&str>) -> Result<usize, PipelineError> {
        let events = self.store.escalate(alertname, instance);
        tracing::info!(alertname, instance = instance.unwrap_or("*"), escalated = events.len(), "manual escalation");
        self.forward(events).await
    }

    async fn forward(&self, events: Vec<AlertEvent>) -> Result<usize, PipelineError> {
        let count = events.len();
        for event in events {
            self.events.send(event).await.map_err(|_| PipelineError::Stopped)?;
        }
        Ok(count)
    }

    pub async fn flush_due(&self) -> Result<usize, PipelineError> {
        let (done, rx) = oneshot::channel();
        self.control
            .send(Control::FlushDue { done })
            .await
            .map_err(|_| PipelineError::Stopped)?;
        rx.await.map_err(|_| PipelineError::Stopped)
    }

    /// Swaps rules, inhibition, routing and receivers. Receivers are built
    /// before anything is replaced, so a failure keeps the running setup.
    pub async fn reload(&self, config: RuntimeConfig) -> Result<(), PipelineError> {
        let drivers = match build_drivers(&config.receivers, config.delivery.timeout) {
            Ok(d) => d,
            Err(e) => {
                self.metrics.inc_config_reload_failures();
                tracing::error!(error = %e, "reload rejected, keeping previous configuration");
                return Err(e.into());
            }
        };
        if config.source != self.source {
            tracing::warn!("signal source changes take effect after a restart");
        }

        let router = NotificationRouter::new(config.send_resolved());
        let rules = config.rules.len();
        let reconfigure = Reconfigure {
            tree: config.route,
            inhibitor: Inhibitor::new(config.inhibit_rules),
            router,
            drivers,
            delivery: config.delivery,
        };
        self.control
            .send(Control::Reconfigure(Box::new(reconfigure)))
            .await
            .map_err(|_| PipelineError::Stopped)?;
        self.runner.lock().await.replace(config.rules).await;
        if let Ok(mut policy) = self.on_shutdown.lock() {
            *policy = config.server.on_shutdown;
        }

        self.metrics.inc_config_reloads();
        tracing::info!(rules, "configuration reloaded");
        Ok(())
    }

    pub async fn reload_from_file(&self, path: &Path) -> Result<(), PipelineError> {
        match config::load_from_file(path) {
            Ok(cfg) => self.reload(cfg).await,
            Err(e) => {
                self.metrics.inc_config_reload_failures();
                tracing::error!(path = %path.display(), error = %e, "reload rejected, keeping previous configuration");
                Err(e.into())
            }
        }
    }

    /// Stops rule timers and waits for in-flight evaluations, then flushes
    /// or abandons scheduled notifications per the shutdown policy and
    /// drains the delivery queues.
    pub async fn shutdown(&self) {
        self.runner.lock().await.stop().await;

        let flush = self
            .on_shutdown
            .lock()
            .map(|p| *p == ShutdownPolicy::Flush)
            .unwrap_or(true);
        let (done, rx) = oneshot::channel();
        if self.control.send(Control::Shutdown { flush, done }).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(handle) = self.actor.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "grouping task ended abnormally");
            }
        }
        tracing::info!("alert pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Notification;
    use aimon_common::clock::ManualClock;
    use aimon_common::LabelSet;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        sent: std::sync::Mutex<Vec<Notification>>,
    }

    #[async_trait::async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    const CONFIG: &str = r#"
server:
  on_shutdown: flush
rules:
  - name: cpu_high
    expr: last(cpu_usage)
    condition: ">"
    threshold: 80
    interval: 1h
route:
  receiver: ops
  group_by: [alertname]
  group_wait: 10s
  group_interval: 5s
receivers:
  - name: ops
    webhook:
      url: http://localhost:1/unused
"#;

    struct Fixture {
        pipeline: Pipeline,
        clock: Arc<ManualClock>,
        ops: Arc<Recording>,
    }

    fn fixture(yaml: &str) -> Fixture {
        let source = Arc::new(MemorySource::new(3_600_000));
        source.record("cpu_usage", LabelSet::new().with("instance", "h1"), 0, 95.0);
        let clock = Arc::new(ManualClock::new(0));
        let ops = Arc::new(Recording::default());
        let mut drivers: HashMap<String, Arc<dyn Notifier>> = HashMap::new();
        drivers.insert("ops".into(), ops.clone());
        let config = config::load_from_str(yaml).unwrap();
        let pipeline = Pipeline::start_with(config, source, drivers, clock.clone());
        Fixture { pipeline, clock, ops }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn group_wait_then_manual_resolve() {
        let f = fixture(CONFIG);
        wait_for(|| f.pipeline.groups().len() == 1).await;
        assert_eq!(f.pipeline.alerts().len(), 1);

        f.clock.set(9_000);
        assert_eq!(f.pipeline.flush_due().await.unwrap(), 0);
        f.clock.set(10_000);
        assert_eq!(f.pipeline.flush_due().await.unwrap(), 1);

        assert_eq!(f.pipeline.resolve("cpu_high", Some("h1")).await.unwrap(), 1);
        f.clock.set(15_000);
        f.pipeline.flush_due().await.unwrap();

        f.pipeline.shutdown().await;
        let sent = f.ops.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].title(), "[FIRING:1] cpu_high");
        assert_eq!(sent[1].title(), "[RESOLVED] cpu_high");
        assert!(f.pipeline.groups().is_empty());
    }

    #[tokio::test]
    async fn shutdown_flushes_scheduled_groups() {
        let f = fixture(CONFIG);
        wait_for(|| f.pipeline.groups().len() == 1).await;
        f.pipeline.shutdown().await;
        assert_eq!(f.ops.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_can_abandon() {
        let f = fixture(&CONFIG.replace("on_shutdown: flush", "on_shutdown: abandon"));
        wait_for(|| f.pipeline.groups().len() == 1).await;
        f.pipeline.shutdown().await;
        assert!(f.ops.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_reload_keeps_running_config() {
        let f = fixture(CONFIG);
        let mut bad = config::load_from_str(CONFIG).unwrap();
        bad.receivers[0].webhook = None;
        assert!(f.pipeline.reload(bad).await.is_err());
        assert_eq!(f.pipeline.metrics().config_reload_failures_val(), 1);
        assert_eq!(f.pipeline.rule_names().await, vec!["cpu_high".to_string()]);
        f.pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn reload_resolves_removed_rules() {
        let f = fixture(CONFIG);
        wait_for(|| f.pipeline.groups().len() == 1).await;
        f.clock.set(10_000);
        assert_eq!(f.pipeline.flush_due().await.unwrap(), 1);

        let mut next = config::load_from_str(CONFIG).unwrap();
        next.rules.clear();
        f.pipeline.reload(next).await.unwrap();
        assert!(f.pipeline.rule_names().await.is_empty());
        assert_eq!(f.pipeline.metrics().config_reloads_val(), 1);

        f.clock.set(15_000);
        wait_for(|| f.pipeline.alerts().is_empty()).await;
        f.pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn operations_after_shutdown_fail() {
        let f = fixture(CONFIG);
        f.pipeline.shutdown().await;
        assert!(matches!(f.pipeline.flush_due().await, Err(PipelineError::Stopped)));
    }
}
