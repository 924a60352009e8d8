use aimon_common::clock::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::alert::AlertEvent;
use crate::dispatch::{DispatchConfig, DispatchPool};
use crate::grouping::{GroupingEngine, Inhibitor};
use crate::metrics::PipelineMetrics;
use crate::notifier::{DeadLetterQueue, Notifier};
use crate::routing::{Notification, NotificationRouter, RoutingTree};

pub(crate) struct Reconfigure {
    pub tree: RoutingTree,
    pub inhibitor: Inhibitor,
    pub router: NotificationRouter,
    pub drivers: HashMap<String, Arc<dyn Notifier>>,
    pub delivery: DispatchConfig,
}

pub(crate) enum Control {
    Reconfigure(Box<Reconfigure>),
    /// Flush every group that is due at the current clock reading.
    FlushDue { done: oneshot::Sender<usize> },
    Shutdown { flush: bool, done: oneshot::Sender<()> },
}

/// Single owner of grouping state. Events, control messages and timer
/// wake-ups are handled one at a time, so a group never sees a flush and a
/// membership change interleave.
pub(crate) struct Actor {
    pub engine: GroupingEngine,
    pub pool: DispatchPool,
    pub dlq: Arc<DeadLetterQueue>,
    pub metrics: Arc<PipelineMetrics>,
    pub clock: Arc<dyn Clock>,
    pub events: mpsc::Receiver<AlertEvent>,
    pub control: mpsc::Receiver<Control>,
}

impl Actor {
    pub async fn run(mut self) {
        let (flush, done) = loop {
            let wait = self
                .engine
                .next_wake()
                .map(|due| Duration::from_millis((due - self.clock.now_ms()).max(0) as u64));
            let wake = async move {
                match wait {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                ctrl = self.control.recv() => {
                    self.drain_events();
                    match ctrl {
                        Some(Control::Reconfigure(r)) => self.reconfigure(*r),
                        Some(Control::FlushDue { done }) => {
                            let sent = self.advance();
                            let _ = done.send(sent);
                        }
                        Some(Control::Shutdown { flush, done }) => break (flush, Some(done)),
                        None => {
                            tracing::debug!("pipeline handle dropped, abandoning scheduled notifications");
                            break (false, None);
                        }
                    }
                }
                _ = wake => {
                    self.advance();
                }
                event = self.events.recv() => match event {
                    Some(event) => self.ingest(&event),
                    None => break (false, None),
                },
            }
        };

        self.shutdown(flush).await;
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn ingest(&mut self, event: &AlertEvent) {
        tracing::debug!(
            fingerprint = %event.instance.fingerprint,
            rule = %event.instance.rule_name,
            event = event.status_str(),
            "alert event"
        );
        self.engine.ingest(event, self.clock.now_ms());
    }

    /// Events already queued are ingested before any control message so
    /// that operator actions observe every earlier transition.
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.ingest(&event);
        }
    }

    fn advance(&mut self) -> usize {
        let out = self.engine.advance(self.clock.now_ms());
        self.dispatch(out)
    }

    fn dispatch(&self, out: Vec<(String, Notification)>) -> usize {
        let count = out.len();
        for (receiver, notification) in out {
            tracing::info!(
                receiver = %receiver,
                group = %notification.group_key,
                status = notification.status.as_str(),
                alerts = notification.alerts.len(),
                "notification queued"
            );
            if let Err(e) = self.pool.submit(&receiver, notification) {
                tracing::warn!(receiver = %receiver, error = %e, "notification dead-lettered");
            }
        }
        count
    }

    fn reconfigure(&mut self, r: Reconfigure) {
        self.engine.reconfigure(r.tree, r.inhibitor, r.router);
        let pool = DispatchPool::start(&r.delivery, r.drivers, self.dlq.clone(), self.metrics.clone());
        let old = std::mem::replace(&mut self.pool, pool);
        tokio::spawn(old.close());
    }

    async fn shutdown(mut self, flush: bool) {
        self.drain_events();
        let now = self.clock.now_ms();
        if flush {
            let out = self.engine.flush_all(now);
            let sent = self.dispatch(out);
            tracing::info!(notifications = sent, "scheduled notifications flushed");
        } else {
            tracing::info!(groups = self.engine.registry().len(), "scheduled notifications abandoned");
        }
        self.pool.close().await;
        tracing::info!("delivery queues drained");
    }
}
