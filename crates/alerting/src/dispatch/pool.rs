use aimon_common::backoff::BackoffConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::metrics::PipelineMetrics;
use crate::notifier::{DeadLetterQueue, Notifier, RetryNotifier};
use crate::routing::Notification;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Deliveries in flight across all receivers.
    pub max_concurrency: usize,
    /// Queued notifications per receiver before new ones are dead-lettered.
    pub queue_capacity: usize,
    pub backoff: BackoffConfig,
    pub timeout: Duration,
    pub dead_letter_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            queue_capacity: 256,
            backoff: BackoffConfig::default(),
            timeout: Duration::from_secs(10),
            dead_letter_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    UnknownReceiver(String),
    QueueFull(String),
    Closed(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownReceiver(r) => write!(f, "unknown receiver {r}"),
            Self::QueueFull(r) => write!(f, "delivery queue full for receiver {r}"),
            Self::Closed(r) => write!(f, "delivery queue closed for receiver {r}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// One bounded queue and worker per receiver, with a shared semaphore
/// bounding concurrent delivery attempts. Backoff sleeps hold no permit.
pub struct DispatchPool {
    senders: HashMap<String, mpsc::Sender<Notification>>,
    workers: Vec<JoinHandle<()>>,
    dlq: Arc<DeadLetterQueue>,
}

impl DispatchPool {
    pub fn start(
        config: &DispatchConfig,
        drivers: HashMap<String, Arc<dyn Notifier>>,
        dlq: Arc<DeadLetterQueue>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let mut senders = HashMap::with_capacity(drivers.len());
        let mut workers = Vec::with_capacity(drivers.len());

        for (receiver, driver) in drivers {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            let retry = RetryNotifier::new(driver, config.backoff.clone(), dlq.clone(), metrics.clone())
                .with_permits(semaphore.clone());
            workers.push(tokio::spawn(run_worker(receiver.clone(), rx, retry)));
            senders.insert(receiver, tx);
        }

        tracing::info!(receivers = senders.len(), max_concurrency = config.max_concurrency, "dispatch pool started");
        Self { senders, workers, dlq }
    }

    /// Queues a built notification. Anything that cannot be queued is
    /// dead-lettered before the error is returned.
    pub fn submit(&self, receiver: &str, notification: Notification) -> Result<(), DispatchError> {
        let (err, notification) = match self.senders.get(receiver) {
            None => (DispatchError::UnknownReceiver(receiver.to_string()), notification),
            Some(tx) => match tx.try_send(notification) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(n)) => (DispatchError::QueueFull(receiver.to_string()), n),
                Err(TrySendError::Closed(n)) => (DispatchError::Closed(receiver.to_string()), n),
            },
        };
        self.dlq.insert(&notification, &err.to_string(), 0);
        Err(err)
    }

    pub fn receivers(&self) -> Vec<String> {
        let mut out: Vec<String> = self.senders.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dlq
    }

    /// Stops accepting work and waits until every queued notification has
    /// been delivered or dead-lettered.
    pub async fn close(self) {
        drop(self.senders);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "delivery worker ended abnormally");
            }
        }
    }
}

async fn run_worker(
    receiver: String,
    mut rx: mpsc::Receiver<Notification>,
    retry: RetryNotifier,
) {
    while let Some(mut notification) = rx.recv().await {
        if let Err(e) = retry.send(&mut notification).await {
            tracing::warn!(
                receiver = %receiver,
                driver = retry.name(),
                attempts = notification.attempts,
                error = %e,
                "delivery failed"
            );
        }
    }
    tracing::debug!(receiver = %receiver, "delivery worker stopped");
}
