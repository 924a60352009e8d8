use aimon_common::backoff::{retry_async, BackoffConfig, Exhausted};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use super::channel::{DeliveryError, Notifier};
use super::dlq::DeadLetterQueue;
use crate::metrics::PipelineMetrics;
use crate::routing::Notification;

/// Wraps a driver with exponential backoff. Notifications that exhaust their
/// attempts, or fail with a non-retryable error, go to the dead-letter queue.
/// When given a shared semaphore, a permit is held for each attempt only,
/// never across a backoff sleep.
pub struct RetryNotifier {
    inner: Arc<dyn Notifier>,
    backoff: BackoffConfig,
    dlq: Arc<DeadLetterQueue>,
    metrics: Arc<PipelineMetrics>,
    permits: Option<Arc<Semaphore>>,
}

impl RetryNotifier {
    pub fn new(
        inner: Arc<dyn Notifier>,
        backoff: BackoffConfig,
        dlq: Arc<DeadLetterQueue>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            inner,
            backoff,
            dlq,
            metrics,
            permits: None,
        }
    }

    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = Some(permits);
        self
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Delivers `notification`, recording the attempts used on it.
    pub async fn send(&self, notification: &mut Notification) -> Result<(), DeliveryError> {
        let start = Instant::now();
        let inner = &self.inner;
        let n: &Notification = notification;
        let permits = self.permits.as_deref();

        let result = retry_async(&self.backoff, DeliveryError::is_retryable, move |attempt| async move {
            let _permit = match permits {
                Some(sem) => sem.acquire().await.ok(),
                None => None,
            };
            tracing::debug!(receiver = %n.receiver, driver = inner.name(), attempt, "delivering");
            inner.send(n).await
        })
        .await;
        self.metrics.record_delivery_latency(start);

        match result {
            Ok(((), attempts)) => {
                notification.attempts = attempts;
                self.metrics.inc_deliveries_succeeded();
                self.metrics.add_delivery_retries(u64::from(attempts - 1));
                tracing::info!(
                    receiver = %notification.receiver,
                    group = %notification.group_key,
                    alerts = notification.alerts.len(),
                    attempts,
                    "notification delivered"
                );
                Ok(())
            }
            Err(Exhausted { attempts, last_error }) => {
                notification.attempts = attempts;
                self.metrics.add_delivery_retries(u64::from(attempts - 1));
                self.dlq.insert(notification, &last_error.to_string(), attempts);
                Err(last_error)
            }
        }
    }
}
