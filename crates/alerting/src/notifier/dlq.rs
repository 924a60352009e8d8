use aimon_common::clock::now_ms;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::metrics::PipelineMetrics;
use crate::routing::Notification;

/// Log target for notifications that could not be delivered.
pub const ESCALATION_TARGET: &str = "aimon::escalation";

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: String,
    pub notification_id: String,
    pub receiver: String,
    pub group_key: String,
    pub error: String,
    pub attempts: u32,
    pub created_at_ms: i64,
    pub payload: serde_json::Value,
}

/// Bounded in-memory dead-letter store. The oldest record is evicted once
/// `capacity` is reached.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    metrics: Arc<PipelineMetrics>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetter>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records an undeliverable notification and raises an escalation event.
    pub fn insert(&self, notification: &Notification, error: &str, attempts: u32) -> DeadLetter {
        let entry = DeadLetter {
            id: uuid::Uuid::new_v4().to_string(),
            notification_id: notification.id.clone(),
            receiver: notification.receiver.clone(),
            group_key: notification.group_key.to_string(),
            error: error.to_string(),
            attempts,
            created_at_ms: now_ms(),
            payload: notification.webhook_payload(),
        };

        tracing::error!(
            target: ESCALATION_TARGET,
            receiver = %entry.receiver,
            group = %entry.group_key,
            notification = %entry.notification_id,
            attempts,
            error,
            "notification dead-lettered"
        );
        self.metrics.inc_deliveries_dead_lettered();

        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        entry
    }

    /// Most recent first.
    pub fn list(&self, limit: usize) -> Vec<DeadLetter> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn list_by_receiver(&self, receiver: &str, limit: usize) -> Vec<DeadLetter> {
        self.lock()
            .iter()
            .rev()
            .filter(|e| e.receiver == receiver)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertState;
    use crate::grouping::testing::instance;
    use crate::grouping::GroupKey;
    use aimon_common::LabelSet;

    fn notification(receiver: &str) -> Notification {
        let labels = LabelSet::new().with("alertname", "cpu");
        Notification::build(
            GroupKey::new("0", &labels),
            receiver,
            labels,
            vec![instance("cpu", "h1", AlertState::Firing)],
            0,
        )
    }

    #[test]
    fn insert_list_delete() {
        let metrics = PipelineMetrics::new();
        let dlq = DeadLetterQueue::new(10, metrics.clone());
        let a = dlq.insert(&notification("ops"), "500", 4);
        dlq.insert(&notification("chat"), "timeout", 4);

        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.list(10)[0].receiver, "chat");
        assert_eq!(dlq.list_by_receiver("ops", 10).len(), 1);
        assert_eq!(a.payload["receiver"], "ops");
        assert_eq!(metrics.deliveries_dead_lettered_val(), 2);

        assert!(dlq.delete(&a.id));
        assert!(!dlq.delete(&a.id));
        assert_eq!(dlq.len(), 1);
    }

    #[test]
    fn oldest_evicted_at_capacity() {
        let dlq = DeadLetterQueue::new(2, PipelineMetrics::new());
        let first = dlq.insert(&notification("a"), "x", 1);
        dlq.insert(&notification("b"), "x", 1);
        dlq.insert(&notification("c"), "x", 1);
        assert_eq!(dlq.len(), 2);
        assert!(dlq.list(10).iter().all(|e| e.id != first.id));
    }
}
