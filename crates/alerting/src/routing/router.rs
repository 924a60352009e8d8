use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::notification::Notification;
use crate::alert::{AlertInstance, AlertState, Fingerprint, Severity};
use crate::grouping::AlertGroup;

/// Decides when a group is flushed and what each flush sends.
#[derive(Debug, Clone, Default)]
pub struct NotificationRouter {
    send_resolved: HashMap<String, bool>,
}

impl NotificationRouter {
    pub fn new(send_resolved: HashMap<String, bool>) -> Self {
        Self { send_resolved }
    }

    pub fn sends_resolved(&self, receiver: &str) -> bool {
        self.send_resolved.get(receiver).copied().unwrap_or(true)
    }

    /// Schedules the next flush after a membership or state change and
    /// returns it. Before the first flush that is `first_seen + group_wait`;
    /// afterwards the next `last_flush + k * group_interval` boundary. An
    /// earlier pending wake-up is kept.
    pub fn schedule_change(&self, group: &mut AlertGroup, now_ms: i64) -> i64 {
        let due = match group.last_flush_ms {
            None => group.first_seen_ms.saturating_add(group.timing.group_wait_ms),
            Some(last) => {
                let gi = group.timing.group_interval_ms.max(1);
                let k = (now_ms - last).saturating_add(gi - 1).div_euclid(gi).max(1);
                last.saturating_add(k.saturating_mul(gi))
            }
        };
        let due = match group.next_wake_ms {
            Some(wake) if wake < due => wake,
            _ => due,
        };
        group.next_wake_ms = Some(due);
        due
    }

    /// Flushes `group` at `now_ms`. Members in `suppressed` are left out of
    /// the message. Returns the notifications to deliver, one per receiver.
    pub fn route(
        &self,
        group: &mut AlertGroup,
        suppressed: &BTreeSet<Fingerprint>,
        now_ms: i64,
    ) -> Vec<(String, Notification)> {
        let visible = |i: &&AlertInstance| !suppressed.contains(&i.fingerprint);

        let mut firing: Vec<AlertInstance> = group
            .members
            .values()
            .map(|m| &m.instance)
            .filter(|i| i.state == AlertState::Firing)
            .filter(visible)
            .cloned()
            .collect();
        let firing_map: BTreeMap<Fingerprint, Severity> =
            firing.iter().map(|i| (i.fingerprint, i.severity)).collect();

        let send_resolved = self.sends_resolved(&group.receiver);
        let mut resolved: Vec<AlertInstance> = if send_resolved {
            group
                .members
                .values()
                .map(|m| &m.instance)
                .filter(|i| i.state == AlertState::Resolved && group.notified.contains_key(&i.fingerprint))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let changed = firing_map != group.notified || !resolved.is_empty();
        let repeat_due = !firing.is_empty()
            && group
                .last_sent_ms
                .map_or(true, |sent| now_ms - sent >= group.timing.repeat_interval_ms);

        let mut out = Vec::new();
        if (changed || repeat_due || group.force_notify) && !(firing.is_empty() && resolved.is_empty()) {
            firing.sort_by(|a, b| a.labels.cmp(&b.labels));
            resolved.sort_by(|a, b| a.labels.cmp(&b.labels));
            firing.append(&mut resolved);

            let notification = Notification::build(
                group.key.clone(),
                &group.receiver,
                group.labels.clone(),
                firing,
                now_ms,
            );
            tracing::debug!(
                group = %group.key,
                receiver = %group.receiver,
                alerts = notification.alerts.len(),
                status = notification.status.as_str(),
                "group flushed"
            );
            out.push((group.receiver.clone(), notification));
            group.last_sent_ms = Some(now_ms);
        }

        group.notified = firing_map;
        group.last_flush_ms = Some(now_ms);
        group.force_notify = false;
        group.members.retain(|_, m| m.instance.state != AlertState::Resolved);
        group.next_wake_ms = if group.notified.is_empty() {
            None
        } else {
            Some(
                group
                    .last_sent_ms
                    .unwrap_or(now_ms)
                    .saturating_add(group.timing.repeat_interval_ms),
            )
        };
        out
    }
}
