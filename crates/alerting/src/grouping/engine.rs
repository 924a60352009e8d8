use aimon_common::LabelSet;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::group::{AlertGroup, GroupKey, GroupSummary};
use super::inhibit::Inhibitor;
use crate::alert::{AlertEvent, AlertEventKind, AlertState, Fingerprint};
use crate::metrics::PipelineMetrics;
use crate::routing::{Notification, NotificationRouter, RouteTiming, RoutingTree, TimerQueue};

#[derive(Clone, Default)]
pub struct GroupRegistry {
    groups: Arc<DashMap<GroupKey, AlertGroup>>,
}

impl GroupRegistry {
    pub fn summaries(&self) -> Vec<GroupSummary> {
        let mut out: Vec<GroupSummary> = self.groups.iter().map(|g| g.summary()).collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn get(&self, key: &GroupKey) -> Option<AlertGroup> {
        self.groups.get(key).map(|g| g.value().clone())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Owns grouping, inhibition and flush scheduling. Driven by a single task:
/// `ingest` for state-machine events and `advance` when the clock reaches
/// `next_wake`.
pub struct GroupingEngine {
    tree: RoutingTree,
    inhibitor: Inhibitor,
    router: NotificationRouter,
    groups: Arc<DashMap<GroupKey, AlertGroup>>,
    firing: BTreeMap<Fingerprint, LabelSet>,
    timers: TimerQueue<GroupKey>,
    metrics: Arc<PipelineMetrics>,
}

impl GroupingEngine {
    pub fn new(
        tree: RoutingTree,
        inhibitor: Inhibitor,
        router: NotificationRouter,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            tree,
            inhibitor,
            router,
            groups: Arc::new(DashMap::new()),
            firing: BTreeMap::new(),
            timers: TimerQueue::new(),
            metrics,
        }
    }

    pub fn registry(&self) -> GroupRegistry {
        GroupRegistry {
            groups: self.groups.clone(),
        }
    }

    pub fn ingest(&mut self, event: &AlertEvent, now_ms: i64) {
        let inst = &event.instance;
        let firing_changed = match inst.state {
            AlertState::Firing => self.firing.insert(inst.fingerprint, inst.labels.clone()).as_ref() != Some(&inst.labels),
            _ => self.firing.remove(&inst.fingerprint).is_some(),
        };

        let routes: Vec<(String, String, Vec<String>, RouteTiming)> = self
            .tree
            .resolve(&inst.labels)
            .into_iter()
            .map(|r| (r.id.clone(), r.receiver.clone(), r.group_by.clone(), r.timing))
            .collect();

        let mut targets = Vec::with_capacity(routes.len());
        for (route_id, receiver, group_by, timing) in routes {
            let group_labels = inst.labels.project(&group_by);
            let key = GroupKey::new(&route_id, &group_labels);
            targets.push(key.clone());

            let known = self
                .groups
                .get(&key)
                .is_some_and(|g| g.contains(&inst.fingerprint));
            if inst.state == AlertState::Resolved && !known {
                continue;
            }

            let mut group = self.groups.entry(key.clone()).or_insert_with(|| {
                tracing::debug!(group = %key, receiver = %receiver, "group created");
                AlertGroup::new(key.clone(), &route_id, &receiver, group_labels, timing, now_ms)
            });
            let change = group.upsert(inst.clone(), now_ms);

            if event.kind == AlertEventKind::Escalated {
                group.force_notify = true;
                group.next_wake_ms = Some(now_ms);
                self.timers.schedule(key, now_ms);
            } else if change.needs_flush() {
                let due = self.router.schedule_change(&mut group, now_ms);
                self.timers.schedule(key, due);
            }
        }

        if event.kind == AlertEventKind::Escalated {
            self.evict_elsewhere(inst.fingerprint, &targets);
        }
        if firing_changed && !self.inhibitor.is_empty() {
            self.reschedule_targets(now_ms);
        }
    }

    fn evict_elsewhere(&mut self, fp: Fingerprint, keep: &[GroupKey]) {
        let mut emptied = Vec::new();
        for mut group in self.groups.iter_mut() {
            if keep.contains(group.key()) {
                continue;
            }
            if group.members.remove(&fp).is_some() {
                group.notified.remove(&fp);
                if group.is_empty() {
                    emptied.push(group.key().clone());
                }
            }
        }
        for key in emptied {
            self.groups.remove(&key);
            self.timers.cancel(&key);
        }
    }

    pub fn advance(&mut self, now_ms: i64) -> Vec<(String, Notification)> {
        let due = self.timers.pop_due(now_ms);
        let mut out = Vec::new();
        for key in due {
            self.flush(&key, now_ms, &mut out);
        }
        out
    }

    pub fn next_wake(&mut self) -> Option<i64> {
        self.timers.next_due()
    }

    pub fn flush_all(&mut self, now_ms: i64) -> Vec<(String, Notification)> {
        let mut keys: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|g| g.next_wake_ms.is_some())
            .map(|g| g.key().clone())
            .collect();
        keys.sort();
        let mut out = Vec::new();
        for key in keys {
            self.timers.cancel(&key);
            self.flush(&key, now_ms, &mut out);
        }
        out
    }

    /// Installs a new routing tree, inhibition set and receiver options.
    /// Groups whose route no longer exists (or changed receiver) are dropped;
    /// their alerts regroup on the next refresh from the state machine.
    pub fn reconfigure(&mut self, tree: RoutingTree, inhibitor: Inhibitor, router: NotificationRouter) {
        let stale: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|g| {
                tree.route(&g.route_id)
                    .map_or(true, |r| r.receiver != g.receiver || r.group_by != self.group_by_of(&g.route_id))
            })
            .map(|g| g.key().clone())
            .collect();
        for key in &stale {
            self.groups.remove(key);
            self.timers.cancel(key);
        }
        for mut g in self.groups.iter_mut() {
            if let Some(r) = tree.route(&g.route_id) {
                g.timing = r.timing;
            }
        }
        tracing::info!(dropped_groups = stale.len(), "routing reconfigured");
        self.tree = tree;
        self.inhibitor = inhibitor;
        self.router = router;
    }

    fn group_by_of(&self, route_id: &str) -> Vec<String> {
        self.tree.route(route_id).map(|r| r.group_by.clone()).unwrap_or_default()
    }

    fn flush(&mut self, key: &GroupKey, now_ms: i64, out: &mut Vec<(String, Notification)>) {
        let (sent, empty, next_wake) = {
            let Some(mut group) = self.groups.get_mut(key) else {
                return;
            };
            let suppressed: BTreeSet<Fingerprint> = group
                .firing()
                .filter(|i| {
                    self.inhibitor
                        .inhibited_by(i.fingerprint, &i.labels, &self.firing)
                        .is_some()
                })
                .map(|i| i.fingerprint)
                .collect();
            if !suppressed.is_empty() {
                self.metrics.add_alerts_inhibited(suppressed.len() as u64);
                tracing::debug!(group = %key, inhibited = suppressed.len(), "alerts inhibited");
            }
            let sent = self.router.route(&mut group, &suppressed, now_ms);
            (sent, group.is_empty(), group.next_wake_ms)
        };

        for _ in &sent {
            self.metrics.inc_notifications_built();
        }
        out.extend(sent);

        if empty {
            self.groups.remove(key);
            self.timers.cancel(key);
            tracing::debug!(group = %key, "group torn down");
        } else if let Some(wake) = next_wake {
            self.timers.schedule(key.clone(), wake);
        }
    }

    fn reschedule_targets(&mut self, now_ms: i64) {
        let mut keys = Vec::new();
        for mut group in self.groups.iter_mut() {
            let holds_target = group.firing().any(|i| self.inhibitor.is_target(&i.labels));
            if holds_target {
                let due = self.router.schedule_change(&mut group, now_ms);
                keys.push((group.key().clone(), due));
            }
        }
        for (key, due) in keys {
            self.timers.schedule(key, due);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::inhibit::InhibitRule;
    use crate::grouping::testing::instance;
    use crate::routing::{Matcher, Route};

    fn timing() -> RouteTiming {
        RouteTiming {
            group_wait_ms: 10_000,
            group_interval_ms: 5_000,
            repeat_interval_ms: 3_600_000,
        }
    }

    fn engine(inhibit: Vec<InhibitRule>) -> GroupingEngine {
        let tree = RoutingTree::new(Route::new("ops").with_group_by(&["alertname"]).with_timing(timing()));
        GroupingEngine::new(tree, Inhibitor::new(inhibit), NotificationRouter::default(), PipelineMetrics::new())
    }

    fn fired(rule: &str, host: &str) -> AlertEvent {
        AlertEvent::new(AlertEventKind::Fired, instance(rule, host, AlertState::Firing))
    }

    #[test]
    fn batches_by_group_wait_and_interval() {
        let mut e = engine(vec![]);
        e.ingest(&fired("cpu", "h1"), 0);
        assert_eq!(e.next_wake(), Some(10_000));
        assert!(e.advance(9_999).is_empty());

        let sent = e.advance(10_000);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops");

        e.ingest(&fired("cpu", "h2"), 12_000);
        assert_eq!(e.next_wake(), Some(15_000));
        let sent = e.advance(15_000);
        assert_eq!(sent[0].1.alerts.len(), 2);
    }

    #[test]
    fn refresh_does_not_duplicate_or_schedule() {
        let mut e = engine(vec![]);
        e.ingest(&fired("cpu", "h1"), 0);
        e.advance(10_000);
        let wake = e.next_wake();

        let refresh = AlertEvent::new(AlertEventKind::Refreshed, instance("cpu", "h1", AlertState::Firing));
        e.ingest(&refresh, 11_000);
        assert_eq!(e.next_wake(), wake);
        let groups = e.registry().summaries();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, 1);
        assert_eq!(groups[0].last_updated_ms, 11_000);
    }

    #[test]
    fn unknown_resolution_creates_nothing() {
        let mut e = engine(vec![]);
        let resolved = instance("cpu", "h1", AlertState::Resolved);
        e.ingest(&AlertEvent::new(AlertEventKind::Resolved, resolved), 0);
        assert!(e.registry().is_empty());
        assert_eq!(e.next_wake(), None);
    }

    #[test]
    fn resolved_group_is_torn_down() {
        let mut e = engine(vec![]);
        let a = instance("cpu", "h1", AlertState::Firing);
        e.ingest(&AlertEvent::new(AlertEventKind::Fired, a.clone()), 0);
        e.advance(10_000);
        e.ingest(&AlertEvent::new(AlertEventKind::Resolved, a.resolved(11_000)), 11_000);
        let sent = e.advance(15_000);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.status.as_str(), "resolved");
        assert!(e.registry().is_empty());
        assert_eq!(e.next_wake(), None);
    }

    #[test]
    fn escalation_forces_immediate_notification() {
        let mut e = engine(vec![]);
        let a = instance("cpu", "h1", AlertState::Firing);
        e.ingest(&AlertEvent::new(AlertEventKind::Fired, a.clone()), 0);
        e.advance(10_000);
        e.ingest(&AlertEvent::new(AlertEventKind::Escalated, a.escalated()), 20_000);
        assert_eq!(e.next_wake(), Some(20_000));
        let sent = e.advance(20_000);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.alerts[0].labels.get("severity"), Some("critical"));
    }

    #[test]
    fn inhibited_alert_never_notified_while_source_fires() {
        let rule = InhibitRule {
            source: vec![Matcher::parse("alertname=node_down").unwrap()],
            target: vec![Matcher::parse("alertname=cpu").unwrap()],
            equal: vec!["instance".into()],
        };
        let mut e = engine(vec![rule]);
        let source = instance("node_down", "h1", AlertState::Firing);
        e.ingest(&AlertEvent::new(AlertEventKind::Fired, source.clone()), 0);
        e.ingest(&fired("cpu", "h1"), 0);

        let sent = e.advance(10_000);
        let receivers: Vec<&str> = sent
            .iter()
            .flat_map(|(_, n)| n.alerts.iter().map(|a| a.rule_name.as_str()))
            .collect();
        assert_eq!(receivers, vec!["node_down"]);

        e.ingest(&AlertEvent::new(AlertEventKind::Resolved, source.resolved(12_000)), 12_000);
        let sent = e.advance(15_000);
        let cpu = sent
            .iter()
            .find(|(_, n)| n.group_labels.get("alertname") == Some("cpu"))
            .expect("cpu group flushed after source resolved");
        assert_eq!(cpu.1.alerts.len(), 1);
        assert_eq!(cpu.1.alerts[0].state, AlertState::Firing);
    }

    #[test]
    fn escalation_moves_alert_between_routes() {
        let tree = RoutingTree::new(
            Route::new("ops")
                .with_group_by(&["alertname"])
                .with_timing(timing())
                .with_child(Route::new("pager").with_matcher(Matcher::parse("severity=critical").unwrap())),
        );
        let mut e = GroupingEngine::new(tree, Inhibitor::default(), NotificationRouter::default(), PipelineMetrics::new());
        let a = instance("cpu", "h1", AlertState::Firing);
        e.ingest(&AlertEvent::new(AlertEventKind::Fired, a.clone()), 0);
        e.advance(10_000);

        e.ingest(&AlertEvent::new(AlertEventKind::Escalated, a.escalated()), 20_000);
        let groups = e.registry().summaries();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].receiver, "pager");
        let sent = e.advance(20_000);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "pager");
    }

    #[test]
    fn flush_all_sends_pending_groups() {
        let mut e = engine(vec![]);
        e.ingest(&fired("cpu", "h1"), 0);
        e.ingest(&fired("mem", "h1"), 0);
        let sent = e.flush_all(1_000);
        assert_eq!(sent.len(), 2);
        assert!(e.flush_all(2_000).is_empty());
    }
}
