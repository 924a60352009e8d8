use aimon_common::labels::{ALERTNAME, INSTANCE};
use aimon_common::LabelSet;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::evaluator::EvaluationResult;
use super::event::{AlertEvent, AlertEventKind};
use super::fingerprint::Fingerprint;
use super::rule::AlertRule;
use super::state::{step, AlertInstance, AlertState, TickContext, TransitionKind};

#[derive(Debug, Clone, PartialEq)]
pub enum StateError {
    /// Two label sets of one tick, or two rules, hash to one fingerprint.
    FingerprintConflict {
        fingerprint: Fingerprint,
        rule: String,
        labels: LabelSet,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FingerprintConflict {
                fingerprint,
                rule,
                labels,
            } => write!(f, "fingerprint {fingerprint} conflict in rule {rule} for {labels}"),
        }
    }
}

impl std::error::Error for StateError {}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub events: Vec<AlertEvent>,
    pub conflicts: Vec<StateError>,
}

/// Sharded map of alert instances keyed by fingerprint. Each fingerprint is
/// only ever mutated through its shard entry.
pub struct AlertStore {
    instances: DashMap<Fingerprint, AlertInstance>,
    by_rule: DashMap<String, BTreeSet<Fingerprint>>,
    resolved_retention_ms: i64,
}

impl AlertStore {
    pub fn new(resolved_retention_ms: i64) -> Self {
        Self {
            instances: DashMap::new(),
            by_rule: DashMap::new(),
            resolved_retention_ms,
        }
    }

    /// Applies one evaluation tick of `rule` and returns the snapshots that
    /// must travel downstream.
    pub fn apply(&self, rule: &AlertRule, result: &EvaluationResult, now_ms: i64) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let mut observed: HashMap<Fingerprint, (&LabelSet, f64)> = HashMap::new();
        let mut poisoned: HashSet<Fingerprint> = HashSet::new();

        for (labels, value) in &result.matches {
            let fp = Fingerprint::of(&rule.name, labels);
            if observed.insert(fp, (labels, *value)).is_some() {
                poisoned.insert(fp);
                outcome.conflicts.push(StateError::FingerprintConflict {
                    fingerprint: fp,
                    rule: rule.name.clone(),
                    labels: labels.clone(),
                });
            }
        }

        let mut keys: BTreeSet<Fingerprint> = self
            .by_rule
            .get(&rule.name)
            .map(|s| s.value().clone())
            .unwrap_or_default();
        keys.extend(observed.keys().copied());

        let ctx = TickContext {
            rule,
            now_ms,
            resolved_retention_ms: self.resolved_retention_ms,
        };
        let mut live = BTreeSet::new();

        for fp in keys {
            if poisoned.contains(&fp) {
                if self.instances.contains_key(&fp) {
                    live.insert(fp);
                }
                continue;
            }
            let seen = observed.get(&fp).copied();

            let kind = match self.instances.entry(fp) {
                Entry::Occupied(mut entry) => {
                    if entry.get().rule_name != rule.name {
                        outcome.conflicts.push(StateError::FingerprintConflict {
                            fingerprint: fp,
                            rule: rule.name.clone(),
                            labels: entry.get().labels.clone(),
                        });
                        continue;
                    }
                    let Some(s) = step(Some(entry.get()), fp, seen, &ctx) else {
                        continue;
                    };
                    match s.next {
                        Some(next) => {
                            live.insert(fp);
                            emit(&mut outcome.events, s.kind, &next);
                            entry.insert(next);
                        }
                        None => {
                            entry.remove();
                        }
                    }
                    s.kind
                }
                Entry::Vacant(entry) => {
                    let Some(s) = step(None, fp, seen, &ctx) else {
                        continue;
                    };
                    let Some(next) = s.next else { continue };
                    live.insert(fp);
                    emit(&mut outcome.events, s.kind, &next);
                    entry.insert(next);
                    s.kind
                }
            };

            tracing::trace!(rule = %rule.name, fingerprint = %fp, ?kind, "alert transition");
        }

        if live.is_empty() {
            self.by_rule.remove(&rule.name);
        } else {
            self.by_rule.insert(rule.name.clone(), live);
        }
        outcome
    }

    /// Forces matching alerts out of the active set. Firing instances resolve,
    /// Pending ones are deleted.
    pub fn force_resolve(&self, alertname: &str, instance: Option<&str>, now_ms: i64) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for fp in self.matching(alertname, instance) {
            let mut removed_rule = None;
            if let Entry::Occupied(mut entry) = self.instances.entry(fp) {
                match entry.get().state {
                    AlertState::Firing => {
                        let next = entry.get().resolved(now_ms);
                        events.push(AlertEvent::new(AlertEventKind::Resolved, next.clone()));
                        entry.insert(next);
                    }
                    AlertState::Pending => {
                        removed_rule = Some(entry.remove().rule_name);
                    }
                    AlertState::Resolved => {}
                }
            }
            if let Some(rule) = removed_rule {
                if let Some(mut set) = self.by_rule.get_mut(&rule) {
                    set.remove(&fp);
                }
            }
        }
        events
    }

    /// Bumps severity of matching Firing alerts one step.
    pub fn escalate(&self, alertname: &str, instance: Option<&str>) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for fp in self.matching(alertname, instance) {
            if let Entry::Occupied(mut entry) = self.instances.entry(fp) {
                if entry.get().is_firing() {
                    let next = entry.get().escalated();
                    events.push(AlertEvent::new(AlertEventKind::Escalated, next.clone()));
                    entry.insert(next);
                }
            }
        }
        events
    }

    /// Drops instances of rules no longer configured. Firing ones are
    /// reported as resolved on their way out.
    pub fn retain_rules(&self, names: &HashSet<String>, now_ms: i64) -> Vec<AlertEvent> {
        let removed: Vec<String> = self
            .by_rule
            .iter()
            .filter(|e| !names.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut events = Vec::new();
        for rule in removed {
            let Some((_, fps)) = self.by_rule.remove(&rule) else {
                continue;
            };
            for fp in fps {
                if let Some((_, inst)) = self.instances.remove(&fp) {
                    if inst.is_firing() {
                        events.push(AlertEvent::new(AlertEventKind::Resolved, inst.resolved(now_ms)));
                    }
                }
            }
        }
        events
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<AlertInstance> {
        self.instances.get(fp).map(|e| e.value().clone())
    }

    /// All instances ordered by rule name then labels.
    pub fn snapshot(&self) -> Vec<AlertInstance> {
        let mut out: Vec<AlertInstance> = self.instances.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| (&a.rule_name, &a.labels).cmp(&(&b.rule_name, &b.labels)));
        out
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn matching(&self, alertname: &str, instance: Option<&str>) -> Vec<Fingerprint> {
        let mut fps: Vec<Fingerprint> = self
            .instances
            .iter()
            .filter(|e| {
                let labels = &e.value().labels;
                labels.get(ALERTNAME) == Some(alertname)
                    && instance.map_or(true, |i| labels.get(INSTANCE) == Some(i))
            })
            .map(|e| *e.key())
            .collect();
        fps.sort();
        fps
    }
}

fn emit(events: &mut Vec<AlertEvent>, kind: TransitionKind, next: &AlertInstance) {
    let event_kind = match kind {
        TransitionKind::Fired => AlertEventKind::Fired,
        TransitionKind::Resolved => AlertEventKind::Resolved,
        TransitionKind::Refreshed if next.is_firing() => AlertEventKind::Refreshed,
        _ => return,
    };
    events.push(AlertEvent::new(event_kind, next.clone()));
}
