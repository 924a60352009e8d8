use aimon_common::LabelSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::alert::{AlertInstance, AlertState, Fingerprint, Severity};
use crate::routing::RouteTiming;

/// Route id plus the values of that route's `group_by` labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(route_id: &str, group_labels: &LabelSet) -> Self {
        Self(format!("{route_id}:{group_labels}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct GroupMember {
    pub instance: AlertInstance,
    pub last_updated_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberChange {
    Added,
    StateChanged,
    Refreshed,
}

impl MemberChange {
    pub fn needs_flush(&self) -> bool {
        !matches!(self, Self::Refreshed)
    }
}

#[derive(Debug, Clone)]
pub struct AlertGroup {
    pub key: GroupKey,
    pub route_id: String,
    pub receiver: String,
    pub labels: LabelSet,
    pub timing: RouteTiming,
    pub members: BTreeMap<Fingerprint, GroupMember>,
    pub first_seen_ms: i64,
    pub last_updated_ms: i64,
    /// Firing members (and their severity) as last announced to the receiver.
    pub notified: BTreeMap<Fingerprint, Severity>,
    pub last_flush_ms: Option<i64>,
    pub last_sent_ms: Option<i64>,
    pub next_wake_ms: Option<i64>,
    pub force_notify: bool,
}

impl AlertGroup {
    pub fn new(
        key: GroupKey,
        route_id: &str,
        receiver: &str,
        labels: LabelSet,
        timing: RouteTiming,
        now_ms: i64,
    ) -> Self {
        Self {
            key,
            route_id: route_id.to_string(),
            receiver: receiver.to_string(),
            labels,
            timing,
            members: BTreeMap::new(),
            first_seen_ms: now_ms,
            last_updated_ms: now_ms,
            notified: BTreeMap::new(),
            last_flush_ms: None,
            last_sent_ms: None,
            next_wake_ms: None,
            force_notify: false,
        }
    }

    /// Inserts or refreshes a member. A member already present with the same
    /// state and severity is only refreshed.
    pub fn upsert(&mut self, instance: AlertInstance, now_ms: i64) -> MemberChange {
        self.last_updated_ms = now_ms;
        match self.members.get_mut(&instance.fingerprint) {
            Some(member) => {
                let same = member.instance.state == instance.state
                    && member.instance.severity == instance.severity
                    && member.instance.generation == instance.generation;
                member.instance = instance;
                member.last_updated_ms = now_ms;
                if same {
                    MemberChange::Refreshed
                } else {
                    MemberChange::StateChanged
                }
            }
            None => {
                self.members.insert(
                    instance.fingerprint,
                    GroupMember {
                        instance,
                        last_updated_ms: now_ms,
                    },
                );
                MemberChange::Added
            }
        }
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.members.contains_key(fp)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn firing(&self) -> impl Iterator<Item = &AlertInstance> {
        self.members
            .values()
            .map(|m| &m.instance)
            .filter(|i| i.state == AlertState::Firing)
    }

    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            key: self.key.clone(),
            receiver: self.receiver.clone(),
            labels: self.labels.clone(),
            members: self.members.len(),
            firing: self.firing().count(),
            first_seen_ms: self.first_seen_ms,
            last_updated_ms: self.last_updated_ms,
            last_sent_ms: self.last_sent_ms,
            next_wake_ms: self.next_wake_ms,
        }
    }
}

/// Read-only view served by the API.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub receiver: String,
    pub labels: LabelSet,
    pub members: usize,
    pub firing: usize,
    pub first_seen_ms: i64,
    pub last_updated_ms: i64,
    pub last_sent_ms: Option<i64>,
    pub next_wake_ms: Option<i64>,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use aimon_common::labels::{ALERTNAME, INSTANCE, SEVERITY};

    pub fn instance(rule: &str, host: &str, state: AlertState) -> AlertInstance {
        let labels = LabelSet::new()
            .with(ALERTNAME, rule)
            .with(INSTANCE, host)
            .with(SEVERITY, "warning");
        AlertInstance {
            fingerprint: Fingerprint::of(rule, &labels),
            rule_name: rule.to_string(),
            labels,
            annotations: Default::default(),
            state,
            severity: Severity::Warning,
            value: 1.0,
            started_at_ms: 0,
            fired_at_ms: Some(0),
            resolved_at_ms: (state == AlertState::Resolved).then_some(0),
            last_evaluated_at_ms: 0,
            generation: 1,
        }
    }
}
