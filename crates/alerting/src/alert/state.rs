use aimon_common::labels::SEVERITY;
use aimon_common::LabelSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::fingerprint::Fingerprint;
use super::rule::{AlertRule, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Pending,
    Firing,
    Resolved,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertInstance {
    pub fingerprint: Fingerprint,
    pub rule_name: String,
    pub labels: LabelSet,
    pub annotations: BTreeMap<String, String>,
    pub state: AlertState,
    pub severity: Severity,
    pub value: f64,
    pub started_at_ms: i64,
    pub fired_at_ms: Option<i64>,
    pub resolved_at_ms: Option<i64>,
    pub last_evaluated_at_ms: i64,
    pub generation: u64,
}

impl AlertInstance {
    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }

    pub fn escalated(&self) -> Self {
        let mut next = self.clone();
        next.severity = self.severity.escalated();
        next.labels.insert(SEVERITY, next.severity.as_str());
        next
    }

    pub fn resolved(&self, now_ms: i64) -> Self {
        let mut next = self.clone();
        next.state = AlertState::Resolved;
        next.resolved_at_ms = Some(now_ms);
        next.last_evaluated_at_ms = now_ms;
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Created,
    // from Pending, or directly when `for` is zero
    Fired,
    Refreshed,
    Resolved,
    Retained,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub next: Option<AlertInstance>,
    pub kind: TransitionKind,
}

pub struct TickContext<'a> {
    pub rule: &'a AlertRule,
    pub now_ms: i64,
    pub resolved_retention_ms: i64,
}

/// Next snapshot for one fingerprint. `observed` is `Some` when the
/// fingerprint is in this tick's candidate set.
pub fn step(
    current: Option<&AlertInstance>,
    fingerprint: Fingerprint,
    observed: Option<(&LabelSet, f64)>,
    ctx: &TickContext<'_>,
) -> Option<Step> {
    let now = ctx.now_ms;
    let for_ms = ctx.rule.for_ms;

    let step = match (current, observed) {
        (None, None) => return None,

        (None, Some((labels, value))) => start(fingerprint, labels, value, 1, ctx),

        (Some(cur), Some((labels, value))) => match cur.state {
            AlertState::Pending => {
                let mut next = refreshed(cur, value, ctx);
                if now - cur.started_at_ms >= for_ms {
                    next.state = AlertState::Firing;
                    next.fired_at_ms = Some(now);
                    Step {
                        next: Some(next),
                        kind: TransitionKind::Fired,
                    }
                } else {
                    Step {
                        next: Some(next),
                        kind: TransitionKind::Refreshed,
                    }
                }
            }
            AlertState::Firing => Step {
                next: Some(refreshed(cur, value, ctx)),
                kind: TransitionKind::Refreshed,
            },
            AlertState::Resolved => start(fingerprint, labels, value, cur.generation + 1, ctx),
        },

        (Some(cur), None) => match cur.state {
            AlertState::Pending => Step {
                next: None,
                kind: TransitionKind::Deleted,
            },
            AlertState::Firing => Step {
                next: Some(cur.resolved(now)),
                kind: TransitionKind::Resolved,
            },
            AlertState::Resolved => {
                let resolved_at = cur.resolved_at_ms.unwrap_or(cur.last_evaluated_at_ms);
                if now - resolved_at >= ctx.resolved_retention_ms {
                    Step {
                        next: None,
                        kind: TransitionKind::Deleted,
                    }
                } else {
                    Step {
                        next: Some(cur.clone()),
                        kind: TransitionKind::Retained,
                    }
                }
            }
        },
    };
    Some(step)
}

fn start(
    fingerprint: Fingerprint,
    labels: &LabelSet,
    value: f64,
    generation: u64,
    ctx: &TickContext<'_>,
) -> Step {
    let now = ctx.now_ms;
    let fire_now = ctx.rule.for_ms <= 0;
    let instance = AlertInstance {
        fingerprint,
        rule_name: ctx.rule.name.clone(),
        labels: labels.clone(),
        annotations: ctx.rule.render_annotations(labels, value),
        state: if fire_now {
            AlertState::Firing
        } else {
            AlertState::Pending
        },
        severity: ctx.rule.severity,
        value,
        started_at_ms: now,
        fired_at_ms: fire_now.then_some(now),
        resolved_at_ms: None,
        last_evaluated_at_ms: now,
        generation,
    };
    Step {
        next: Some(instance),
        kind: if fire_now {
            TransitionKind::Fired
        } else {
            TransitionKind::Created
        },
    }
}

fn refreshed(cur: &AlertInstance, value: f64, ctx: &TickContext<'_>) -> AlertInstance {
    let mut next = cur.clone();
    next.value = value;
    next.annotations = ctx.rule.render_annotations(&cur.labels, value);
    next.last_evaluated_at_ms = ctx.now_ms;
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::rule::{Condition, Expr};

    fn rule(for_ms: i64) -> AlertRule {
        AlertRule {
            name: "cpu_high".into(),
            expr: Expr {
                query: "cpu".into(),
                condition: Condition::GreaterThan,
                threshold: 80.0,
            },
            interval_ms: 30_000,
            for_ms,
            severity: Severity::Warning,
            labels: LabelSet::new(),
            annotations: [("summary".to_string(), "cpu at {{ $value }}".to_string())]
                .into_iter()
                .collect(),
        }
    }

    fn fp() -> Fingerprint {
        Fingerprint::from_u64(7)
    }

    fn run(
        current: Option<&AlertInstance>,
        observed: Option<f64>,
        rule: &AlertRule,
        now_ms: i64,
    ) -> Step {
        let labels = LabelSet::new().with("instance", "h1");
        let ctx = TickContext {
            rule,
            now_ms,
            resolved_retention_ms: 60_000,
        };
        step(current, fp(), observed.map(|v| (&labels, v)), &ctx).unwrap()
    }

    #[test]
    fn new_match_is_pending() {
        let r = rule(120_000);
        let s = run(None, Some(90.0), &r, 0);
        assert_eq!(s.kind, TransitionKind::Created);
        let inst = s.next.unwrap();
        assert_eq!(inst.state, AlertState::Pending);
        assert_eq!(inst.started_at_ms, 0);
        assert_eq!(inst.annotations["summary"], "cpu at 90");
    }

    #[test]
    fn zero_for_fires_immediately() {
        let r = rule(0);
        let s = run(None, Some(90.0), &r, 5);
        assert_eq!(s.kind, TransitionKind::Fired);
        assert_eq!(s.next.unwrap().fired_at_ms, Some(5));
    }

    #[test]
    fn pending_fires_exactly_at_for() {
        let r = rule(120_000);
        let mut cur = run(None, Some(90.0), &r, 0).next.unwrap();
        for t in [30_000, 60_000, 90_000] {
            let s = run(Some(&cur), Some(91.0), &r, t);
            assert_eq!(s.kind, TransitionKind::Refreshed);
            cur = s.next.unwrap();
            assert_eq!(cur.state, AlertState::Pending);
        }
        let s = run(Some(&cur), Some(92.0), &r, 120_000);
        assert_eq!(s.kind, TransitionKind::Fired);
        let inst = s.next.unwrap();
        assert_eq!(inst.state, AlertState::Firing);
        assert_eq!(inst.started_at_ms, 0);
        assert_eq!(inst.fired_at_ms, Some(120_000));
    }

    #[test]
    fn pending_deleted_on_false() {
        let r = rule(120_000);
        let cur = run(None, Some(90.0), &r, 0).next.unwrap();
        let s = run(Some(&cur), None, &r, 30_000);
        assert_eq!(s.kind, TransitionKind::Deleted);
        assert!(s.next.is_none());
    }

    #[test]
    fn firing_resolves_on_first_false() {
        let r = rule(0);
        let cur = run(None, Some(90.0), &r, 0).next.unwrap();
        let s = run(Some(&cur), None, &r, 30_000);
        assert_eq!(s.kind, TransitionKind::Resolved);
        let inst = s.next.unwrap();
        assert_eq!(inst.state, AlertState::Resolved);
        assert_eq!(inst.resolved_at_ms, Some(30_000));
    }

    #[test]
    fn resolved_retained_then_deleted() {
        let r = rule(0);
        let firing = run(None, Some(90.0), &r, 0).next.unwrap();
        let resolved = run(Some(&firing), None, &r, 10_000).next.unwrap();

        let s = run(Some(&resolved), None, &r, 40_000);
        assert_eq!(s.kind, TransitionKind::Retained);
        let s = run(Some(&resolved), None, &r, 70_000);
        assert_eq!(s.kind, TransitionKind::Deleted);
    }

    #[test]
    fn retrigger_starts_new_generation() {
        let r = rule(60_000);
        let mut firing = run(None, Some(90.0), &r, 0).next.unwrap();
        firing.state = AlertState::Firing;
        let resolved = run(Some(&firing), None, &r, 10_000).next.unwrap();

        let s = run(Some(&resolved), Some(95.0), &r, 20_000);
        assert_eq!(s.kind, TransitionKind::Created);
        let inst = s.next.unwrap();
        assert_eq!(inst.state, AlertState::Pending);
        assert_eq!(inst.generation, 2);
        assert_eq!(inst.started_at_ms, 20_000);
        assert_eq!(inst.resolved_at_ms, None);
    }

    #[test]
    fn retrigger_drops_escalation() {
        let r = rule(0);
        let firing = run(None, Some(90.0), &r, 0).next.unwrap().escalated();
        let resolved = run(Some(&firing), None, &r, 30_000).next.unwrap();
        assert_eq!(resolved.labels.get("severity"), Some("critical"));

        let again = run(Some(&resolved), Some(91.0), &r, 60_000).next.unwrap();
        assert_eq!(again.generation, 2);
        assert_eq!(again.severity, Severity::Warning);
        assert_eq!(again.labels.get("severity"), None);
    }

    #[test]
    fn escalation_bumps_label_and_severity() {
        let r = rule(0);
        let inst = run(None, Some(90.0), &r, 0).next.unwrap();
        let up = inst.escalated();
        assert_eq!(up.severity, Severity::Critical);
        assert_eq!(up.labels.get("severity"), Some("critical"));
        assert_eq!(up.fingerprint, inst.fingerprint);
    }
}
