use aimon_common::LabelSet;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::alert::{AlertInstance, AlertState};
use crate::grouping::GroupKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Firing,
    Resolved,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

/// A fully built message for one receiver. Built by the router before it is
/// queued for delivery and never changed afterwards except for `attempts`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub group_key: GroupKey,
    pub receiver: String,
    pub status: NotificationStatus,
    pub alerts: Vec<AlertInstance>,
    pub group_labels: LabelSet,
    pub common_labels: LabelSet,
    pub common_annotations: BTreeMap<String, String>,
    pub generated_at_ms: i64,
    pub attempts: u32,
}

impl Notification {
    pub fn build(
        group_key: GroupKey,
        receiver: &str,
        group_labels: LabelSet,
        alerts: Vec<AlertInstance>,
        now_ms: i64,
    ) -> Self {
        let status = if alerts.iter().any(|a| a.state == AlertState::Firing) {
            NotificationStatus::Firing
        } else {
            NotificationStatus::Resolved
        };

        let mut iter = alerts.iter();
        let (common_labels, common_annotations) = match iter.next() {
            Some(first) => iter.fold(
                (first.labels.clone(), first.annotations.clone()),
                |(labels, mut annotations), a| {
                    annotations.retain(|k, v| a.annotations.get(k) == Some(&*v));
                    (labels.intersection(&a.labels), annotations)
                },
            ),
            None => (LabelSet::new(), BTreeMap::new()),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            group_key,
            receiver: receiver.to_string(),
            status,
            alerts,
            group_labels,
            common_labels,
            common_annotations,
            generated_at_ms: now_ms,
            attempts: 0,
        }
    }

    pub fn firing_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.state == AlertState::Firing).count()
    }

    pub fn resolved_count(&self) -> usize {
        self.alerts.len() - self.firing_count()
    }

    /// Short one-line title used by chat and email drivers.
    pub fn title(&self) -> String {
        let name = self
            .common_labels
            .get(aimon_common::labels::ALERTNAME)
            .unwrap_or("alerts");
        match self.status {
            NotificationStatus::Firing => format!("[FIRING:{}] {name}", self.firing_count()),
            NotificationStatus::Resolved => format!("[RESOLVED] {name}"),
        }
    }

    /// JSON body posted by the webhook driver.
    pub fn webhook_payload(&self) -> Value {
        let alerts: Vec<Value> = self
            .alerts
            .iter()
            .map(|a| {
                json!({
                    "status": a.state.as_str(),
                    "labels": a.labels,
                    "annotations": a.annotations,
                    "startsAt": rfc3339(a.fired_at_ms.unwrap_or(a.started_at_ms)),
                    "endsAt": a.resolved_at_ms.map(rfc3339),
                    "fingerprint": a.fingerprint.to_string(),
                    "value": a.value,
                })
            })
            .collect();

        json!({
            "receiver": self.receiver,
            "status": self.status.as_str(),
            "alerts": alerts,
            "groupLabels": self.group_labels,
            "commonLabels": self.common_labels,
            "commonAnnotations": self.common_annotations,
            "groupKey": self.group_key.as_str(),
        })
    }
}

pub fn rfc3339(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::testing::instance;

    fn notification() -> Notification {
        let mut a = instance("cpu_high", "h1", AlertState::Firing);
        a.annotations.insert("runbook".into(), "http://wiki/cpu".into());
        a.annotations.insert("summary".into(), "h1 hot".into());
        let mut b = instance("cpu_high", "h2", AlertState::Resolved);
        b.annotations.insert("runbook".into(), "http://wiki/cpu".into());
        b.annotations.insert("summary".into(), "h2 hot".into());
        let group_labels = LabelSet::new().with("alertname", "cpu_high");
        Notification::build(GroupKey::new("0", &group_labels), "ops", group_labels, vec![a, b], 1_000)
    }

    #[test]
    fn common_fields_are_intersections() {
        let n = notification();
        assert_eq!(n.status, NotificationStatus::Firing);
        assert_eq!(n.common_labels.get("alertname"), Some("cpu_high"));
        assert_eq!(n.common_labels.get("instance"), None);
        assert_eq!(n.common_annotations.len(), 1);
        assert_eq!(n.common_annotations["runbook"], "http://wiki/cpu");
        assert_eq!(n.title(), "[FIRING:1] cpu_high");
    }

    #[test]
    fn webhook_payload_shape() {
        let n = notification();
        let body = n.webhook_payload();
        assert_eq!(body["receiver"], "ops");
        assert_eq!(body["status"], "firing");
        assert_eq!(body["groupKey"], r#"0:{alertname="cpu_high"}"#);
        assert_eq!(body["alerts"].as_array().unwrap().len(), 2);
        assert_eq!(body["alerts"][0]["startsAt"], "1970-01-01T00:00:00.000Z");
        assert!(body["alerts"][0]["endsAt"].is_null());
        assert_eq!(body["alerts"][1]["status"], "resolved");
        assert_eq!(body["commonLabels"]["alertname"], "cpu_high");
        assert_eq!(body["groupLabels"]["alertname"], "cpu_high");
    }

    #[test]
    fn all_resolved_status() {
        let b = instance("cpu_high", "h2", AlertState::Resolved);
        let n = Notification::build(GroupKey::new("0", &LabelSet::new()), "ops", LabelSet::new(), vec![b], 0);
        assert_eq!(n.status, NotificationStatus::Resolved);
        assert_eq!(n.title(), "[RESOLVED] cpu_high");
    }
}
