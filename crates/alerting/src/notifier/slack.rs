use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::channel::{check_response, DeliveryError, Notifier};
use crate::alert::{AlertInstance, AlertState, Severity};
use crate::routing::{Notification, NotificationStatus};

pub struct SlackNotifier {
    webhook_url: String,
    channel: Option<String>,
    timeout: Duration,
    client: Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, channel: Option<String>, timeout: Duration) -> Self {
        Self {
            webhook_url,
            channel,
            timeout,
            client: Client::new(),
        }
    }

    fn payload(&self, notification: &Notification) -> Value {
        let attachments: Vec<Value> = notification.alerts.iter().map(attachment).collect();
        let mut payload = json!({
            "text": notification.title(),
            "attachments": attachments,
        });
        if let Some(channel) = &self.channel {
            payload["channel"] = json!(channel);
        }
        payload
    }
}

fn color(alert: &AlertInstance) -> &'static str {
    if alert.state == AlertState::Resolved {
        return "#36a64f";
    }
    match alert.severity {
        Severity::Info => "#439fe0",
        Severity::Warning => "#f2c744",
        Severity::Critical => "#d32f2f",
    }
}

fn attachment(alert: &AlertInstance) -> Value {
    let status_emoji = match alert.state {
        AlertState::Resolved => ":white_check_mark:",
        _ => ":fire:",
    };
    let mut fields = vec![
        json!({ "title": "Severity", "value": alert.severity.as_str(), "short": true }),
        json!({ "title": "Value", "value": format!("{:.2}", alert.value), "short": true }),
    ];
    if let Some(instance) = alert.labels.get(aimon_common::labels::INSTANCE) {
        fields.push(json!({ "title": "Instance", "value": instance, "short": true }));
    }
    json!({
        "color": color(alert),
        "title": format!("{} {}", status_emoji, alert.rule_name),
        "text": alert.annotations.get("summary").cloned().unwrap_or_else(|| alert.labels.to_string()),
        "fields": fields,
    })
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let payload = self.payload(notification);
        let resp = self
            .client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;
        check_response(resp).await
    }
}
