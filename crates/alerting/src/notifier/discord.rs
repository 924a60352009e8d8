use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::channel::{check_response, DeliveryError, Notifier};
use crate::alert::{AlertState, Severity};
use crate::routing::Notification;

/// Discord accepts at most this many embeds per message.
const MAX_EMBEDS: usize = 10;

pub struct DiscordNotifier {
    webhook_url: String,
    timeout: Duration,
    client: Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String, timeout: Duration) -> Self {
        Self {
            webhook_url,
            timeout,
            client: Client::new(),
        }
    }
}

fn payload(notification: &Notification) -> Value {
    let embeds: Vec<Value> = notification
        .alerts
        .iter()
        .take(MAX_EMBEDS)
        .map(|alert| {
            let color = match (alert.state, alert.severity) {
                (AlertState::Resolved, _) => 0x36a64f,
                (_, Severity::Info) => 0x439fe0,
                (_, Severity::Warning) => 0xf2c744,
                (_, Severity::Critical) => 0xd32f2f,
            };
            json!({
                "title": format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.rule_name),
                "description": alert.annotations.get("summary").cloned().unwrap_or_default(),
                "color": color,
                "fields": [
                    { "name": "Status", "value": alert.state.as_str(), "inline": true },
                    { "name": "Instance", "value": alert.labels.get(aimon_common::labels::INSTANCE).unwrap_or("-"), "inline": true },
                    { "name": "Value", "value": format!("{:.2}", alert.value), "inline": true },
                ],
            })
        })
        .collect();

    let mut content = notification.title();
    if notification.alerts.len() > MAX_EMBEDS {
        content.push_str(&format!(" (+{} more)", notification.alerts.len() - MAX_EMBEDS));
    }
    json!({ "content": content, "embeds": embeds })
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&payload(notification))
            .send()
            .await?;
        check_response(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::testing::instance;
    use crate::grouping::GroupKey;
    use aimon_common::LabelSet;

    #[test]
    fn embeds_are_capped() {
        let alerts = (0..12)
            .map(|i| instance("disk", &format!("h{i:02}"), AlertState::Firing))
            .collect();
        let labels = LabelSet::new().with("alertname", "disk");
        let n = Notification::build(GroupKey::new("0", &labels), "chat", labels, alerts, 0);
        let p = payload(&n);
        assert_eq!(p["embeds"].as_array().unwrap().len(), MAX_EMBEDS);
        assert_eq!(p["content"], "[FIRING:12] disk (+2 more)");
        assert_eq!(p["embeds"][0]["title"], "[WARNING] disk");
    }
}
