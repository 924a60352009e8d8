use aimon_common::clock::now_ms;
use aimon_common::signing::{sign_body, SIGNATURE_HEADER};
use reqwest::Client;
use std::time::Duration;

use super::channel::{check_response, DeliveryError, Notifier};
use crate::routing::Notification;

pub struct WebhookNotifier {
    url: String,
    secret: Option<Vec<u8>>,
    timeout: Duration,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: Option<Vec<u8>>, timeout: Duration) -> Self {
        Self {
            url,
            secret,
            timeout,
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&notification.webhook_payload())
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        let mut req = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            req = req.header(SIGNATURE_HEADER, sign_body(secret, now_ms(), &body));
        }

        let resp = req.body(body).send().await?;
        check_response(resp).await
    }
}
