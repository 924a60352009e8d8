use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    DeliveryError, DiscordNotifier, Notifier, SlackNotifier, SmtpNotifier, WebhookNotifier,
};
use crate::config::{ReceiverConfig, WebhookConfig};

/// Builds the driver for one receiver.
pub fn build_driver(
    receiver: &ReceiverConfig,
    timeout: Duration,
) -> Result<Arc<dyn Notifier>, DeliveryError> {
    if let Some(cfg) = &receiver.webhook {
        let secret = webhook_secret(&receiver.name, cfg)?;
        return Ok(Arc::new(WebhookNotifier::new(cfg.url.clone(), secret, timeout)));
    }
    if let Some(cfg) = &receiver.slack {
        return Ok(Arc::new(SlackNotifier::new(
            cfg.webhook_url.clone(),
            cfg.channel.clone(),
            timeout,
        )));
    }
    if let Some(cfg) = &receiver.discord {
        return Ok(Arc::new(DiscordNotifier::new(cfg.webhook_url.clone(), timeout)));
    }
    if let Some(cfg) = &receiver.email {
        return Ok(Arc::new(SmtpNotifier::new(cfg, timeout)?));
    }
    Err(DeliveryError::Build(format!(
        "receiver {:?} has no integration",
        receiver.name
    )))
}

/// Builds every driver up front so a bad receiver fails the whole load.
pub fn build_drivers(
    receivers: &[ReceiverConfig],
    timeout: Duration,
) -> Result<HashMap<String, Arc<dyn Notifier>>, DeliveryError> {
    receivers
        .iter()
        .map(|r| Ok((r.name.clone(), build_driver(r, timeout)?)))
        .collect()
}

fn webhook_secret(receiver: &str, cfg: &WebhookConfig) -> Result<Option<Vec<u8>>, DeliveryError> {
    if let Some(secret) = &cfg.secret {
        return Ok(Some(secret.as_bytes().to_vec()));
    }
    match &cfg.secret_env {
        Some(var) => std::env::var(var)
            .map(|s| Some(s.into_bytes()))
            .map_err(|_| {
                DeliveryError::Build(format!(
                    "receiver {receiver:?}: environment variable {var} is not set"
                ))
            }),
        None => Ok(None),
    }
}
