use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Write;
use std::time::Duration;

use super::channel::{DeliveryError, Notifier};
use crate::config::EmailConfig;
use crate::routing::{rfc3339, Notification};

pub struct SmtpNotifier {
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    /// Addresses and relay settings are checked here so a bad receiver is
    /// rejected when the configuration loads.
    pub fn new(config: &EmailConfig, timeout: Duration) -> Result<Self, DeliveryError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Build(format!("from: {e}")))?;
        let to = config
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| DeliveryError::Build(format!("to {addr}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(DeliveryError::Build("no recipients".into()));
        }

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smarthost)
                .map_err(|e| DeliveryError::Build(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smarthost)
        };
        builder = builder.port(config.port).timeout(Some(timeout));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from,
            to,
            transport: builder.build(),
        })
    }

    fn message(&self, notification: &Notification) -> Result<Message, DeliveryError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(format!("[AI Monitor] {}", notification.title()))
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .body(render_body(notification))
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }
}

fn render_body(notification: &Notification) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Receiver: {}", notification.receiver);
    let _ = writeln!(body, "Group: {}", notification.group_labels);
    let _ = writeln!(body, "Status: {}", notification.status.as_str());
    for alert in &notification.alerts {
        let _ = writeln!(body);
        let _ = writeln!(body, "[{}] {} ({})", alert.state.as_str(), alert.rule_name, alert.severity.as_str());
        let _ = writeln!(body, "  Labels: {}", alert.labels);
        let _ = writeln!(body, "  Value: {:.2}", alert.value);
        let _ = writeln!(body, "  Since: {}", rfc3339(alert.fired_at_ms.unwrap_or(alert.started_at_ms)));
        for (k, v) in &alert.annotations {
            let _ = writeln!(body, "  {k}: {v}");
        }
    }
    body
}

#[async_trait::async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let email = self.message(notification)?;
        match self.transport.send(email).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(DeliveryError::Rejected {
                status: e.status().and_then(|c| c.to_string().parse().ok()).unwrap_or(550),
                body: e.to_string(),
            }),
            Err(e) => Err(DeliveryError::Unreachable(e.to_string())),
        }
    }
}
