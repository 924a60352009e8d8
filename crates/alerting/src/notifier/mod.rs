mod channel;
mod discord;
mod dlq;
mod registry;
mod retry;
mod slack;
mod smtp;
mod webhook;

pub use channel::{DeliveryError, Notifier};
pub use discord::DiscordNotifier;
pub use dlq::{DeadLetter, DeadLetterQueue, ESCALATION_TARGET};
pub use registry::{build_driver, build_drivers};
pub use retry::RetryNotifier;
pub use slack::SlackNotifier;
pub use smtp::SmtpNotifier;
pub use webhook::WebhookNotifier;
