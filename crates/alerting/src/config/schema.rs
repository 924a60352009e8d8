use serde::Deserialize;
use std::collections::BTreeMap;

/// On-disk layout of the alerting configuration. Durations are kept as
/// strings here and converted by the loader.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AlertingConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub inhibit_rules: Vec<InhibitRuleConfig>,
    pub route: RouteConfig,
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_resolved_retention")]
    pub resolved_retention: String,
    #[serde(default)]
    pub on_shutdown: ShutdownPolicy,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            resolved_retention: default_resolved_retention(),
            on_shutdown: ShutdownPolicy::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// What happens to scheduled notifications when the process stops.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    #[default]
    Flush,
    Abandon,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Memory {
        #[serde(default = "default_memory_retention")]
        retention: String,
    },
    Prometheus {
        url: String,
        #[serde(default = "default_query_timeout")]
        timeout: String,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Memory {
            retention: default_memory_retention(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: String,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
    #[serde(default = "default_delivery_timeout")]
    pub timeout: String,
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            backoff_factor: default_backoff_factor(),
            max_backoff: default_max_backoff(),
            timeout: default_delivery_timeout(),
            dead_letter_capacity: default_dead_letter_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RuleConfig {
    pub name: String,
    pub expr: String,
    pub condition: String,
    pub threshold: f64,
    #[serde(default = "default_rule_interval")]
    pub interval: String,
    #[serde(rename = "for", default = "default_for")]
    pub for_duration: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InhibitRuleConfig {
    pub source_matchers: Vec<String>,
    pub target_matchers: Vec<String>,
    #[serde(default)]
    pub equal: Vec<String>,
}

/// Routing tree node. Unset fields inherit from the parent.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub receiver: Option<String>,
    #[serde(default)]
    pub matchers: Vec<String>,
    pub group_by: Option<Vec<String>>,
    pub group_wait: Option<String>,
    pub group_interval: Option<String>,
    pub repeat_interval: Option<String>,
    #[serde(rename = "continue", default)]
    pub continue_matching: bool,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReceiverConfig {
    pub name: String,
    #[serde(default = "yes")]
    pub send_resolved: bool,
    pub webhook: Option<WebhookConfig>,
    pub slack: Option<SlackConfig>,
    pub discord: Option<DiscordConfig>,
    pub email: Option<EmailConfig>,
}

impl ReceiverConfig {
    pub fn integration_count(&self) -> usize {
        [
            self.webhook.is_some(),
            self.slack.is_some(),
            self.discord.is_some(),
            self.email.is_some(),
        ]
        .iter()
        .filter(|x| **x)
        .count()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: Option<String>,
    /// Name of an environment variable holding the signing secret.
    pub secret_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DiscordConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmailConfig {
    pub smarthost: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default = "yes")]
    pub starttls: bool,
}

fn default_listen() -> String {
    "0.0.0.0:9093".to_string()
}

fn default_resolved_retention() -> String {
    "5m".to_string()
}

fn default_event_buffer() -> usize {
    1024
}

fn default_memory_retention() -> String {
    "1h".to_string()
}

fn default_query_timeout() -> String {
    "10s".to_string()
}

fn default_max_concurrency() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> String {
    "500ms".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_backoff() -> String {
    "30s".to_string()
}

fn default_delivery_timeout() -> String {
    "10s".to_string()
}

fn default_dead_letter_capacity() -> usize {
    1000
}

fn default_rule_interval() -> String {
    "30s".to_string()
}

fn default_for() -> String {
    "0".to_string()
}

fn default_severity() -> String {
    "warning".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn yes() -> bool {
    true
}
