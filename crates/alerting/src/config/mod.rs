mod loader;
mod schema;

pub use loader::{
    build, load_from_file, load_from_str, ConfigError, RuntimeConfig, ServerSettings,
    SourceSettings,
};
pub use schema::{
    AlertingConfig, DeliveryConfig, DiscordConfig, EmailConfig, InhibitRuleConfig,
    ReceiverConfig, RouteConfig, RuleConfig, ServerConfig, ShutdownPolicy, SlackConfig,
    SourceConfig, WebhookConfig,
};
