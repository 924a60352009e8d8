pub mod alert;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod grouping;
pub mod metrics;
pub mod notifier;
pub mod pipeline;
pub mod routing;
pub mod shutdown;
pub mod source;
