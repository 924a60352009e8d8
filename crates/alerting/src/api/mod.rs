pub mod alerts;
pub mod health;
pub mod metrics;
pub mod reload;
pub mod server;

pub use server::{router, serve, AppState};
