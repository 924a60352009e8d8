use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::{alerts, health, metrics, reload};
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// File re-read by `POST /-/reload`.
    pub config_path: Option<PathBuf>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::metrics))
        .route("/api/v1/alerts", get(alerts::list_alerts))
        .route("/api/v1/alerts/resolve", post(alerts::resolve_alerts))
        .route("/api/v1/alerts/escalate", post(alerts::escalate_alerts))
        .route("/api/v1/groups", get(alerts::list_groups))
        .route("/api/v1/dead-letters", get(alerts::list_dead_letters))
        .route("/api/v1/samples", post(alerts::push_samples))
        .route("/-/reload", post(reload::reload))
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}
