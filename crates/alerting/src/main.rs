use aimon_alerting::api::{self, AppState};
use aimon_alerting::config;
use aimon_alerting::pipeline::Pipeline;
use aimon_alerting::shutdown::wait_for_shutdown;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "/etc/aimon/alerting.yml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config_path = PathBuf::from(std::env::var("AIMON_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.into()));
    tracing::info!(path = %config_path.display(), "loading configuration");
    let cfg = config::load_from_file(&config_path)?;
    let listen = cfg.server.listen.clone();

    let pipeline = Arc::new(Pipeline::start(cfg)?);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "operator API listening");

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let state = AppState {
        pipeline: pipeline.clone(),
        config_path: Some(config_path),
    };
    let api_handle = tokio::spawn(api::serve(listener, state, async move {
        let _ = stop_rx.changed().await;
    }));

    wait_for_shutdown().await;
    tracing::info!("shutdown requested");

    pipeline.shutdown().await;
    let _ = stop_tx.send(true);
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "API server failed"),
        Err(e) => tracing::error!(error = %e, "API task join failed"),
    }
    Ok(())
}
