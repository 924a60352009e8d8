use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::pipeline::PipelineError;

#[derive(Serialize)]
pub struct ReloadResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn reload(State(state): State<AppState>) -> (StatusCode, Json<ReloadResponse>) {
    let Some(path) = state.config_path.as_deref() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ReloadResponse {
                status: "error".into(),
                error: Some("no configuration file to reload".into()),
            }),
        );
    };
    match state.pipeline.reload_from_file(path).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReloadResponse {
                status: "ok".into(),
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                PipelineError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(ReloadResponse {
                    status: "error".into(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
