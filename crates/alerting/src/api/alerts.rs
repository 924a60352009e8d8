use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::alert::AlertInstance;
use crate::grouping::GroupSummary;
use crate::notifier::DeadLetter;
use crate::source::MetricSample;

#[derive(Deserialize)]
pub struct AlertFilter {
    pub state: Option<String>,
    pub alertname: Option<String>,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(filter): Query<AlertFilter>,
) -> Json<Vec<AlertInstance>> {
    let alerts = state
        .pipeline
        .alerts()
        .into_iter()
        .filter(|a| filter.state.as_deref().map_or(true, |s| a.state.as_str() == s))
        .filter(|a| filter.alertname.as_deref().map_or(true, |n| a.rule_name == n))
        .collect();
    Json(alerts)
}

pub async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupSummary>> {
    Json(state.pipeline.groups().summaries())
}

#[derive(Deserialize)]
pub struct DeadLetterFilter {
    pub receiver: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(filter): Query<DeadLetterFilter>,
) -> Json<Vec<DeadLetter>> {
    let limit = filter.limit.unwrap_or(100);
    let dlq = state.pipeline.dead_letters();
    let items = match filter.receiver {
        Some(r) => dlq.list_by_receiver(&r, limit),
        None => dlq.list(limit),
    };
    Json(items)
}

#[derive(Deserialize)]
pub struct AlertSelector {
    pub alertname: String,
    pub instance: Option<String>,
}

#[derive(Serialize)]
pub struct AffectedResponse {
    pub affected: usize,
}

pub async fn resolve_alerts(
    State(state): State<AppState>,
    Json(body): Json<AlertSelector>,
) -> Result<Json<AffectedResponse>, StatusCode> {
    if body.alertname.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let affected = state
        .pipeline
        .resolve(&body.alertname, body.instance.as_deref())
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(AffectedResponse { affected }))
}

pub async fn escalate_alerts(
    State(state): State<AppState>,
    Json(body): Json<AlertSelector>,
) -> Result<Json<AffectedResponse>, StatusCode> {
    if body.alertname.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let affected = state
        .pipeline
        .escalate(&body.alertname, body.instance.as_deref())
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(AffectedResponse { affected }))
}

/// Pushes samples into the in-memory source. Unavailable when the pipeline
/// reads from Prometheus.
pub async fn push_samples(
    State(state): State<AppState>,
    Json(samples): Json<Vec<MetricSample>>,
) -> Result<(StatusCode, Json<AffectedResponse>), StatusCode> {
    let source = state.pipeline.memory_source().ok_or(StatusCode::CONFLICT)?;
    let affected = samples.len();
    for sample in samples {
        source.ingest(sample);
    }
    Ok((StatusCode::ACCEPTED, Json(AffectedResponse { affected })))
}
