mod memory;
mod prometheus;
mod query;
mod rolling;

use aimon_common::LabelSet;
use serde::{Deserialize, Serialize};

pub use memory::MemorySource;
pub use prometheus::PrometheusSource;
pub use query::{Aggregation, Query};

/// A raw observation pushed into a source. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: LabelSet,
    pub value: f64,
    pub timestamp_ms: i64,
}

/// One element of an instant query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: LabelSet,
    pub value: f64,
}

/// One series of a range query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: LabelSet,
    pub points: Vec<(i64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    Unreachable(String),
    InvalidExpression(String),
    BadResponse(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "signal source unreachable: {e}"),
            Self::InvalidExpression(e) => write!(f, "invalid expression: {e}"),
            Self::BadResponse(e) => write!(f, "bad response: {e}"),
        }
    }
}

impl std::error::Error for QueryError {}

/// Uniform time-series query interface consumed by the rule evaluator.
#[async_trait::async_trait]
pub trait SignalSource: Send + Sync {
    async fn query(&self, expr: &str, at_ms: i64) -> Result<Vec<Sample>, QueryError>;

    async fn query_range(
        &self,
        expr: &str,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> Result<Vec<Series>, QueryError>;
}
