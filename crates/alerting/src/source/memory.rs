use aimon_common::LabelSet;
use dashmap::DashMap;
use std::sync::Arc;

use super::query::Query;
use super::rolling::RollingSeries;
use super::{MetricSample, QueryError, Sample, Series, SignalSource};

/// Lookback applied when an expression has no explicit `[window]`.
pub const DEFAULT_LOOKBACK_MS: i64 = 5 * 60_000;

#[derive(Clone, Hash, Eq, PartialEq)]
struct SeriesKey {
    name: String,
    labels: LabelSet,
}

/// Process-local signal source fed by pushed samples.
#[derive(Clone)]
pub struct MemorySource {
    series: Arc<DashMap<SeriesKey, RollingSeries>>,
    retention_ms: i64,
}

impl MemorySource {
    pub fn new(retention_ms: i64) -> Self {
        Self {
            series: Arc::new(DashMap::new()),
            retention_ms,
        }
    }

    pub fn ingest(&self, sample: MetricSample) {
        let key = SeriesKey {
            name: sample.name,
            labels: sample.labels,
        };
        self.series
            .entry(key)
            .or_insert_with(|| RollingSeries::new(self.retention_ms))
            .push(sample.timestamp_ms, sample.value);
    }

    /// Convenience for tests and adapters that do not build samples.
    pub fn record(&self, name: &str, labels: LabelSet, timestamp_ms: i64, value: f64) {
        self.ingest(MetricSample {
            name: name.to_string(),
            labels,
            value,
            timestamp_ms,
        });
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    fn eval_at(&self, query: &Query, at_ms: i64) -> Vec<Sample> {
        let window = query.window_ms.unwrap_or(DEFAULT_LOOKBACK_MS);
        let mut out: Vec<Sample> = self
            .series
            .iter()
            .filter(|e| e.key().name == query.metric && query.selects(&e.key().labels))
            .filter_map(|e| {
                e.value()
                    .aggregate(query.func, at_ms - window, at_ms)
                    .map(|value| Sample {
                        labels: e.key().labels.clone(),
                        value,
                    })
            })
            .collect();
        out.sort_by(|a, b| a.labels.cmp(&b.labels));
        out
    }
}

#[async_trait::async_trait]
impl SignalSource for MemorySource {
    async fn query(&self, expr: &str, at_ms: i64) -> Result<Vec<Sample>, QueryError> {
        let query = Query::parse(expr)?;
        Ok(self.eval_at(&query, at_ms))
    }

    async fn query_range(
        &self,
        expr: &str,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> Result<Vec<Series>, QueryError> {
        if step_ms <= 0 {
            return Err(QueryError::InvalidExpression("step must be positive".into()));
        }
        if end_ms < start_ms {
            return Err(QueryError::InvalidExpression("end before start".into()));
        }
        let query = Query::parse(expr)?;

        let mut series: Vec<Series> = Vec::new();
        let mut t = start_ms;
        while t <= end_ms {
            for sample in self.eval_at(&query, t) {
                match series.iter_mut().find(|s| s.labels == sample.labels) {
                    Some(s) => s.points.push((t, sample.value)),
                    None => series.push(Series {
                        labels: sample.labels,
                        points: vec![(t, sample.value)],
                    }),
                }
            }
            t += step_ms;
        }
        series.sort_by(|a, b| a.labels.cmp(&b.labels));
        Ok(series)
    }
}
