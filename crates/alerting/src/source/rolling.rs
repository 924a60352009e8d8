use std::collections::VecDeque;

use super::query::Aggregation;

/// Time-ordered samples of a single series, trimmed to a retention window
/// behind the newest sample.
pub struct RollingSeries {
    retention_ms: i64,
    samples: VecDeque<(i64, f64)>,
}

impl RollingSeries {
    pub fn new(retention_ms: i64) -> Self {
        Self {
            retention_ms,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, timestamp_ms: i64, value: f64) {
        match self.samples.back() {
            Some(&(last, _)) if timestamp_ms < last => {
                let pos = self.samples.partition_point(|&(ts, _)| ts <= timestamp_ms);
                self.samples.insert(pos, (timestamp_ms, value));
            }
            Some(&(last, _)) if timestamp_ms == last => {
                if let Some(back) = self.samples.back_mut() {
                    back.1 = value;
                }
            }
            _ => self.samples.push_back((timestamp_ms, value)),
        }
        self.evict();
    }

    /// Aggregates samples with `from_ms < ts <= to_ms`.
    pub fn aggregate(&self, func: Aggregation, from_ms: i64, to_ms: i64) -> Option<f64> {
        let mut window = self
            .samples
            .iter()
            .filter(|(ts, _)| *ts > from_ms && *ts <= to_ms)
            .map(|(_, v)| *v)
            .peekable();
        window.peek()?;

        Some(match func {
            Aggregation::Last => window.last()?,
            Aggregation::Avg => {
                let (sum, n) = window.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                sum / n as f64
            }
            Aggregation::Min => window.reduce(f64::min)?,
            Aggregation::Max => window.reduce(f64::max)?,
            Aggregation::Sum => window.sum(),
            Aggregation::Count => window.count() as f64,
        })
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    fn evict(&mut self) {
        let Some(&(newest, _)) = self.samples.back() else {
            return;
        };
        let cutoff = newest - self.retention_ms;
        while let Some(&(ts, _)) = self.samples.front() {
            if ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
