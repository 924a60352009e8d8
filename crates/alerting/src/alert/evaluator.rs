use aimon_common::labels::{ALERTNAME, SEVERITY};
use aimon_common::LabelSet;
use std::sync::Arc;

use super::rule::AlertRule;
use crate::source::{QueryError, SignalSource};

/// Candidate set of one rule evaluation, ordered by label set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    pub matches: Vec<(LabelSet, f64)>,
}

impl EvaluationResult {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[derive(Clone)]
pub struct Evaluator {
    source: Arc<dyn SignalSource>,
}

impl Evaluator {
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        Self { source }
    }

    pub async fn evaluate(&self, rule: &AlertRule, now_ms: i64) -> Result<EvaluationResult, QueryError> {
        let samples = self.source.query(&rule.expr.query, now_ms).await?;

        let mut matches: Vec<(LabelSet, f64)> = samples
            .into_iter()
            .filter(|s| rule.expr.holds(s.value))
            .map(|s| {
                let mut labels = s.labels.merged(&rule.labels);
                labels.insert(ALERTNAME, rule.name.as_str());
                labels.insert(SEVERITY, rule.severity.as_str());
                (labels, s.value)
            })
            .collect();

        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(EvaluationResult { matches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::rule::{Condition, Expr, Severity};
    use crate::source::MemorySource;

    fn rule() -> AlertRule {
        AlertRule {
            name: "cpu_high".into(),
            expr: Expr {
                query: "cpu".into(),
                condition: Condition::GreaterThan,
                threshold: 80.0,
            },
            interval_ms: 30_000,
            for_ms: 0,
            severity: Severity::Warning,
            labels: LabelSet::new().with("team", "infra"),
            annotations: Default::default(),
        }
    }

    #[tokio::test]
    async fn keeps_only_matching_samples() {
        let src = MemorySource::new(600_000);
        src.record("cpu", LabelSet::new().with("instance", "b"), 1_000, 95.0);
        src.record("cpu", LabelSet::new().with("instance", "a"), 1_000, 85.0);
        src.record("cpu", LabelSet::new().with("instance", "c"), 1_000, 10.0);

        let eval = Evaluator::new(Arc::new(src));
        let result = eval.evaluate(&rule(), 1_000).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.matches[0].0.get("instance"), Some("a"));
        assert_eq!(result.matches[1].0.get("instance"), Some("b"));
        let labels = &result.matches[0].0;
        assert_eq!(labels.get("alertname"), Some("cpu_high"));
        assert_eq!(labels.get("severity"), Some("warning"));
        assert_eq!(labels.get("team"), Some("infra"));
    }

    #[tokio::test]
    async fn rule_labels_override_sample_labels() {
        let src = MemorySource::new(600_000);
        src.record("cpu", LabelSet::new().with("team", "db"), 1_000, 95.0);

        let eval = Evaluator::new(Arc::new(src));
        let result = eval.evaluate(&rule(), 1_000).await.unwrap();
        assert_eq!(result.matches[0].0.get("team"), Some("infra"));
    }

    #[tokio::test]
    async fn query_error_propagates() {
        let mut bad = rule();
        bad.expr.query = "avg(cpu[".into();
        let eval = Evaluator::new(Arc::new(MemorySource::new(600_000)));
        let err = eval.evaluate(&bad, 1_000).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidExpression(_)));
    }
}
