use aimon_common::LabelSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An alerting rule as consumed by the evaluator. Built from configuration
/// and never mutated afterwards; reloads replace the whole rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub name: String,
    pub expr: Expr,
    pub interval_ms: i64,
    pub for_ms: i64,
    pub severity: Severity,
    pub labels: LabelSet,
    pub annotations: BTreeMap<String, String>,
}

/// Predicate over a query result: `query` is sent to the signal source and
/// every returned sample is compared against `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub query: String,
    pub condition: Condition,
    pub threshold: f64,
}

impl Expr {
    pub fn holds(&self, value: f64) -> bool {
        self.condition.evaluate(value, self.threshold)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Condition {
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Condition {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LessOrEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() < f64::EPSILON,
            Self::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            ">" | "gt" => Some(Self::GreaterThan),
            "<" | "lt" => Some(Self::LessThan),
            ">=" | "ge" | "gte" => Some(Self::GreaterOrEqual),
            "<=" | "le" | "lte" => Some(Self::LessOrEqual),
            "==" | "eq" => Some(Self::Equal),
            "!=" | "ne" => Some(Self::NotEqual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// One step up; critical stays critical.
    pub fn escalated(self) -> Self {
        match self {
            Self::Info => Self::Warning,
            Self::Warning | Self::Critical => Self::Critical,
        }
    }
}

impl AlertRule {
    pub fn render_annotations(&self, labels: &LabelSet, value: f64) -> BTreeMap<String, String> {
        self.annotations
            .iter()
            .map(|(k, tpl)| (k.clone(), render_template(tpl, labels, value)))
            .collect()
    }
}

/// Expands `{{ $value }}` and `{{ $labels.<name> }}`. Unknown placeholders
/// are kept verbatim.
pub fn render_template(tpl: &str, labels: &LabelSet, value: f64) -> String {
    let mut out = String::with_capacity(tpl.len());
    let mut rest = tpl;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after[..close].trim();
        if key == "$value" {
            out.push_str(&value.to_string());
        } else if let Some(name) = key.strip_prefix("$labels.") {
            out.push_str(labels.get(name).unwrap_or(""));
        } else {
            out.push_str(&rest[open..open + 2 + close + 2]);
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}
