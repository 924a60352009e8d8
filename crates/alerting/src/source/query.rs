use aimon_common::clock::parse_duration_ms;
use aimon_common::LabelSet;

use super::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Last,
    Avg,
    Min,
    Max,
    Sum,
    Count,
}

impl Aggregation {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "last" => Some(Self::Last),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            _ => None,
        }
    }
}

/// Parsed form of the in-memory expression grammar:
/// `[func(]metric[{label="value",...}][[window]][)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub func: Aggregation,
    pub metric: String,
    pub matchers: LabelSet,
    pub window_ms: Option<i64>,
}

impl Query {
    pub fn parse(expr: &str) -> Result<Self, QueryError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(invalid("empty expression"));
        }

        let (func, selector) = match expr.find('(') {
            Some(open) => {
                let name = expr[..open].trim();
                let func = Aggregation::from_name(name)
                    .ok_or_else(|| invalid(format!("unknown function {name:?}")))?;
                let inner = expr[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("missing closing parenthesis"))?;
                (func, inner.trim())
            }
            None => (Aggregation::Last, expr),
        };

        let name_end = selector
            .find(|c: char| !is_metric_char(c))
            .unwrap_or(selector.len());
        let metric = &selector[..name_end];
        if metric.is_empty() {
            return Err(invalid("missing metric name"));
        }

        let mut rest = selector[name_end..].trim_start();
        let mut matchers = LabelSet::new();
        if let Some(after) = rest.strip_prefix('{') {
            let close = after
                .find('}')
                .ok_or_else(|| invalid("unterminated label matcher block"))?;
            matchers = parse_matchers(&after[..close])?;
            rest = after[close + 1..].trim_start();
        }

        let mut window_ms = None;
        if let Some(after) = rest.strip_prefix('[') {
            let close = after
                .find(']')
                .ok_or_else(|| invalid("unterminated range"))?;
            let raw = &after[..close];
            let ms = parse_duration_ms(raw)
                .filter(|ms| *ms > 0)
                .ok_or_else(|| invalid(format!("bad range {raw:?}")))?;
            window_ms = Some(ms);
            rest = after[close + 1..].trim_start();
        }

        if !rest.is_empty() {
            return Err(invalid(format!("unexpected trailing input {rest:?}")));
        }

        Ok(Self {
            func,
            metric: metric.to_string(),
            matchers,
            window_ms,
        })
    }

    /// True when `labels` carries every equality matcher of the query.
    pub fn selects(&self, labels: &LabelSet) -> bool {
        self.matchers.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

fn parse_matchers(body: &str) -> Result<LabelSet, QueryError> {
    let mut out = LabelSet::new();
    let mut rest = body.trim();

    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| invalid(format!("expected label=\"value\" in {rest:?}")))?;
        let name = rest[..eq].trim();
        if name.is_empty() || !name.chars().all(is_label_char) {
            return Err(invalid(format!("bad label name {name:?}")));
        }

        let after = rest[eq + 1..].trim_start();
        let after = after
            .strip_prefix('"')
            .ok_or_else(|| invalid(format!("label {name} value must be quoted")))?;
        let close = after
            .find('"')
            .ok_or_else(|| invalid(format!("unterminated value for label {name}")))?;
        out.insert(name, &after[..close]);

        rest = after[close + 1..].trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
        } else if !rest.is_empty() {
            return Err(invalid(format!("expected ',' before {rest:?}")));
        }
    }

    Ok(out)
}

fn is_metric_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.')
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn invalid(msg: impl Into<String>) -> QueryError {
    QueryError::InvalidExpression(msg.into())
}
