use aimon_common::backoff::BackoffConfig;
use aimon_common::clock::parse_duration_ms;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::schema::{
    AlertingConfig, DeliveryConfig, InhibitRuleConfig, ReceiverConfig, RouteConfig, RuleConfig,
    ServerConfig, ShutdownPolicy, SourceConfig,
};
use crate::alert::{AlertRule, Condition, Expr, Severity};
use crate::dispatch::DispatchConfig;
use crate::grouping::InhibitRule;
use crate::routing::{Matcher, Route, RouteTiming, RoutingTree};
use crate::source::Query;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

/// Validated configuration with durations, matchers and rules resolved.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server: ServerSettings,
    pub source: SourceSettings,
    pub delivery: DispatchConfig,
    pub rules: Vec<AlertRule>,
    pub inhibit_rules: Vec<InhibitRule>,
    pub route: RoutingTree,
    pub receivers: Vec<ReceiverConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub listen: String,
    pub resolved_retention_ms: i64,
    pub on_shutdown: ShutdownPolicy,
    pub event_buffer: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceSettings {
    Memory { retention_ms: i64 },
    Prometheus { url: String, timeout: Duration },
}

pub fn load_from_file(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(yaml: &str) -> Result<RuntimeConfig, ConfigError> {
    let cfg: AlertingConfig = serde_yaml::from_str(yaml)?;
    build(cfg)
}

/// Validates the raw configuration and resolves it. Any error rejects the
/// whole document.
pub fn build(cfg: AlertingConfig) -> Result<RuntimeConfig, ConfigError> {
    let source = build_source(&cfg.source)?;
    let memory_source = matches!(source, SourceSettings::Memory { .. });

    let mut names = HashSet::new();
    let mut rules = Vec::with_capacity(cfg.rules.len());
    for rule in &cfg.rules {
        if !names.insert(rule.name.as_str()) {
            return Err(invalid(format!("duplicate rule name {:?}", rule.name)));
        }
        rules.push(build_rule(rule, memory_source)?);
    }

    validate_receivers(&cfg.receivers)?;

    let root = build_route(&cfg.route, None, "route")?;
    let route = RoutingTree::new(root);
    for receiver in route.receivers() {
        if !cfg.receivers.iter().any(|r| r.name == receiver) {
            return Err(invalid(format!("route references unknown receiver {receiver:?}")));
        }
    }

    let inhibit_rules = cfg
        .inhibit_rules
        .iter()
        .enumerate()
        .map(|(i, r)| build_inhibit_rule(i, r))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RuntimeConfig {
        server: build_server(&cfg.server)?,
        source,
        delivery: build_delivery(&cfg.delivery)?,
        rules,
        inhibit_rules,
        route,
        receivers: cfg.receivers,
    })
}

fn duration(field: &str, value: &str) -> Result<i64, ConfigError> {
    parse_duration_ms(value).ok_or_else(|| invalid(format!("{field}: invalid duration {value:?}")))
}

fn positive_duration(field: &str, value: &str) -> Result<i64, ConfigError> {
    let ms = duration(field, value)?;
    if ms <= 0 {
        return Err(invalid(format!("{field} must be > 0")));
    }
    Ok(ms)
}

fn build_server(cfg: &ServerConfig) -> Result<ServerSettings, ConfigError> {
    if cfg.listen.is_empty() {
        return Err(invalid("server.listen must not be empty"));
    }
    if cfg.event_buffer == 0 {
        return Err(invalid("server.event_buffer must be > 0"));
    }
    Ok(ServerSettings {
        listen: cfg.listen.clone(),
        resolved_retention_ms: duration("server.resolved_retention", &cfg.resolved_retention)?,
        on_shutdown: cfg.on_shutdown,
        event_buffer: cfg.event_buffer,
    })
}

fn build_source(cfg: &SourceConfig) -> Result<SourceSettings, ConfigError> {
    match cfg {
        SourceConfig::Memory { retention } => Ok(SourceSettings::Memory {
            retention_ms: positive_duration("source.retention", retention)?,
        }),
        SourceConfig::Prometheus { url, timeout } => {
            if url.is_empty() {
                return Err(invalid("source.url must not be empty"));
            }
            let ms = positive_duration("source.timeout", timeout)?;
            Ok(SourceSettings::Prometheus {
                url: url.clone(),
                timeout: Duration::from_millis(ms as u64),
            })
        }
    }
}

fn build_delivery(cfg: &DeliveryConfig) -> Result<DispatchConfig, ConfigError> {
    if cfg.max_concurrency == 0 {
        return Err(invalid("delivery.max_concurrency must be > 0"));
    }
    if cfg.queue_capacity == 0 {
        return Err(invalid("delivery.queue_capacity must be > 0"));
    }
    if cfg.max_attempts == 0 {
        return Err(invalid("delivery.max_attempts must be > 0"));
    }
    if cfg.dead_letter_capacity == 0 {
        return Err(invalid("delivery.dead_letter_capacity must be > 0"));
    }
    if cfg.backoff_factor.is_nan() || cfg.backoff_factor < 1.0 {
        return Err(invalid("delivery.backoff_factor must be >= 1"));
    }
    let initial = positive_duration("delivery.initial_backoff", &cfg.initial_backoff)?;
    let max = positive_duration("delivery.max_backoff", &cfg.max_backoff)?;
    if max < initial {
        return Err(invalid("delivery.max_backoff must be >= delivery.initial_backoff"));
    }
    let timeout = positive_duration("delivery.timeout", &cfg.timeout)?;

    Ok(DispatchConfig {
        max_concurrency: cfg.max_concurrency,
        queue_capacity: cfg.queue_capacity,
        backoff: BackoffConfig {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(initial as u64),
            backoff_factor: cfg.backoff_factor,
            max_delay: Duration::from_millis(max as u64),
        },
        timeout: Duration::from_millis(timeout as u64),
        dead_letter_capacity: cfg.dead_letter_capacity,
    })
}

fn build_rule(cfg: &RuleConfig, memory_source: bool) -> Result<AlertRule, ConfigError> {
    let name = cfg.name.trim();
    if name.is_empty() {
        return Err(invalid("rule name must not be empty"));
    }
    let field = |f: &str| format!("rules[{name}].{f}");

    if cfg.expr.trim().is_empty() {
        return Err(invalid(format!("{} must not be empty", field("expr"))));
    }
    if memory_source {
        Query::parse(&cfg.expr).map_err(|e| invalid(format!("{}: {e}", field("expr"))))?;
    }
    let condition = Condition::parse(&cfg.condition)
        .ok_or_else(|| invalid(format!("{}: unknown condition {:?}", field("condition"), cfg.condition)))?;
    if !cfg.threshold.is_finite() {
        return Err(invalid(format!("{} must be finite", field("threshold"))));
    }
    let severity = Severity::parse(&cfg.severity)
        .ok_or_else(|| invalid(format!("{}: unknown severity {:?}", field("severity"), cfg.severity)))?;

    Ok(AlertRule {
        name: name.to_string(),
        expr: Expr {
            query: cfg.expr.clone(),
            condition,
            threshold: cfg.threshold,
        },
        interval_ms: positive_duration(&field("interval"), &cfg.interval)?,
        for_ms: duration(&field("for"), &cfg.for_duration)?,
        severity,
        labels: cfg.labels.clone().into(),
        annotations: cfg.annotations.clone(),
    })
}

fn parse_matchers(field: &str, raw: &[String]) -> Result<Vec<Matcher>, ConfigError> {
    raw.iter()
        .map(|m| Matcher::parse(m).map_err(|e| invalid(format!("{field}: {e}"))))
        .collect()
}

fn build_inhibit_rule(index: usize, cfg: &InhibitRuleConfig) -> Result<InhibitRule, ConfigError> {
    let source = parse_matchers(&format!("inhibit_rules[{index}].source_matchers"), &cfg.source_matchers)?;
    let target = parse_matchers(&format!("inhibit_rules[{index}].target_matchers"), &cfg.target_matchers)?;
    if source.is_empty() || target.is_empty() {
        return Err(invalid(format!(
            "inhibit_rules[{index}] needs both source and target matchers"
        )));
    }
    Ok(InhibitRule {
        source,
        target,
        equal: cfg.equal.clone(),
    })
}

/// Resolves one node, inheriting unset fields from `parent`.
fn build_route(cfg: &RouteConfig, parent: Option<&Route>, path: &str) -> Result<Route, ConfigError> {
    let receiver = match (&cfg.receiver, parent) {
        (Some(r), _) if !r.is_empty() => r.clone(),
        (_, Some(p)) => p.receiver.clone(),
        _ => return Err(invalid(format!("{path}.receiver is required on the root route"))),
    };
    let inherited = parent.map(|p| p.timing).unwrap_or_default();

    let timing = RouteTiming {
        group_wait_ms: match &cfg.group_wait {
            Some(v) => duration(&format!("{path}.group_wait"), v)?,
            None => inherited.group_wait_ms,
        },
        group_interval_ms: match &cfg.group_interval {
            Some(v) => positive_duration(&format!("{path}.group_interval"), v)?,
            None => inherited.group_interval_ms,
        },
        repeat_interval_ms: match &cfg.repeat_interval {
            Some(v) => positive_duration(&format!("{path}.repeat_interval"), v)?,
            None => inherited.repeat_interval_ms,
        },
    };

    let mut route = Route::new(receiver).with_timing(timing).with_continue(cfg.continue_matching);
    route.matchers = parse_matchers(&format!("{path}.matchers"), &cfg.matchers)?;
    route.group_by = match (&cfg.group_by, parent) {
        (Some(g), _) => g.clone(),
        (None, Some(p)) => p.group_by.clone(),
        (None, None) => Vec::new(),
    };

    for (i, child) in cfg.routes.iter().enumerate() {
        let child = build_route(child, Some(&route), &format!("{path}.routes[{i}]"))?;
        route = route.with_child(child);
    }
    Ok(route)
}

fn validate_receivers(receivers: &[ReceiverConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for r in receivers {
        if r.name.is_empty() {
            return Err(invalid("receiver name must not be empty"));
        }
        if !names.insert(r.name.as_str()) {
            return Err(invalid(format!("duplicate receiver {:?}", r.name)));
        }
        if r.integration_count() != 1 {
            return Err(invalid(format!(
                "receiver {:?} must configure exactly one of webhook, slack, discord, email",
                r.name
            )));
        }
        if let Some(email) = &r.email {
            if email.to.is_empty() {
                return Err(invalid(format!("receiver {:?}: email.to must not be empty", r.name)));
            }
        }
    }
    Ok(())
}

impl RuntimeConfig {
    /// `send_resolved` flag of every receiver, keyed by name.
    pub fn send_resolved(&self) -> std::collections::HashMap<String, bool> {
        self.receivers
            .iter()
            .map(|r| (r.name.clone(), r.send_resolved))
            .collect()
    }
}
