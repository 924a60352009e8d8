use aimon_common::clock::Clock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::evaluator::Evaluator;
use super::event::{AlertEvent, AlertEventKind};
use super::rule::AlertRule;
use super::store::AlertStore;
use crate::metrics::PipelineMetrics;
use crate::source::QueryError;

/// Everything a rule task needs to run one evaluation.
pub struct EvaluationContext {
    pub evaluator: Evaluator,
    pub store: Arc<AlertStore>,
    pub events: mpsc::Sender<AlertEvent>,
    pub metrics: Arc<PipelineMetrics>,
    pub clock: Arc<dyn Clock>,
}

/// Runs one tick of `rule`: query, state transitions, downstream events.
/// Returns the number of events forwarded.
pub async fn evaluate_once(ctx: &EvaluationContext, rule: &AlertRule, now_ms: i64) -> Result<usize, QueryError> {
    let start = Instant::now();
    ctx.metrics.inc_evaluations();

    let result = match ctx.evaluator.evaluate(rule, now_ms).await {
        Ok(r) => r,
        Err(e) => {
            ctx.metrics.inc_evaluation_failures();
            return Err(e);
        }
    };
    ctx.metrics.record_evaluation_latency(start);

    let outcome = ctx.store.apply(rule, &result, now_ms);
    for conflict in &outcome.conflicts {
        tracing::error!(rule = %rule.name, error = %conflict, "state invariant violated, fingerprint skipped");
    }
    ctx.metrics.add_state_conflicts(outcome.conflicts.len() as u64);

    let fired = outcome.events.iter().filter(|e| e.kind == AlertEventKind::Fired).count();
    let resolved = outcome.events.iter().filter(|e| e.kind == AlertEventKind::Resolved).count();
    ctx.metrics.add_alerts_fired(fired as u64);
    ctx.metrics.add_alerts_resolved(resolved as u64);

    if fired > 0 || resolved > 0 {
        tracing::info!(rule = %rule.name, matches = result.len(), fired, resolved, "rule evaluated");
    } else {
        tracing::debug!(rule = %rule.name, matches = result.len(), "rule evaluated");
    }

    let mut sent = 0;
    for event in outcome.events {
        if ctx.events.send(event).await.is_err() {
            tracing::debug!(rule = %rule.name, "event channel closed");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

struct RuleTask {
    rule_name: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns one timer task per rule.
pub struct RuleRunner {
    ctx: Arc<EvaluationContext>,
    tasks: Vec<RuleTask>,
}

impl RuleRunner {
    pub fn new(ctx: Arc<EvaluationContext>) -> Self {
        Self {
            ctx,
            tasks: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<EvaluationContext> {
        &self.ctx
    }

    pub fn start(&mut self, rules: Vec<AlertRule>) {
        for rule in rules {
            let (stop_tx, stop_rx) = watch::channel(false);
            let name = rule.name.clone();
            let handle = tokio::spawn(run_rule(self.ctx.clone(), rule, stop_rx));
            self.tasks.push(RuleTask {
                rule_name: name,
                stop: stop_tx,
                handle,
            });
        }
        tracing::info!(rules = self.tasks.len(), "rule evaluation started");
    }

    /// Stops every timer and waits for in-flight evaluations to finish.
    pub async fn stop(&mut self) {
        for task in &self.tasks {
            let _ = task.stop.send(true);
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.handle.await {
                tracing::warn!(rule = %task.rule_name, error = %e, "rule task ended abnormally");
            }
        }
    }

    /// Swaps the rule set. Instances of rules that disappeared are resolved
    /// or dropped in the store and the resulting events forwarded.
    pub async fn replace(&mut self, rules: Vec<AlertRule>) {
        self.stop().await;
        let names: HashSet<String> = rules.iter().map(|r| r.name.clone()).collect();
        let now = self.ctx.clock.now_ms();
        for event in self.ctx.store.retain_rules(&names, now) {
            if self.ctx.events.send(event).await.is_err() {
                break;
            }
        }
        self.start(rules);
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.rule_name.clone()).collect()
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_rule(ctx: Arc<EvaluationContext>, rule: AlertRule, mut stop: watch::Receiver<bool>) {
    let period = Duration::from_millis(rule.interval_ms.max(1) as u64);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let rule = Arc::new(rule);
    let busy = Arc::new(AtomicBool::new(false));
    let mut current: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if busy.swap(true, Ordering::AcqRel) {
                    ctx.metrics.inc_evaluations_missed();
                    tracing::warn!(rule = %rule.name, "previous evaluation still running, tick skipped");
                    continue;
                }
                let guard = BusyGuard(busy.clone());
                let ctx = ctx.clone();
                let rule = rule.clone();
                current = Some(tokio::spawn(async move {
                    let _guard = guard;
                    let now = ctx.clock.now_ms();
                    if let Err(e) = evaluate_once(&ctx, &rule, now).await {
                        tracing::warn!(rule = %rule.name, error = %e, "evaluation failed, retrying next interval");
                    }
                }));
            }
        }
    }

    if let Some(handle) = current {
        let _ = handle.await;
    }
}
