use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aimon_alerting::alert::{
    evaluate_once, AlertEvent, AlertEventKind, AlertRule, AlertState, AlertStore, Condition,
    EvaluationContext, Evaluator, Expr, Severity,
};
use aimon_alerting::config;
use aimon_alerting::grouping::{GroupingEngine, InhibitRule, Inhibitor};
use aimon_alerting::metrics::PipelineMetrics;
use aimon_alerting::pipeline::Pipeline;
use aimon_alerting::routing::{Matcher, NotificationRouter, Route, RouteTiming, RoutingTree};
use aimon_alerting::source::MemorySource;
use aimon_common::clock::{now_ms, ManualClock};
use aimon_common::LabelSet;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::sync::mpsc;

fn rule(name: &str, query: &str, condition: Condition, threshold: f64, for_ms: i64) -> AlertRule {
    AlertRule {
        name: name.into(),
        expr: Expr {
            query: query.into(),
            condition,
            threshold,
        },
        interval_ms: 30_000,
        for_ms,
        severity: Severity::Warning,
        labels: LabelSet::new(),
        annotations: BTreeMap::new(),
    }
}

fn host(name: &str) -> LabelSet {
    LabelSet::new().with("instance", name)
}

struct Harness {
    source: Arc<MemorySource>,
    ctx: EvaluationContext,
    events: mpsc::Receiver<AlertEvent>,
}

impl Harness {
    fn new() -> Self {
        let source = Arc::new(MemorySource::new(3_600_000));
        let (tx, rx) = mpsc::channel(64);
        let ctx = EvaluationContext {
            evaluator: Evaluator::new(source.clone()),
            store: Arc::new(AlertStore::new(300_000)),
            events: tx,
            metrics: PipelineMetrics::new(),
            clock: Arc::new(ManualClock::new(0)),
        };
        Self {
            source,
            ctx,
            events: rx,
        }
    }

    async fn tick(&mut self, rule: &AlertRule, now: i64) -> Vec<AlertEvent> {
        evaluate_once(&self.ctx, rule, now).await.unwrap();
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn engine(inhibit: Vec<InhibitRule>) -> GroupingEngine {
    let root = Route::new("ops")
        .with_group_by(&["alertname"])
        .with_timing(RouteTiming {
            group_wait_ms: 10_000,
            group_interval_ms: 5_000,
            repeat_interval_ms: 3_600_000,
        });
    GroupingEngine::new(
        RoutingTree::new(root),
        Inhibitor::new(inhibit),
        NotificationRouter::default(),
        PipelineMetrics::new(),
    )
}

#[tokio::test]
async fn cpu_high_fires_after_for_duration() {
    let mut h = Harness::new();
    let cpu_high = rule("cpu_high", "last(cpu_usage)", Condition::GreaterThan, 80.0, 120_000);

    for t in (0..=120_000).step_by(30_000) {
        h.source.record("cpu_usage", host("h1"), t, 92.0);
        let events = h.tick(&cpu_high, t).await;
        let alerts = h.ctx.store.snapshot();
        assert_eq!(alerts.len(), 1);
        if t < 120_000 {
            assert_eq!(alerts[0].state, AlertState::Pending, "at {t}");
            assert!(events.is_empty());
        } else {
            assert_eq!(alerts[0].state, AlertState::Firing);
            assert_eq!(alerts[0].started_at_ms, 0);
            assert_eq!(alerts[0].fired_at_ms, Some(120_000));
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind, AlertEventKind::Fired);
        }
    }
}

#[tokio::test]
async fn gap_while_pending_restarts_for_window() {
    let mut h = Harness::new();
    let cpu_high = rule("cpu_high", "last(cpu_usage[10s])", Condition::GreaterThan, 80.0, 60_000);

    h.source.record("cpu_usage", host("h1"), 0, 92.0);
    h.tick(&cpu_high, 0).await;
    h.tick(&cpu_high, 30_000).await;
    assert!(h.ctx.store.is_empty());

    h.source.record("cpu_usage", host("h1"), 60_000, 92.0);
    h.tick(&cpu_high, 60_000).await;
    let alerts = h.ctx.store.snapshot();
    assert_eq!(alerts[0].state, AlertState::Pending);
    assert_eq!(alerts[0].started_at_ms, 60_000);
}

#[tokio::test]
async fn group_wait_then_group_interval() {
    let mut h = Harness::new();
    let mut grouping = engine(vec![]);
    let cpu_high = rule("cpu_high", "last(cpu_usage)", Condition::GreaterThan, 80.0, 0);

    h.source.record("cpu_usage", host("h1"), 0, 95.0);
    for event in h.tick(&cpu_high, 0).await {
        grouping.ingest(&event, 0);
    }
    assert!(grouping.advance(9_999).is_empty());
    let first = grouping.advance(10_000);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].1.alerts.len(), 1);

    h.source.record("cpu_usage", host("h2"), 12_000, 97.0);
    for event in h.tick(&cpu_high, 12_000).await {
        grouping.ingest(&event, 12_000);
    }
    assert_eq!(grouping.next_wake(), Some(15_000));
    assert!(grouping.advance(14_999).is_empty());
    let second = grouping.advance(15_000);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].1.firing_count(), 2);
}

#[tokio::test]
async fn inhibited_alert_waits_for_source_to_resolve() {
    let mut h = Harness::new();
    let inhibit = InhibitRule {
        source: vec![Matcher::equal("alertname", "node_down")],
        target: vec![Matcher::equal("alertname", "cpu_high")],
        equal: vec!["instance".into()],
    };
    let mut grouping = engine(vec![inhibit]);

    let node_down = rule("node_down", "last(up)", Condition::Equal, 0.0, 0);
    let cpu_high = rule("cpu_high", "last(cpu_usage)", Condition::GreaterThan, 80.0, 0);

    h.source.record("up", host("h1"), 0, 0.0);
    h.source.record("cpu_usage", host("h1"), 0, 99.0);
    for r in [&node_down, &cpu_high] {
        for event in h.tick(r, 0).await {
            grouping.ingest(&event, 0);
        }
    }

    let sent = grouping.advance(10_000);
    let names: Vec<String> = sent.iter().map(|(_, n)| n.title()).collect();
    assert_eq!(names, vec!["[FIRING:1] node_down".to_string()]);

    h.source.record("up", host("h1"), 20_000, 1.0);
    for r in [&node_down, &cpu_high] {
        for event in h.tick(r, 20_000).await {
            grouping.ingest(&event, 20_000);
        }
    }
    let mut titles: Vec<String> = grouping.advance(20_000).iter().map(|(_, n)| n.title()).collect();
    titles.sort();
    assert_eq!(titles, vec!["[FIRING:1] cpu_high".to_string(), "[RESOLVED] node_down".to_string()]);
}

#[derive(Default)]
struct Flaky {
    hits: Mutex<Vec<(Instant, serde_json::Value)>>,
}

async fn flaky_hook(
    State(flaky): State<Arc<Flaky>>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> StatusCode {
    let mut hits = flaky.hits.lock().unwrap();
    hits.push((Instant::now(), body));
    if hits.len() <= 3 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

#[tokio::test]
async fn webhook_retries_until_delivered() {
    let flaky = Arc::new(Flaky::default());
    let app = Router::new().route("/hook", post(flaky_hook)).with_state(flaky.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let yaml = format!(
        r#"
delivery:
  initial_backoff: 50ms
  backoff_factor: 2.0
  max_attempts: 4
  timeout: 2s
rules:
  - name: cpu_high
    expr: last(cpu_usage)
    condition: ">"
    threshold: 80
    interval: 100ms
route:
  receiver: hook
  group_by: [alertname]
  group_wait: "0"
receivers:
  - name: hook
    webhook:
      url: http://{addr}/hook
"#
    );
    let pipeline = Pipeline::start(config::load_from_str(&yaml).unwrap()).unwrap();
    pipeline
        .memory_source()
        .unwrap()
        .record("cpu_usage", host("h1"), now_ms(), 95.0);

    let deadline = Instant::now() + Duration::from_secs(10);
    while flaky.hits.lock().unwrap().len() < 4 {
        assert!(Instant::now() < deadline, "webhook never succeeded");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    pipeline.shutdown().await;

    let hits = flaky.hits.lock().unwrap();
    assert_eq!(hits.len(), 4, "no duplicate delivery");
    let gaps: Vec<Duration> = hits.windows(2).map(|w| w[1].0 - w[0].0).collect();
    assert!(gaps[0] >= Duration::from_millis(40), "{gaps:?}");
    assert!(gaps[1] >= Duration::from_millis(90), "{gaps:?}");
    assert!(gaps[2] >= Duration::from_millis(190), "{gaps:?}");
    assert!(gaps[0] < gaps[2]);

    let body = &hits[3].1;
    assert_eq!(body["status"], "firing");
    assert_eq!(body["receiver"], "hook");
    assert_eq!(body["alerts"][0]["labels"]["alertname"], "cpu_high");

    let metrics = pipeline.metrics();
    assert_eq!(metrics.delivery_retries_val(), 3);
    assert_eq!(metrics.deliveries_succeeded_val(), 1);
    assert!(pipeline.dead_letters().is_empty());
}
