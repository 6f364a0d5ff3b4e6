#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

use verdict::api::{self, AppState};
use verdict::clock::{ManualClock, SharedClock};
use verdict::data::catalog::{DatasetCatalog, DatasetEntry, RegisterDataset};
use verdict::ejlayer::service::EjLayer;
use verdict::ejlayer::DEFAULT_HALF_LIFE_DAYS;
use verdict::execution::broker::PaperBroker;
use verdict::execution::{ExecutionConfig, ExecutionEngine};
use verdict::lifecycle::SignalPublisher;
use verdict::memory::local::InMemoryStore;
use verdict::metrics::RuntimeMetrics;
use verdict::orchestrate::tools::NoopToolRunner;
use verdict::orchestrate::Orchestrator;
use verdict::planner::RuleBasedPlanner;
use verdict::risk::RiskPolicy;
use verdict::store::signals::NewSignal;
use verdict::store::Database;
use verdict::strategy::registry::StrategyRegistry;
use verdict::strategy::{Signal, SignalType};

pub const SAMPLE_CSV: &str = "\
date,open,high,low,close,volume
2024-01-02,185.0,187.0,184.0,186.5,1000000
2024-01-03,186.5,188.0,185.5,187.2,900000
2024-01-04,187.2,189.5,186.8,189.0,1100000
2024-01-05,189.0,190.0,187.5,188.1,950000
2024-01-08,188.1,191.0,188.0,190.4,1200000
";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub catalog: Arc<DatasetCatalog>,
    pub broker: Arc<PaperBroker>,
    pub memory: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub dataset_dir: TempDir,
}

/// Full in-process app: in-memory sqlite, paper broker, in-process memory
/// store, rule-based planner, manual clock.
pub fn make_app(policy: RiskPolicy) -> TestApp {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 2, 1, 14, 30, 0).unwrap(),
    ));
    let shared_clock: SharedClock = clock.clone();

    let db = Database::open_in_memory().unwrap();
    let registry = Arc::new(StrategyRegistry::new());
    verdict::register_builtin_strategies(&registry, &db, &shared_clock).unwrap();

    let dataset_dir = TempDir::new().unwrap();
    let catalog = Arc::new(DatasetCatalog::open(dataset_dir.path(), shared_clock.clone()).unwrap());

    let memory = Arc::new(InMemoryStore::new(shared_clock.clone()));
    let broker = Arc::new(PaperBroker::new(100_000.0, 200_000.0));
    let publisher = Arc::new(SignalPublisher::new());
    let ejlayer = Arc::new(EjLayer::new(
        db.clone(),
        shared_clock.clone(),
        DEFAULT_HALF_LIFE_DAYS,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        memory.clone(),
        None,
        Arc::new(RuleBasedPlanner),
        Arc::new(NoopToolRunner),
        Arc::clone(&publisher),
        db.clone(),
        ejlayer,
        shared_clock.clone(),
    ));
    let executor = Arc::new(ExecutionEngine::new(
        db.clone(),
        broker.clone(),
        policy,
        ExecutionConfig {
            backoff_base: Duration::from_millis(5),
            poll_interval: Duration::from_millis(10),
            poll_deadline: Duration::from_millis(300),
            ..ExecutionConfig::default()
        },
        shared_clock.clone(),
    ));

    let state = Arc::new(AppState {
        db: db.clone(),
        registry,
        memory: memory.clone(),
        orchestrator,
        executor,
        catalog: catalog.clone(),
        publisher,
        metrics: Arc::new(RuntimeMetrics::new()),
        clock: shared_clock,
        shutdown: CancellationToken::new(),
    });

    TestApp {
        router: api::router(state),
        db,
        catalog,
        broker,
        memory,
        clock,
        dataset_dir,
    }
}

impl TestApp {
    /// Write the sample CSV into the dataset dir and register it.
    pub fn register_sample_dataset(&self, name: &str) -> (DatasetEntry, std::path::PathBuf) {
        let csv_path = self.dataset_dir.path().join(format!("{name}.csv"));
        std::fs::write(&csv_path, SAMPLE_CSV).unwrap();
        let entry = self
            .catalog
            .register(RegisterDataset {
                name: name.to_string(),
                symbol: "AAPL".to_string(),
                source: "test".to_string(),
                path: csv_path.clone(),
            })
            .unwrap();
        (entry, csv_path)
    }

    /// Insert a pending buy signal directly through the store.
    pub fn insert_pending_buy(
        &self,
        symbol: &str,
        entry: f64,
        stop: f64,
        target: f64,
        confidence: f64,
    ) -> Uuid {
        self.db
            .upsert_strategy_artifact(
                "artifact-test",
                "rsi_momentum_v1",
                "cafebabe0001",
                self.clock.now_utc(),
            )
            .unwrap();
        let signal = Signal {
            strategy_id: "rsi_momentum_v1".to_string(),
            symbol: symbol.to_string(),
            timestamp: self.clock.now_utc(),
            signal_type: SignalType::Buy,
            confidence,
            entry_price: Some(entry),
            stop_loss: Some(stop),
            take_profits: vec![target],
            reason: "test fixture".to_string(),
            indicators: Default::default(),
        };
        self.db
            .insert_signal(&NewSignal {
                signal,
                artifact_id: Some("artifact-test".to_string()),
                artifact_hash: Some("cafebabe0001".to_string()),
                correlation_id: None,
                expires_at: None,
            })
            .unwrap()
            .id
    }
}

pub trait ClockExt {
    fn now_utc(&self) -> chrono::DateTime<Utc>;
}

impl ClockExt for Arc<ManualClock> {
    fn now_utc(&self) -> chrono::DateTime<Utc> {
        use verdict::clock::Clock;
        self.now()
    }
}

pub async fn request_json(
    router: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(value.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, value)
}

pub async fn get_json(router: &Router, path: &str) -> (StatusCode, Value) {
    request_json(router, "GET", path, None).await
}

pub async fn get_text(router: &Router, path: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}
