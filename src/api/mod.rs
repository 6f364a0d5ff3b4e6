pub mod backtest;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod orchestrate;
pub mod signals;
pub mod strategies;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::clock::SharedClock;
use crate::data::catalog::DatasetCatalog;
use crate::execution::ExecutionEngine;
use crate::lifecycle::SignalPublisher;
use crate::memory::MemoryStore;
use crate::metrics::RuntimeMetrics;
use crate::orchestrate::Orchestrator;
use crate::store::Database;
use crate::strategy::registry::StrategyRegistry;

/// Shared handler state.
pub struct AppState {
    pub db: Database,
    pub registry: Arc<StrategyRegistry>,
    pub memory: Arc<dyn MemoryStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub executor: Arc<ExecutionEngine>,
    pub catalog: Arc<DatasetCatalog>,
    pub publisher: Arc<SignalPublisher>,
    pub metrics: Arc<RuntimeMetrics>,
    pub clock: SharedClock,
    /// Parent token for background run tasks; cancelled at shutdown.
    pub shutdown: CancellationToken,
}

/// Assemble the full route table.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/orchestrate", post(orchestrate::trigger))
        .route("/api/v1/orchestrate/runs", get(orchestrate::list_runs))
        .route("/api/v1/orchestrate/runs/{id}", get(orchestrate::get_run))
        .route("/api/v1/signals", get(signals::list))
        .route("/api/v1/signals/{id}", get(signals::get_one))
        .route("/api/v1/signals/{id}/approve", post(signals::approve))
        .route("/api/v1/signals/{id}/reject", post(signals::reject))
        .route("/api/v1/strategies", get(strategies::list))
        .route(
            "/api/v1/strategies/{id}/signals",
            get(strategies::recent_signals),
        )
        .route("/api/v1/strategies/{id}/analyze", post(strategies::analyze))
        .route("/backtest", post(backtest::run))
        .route("/tools", post(memory::tools))
        .route("/v1/memory/banks", get(memory::banks))
        .route("/v1/memory/search", get(memory::search))
        .route("/metrics/prometheus", get(metrics::prometheus))
        .layer(cors)
        .with_state(state)
}
