use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use verdict::api::{self, AppState};
use verdict::clock::{SharedClock, SystemClock};
use verdict::config::{Config, PlannerMode};
use verdict::data::catalog::DatasetCatalog;
use verdict::ejlayer::service::EjLayer;
use verdict::ejlayer::DEFAULT_HALF_LIFE_DAYS;
use verdict::execution::broker::{BrokerClient, HttpBroker, PaperBroker};
use verdict::execution::{ExecutionConfig, ExecutionEngine};
use verdict::lifecycle::SignalPublisher;
use verdict::memory::local::InMemoryStore;
use verdict::memory::remote::RemoteMemoryStore;
use verdict::memory::MemoryStore;
use verdict::metrics::RuntimeMetrics;
use verdict::orchestrate::tools::NoopToolRunner;
use verdict::orchestrate::Orchestrator;
use verdict::planner::{HttpPlanner, Planner, RuleBasedPlanner, UnconfiguredPlanner};
use verdict::research::{HttpResearchClient, ResearchClient};
use verdict::risk::RiskPolicy;
use verdict::store::Database;
use verdict::strategy::registry::StrategyRegistry;

const PAPER_NET_LIQUIDATION: f64 = 100_000.0;
const PAPER_BUYING_POWER: f64 = 200_000.0;

fn main() -> ExitCode {
    if let Some(arg) = std::env::args().nth(1) {
        eprintln!("unexpected argument '{arg}'");
        eprintln!("usage: verdict   (configuration comes from the environment)");
        return ExitCode::from(2);
    }

    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("fatal: {error:#}");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let clock: SharedClock = Arc::new(SystemClock);

    let db = Database::open(&config.database_path)?;
    let catalog = Arc::new(DatasetCatalog::open(
        config.dataset_root.clone(),
        Arc::clone(&clock),
    )?);

    let registry = Arc::new(StrategyRegistry::new());
    verdict::register_builtin_strategies(&registry, &db, &clock)?;

    let memory: Arc<dyn MemoryStore> = match &config.memory_service_url {
        Some(url) => {
            tracing::info!(url, "using remote memory backend");
            Arc::new(RemoteMemoryStore::new(url.clone())?)
        }
        None => {
            tracing::info!("no memory backend configured, using in-process store");
            Arc::new(InMemoryStore::new(Arc::clone(&clock)))
        }
    };

    let research: Option<Arc<dyn ResearchClient>> = match &config.research_service_url {
        Some(url) => Some(Arc::new(HttpResearchClient::new(url.clone())?)),
        None => {
            tracing::info!("research service not configured, research stage disabled");
            None
        }
    };

    let planner: Arc<dyn Planner> = match (config.planner_mode, &config.planner_service_url) {
        (PlannerMode::Builtin, _) => {
            tracing::info!("using built-in rule-based planner");
            Arc::new(RuleBasedPlanner)
        }
        (PlannerMode::Remote, Some(url)) => Arc::new(HttpPlanner::new(url.clone())?),
        (PlannerMode::Remote, None) => {
            tracing::warn!("planner service not configured, runs will fail at the plan stage");
            Arc::new(UnconfiguredPlanner)
        }
    };

    let broker: Arc<dyn BrokerClient> = match &config.broker_service_url {
        Some(url) => Arc::new(HttpBroker::new(url.clone())?),
        None => {
            tracing::info!("no broker configured, using paper broker");
            Arc::new(PaperBroker::new(PAPER_NET_LIQUIDATION, PAPER_BUYING_POWER))
        }
    };

    let publisher = Arc::new(SignalPublisher::new());
    let ejlayer = Arc::new(EjLayer::new(
        db.clone(),
        Arc::clone(&clock),
        DEFAULT_HALF_LIFE_DAYS,
    ));
    let policy = RiskPolicy::with_version(config.risk_policy_version.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&memory),
        research,
        planner,
        Arc::new(NoopToolRunner),
        Arc::clone(&publisher),
        db.clone(),
        Arc::clone(&ejlayer),
        Arc::clone(&clock),
    ));
    let executor = Arc::new(ExecutionEngine::new(
        db.clone(),
        broker,
        policy,
        ExecutionConfig::default(),
        Arc::clone(&clock),
    ));

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        db: db.clone(),
        registry,
        memory,
        orchestrator,
        executor,
        catalog,
        publisher,
        metrics: Arc::new(RuntimeMetrics::new()),
        clock: Arc::clone(&clock),
        shutdown: shutdown.clone(),
    });

    let app = api::router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "verdict decision runtime listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    // Background runs that never finished are persisted as cancelled.
    let interrupted = db.mark_running_interrupted(clock.now())?;
    if interrupted > 0 {
        tracing::warn!(interrupted, "marked in-flight runs as interrupted");
    }
    Ok(())
}
