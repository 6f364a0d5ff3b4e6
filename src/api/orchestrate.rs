use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::error::{Error, Result};
use crate::orchestrate::OrchestrationRequest;
use crate::store::runs::{NewRun, OrchestrationRun, RunStatus, TriggerKind};

const DEFAULT_BANK: &str = "trade_decisions";

#[derive(Debug, Deserialize, Validate)]
pub struct TriggerBody {
    /// Ticker the decision is about.
    #[garde(length(min = 1, max = 10), pattern(r"^[A-Za-z0-9._-]+$"))]
    pub symbol: String,
    /// Originating signal, when the trigger is a signal event.
    #[garde(skip)]
    #[serde(default)]
    pub signal_id: Option<Uuid>,
    /// `signal`, `scheduled`, or `manual` (default).
    #[garde(skip)]
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    pub context: Option<String>,
    #[garde(inner(length(min = 1)))]
    #[serde(default)]
    pub bank: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    pub constraints: Option<BTreeMap<String, Value>>,
    #[garde(skip)]
    #[serde(default)]
    pub tags: Vec<String>,
    #[garde(skip)]
    #[serde(default)]
    pub research_queries: Vec<String>,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    pub run_id: Uuid,
    pub status: &'static str,
}

/// Fire-and-forget trigger: create the run row, return immediately, and
/// drive the pipeline on a background task. Callers poll the run by id.
pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TriggerBody>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    body.validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    let trigger_type = match body.trigger_type.as_deref() {
        Some(raw) => TriggerKind::parse(raw)?,
        None => TriggerKind::Manual,
    };

    let correlation_id = Uuid::new_v4();
    let run = state.db.create_run(
        &NewRun {
            symbol: body.symbol.to_uppercase(),
            trigger_type,
            trigger_id: body.signal_id.map(|id| id.to_string()),
            correlation_id,
        },
        state.clock.now(),
    )?;

    let request = OrchestrationRequest {
        bank: body.bank.unwrap_or_else(|| DEFAULT_BANK.to_string()),
        symbol: body.symbol.to_uppercase(),
        strategy_id: body.strategy_id,
        constraints: body.constraints.unwrap_or_default(),
        user_context: body.context.unwrap_or_default(),
        tags: body.tags,
        research_queries: body.research_queries,
    };

    let orchestrator = Arc::clone(&state.orchestrator);
    let cancel = state.shutdown.child_token();
    let run_id = run.id;
    tokio::spawn(async move {
        // Outcome and errors are persisted on the run row; nothing to
        // surface here.
        let _ = orchestrator
            .drive(run_id, correlation_id, request, cancel)
            .await;
    });

    Ok((
        StatusCode::CREATED,
        Json(TriggerResponse {
            run_id,
            status: "running",
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub symbol: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub status: RunStatus,
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RunSummary>>> {
    let runs = state.db.list_runs(query.limit.unwrap_or(20))?;
    Ok(Json(
        runs.into_iter()
            .map(|run| RunSummary {
                id: run.id,
                symbol: run.symbol,
                started_at: run.started_at,
                success: run.status == RunStatus::Completed,
                status: run.status,
            })
            .collect(),
    ))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrchestrationRun>> {
    Ok(Json(state.db.get_run(id)?))
}
