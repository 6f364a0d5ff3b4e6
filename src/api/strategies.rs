use axum::extract::{Path, Query, State};
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::AppState;
use crate::error::{Error, Result};
use crate::lifecycle::SignalProduct;
use crate::store::signals::{NewSignal, SignalFilter};
use crate::strategy::{IndicatorSnapshot, StrategyInfo};

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<StrategyInfo>> {
    Json(state.registry.list())
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn recent_signals(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<SignalProduct>>> {
    if state.registry.get(&id).is_none() {
        return Err(Error::NotFound("strategy", id));
    }
    let signals = state.db.list_signals(&SignalFilter {
        strategy_id: Some(id),
        limit: query.limit.unwrap_or(20),
        ..SignalFilter::default()
    })?;
    Ok(Json(
        signals.into_iter().map(SignalProduct::from_stored).collect(),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeBody {
    #[garde(length(min = 1, max = 10), pattern(r"^[A-Za-z0-9._-]+$"))]
    pub symbol: String,
    #[garde(skip)]
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
}

/// Evaluate the strategy against a constraints-derived snapshot. A
/// non-hold result is persisted as a pending signal and published; the
/// most recent stored signal for the pair is returned.
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<Value>> {
    body.validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    let strategy = state
        .registry
        .get(&id)
        .ok_or_else(|| Error::NotFound("strategy", id.clone()))?;

    let symbol = body.symbol.to_uppercase();
    let snapshot = IndicatorSnapshot::from_constraints(&symbol, state.clock.now(), &body.constraints);
    let signal = strategy.evaluate(&snapshot);

    if !signal.is_hold() {
        let stored = state.db.insert_signal(&NewSignal {
            signal: signal.clone(),
            artifact_id: None,
            artifact_hash: None,
            correlation_id: None,
            expires_at: None,
        })?;
        state
            .publisher
            .publish(SignalProduct::from_stored(stored));
    }

    match state.db.latest_signal(&id, &symbol)? {
        Some(stored) => Ok(Json(json!(SignalProduct::from_stored(stored)))),
        None => Ok(Json(json!({ "signal": signal, "persisted": false }))),
    }
}
