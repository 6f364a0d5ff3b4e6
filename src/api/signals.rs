use axum::extract::{Path, Query, State};
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::error::{Error, Result};
use crate::lifecycle::SignalProduct;
use crate::store::signals::{SignalFilter, SignalStatus};
use crate::store::trades::TradeRecord;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SignalProduct>>> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(SignalStatus::parse(raw).map_err(|_| {
            Error::validation(format!("unknown signal status '{raw}'"))
        })?),
        None => None,
    };
    let signals = state.db.list_signals(&SignalFilter {
        status,
        symbol: query.symbol.map(|s| s.to_uppercase()),
        strategy_id: query.strategy,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    })?;
    Ok(Json(
        signals.into_iter().map(SignalProduct::from_stored).collect(),
    ))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SignalProduct>> {
    Ok(Json(SignalProduct::from_stored(state.db.get_signal(id)?)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApproveBody {
    #[garde(length(min = 1))]
    pub approved_by: String,
    #[garde(skip)]
    #[serde(default)]
    pub modification_notes: Option<String>,
}

#[derive(Serialize)]
pub struct ApproveResponse {
    pub signal: SignalProduct,
    pub trade: TradeRecord,
}

/// Approve and execute in one request. Risk-policy violations surface to
/// the approver as 422 with every violation code; the approval itself is
/// already persisted at that point.
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<ApproveResponse>> {
    body.validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    state.db.approve_signal(
        id,
        &body.approved_by,
        body.modification_notes.as_deref(),
        state.clock.now(),
    )?;
    let trade = state.executor.execute(id, &body.approved_by).await?;
    let signal = SignalProduct::from_stored(state.db.get_signal(id)?);
    Ok(Json(ApproveResponse { signal, trade }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectBody {
    #[garde(length(min = 1))]
    pub approved_by: String,
    #[garde(skip)]
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Result<Json<SignalProduct>> {
    body.validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    let signal = state.db.reject_signal(
        id,
        &body.approved_by,
        body.rejection_reason.as_deref(),
        state.clock.now(),
    )?;
    Ok(Json(SignalProduct::from_stored(signal)))
}
