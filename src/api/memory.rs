use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::AppState;
use crate::error::{Error, Result};
use crate::memory::{MemoryItem, MemoryQuery, ReflectParams};

#[derive(Debug, Deserialize)]
pub struct ToolBody {
    pub tool: String,
    pub input: ToolInput,
}

#[derive(Debug, Deserialize)]
pub struct ToolInput {
    pub bank: String,
    #[serde(default)]
    pub item: Option<MemoryItem>,
    #[serde(default)]
    pub query: Option<MemoryQuery>,
    #[serde(default)]
    pub params: Option<ReflectParams>,
}

/// Memory proxy surface: `{tool, input}` envelopes for retain, recall,
/// and reflect.
pub async fn tools(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ToolBody>,
) -> Result<Json<Value>> {
    match body.tool.as_str() {
        "memory.retain" => {
            let item = body
                .input
                .item
                .ok_or_else(|| Error::validation("memory.retain requires input.item"))?;
            let kept = state.memory.retain(&body.input.bank, item).await?;
            Ok(Json(json!({ "item": kept })))
        }
        "memory.recall" => {
            let query = body.input.query.unwrap_or_default();
            let items = state.memory.recall(&body.input.bank, &query).await?;
            Ok(Json(json!({ "items": items })))
        }
        "memory.reflect" => {
            let params = body.input.params.unwrap_or_default();
            let item = state.memory.reflect(&body.input.bank, &params).await?;
            Ok(Json(json!({ "item": item })))
        }
        other => Err(Error::validation(format!("unknown tool '{other}'"))),
    }
}

pub async fn banks(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let banks = state.memory.banks().await?;
    Ok(Json(json!({ "banks": banks })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    pub bank: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Value>> {
    let query = MemoryQuery {
        term: params.q,
        limit: params.limit,
        ..MemoryQuery::default()
    };
    let items = state.memory.recall(&params.bank, &query).await?;
    Ok(Json(json!({ "items": items })))
}
