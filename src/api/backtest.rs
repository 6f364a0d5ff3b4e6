use axum::extract::State;
use axum::Json;
use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::backtest::{
    default_initial_capital, default_max_positions, default_risk_per_trade, engine,
    BacktestConfig, BacktestResult,
};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct BacktestBody {
    #[garde(length(min = 1))]
    pub strategy: String,
    #[garde(length(min = 1), inner(length(min = 1)))]
    pub symbols: Vec<String>,
    #[garde(skip)]
    pub start_date: NaiveDate,
    #[garde(skip)]
    pub end_date: NaiveDate,
    #[garde(skip)]
    pub dataset_id: Uuid,
    #[serde(default)]
    #[garde(skip)]
    pub seed: u64,
    #[serde(default = "default_initial_capital")]
    #[garde(range(min = 0.01))]
    pub initial_capital: f64,
    #[serde(default = "default_risk_per_trade")]
    #[garde(range(min = 0.0001, max = 1.0))]
    pub risk_per_trade: f64,
    #[serde(default = "default_max_positions")]
    #[garde(range(min = 1))]
    pub max_positions: u32,
}

#[derive(Serialize)]
pub struct BacktestResponse {
    pub dataset_id: Uuid,
    /// First 12 hex chars of the verified dataset digest.
    pub dataset_hash: String,
    #[serde(flatten)]
    pub result: BacktestResult,
}

/// Hash-verify the dataset (409 on drift), then run the deterministic
/// simulation.
pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BacktestBody>,
) -> Result<Json<BacktestResponse>> {
    body.validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    let strategy = state
        .registry
        .get(&body.strategy)
        .ok_or_else(|| Error::NotFound("strategy", body.strategy.clone()))?;

    let (entry, source) = state.catalog.load_data_source(body.dataset_id)?;

    let config = BacktestConfig {
        strategy: body.strategy,
        symbols: body.symbols.iter().map(|s| s.to_uppercase()).collect(),
        start_date: body.start_date,
        end_date: body.end_date,
        seed: body.seed,
        initial_capital: body.initial_capital,
        risk_per_trade: body.risk_per_trade,
        max_positions: body.max_positions,
    };
    let result = engine::run(&strategy, &source, &config, &state.clock)?;

    Ok(Json(BacktestResponse {
        dataset_id: entry.id,
        dataset_hash: entry.sha256.chars().take(12).collect(),
        result,
    }))
}
