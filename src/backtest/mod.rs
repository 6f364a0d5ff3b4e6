pub mod engine;
pub mod metrics;

use chrono::{DateTime, NaiveDate, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Backtest run parameters. `seed = 0` derives a seed from the injected
/// clock; the derived value is recorded in the result.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BacktestConfig {
    #[garde(length(min = 1))]
    pub strategy: String,
    #[garde(length(min = 1), inner(length(min = 1)))]
    pub symbols: Vec<String>,
    #[garde(skip)]
    pub start_date: NaiveDate,
    #[garde(custom(validate_date_order(&self.start_date)))]
    pub end_date: NaiveDate,
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

fn validate_date_order(start: &NaiveDate) -> impl FnOnce(&NaiveDate, &()) -> garde::Result + '_ {
    move |end: &NaiveDate, (): &()| {
        if end < start {
            return Err(garde::Error::new(format!(
                "end_date ({end}) must not precede start_date ({start})"
            )));
        }
        Ok(())
    }
}

pub fn default_initial_capital() -> f64 {
    100_000.0
}

pub fn default_risk_per_trade() -> f64 {
    0.01
}

pub fn default_max_positions() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn multiplier(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopHit,
    TargetHit,
    EndOfPeriod,
}

/// One closed simulated trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_date: DateTime<Utc>,
    pub exit_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
    pub quantity: i64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub r_multiple: f64,
    pub exit_reason: ExitReason,
    pub entry_confidence: f64,
}

/// Aggregate performance figures; see `metrics::compute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    /// `None` when there are no losing trades (undefined ratio).
    pub profit_factor: Option<f64>,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_r_multiple: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

/// Deterministic simulation output. Everything except `duration_ms` is
/// byte-stable for a fixed (strategy, dataset hash, config, seed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub seed: u64,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub metrics: BacktestMetrics,
    pub trades: Vec<BacktestTrade>,
    pub duration_ms: u64,
}
