pub mod catalog;
pub mod csv_source;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::IndicatorSnapshot;

/// One OHLCV bar. Candles are sorted ascending per symbol inside a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Historical market data behind the backtest engine.
pub trait DataSource: Send + Sync {
    fn symbols(&self) -> Vec<String>;

    /// Candles for one symbol, chronological. Empty slice when unknown.
    fn candles(&self, symbol: &str) -> &[Candle];

    /// Indicator snapshot as of the candle at `timestamp`, or `None` when
    /// the timestamp does not land on a bar.
    fn snapshot_at(&self, symbol: &str, timestamp: DateTime<Utc>) -> Option<IndicatorSnapshot>;
}
