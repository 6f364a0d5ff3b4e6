pub mod ma_crossover;
pub mod macd_crossover;
pub mod registry;
pub mod rsi_momentum;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Categorical trend label carried by indicator snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Trend {
    pub fn parse(raw: &str) -> Trend {
        match raw.to_ascii_lowercase().as_str() {
            "bullish" => Trend::Bullish,
            "bearish" => Trend::Bearish,
            _ => Trend::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacdTriple {
    pub value: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BollingerTriple {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Point-in-time indicator snapshot a strategy evaluates.
/// Missing numeric values are zero; missing trends are neutral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
    pub avg_volume: f64,
    pub rsi: f64,
    pub macd: MacdTriple,
    pub sma20: f64,
    pub sma50: f64,
    pub sma200: f64,
    pub atr: f64,
    pub bollinger: BollingerTriple,
    pub market_trend: Trend,
    pub sector_trend: Trend,
}

impl IndicatorSnapshot {
    pub fn empty(symbol: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp,
            price: 0.0,
            volume: 0.0,
            avg_volume: 0.0,
            rsi: 0.0,
            macd: MacdTriple::default(),
            sma20: 0.0,
            sma50: 0.0,
            sma200: 0.0,
            atr: 0.0,
            bollinger: BollingerTriple::default(),
            market_trend: Trend::Neutral,
            sector_trend: Trend::Neutral,
        }
    }

    /// Build a snapshot from an orchestration constraints map.
    ///
    /// Recognized keys: `price`, `rsi`, `atr`, `volume`, `avg_volume`,
    /// `sma20`, `sma50`, `sma200`, `market_trend`, `sector_trend`, and the
    /// nested `macd.{value,signal,histogram}`. Everything missing defaults
    /// to zero / neutral.
    pub fn from_constraints(
        symbol: &str,
        timestamp: DateTime<Utc>,
        constraints: &BTreeMap<String, Value>,
    ) -> Self {
        let num = |key: &str| constraints.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        let trend = |key: &str| {
            constraints
                .get(key)
                .and_then(Value::as_str)
                .map_or(Trend::Neutral, Trend::parse)
        };
        let macd = constraints.get("macd").map_or_else(MacdTriple::default, |v| {
            let field = |k: &str| v.get(k).and_then(Value::as_f64).unwrap_or(0.0);
            MacdTriple {
                value: field("value"),
                signal: field("signal"),
                histogram: field("histogram"),
            }
        });

        Self {
            symbol: symbol.to_string(),
            timestamp,
            price: num("price"),
            volume: num("volume"),
            avg_volume: num("avg_volume"),
            rsi: num("rsi"),
            macd,
            sma20: num("sma20"),
            sma50: num("sma50"),
            sma200: num("sma200"),
            atr: num("atr"),
            bollinger: BollingerTriple::default(),
            market_trend: trend("market_trend"),
            sector_trend: trend("sector_trend"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::Buy => "buy",
            SignalType::Sell => "sell",
            SignalType::Hold => "hold",
        }
    }

    pub fn parse(raw: &str) -> Option<SignalType> {
        match raw {
            "buy" => Some(SignalType::Buy),
            "sell" => Some(SignalType::Sell),
            "hold" => Some(SignalType::Hold),
            _ => None,
        }
    }
}

/// Normalized output of a strategy evaluation.
///
/// Invariants (enforced by [`Signal::validate`]): confidence in [0, 1];
/// a hold carries zero confidence and no price levels; a buy has
/// `stop < entry < min(take_profits)` and a sell the mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profits: Vec<f64>,
    pub reason: String,
    #[serde(default)]
    pub indicators: BTreeMap<String, Value>,
}

impl Signal {
    pub fn hold(
        strategy_id: &str,
        symbol: &str,
        timestamp: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            symbol: symbol.to_string(),
            timestamp,
            signal_type: SignalType::Hold,
            confidence: 0.0,
            entry_price: None,
            stop_loss: None,
            take_profits: Vec::new(),
            reason: reason.into(),
            indicators: BTreeMap::new(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.signal_type == SignalType::Hold
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if self.symbol.trim().is_empty() {
            return Err(Error::validation("signal symbol is empty"));
        }
        match self.signal_type {
            SignalType::Hold => {
                if self.confidence != 0.0 {
                    return Err(Error::validation("hold signal must carry zero confidence"));
                }
                if self.entry_price.is_some()
                    || self.stop_loss.is_some()
                    || !self.take_profits.is_empty()
                {
                    return Err(Error::validation("hold signal must carry no price levels"));
                }
                Ok(())
            }
            SignalType::Buy | SignalType::Sell => {
                let entry = self
                    .entry_price
                    .ok_or_else(|| Error::validation("entry price required"))?;
                let stop = self
                    .stop_loss
                    .ok_or_else(|| Error::validation("stop-loss required"))?;
                if entry <= 0.0 || stop <= 0.0 || self.take_profits.iter().any(|t| *t <= 0.0) {
                    return Err(Error::validation("price levels must be positive"));
                }
                if (stop - entry).abs() < f64::EPSILON {
                    return Err(Error::validation("stop-loss must differ from entry"));
                }
                let long = self.signal_type == SignalType::Buy;
                if long && stop >= entry {
                    return Err(Error::validation("buy signal requires stop < entry"));
                }
                if !long && stop <= entry {
                    return Err(Error::validation("sell signal requires stop > entry"));
                }
                for target in &self.take_profits {
                    if long && *target <= entry {
                        return Err(Error::validation("buy take-profit must exceed entry"));
                    }
                    if !long && *target >= entry {
                        return Err(Error::validation("sell take-profit must be below entry"));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Static metadata a strategy declares at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub event_types: Vec<String>,
    pub min_risk_reward: f64,
    pub max_risk_per_trade: f64,
    pub timeframes: Vec<String>,
}

/// A trading strategy: a deterministic function from snapshot to signal.
/// No clock reads, no network calls. Uninformative inputs produce a hold.
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;
    fn info(&self) -> StrategyInfo;
    fn evaluate(&self, snapshot: &IndicatorSnapshot) -> Signal;
}

pub(crate) fn clamp_confidence(confidence: f64) -> f64 {
    confidence.clamp(0.0, 1.0)
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
    }

    fn buy_signal() -> Signal {
        Signal {
            strategy_id: "s".into(),
            symbol: "AAPL".into(),
            timestamp: ts(),
            signal_type: SignalType::Buy,
            confidence: 0.8,
            entry_price: Some(190.0),
            stop_loss: Some(185.0),
            take_profits: vec![195.0, 200.0],
            reason: String::new(),
            indicators: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_buy_signal_passes() {
        assert!(buy_signal().validate().is_ok());
    }

    #[test]
    fn stop_equal_entry_rejected() {
        let mut s = buy_signal();
        s.stop_loss = Some(190.0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn buy_with_stop_above_entry_rejected() {
        let mut s = buy_signal();
        s.stop_loss = Some(191.0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn buy_with_target_below_entry_rejected() {
        let mut s = buy_signal();
        s.take_profits = vec![189.0];
        assert!(s.validate().is_err());
    }

    #[test]
    fn sell_mirror_invariant() {
        let mut s = buy_signal();
        s.signal_type = SignalType::Sell;
        s.stop_loss = Some(195.0);
        s.take_profits = vec![180.0, 175.0];
        assert!(s.validate().is_ok());
        s.take_profits = vec![191.0];
        assert!(s.validate().is_err());
    }

    #[test]
    fn hold_with_confidence_rejected() {
        let mut s = Signal::hold("s", "AAPL", ts(), "flat");
        assert!(s.validate().is_ok());
        s.confidence = 0.2;
        assert!(s.validate().is_err());
    }

    #[test]
    fn hold_with_price_levels_rejected() {
        let mut s = Signal::hold("s", "AAPL", ts(), "flat");
        s.take_profits = vec![200.0];
        assert!(s.validate().is_err());
    }

    #[test]
    fn confidence_out_of_range_rejected() {
        let mut s = buy_signal();
        s.confidence = 1.2;
        assert!(s.validate().is_err());
    }

    #[test]
    fn snapshot_from_constraints_reads_nested_macd() {
        let mut constraints = BTreeMap::new();
        constraints.insert("price".to_string(), json!(101.5));
        constraints.insert("rsi".to_string(), json!(27.0));
        constraints.insert("market_trend".to_string(), json!("bullish"));
        constraints.insert(
            "macd".to_string(),
            json!({"value": 1.2, "signal": 0.9, "histogram": 0.3}),
        );
        let snap = IndicatorSnapshot::from_constraints("AAPL", ts(), &constraints);
        assert!((snap.price - 101.5).abs() < f64::EPSILON);
        assert!((snap.rsi - 27.0).abs() < f64::EPSILON);
        assert_eq!(snap.market_trend, Trend::Bullish);
        assert!((snap.macd.histogram - 0.3).abs() < f64::EPSILON);
        // missing keys default to zero / neutral
        assert!((snap.atr - 0.0).abs() < f64::EPSILON);
        assert_eq!(snap.sector_trend, Trend::Neutral);
    }

    #[test]
    fn trend_parse_is_case_insensitive() {
        assert_eq!(Trend::parse("BULLISH"), Trend::Bullish);
        assert_eq!(Trend::parse("Bearish"), Trend::Bearish);
        assert_eq!(Trend::parse("sideways"), Trend::Neutral);
    }
}
