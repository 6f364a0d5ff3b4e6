use serde_json::json;

use super::{clamp_confidence, IndicatorSnapshot, Signal, SignalType, Strategy, StrategyInfo, Trend};

const OVERSOLD: f64 = 30.0;
const OVERBOUGHT: f64 = 70.0;
const EXTREME_LOW: f64 = 20.0;
const EXTREME_HIGH: f64 = 80.0;
const BASE_CONFIDENCE: f64 = 0.60;

/// Mean-reversion on RSI extremes: buy below 30, sell above 70.
/// Stops at 2×ATR from entry, targets at 2× and 3× ATR.
pub struct RsiMomentum;

impl Strategy for RsiMomentum {
    fn id(&self) -> &str {
        "rsi_momentum_v1"
    }

    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: self.id().to_string(),
            name: "RSI Momentum".to_string(),
            description: "Buys oversold (RSI < 30) and sells overbought (RSI > 70) conditions"
                .to_string(),
            event_types: vec!["market_data".to_string(), "indicator_update".to_string()],
            min_risk_reward: 1.0,
            max_risk_per_trade: 0.02,
            timeframes: vec!["1d".to_string(), "4h".to_string()],
        }
    }

    fn evaluate(&self, snapshot: &IndicatorSnapshot) -> Signal {
        if snapshot.price <= 0.0 || snapshot.atr <= 0.0 || snapshot.rsi <= 0.0 {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                "insufficient indicator data",
            );
        }

        let signal_type = if snapshot.rsi < OVERSOLD {
            SignalType::Buy
        } else if snapshot.rsi > OVERBOUGHT {
            SignalType::Sell
        } else {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                format!("RSI {:.1} inside neutral band", snapshot.rsi),
            );
        };

        let long = signal_type == SignalType::Buy;
        let entry = snapshot.price;
        let atr = snapshot.atr;
        let (stop, targets) = if long {
            (entry - 2.0 * atr, vec![entry + 2.0 * atr, entry + 3.0 * atr])
        } else {
            (entry + 2.0 * atr, vec![entry - 2.0 * atr, entry - 3.0 * atr])
        };
        if stop <= 0.0 || targets.iter().any(|t| *t <= 0.0) {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                "ATR too wide for price level",
            );
        }

        let mut confidence = BASE_CONFIDENCE;
        let aligned = (long && snapshot.market_trend == Trend::Bullish)
            || (!long && snapshot.market_trend == Trend::Bearish);
        if aligned {
            confidence += 0.15;
        }
        if snapshot.avg_volume > 0.0 && snapshot.volume > snapshot.avg_volume {
            confidence += 0.10;
        }
        if snapshot.rsi < EXTREME_LOW || snapshot.rsi > EXTREME_HIGH {
            confidence += 0.15;
        }

        let mut indicators = std::collections::BTreeMap::new();
        indicators.insert("rsi".to_string(), json!(snapshot.rsi));
        indicators.insert("atr".to_string(), json!(snapshot.atr));

        Signal {
            strategy_id: self.id().to_string(),
            symbol: snapshot.symbol.clone(),
            timestamp: snapshot.timestamp,
            signal_type,
            confidence: clamp_confidence(confidence),
            entry_price: Some(entry),
            stop_loss: Some(stop),
            take_profits: targets,
            reason: format!(
                "RSI {:.1} {}",
                snapshot.rsi,
                if long { "oversold" } else { "overbought" }
            ),
            indicators,
        }
    }
}
