use serde_json::json;

use super::{clamp_confidence, IndicatorSnapshot, Signal, SignalType, Strategy, StrategyInfo, Trend};

const BASE_CONFIDENCE: f64 = 0.60;
const STRONG_HISTOGRAM: f64 = 0.5;

/// Momentum-follow on MACD line/signal crossovers confirmed by histogram
/// sign. Stops at 2×ATR, targets at 2.5× and 4× ATR.
pub struct MacdCrossover;

impl Strategy for MacdCrossover {
    fn id(&self) -> &str {
        "macd_crossover_v1"
    }

    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: self.id().to_string(),
            name: "MACD Crossover".to_string(),
            description: "Trades MACD line crossing its signal line with histogram confirmation"
                .to_string(),
            event_types: vec!["market_data".to_string(), "indicator_update".to_string()],
            min_risk_reward: 1.25,
            max_risk_per_trade: 0.02,
            timeframes: vec!["1d".to_string()],
        }
    }

    fn evaluate(&self, snapshot: &IndicatorSnapshot) -> Signal {
        let macd = snapshot.macd;
        let uninformative = macd.value == 0.0 && macd.signal == 0.0 && macd.histogram == 0.0;
        if snapshot.price <= 0.0 || snapshot.atr <= 0.0 || uninformative {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                "insufficient indicator data",
            );
        }

        let signal_type = if macd.value > macd.signal && macd.histogram > 0.0 {
            SignalType::Buy
        } else if macd.value < macd.signal && macd.histogram < 0.0 {
            SignalType::Sell
        } else {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                "no crossover confirmation",
            );
        };

        let long = signal_type == SignalType::Buy;
        let entry = snapshot.price;
        let atr = snapshot.atr;
        let (stop, targets) = if long {
            (
                entry - 2.0 * atr,
                vec![entry + 2.5 * atr, entry + 4.0 * atr],
            )
        } else {
            (
                entry + 2.0 * atr,
                vec![entry - 2.5 * atr, entry - 4.0 * atr],
            )
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
        if (long && snapshot.market_trend == Trend::Bullish)
            || (!long && snapshot.market_trend == Trend::Bearish)
        {
            confidence += 0.15;
        }
        if (long && snapshot.sector_trend == Trend::Bullish)
            || (!long && snapshot.sector_trend == Trend::Bearish)
        {
            confidence += 0.10;
        }
        if macd.histogram.abs() > STRONG_HISTOGRAM {
            confidence += 0.10;
        }
        if snapshot.avg_volume > 0.0 && snapshot.volume > snapshot.avg_volume {
            confidence += 0.05;
        }

        let mut indicators = std::collections::BTreeMap::new();
        indicators.insert("macd_value".to_string(), json!(macd.value));
        indicators.insert("macd_signal".to_string(), json!(macd.signal));
        indicators.insert("macd_histogram".to_string(), json!(macd.histogram));

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
                "MACD {} crossover (histogram {:.2})",
                if long { "bullish" } else { "bearish" },
                macd.histogram
            ),
            indicators,
        }
    }
}
