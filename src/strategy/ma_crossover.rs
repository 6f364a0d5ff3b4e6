use serde_json::json;

use super::{clamp_confidence, IndicatorSnapshot, Signal, SignalType, Strategy, StrategyInfo, Trend};

const BASE_CONFIDENCE: f64 = 0.65;
const PULLBACK_PENALTY: f64 = 0.10;
const WIDE_SEPARATION: f64 = 0.05;
const PULLBACK_LOW: f64 = -0.02;
const PULLBACK_HIGH: f64 = 0.01;

enum Setup {
    GoldenCross,
    DeathCross,
    BullishPullback,
}

/// Trend-follow on stacked moving averages. A full golden/death cross
/// trades the breakout; an uptrend with price sitting on the 20-bar SMA
/// trades the pullback at reduced confidence.
pub struct MaCrossover;

impl Strategy for MaCrossover {
    fn id(&self) -> &str {
        "ma_crossover_v1"
    }

    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: self.id().to_string(),
            name: "MA Crossover".to_string(),
            description:
                "Golden/death cross on SMA 20/50/200 with a bullish-pullback entry variant"
                    .to_string(),
            event_types: vec!["market_data".to_string(), "indicator_update".to_string()],
            min_risk_reward: 1.5,
            max_risk_per_trade: 0.02,
            timeframes: vec!["1d".to_string(), "1w".to_string()],
        }
    }

    fn evaluate(&self, snapshot: &IndicatorSnapshot) -> Signal {
        if snapshot.price <= 0.0
            || snapshot.atr <= 0.0
            || snapshot.sma20 <= 0.0
            || snapshot.sma50 <= 0.0
            || snapshot.sma200 <= 0.0
        {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                "insufficient indicator data",
            );
        }

        let uptrend = snapshot.sma20 > snapshot.sma50 && snapshot.sma50 > snapshot.sma200;
        let downtrend = snapshot.sma20 < snapshot.sma50 && snapshot.sma50 < snapshot.sma200;
        let distance_to_sma20 = (snapshot.price - snapshot.sma20) / snapshot.sma20;

        let setup = if uptrend && (PULLBACK_LOW..=PULLBACK_HIGH).contains(&distance_to_sma20) {
            Setup::BullishPullback
        } else if uptrend && snapshot.price > snapshot.sma20 {
            Setup::GoldenCross
        } else if downtrend && snapshot.price < snapshot.sma20 {
            Setup::DeathCross
        } else {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                "moving averages not aligned",
            );
        };

        let entry = snapshot.price;
        let atr = snapshot.atr;
        let (signal_type, stop, targets, mut confidence) = match setup {
            Setup::GoldenCross => (
                SignalType::Buy,
                snapshot.sma50 - atr,
                vec![entry + 3.0 * atr, entry + 5.0 * atr],
                BASE_CONFIDENCE,
            ),
            Setup::DeathCross => (
                SignalType::Sell,
                snapshot.sma50 + atr,
                vec![entry - 3.0 * atr, entry - 5.0 * atr],
                BASE_CONFIDENCE,
            ),
            Setup::BullishPullback => (
                SignalType::Buy,
                entry - 1.5 * atr,
                vec![entry + 2.0 * atr, entry + 3.5 * atr],
                BASE_CONFIDENCE - PULLBACK_PENALTY,
            ),
        };

        let long = signal_type == SignalType::Buy;
        // SMA-based stops can land on the wrong side of entry when the price
        // has run far from the 50-bar line; that geometry is untradeable.
        let stop_valid = stop > 0.0 && ((long && stop < entry) || (!long && stop > entry));
        if !stop_valid || targets.iter().any(|t| *t <= 0.0) {
            return Signal::hold(
                self.id(),
                &snapshot.symbol,
                snapshot.timestamp,
                "stop level outside tradeable range",
            );
        }

        if (long && snapshot.market_trend == Trend::Bullish)
            || (!long && snapshot.market_trend == Trend::Bearish)
        {
            confidence += 0.12;
        }
        if snapshot.avg_volume > 0.0 && snapshot.volume > snapshot.avg_volume {
            confidence += 0.08;
        }
        if ((snapshot.sma20 - snapshot.sma200) / snapshot.sma200).abs() > WIDE_SEPARATION {
            confidence += 0.10;
        }

        let mut indicators = std::collections::BTreeMap::new();
        indicators.insert("sma20".to_string(), json!(snapshot.sma20));
        indicators.insert("sma50".to_string(), json!(snapshot.sma50));
        indicators.insert("sma200".to_string(), json!(snapshot.sma200));

        let reason = match setup {
            Setup::GoldenCross => "golden cross, price above SMA20",
            Setup::DeathCross => "death cross, price below SMA20",
            Setup::BullishPullback => "uptrend pullback to SMA20",
        };

        Signal {
            strategy_id: self.id().to_string(),
            symbol: snapshot.symbol.clone(),
            timestamp: snapshot.timestamp,
            signal_type,
            confidence: clamp_confidence(confidence),
            entry_price: Some(entry),
            stop_loss: Some(stop),
            take_profits: targets,
            reason: reason.to_string(),
            indicators,
        }
    }
}
