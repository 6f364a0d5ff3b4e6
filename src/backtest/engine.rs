use chrono::{DateTime, TimeZone, Utc};
use garde::Validate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::{metrics, BacktestConfig, BacktestResult, BacktestTrade, Direction, ExitReason};
use crate::clock::SharedClock;
use crate::data::{Candle, DataSource};
use crate::error::{Error, Result};
use crate::strategy::{Signal, SignalType, Strategy};

struct OpenPosition {
    symbol: String,
    direction: Direction,
    entry_date: DateTime<Utc>,
    entry_price: f64,
    stop_loss: f64,
    take_profits: Vec<f64>,
    quantity: i64,
    entry_confidence: f64,
}

/// Deterministic historical simulator.
///
/// For each symbol, candles inside the configured window are walked
/// chronologically: open positions are checked for exits first (a stop and
/// a target triggering in the same candle resolve to the stop), then new
/// entries are considered while fewer than `max_positions` are open. At
/// most one position is held per symbol. Remaining positions are
/// flat-closed at entry price when the window ends.
pub fn run(
    strategy: &Arc<dyn Strategy>,
    source: &dyn DataSource,
    config: &BacktestConfig,
    clock: &SharedClock,
) -> Result<BacktestResult> {
    config
        .validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    let started = Instant::now();

    let seed = if config.seed == 0 {
        derive_seed(clock)
    } else {
        config.seed
    };

    let window_start = day_start(config.start_date);
    let window_end =
        day_start(config.end_date) + chrono::Duration::days(1) - chrono::Duration::seconds(1);

    let mut capital = config.initial_capital;
    let mut open: HashMap<String, OpenPosition> = HashMap::new();
    let mut trades: Vec<BacktestTrade> = Vec::new();

    for symbol in &config.symbols {
        for candle in source.candles(symbol) {
            if candle.timestamp < window_start || candle.timestamp > window_end {
                continue;
            }

            let exit = open.get(symbol).and_then(|p| exit_level(p, candle));
            if let Some((exit_price, exit_reason)) = exit {
                if let Some(position) = open.remove(symbol) {
                    let trade = close_position(position, candle.timestamp, exit_price, exit_reason);
                    capital += trade.pnl;
                    trades.push(trade);
                }
            }

            if open.len() < config.max_positions as usize && !open.contains_key(symbol) {
                let Some(snapshot) = source.snapshot_at(symbol, candle.timestamp) else {
                    continue;
                };
                let signal = strategy.evaluate(&snapshot);
                if signal.is_hold() || signal.validate().is_err() {
                    continue;
                }
                if let Some(position) = size_entry(&signal, capital, config.risk_per_trade) {
                    tracing::debug!(
                        symbol,
                        qty = position.quantity,
                        entry = position.entry_price,
                        "backtest entry"
                    );
                    open.insert(symbol.clone(), position);
                }
            }
        }
    }

    // Flat-close whatever is still open at end_date: zero P&L by contract.
    for symbol in &config.symbols {
        if let Some(position) = open.remove(symbol) {
            let entry = position.entry_price;
            trades.push(close_position(
                position,
                window_end,
                entry,
                ExitReason::EndOfPeriod,
            ));
        }
    }

    let computed = metrics::compute(&trades, config.initial_capital);
    let final_capital = config.initial_capital + computed.total_return;

    Ok(BacktestResult {
        strategy: config.strategy.clone(),
        symbols: config.symbols.clone(),
        start_date: config.start_date,
        end_date: config.end_date,
        seed,
        initial_capital: config.initial_capital,
        final_capital,
        metrics: computed,
        trades,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn derive_seed(clock: &SharedClock) -> u64 {
    let now = clock.now();
    now.timestamp_nanos_opt()
        .map_or_else(|| now.timestamp() as u64, |n| n as u64)
}

fn day_start(date: chrono::NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Exit price for a position against one candle, stop checked first.
fn exit_level(position: &OpenPosition, candle: &Candle) -> Option<(f64, ExitReason)> {
    match position.direction {
        Direction::Long => {
            if candle.low <= position.stop_loss {
                return Some((position.stop_loss, ExitReason::StopHit));
            }
        }
        Direction::Short => {
            if candle.high >= position.stop_loss {
                return Some((position.stop_loss, ExitReason::StopHit));
            }
        }
    }
    position
        .take_profits
        .iter()
        .find(|tp| **tp >= candle.low && **tp <= candle.high)
        .map(|tp| (*tp, ExitReason::TargetHit))
}

fn size_entry(signal: &Signal, capital: f64, risk_per_trade: f64) -> Option<OpenPosition> {
    let entry = signal.entry_price?;
    let stop = signal.stop_loss?;
    let stop_distance = (entry - stop).abs();
    if stop_distance <= 0.0 {
        return None;
    }
    let quantity = ((capital * risk_per_trade) / stop_distance).floor() as i64;
    if quantity < 1 {
        return None;
    }
    let direction = match signal.signal_type {
        SignalType::Buy => Direction::Long,
        SignalType::Sell => Direction::Short,
        SignalType::Hold => return None,
    };
    Some(OpenPosition {
        symbol: signal.symbol.clone(),
        direction,
        entry_date: signal.timestamp,
        entry_price: entry,
        stop_loss: stop,
        take_profits: signal.take_profits.clone(),
        quantity,
        entry_confidence: signal.confidence,
    })
}

fn close_position(
    position: OpenPosition,
    exit_date: DateTime<Utc>,
    exit_price: f64,
    exit_reason: ExitReason,
) -> BacktestTrade {
    let stop_distance = (position.entry_price - position.stop_loss).abs();
    let signed_move = (exit_price - position.entry_price) * position.direction.multiplier();
    let pnl = signed_move * position.quantity as f64;
    let r_multiple = if stop_distance > 0.0 {
        signed_move / stop_distance
    } else {
        0.0
    };
    BacktestTrade {
        symbol: position.symbol,
        direction: position.direction,
        entry_date: position.entry_date,
        exit_date,
        entry_price: position.entry_price,
        exit_price,
        stop_loss: position.stop_loss,
        take_profits: position.take_profits,
        quantity: position.quantity,
        pnl,
        pnl_pct: signed_move / position.entry_price,
        r_multiple,
        exit_reason,
        entry_confidence: position.entry_confidence,
    }
}
