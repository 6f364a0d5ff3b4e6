#![allow(clippy::float_cmp)]

pub mod api;
pub mod backtest;
pub mod clock;
pub mod config;
pub mod data;
pub mod ejlayer;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod orchestrate;
pub mod planner;
pub mod redact;
pub mod research;
pub mod risk;
pub mod store;
pub mod strategy;

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::strategy::registry::StrategyRegistry;
use crate::strategy::{ma_crossover::MaCrossover, macd_crossover::MacdCrossover,
    rsi_momentum::RsiMomentum};

/// Register the reference strategies. Nothing registers by side effect:
/// the registry stays empty until boot code calls this.
pub fn register_builtin_strategies(
    registry: &StrategyRegistry,
    db: &store::Database,
    clock: &SharedClock,
) -> error::Result<()> {
    let strategies: [Arc<dyn strategy::Strategy>; 3] = [
        Arc::new(RsiMomentum),
        Arc::new(MacdCrossover),
        Arc::new(MaCrossover),
    ];
    for strategy in strategies {
        db.upsert_strategy_instance(&strategy.info(), clock.now())?;
        registry.register(strategy)?;
    }
    Ok(())
}
