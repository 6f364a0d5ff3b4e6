pub mod broker;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use broker::{BrokerClient, BrokerError, OrderRequest, OrderType};

use crate::backtest::Direction;
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::risk::{PortfolioState, ProposedTrade, RiskPolicy};
use crate::store::signals::{SignalStatus, StoredSignal};
use crate::store::trades::{NewTrade, TradeRecord};
use crate::store::Database;
use crate::strategy::SignalType;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub risk_per_trade: f64,
    pub min_position_size: i64,
    pub max_position_size: i64,
    /// Cap on `qty · entry` as a fraction of net liquidation.
    pub max_position_fraction: f64,
    pub submit_retries: u32,
    pub backoff_base: Duration,
    pub poll_interval: Duration,
    pub poll_deadline: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
            min_position_size: 1,
            max_position_size: 10_000,
            max_position_fraction: 0.2,
            submit_retries: 3,
            backoff_base: Duration::from_secs(1),
            poll_interval: Duration::from_secs(10),
            poll_deadline: Duration::from_secs(120),
        }
    }
}

/// Validates an approved signal, sizes the position under the risk policy,
/// submits to the broker, persists the trade, and polls the order to a
/// terminal state on a background task.
pub struct ExecutionEngine {
    db: Database,
    broker: Arc<dyn BrokerClient>,
    policy: RiskPolicy,
    config: ExecutionConfig,
    clock: SharedClock,
}

impl ExecutionEngine {
    pub fn new(
        db: Database,
        broker: Arc<dyn BrokerClient>,
        policy: RiskPolicy,
        config: ExecutionConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            db,
            broker,
            policy,
            config,
            clock,
        }
    }

    pub async fn execute(&self, signal_id: Uuid, actor: &str) -> Result<TradeRecord> {
        let signal = self.db.get_signal(signal_id)?;
        if signal.status != SignalStatus::Approved {
            return Err(Error::conflict(format!(
                "signal {signal_id} is {}, not approved",
                signal.status.as_str()
            )));
        }
        let (direction, entry, stop, target) = validate_shape(&signal)?;

        let account = self
            .broker
            .account()
            .await
            .map_err(map_broker_error)?;

        // Portfolio gates run before sizing; any violation aborts.
        let state = PortfolioState {
            net_liquidation: account.net_liquidation,
            open_positions: self.db.open_trade_count()?,
            daily_risk_dollars: self.db.daily_risk_dollars(self.clock.now())?,
            drawdown: account.current_drawdown,
        };
        let risk_amount = account.net_liquidation * self.config.risk_per_trade;
        let proposed = ProposedTrade {
            entry_price: entry,
            stop_loss: stop,
            risk_amount,
            risk_fraction: self.config.risk_per_trade,
        };
        let violations = self.policy.evaluate(&state, &proposed);
        if !violations.is_empty() {
            tracing::warn!(
                signal = %signal_id,
                actor,
                policy_version = %self.policy.version,
                codes = ?violations.iter().map(|v| v.code.as_str()).collect::<Vec<_>>(),
                "execution blocked by risk policy"
            );
            return Err(Error::PolicyViolation {
                policy_version: self.policy.version.clone(),
                violations,
            });
        }

        let quantity = self.size_position(entry, stop, &account)?;
        let order = OrderRequest {
            symbol: signal.symbol.clone(),
            direction,
            quantity,
            order_type: OrderType::Lmt,
            limit_price: Some(entry),
            stop_price: None,
        };
        let order_id = self.submit_with_retry(&order).await?;

        let trade = self.db.insert_trade(
            &NewTrade {
                signal_id,
                broker_order_id: order_id.clone(),
                symbol: signal.symbol.clone(),
                direction,
                quantity,
                entry_price: entry,
                stop_loss: stop,
                take_profit: target,
                strategy_id: signal.strategy_id.clone(),
                artifact_id: signal.artifact_id.clone(),
                artifact_hash: signal.artifact_hash.clone(),
                risk_amount,
                risk_fraction: self.config.risk_per_trade,
                position_value: quantity as f64 * entry,
            },
            self.clock.now(),
        )?;
        tracing::info!(
            trade = %trade.id,
            signal = %signal_id,
            order = %order_id,
            symbol = %signal.symbol,
            quantity,
            actor,
            "order submitted"
        );

        self.spawn_order_poll(trade.id, order_id);
        Ok(trade)
    }

    fn size_position(
        &self,
        entry: f64,
        stop: f64,
        account: &broker::AccountSnapshot,
    ) -> Result<i64> {
        let stop_distance = (entry - stop).abs();
        if stop_distance <= 0.0 {
            return Err(Error::validation("stop distance is zero"));
        }
        let risk_amount = account.net_liquidation * self.config.risk_per_trade;
        let mut quantity = (risk_amount / stop_distance).floor() as i64;
        quantity = quantity.clamp(0, self.config.max_position_size);

        let value_cap =
            (account.net_liquidation * self.config.max_position_fraction / entry).floor() as i64;
        quantity = quantity.min(value_cap);
        quantity = quantity.min((account.buying_power / entry).floor() as i64);

        if quantity < self.config.min_position_size {
            return Err(Error::validation(format!(
                "computed position size {quantity} below minimum {}",
                self.config.min_position_size
            )));
        }
        Ok(quantity)
    }

    async fn submit_with_retry(&self, order: &OrderRequest) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.broker.submit_order(order).await {
                Ok(order_id) => return Ok(order_id),
                Err(BrokerError::Permanent(message)) => {
                    return Err(Error::Permanent {
                        service: "broker",
                        message,
                    });
                }
                Err(BrokerError::Transient(message)) => {
                    if attempt >= self.config.submit_retries {
                        return Err(Error::upstream("broker", message));
                    }
                    let backoff = self.config.backoff_base * 2u32.pow(attempt);
                    let jitter_ms = rand::rng().random_range(0..=50u64);
                    tracing::warn!(
                        attempt = attempt + 1,
                        retries = self.config.submit_retries,
                        ?backoff,
                        "transient broker error, backing off: {message}"
                    );
                    tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Poll the order on its own task at a fixed cadence with a bounded
    /// total time; stop on a terminal state.
    fn spawn_order_poll(&self, trade_id: Uuid, order_id: String) {
        let db = self.db.clone();
        let broker = Arc::clone(&self.broker);
        let interval = self.config.poll_interval;
        let deadline = self.config.poll_deadline;
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                tokio::time::sleep(interval).await;
                match broker.order_status(&order_id).await {
                    Ok(report) => {
                        if let Err(e) = db.update_trade_fill(
                            trade_id,
                            report.status,
                            report.filled_quantity,
                            report.avg_fill_price,
                        ) {
                            tracing::error!(trade = %trade_id, "fill update failed: {e}");
                            break;
                        }
                        if report.status.is_terminal() {
                            tracing::info!(
                                trade = %trade_id,
                                status = report.status.as_str(),
                                filled = report.filled_quantity,
                                "order reached terminal state"
                            );
                            break;
                        }
                    }
                    Err(BrokerError::Permanent(message)) => {
                        tracing::error!(trade = %trade_id, "order poll failed permanently: {message}");
                        break;
                    }
                    Err(BrokerError::Transient(message)) => {
                        tracing::warn!(trade = %trade_id, "order poll transient error: {message}");
                    }
                }
                if started.elapsed() >= deadline {
                    tracing::warn!(trade = %trade_id, "order poll deadline reached");
                    break;
                }
            }
        });
    }
}

fn map_broker_error(error: BrokerError) -> Error {
    match error {
        BrokerError::Transient(message) => Error::Upstream {
            service: "broker",
            message,
        },
        BrokerError::Permanent(message) => Error::Permanent {
            service: "broker",
            message,
        },
    }
}

/// Shape checks on the approved signal: tradable direction, positive
/// levels, stop on the protective side.
fn validate_shape(signal: &StoredSignal) -> Result<(Direction, f64, f64, f64)> {
    if signal.symbol.trim().is_empty() {
        return Err(Error::validation("signal symbol is empty"));
    }
    let direction = match signal.signal_type {
        SignalType::Buy => Direction::Long,
        SignalType::Sell => Direction::Short,
        SignalType::Hold => {
            return Err(Error::validation("hold signals are not executable"));
        }
    };
    let entry = signal
        .entry_price
        .ok_or_else(|| Error::validation("entry price required"))?;
    let stop = signal
        .stop_loss
        .ok_or_else(|| Error::validation("stop-loss required"))?;
    let target = signal
        .take_profits
        .first()
        .copied()
        .ok_or_else(|| Error::validation("at least one take-profit required"))?;
    if entry <= 0.0 || stop <= 0.0 || target <= 0.0 {
        return Err(Error::validation("price levels must be positive"));
    }
    match direction {
        Direction::Long if stop >= entry => {
            return Err(Error::validation("buy signal requires stop < entry"));
        }
        Direction::Short if stop <= entry => {
            return Err(Error::validation("sell signal requires stop > entry"));
        }
        _ => {}
    }
    Ok((direction, entry, stop, target))
}
