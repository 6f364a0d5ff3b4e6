use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signals::parse_uuid;
use super::{ts_from_sql, ts_to_sql, Database};
use crate::backtest::Direction;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl TradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Submitted => "submitted",
            TradeStatus::PartiallyFilled => "partially_filled",
            TradeStatus::Filled => "filled",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "submitted" => Ok(TradeStatus::Submitted),
            "partially_filled" => Ok(TradeStatus::PartiallyFilled),
            "filled" => Ok(TradeStatus::Filled),
            "cancelled" => Ok(TradeStatus::Cancelled),
            "rejected" => Ok(TradeStatus::Rejected),
            other => Err(Error::Internal(anyhow::anyhow!(
                "unknown trade status '{other}'"
            ))),
        }
    }

    /// Polling stops on these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::Filled | TradeStatus::Cancelled | TradeStatus::Rejected
        )
    }
}

/// Persisted trade row with its audit trail back to the signal and the
/// strategy artifact that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub signal_id: Option<Uuid>,
    pub broker_order_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: i64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy_id: Option<String>,
    pub artifact_id: Option<String>,
    pub artifact_hash: Option<String>,
    pub status: TradeStatus,
    pub filled_quantity: i64,
    pub avg_fill_price: f64,
    pub risk_amount: f64,
    pub risk_fraction: f64,
    pub position_value: f64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTrade {
    pub signal_id: Uuid,
    pub broker_order_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: i64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy_id: Option<String>,
    pub artifact_id: Option<String>,
    pub artifact_hash: Option<String>,
    pub risk_amount: f64,
    pub risk_fraction: f64,
    pub position_value: f64,
}

impl Database {
    /// Insert the trade and link the broker order id onto the approval row
    /// in a single transaction.
    pub fn insert_trade(&self, new: &NewTrade, now: DateTime<Utc>) -> Result<TradeRecord> {
        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO trades
                     (id, signal_id, broker_order_id, symbol, direction, quantity,
                      entry_price, stop_loss, take_profit, strategy_id, artifact_id,
                      artifact_hash, status, risk_amount, risk_fraction,
                      position_value, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?15, ?16, ?17)",
                params![
                    id.to_string(),
                    new.signal_id.to_string(),
                    new.broker_order_id,
                    new.symbol,
                    direction_str(new.direction),
                    new.quantity,
                    new.entry_price,
                    new.stop_loss,
                    new.take_profit,
                    new.strategy_id,
                    new.artifact_id,
                    new.artifact_hash,
                    TradeStatus::Submitted.as_str(),
                    new.risk_amount,
                    new.risk_fraction,
                    new.position_value,
                    ts_to_sql(now),
                ],
            )?;
            tx.execute(
                "UPDATE trade_approvals SET broker_order_id = ?1 WHERE signal_id = ?2",
                params![new.broker_order_id, new.signal_id.to_string()],
            )?;
            Ok(())
        })?;
        self.get_trade(id)
    }

    pub fn get_trade(&self, id: Uuid) -> Result<TradeRecord> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM trades WHERE id = ?1")?;
            let mut rows = stmt.query(params![id.to_string()])?;
            let Some(row) = rows.next()? else {
                return Err(Error::NotFound("trade", id.to_string()));
            };
            trade_from_row(row)
        })
    }

    pub fn trade_for_signal(&self, signal_id: Uuid) -> Result<Option<TradeRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM trades WHERE signal_id = ?1 ORDER BY submitted_at DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![signal_id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(trade_from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn update_trade_fill(
        &self,
        id: Uuid,
        status: TradeStatus,
        filled_quantity: i64,
        avg_fill_price: f64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE trades SET status = ?1, filled_quantity = ?2, avg_fill_price = ?3
                 WHERE id = ?4",
                params![status.as_str(), filled_quantity, avg_fill_price, id.to_string()],
            )?;
            if updated == 0 {
                return Err(Error::NotFound("trade", id.to_string()));
            }
            Ok(())
        })
    }

    /// Open-position count for the risk gates: anything submitted or filled
    /// that has not reached a closing terminal state.
    pub fn open_trade_count(&self) -> Result<u32> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM trades WHERE status IN ('submitted', 'partially_filled', 'filled')",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    /// Sum of dollar risk across trades submitted today (UTC).
    pub fn daily_risk_dollars(&self, now: DateTime<Utc>) -> Result<f64> {
        let day_start = now
            .date_naive()
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        self.with_conn(|conn| {
            let total: f64 = conn.query_row(
                "SELECT coalesce(sum(risk_amount), 0.0) FROM trades
                 WHERE submitted_at >= ?1 AND status != 'rejected'",
                params![ts_to_sql(day_start)],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "buy",
        Direction::Short => "sell",
    }
}

fn parse_direction(raw: &str) -> Result<Direction> {
    match raw {
        "buy" => Ok(Direction::Long),
        "sell" => Ok(Direction::Short),
        other => Err(Error::Internal(anyhow::anyhow!(
            "unknown trade direction '{other}'"
        ))),
    }
}

fn trade_from_row(row: &Row<'_>) -> Result<TradeRecord> {
    let id: String = row.get("id")?;
    let signal_id: Option<String> = row.get("signal_id")?;
    let direction: String = row.get("direction")?;
    let status: String = row.get("status")?;
    let submitted_at: String = row.get("submitted_at")?;
    Ok(TradeRecord {
        id: parse_uuid(&id)?,
        signal_id: signal_id.as_deref().map(parse_uuid).transpose()?,
        broker_order_id: row.get("broker_order_id")?,
        symbol: row.get("symbol")?,
        direction: parse_direction(&direction)?,
        quantity: row.get("quantity")?,
        entry_price: row.get("entry_price")?,
        stop_loss: row.get("stop_loss")?,
        take_profit: row.get("take_profit")?,
        strategy_id: row.get("strategy_id")?,
        artifact_id: row.get("artifact_id")?,
        artifact_hash: row.get("artifact_hash")?,
        status: TradeStatus::parse(&status)?,
        filled_quantity: row.get("filled_quantity")?,
        avg_fill_price: row.get("avg_fill_price")?,
        risk_amount: row.get("risk_amount")?,
        risk_fraction: row.get("risk_fraction")?,
        position_value: row.get("position_value")?,
        submitted_at: ts_from_sql(&submitted_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::signals::{NewSignal, SignalStatus};
    use crate::strategy::{Signal, SignalType, StrategyInfo};
    use chrono::TimeZone;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn approved_signal(db: &Database) -> Uuid {
        db.upsert_strategy_instance(
            &StrategyInfo {
                id: "rsi_momentum_v1".into(),
                name: "RSI Momentum".into(),
                description: String::new(),
                event_types: vec![],
                min_risk_reward: 1.0,
                max_risk_per_trade: 0.02,
                timeframes: vec![],
            },
            now(),
        )
        .unwrap();
        let stored = db
            .insert_signal(&NewSignal {
                signal: Signal {
                    strategy_id: "rsi_momentum_v1".into(),
                    symbol: "AAPL".into(),
                    timestamp: now(),
                    signal_type: SignalType::Buy,
                    confidence: 0.8,
                    entry_price: Some(190.0),
                    stop_loss: Some(185.0),
                    take_profits: vec![200.0],
                    reason: String::new(),
                    indicators: Default::default(),
                },
                artifact_id: None,
                artifact_hash: None,
                correlation_id: None,
                expires_at: None,
            })
            .unwrap();
        db.approve_signal(stored.id, "tester", None, now()).unwrap();
        stored.id
    }

    fn new_trade(signal_id: Uuid) -> NewTrade {
        NewTrade {
            signal_id,
            broker_order_id: "ord-123".into(),
            symbol: "AAPL".into(),
            direction: Direction::Long,
            quantity: 200,
            entry_price: 190.0,
            stop_loss: 185.0,
            take_profit: 200.0,
            strategy_id: Some("rsi_momentum_v1".into()),
            artifact_id: None,
            artifact_hash: None,
            risk_amount: 1000.0,
            risk_fraction: 0.01,
            position_value: 38_000.0,
        }
    }

    #[test]
    fn insert_links_order_to_approval_atomically() {
        let db = db();
        let signal_id = approved_signal(&db);
        let trade = db.insert_trade(&new_trade(signal_id), now()).unwrap();
        assert_eq!(trade.status, TradeStatus::Submitted);
        assert_eq!(trade.broker_order_id, "ord-123");

        let approval = db.approval_for_signal(signal_id).unwrap().unwrap();
        assert_eq!(approval.broker_order_id.as_deref(), Some("ord-123"));

        let signal = db.get_signal(signal_id).unwrap();
        assert_eq!(signal.status, SignalStatus::Approved);
    }

    #[test]
    fn fill_updates_status_and_quantities() {
        let db = db();
        let signal_id = approved_signal(&db);
        let trade = db.insert_trade(&new_trade(signal_id), now()).unwrap();

        db.update_trade_fill(trade.id, TradeStatus::PartiallyFilled, 100, 190.1)
            .unwrap();
        let partial = db.get_trade(trade.id).unwrap();
        assert_eq!(partial.status, TradeStatus::PartiallyFilled);
        assert_eq!(partial.filled_quantity, 100);

        db.update_trade_fill(trade.id, TradeStatus::Filled, 200, 190.05)
            .unwrap();
        let filled = db.get_trade(trade.id).unwrap();
        assert!(filled.status.is_terminal());
        assert!((filled.avg_fill_price - 190.05).abs() < f64::EPSILON);
    }

    #[test]
    fn open_count_ignores_terminal_closes() {
        let db = db();
        let signal_id = approved_signal(&db);
        let trade = db.insert_trade(&new_trade(signal_id), now()).unwrap();
        assert_eq!(db.open_trade_count().unwrap(), 1);

        db.update_trade_fill(trade.id, TradeStatus::Cancelled, 0, 0.0)
            .unwrap();
        assert_eq!(db.open_trade_count().unwrap(), 0);
    }

    #[test]
    fn daily_risk_sums_today_only() {
        let db = db();
        let signal_id = approved_signal(&db);
        db.insert_trade(&new_trade(signal_id), now()).unwrap();
        let today = db.daily_risk_dollars(now()).unwrap();
        assert!((today - 1000.0).abs() < f64::EPSILON);

        let tomorrow = now() + chrono::Duration::days(1);
        assert!((db.daily_risk_dollars(tomorrow).unwrap() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trade_for_signal_round_trip() {
        let db = db();
        let signal_id = approved_signal(&db);
        assert!(db.trade_for_signal(signal_id).unwrap().is_none());
        db.insert_trade(&new_trade(signal_id), now()).unwrap();
        let found = db.trade_for_signal(signal_id).unwrap().unwrap();
        assert_eq!(found.quantity, 200);
    }
}
