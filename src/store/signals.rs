use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{opt_ts_from_sql, ts_from_sql, ts_to_sql, Database};
use crate::error::{Error, Result};
use crate::strategy::{Signal, SignalType, StrategyInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Approved => "approved",
            SignalStatus::Rejected => "rejected",
            SignalStatus::Expired => "expired",
            SignalStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(SignalStatus::Pending),
            "approved" => Ok(SignalStatus::Approved),
            "rejected" => Ok(SignalStatus::Rejected),
            "expired" => Ok(SignalStatus::Expired),
            "cancelled" => Ok(SignalStatus::Cancelled),
            other => Err(Error::Internal(anyhow::anyhow!(
                "unknown signal status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        self != SignalStatus::Pending
    }
}

/// Only a pending signal may move; every terminal state is final.
pub fn ensure_transition(from: SignalStatus, to: SignalStatus) -> Result<()> {
    if from == SignalStatus::Pending && to != SignalStatus::Pending {
        return Ok(());
    }
    Err(Error::conflict(format!(
        "invalid signal transition {} -> {}",
        from.as_str(),
        to.as_str()
    )))
}

/// Persisted signal row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSignal {
    pub id: Uuid,
    pub strategy_id: Option<String>,
    pub artifact_id: Option<String>,
    pub artifact_hash: Option<String>,
    pub symbol: String,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profits: Vec<f64>,
    pub reason: String,
    pub indicators: serde_json::Value,
    pub status: SignalStatus,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSignal {
    pub signal: Signal,
    pub artifact_id: Option<String>,
    pub artifact_hash: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub status: Option<SignalStatus>,
    pub symbol: Option<String>,
    pub strategy_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub approved: bool,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub modification_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub broker_order_id: Option<String>,
}

impl Database {
    pub fn upsert_strategy_instance(&self, info: &StrategyInfo, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO strategy_instances
                     (id, name, description, event_types, min_risk_reward,
                      max_risk_per_trade, timeframes, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    info.id,
                    info.name,
                    info.description,
                    serde_json::to_string(&info.event_types).unwrap_or_default(),
                    info.min_risk_reward,
                    info.max_risk_per_trade,
                    serde_json::to_string(&info.timeframes).unwrap_or_default(),
                    ts_to_sql(now),
                ],
            )?;
            Ok(())
        })
    }

    /// Record an immutable artifact version of a strategy. Signals and
    /// trades attribute to artifacts by id + content hash.
    pub fn upsert_strategy_artifact(
        &self,
        artifact_id: &str,
        strategy_id: &str,
        content_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO strategy_artifacts (id, strategy_id, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING",
                params![artifact_id, strategy_id, content_hash, ts_to_sql(now)],
            )?;
            Ok(())
        })
    }

    pub fn insert_signal(&self, new: &NewSignal) -> Result<StoredSignal> {
        new.signal.validate()?;
        let id = Uuid::new_v4();
        let signal = &new.signal;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO strategy_signals
                     (id, strategy_id, artifact_id, artifact_hash, symbol, signal_type,
                      confidence, entry_price, stop_loss, take_profits, reason,
                      indicators, status, correlation_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    id.to_string(),
                    signal.strategy_id,
                    new.artifact_id,
                    new.artifact_hash,
                    signal.symbol,
                    signal.signal_type.as_str(),
                    signal.confidence,
                    signal.entry_price,
                    signal.stop_loss,
                    serde_json::to_string(&signal.take_profits).unwrap_or_default(),
                    signal.reason,
                    serde_json::to_string(&signal.indicators).unwrap_or_default(),
                    SignalStatus::Pending.as_str(),
                    new.correlation_id.map(|c| c.to_string()),
                    ts_to_sql(signal.timestamp),
                    new.expires_at.map(ts_to_sql),
                ],
            )?;
            Ok(())
        })?;
        self.get_signal(id)
    }

    pub fn get_signal(&self, id: Uuid) -> Result<StoredSignal> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM strategy_signals WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![id.to_string()])?;
            let Some(row) = rows.next()? else {
                return Err(Error::NotFound("signal", id.to_string()));
            };
            signal_from_row(row)
        })
    }

    pub fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<StoredSignal>> {
        let mut sql = String::from("SELECT * FROM strategy_signals WHERE 1 = 1");
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(symbol) = &filter.symbol {
            sql.push_str(" AND symbol = ?");
            args.push(SqlValue::Text(symbol.clone()));
        }
        if let Some(strategy) = &filter.strategy_id {
            sql.push_str(" AND strategy_id = ?");
            args.push(SqlValue::Text(strategy.clone()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        args.push(SqlValue::Integer(limit as i64));
        args.push(SqlValue::Integer(filter.offset as i64));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(args.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(signal_from_row(row)?);
            }
            Ok(out)
        })
    }

    pub fn latest_signal(&self, strategy_id: &str, symbol: &str) -> Result<Option<StoredSignal>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM strategy_signals
                 WHERE strategy_id = ?1 AND symbol = ?2
                 ORDER BY created_at DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![strategy_id, symbol])?;
            match rows.next()? {
                Some(row) => Ok(Some(signal_from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Approve in one transaction: flip the pending signal and write the
    /// approval row.
    pub fn approve_signal(
        &self,
        id: Uuid,
        actor: &str,
        modification_notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StoredSignal> {
        self.transition_with_approval(
            id,
            SignalStatus::Approved,
            actor,
            modification_notes,
            None,
            now,
        )
    }

    pub fn reject_signal(
        &self,
        id: Uuid,
        actor: &str,
        rejection_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StoredSignal> {
        self.transition_with_approval(
            id,
            SignalStatus::Rejected,
            actor,
            None,
            rejection_reason,
            now,
        )
    }

    pub fn expire_signal(&self, id: Uuid) -> Result<StoredSignal> {
        self.transition_only(id, SignalStatus::Expired)
    }

    pub fn cancel_signal(&self, id: Uuid) -> Result<StoredSignal> {
        self.transition_only(id, SignalStatus::Cancelled)
    }

    fn transition_only(&self, id: Uuid, to: SignalStatus) -> Result<StoredSignal> {
        let current = self.get_signal(id)?;
        ensure_transition(current.status, to)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE strategy_signals SET status = ?1 WHERE id = ?2",
                params![to.as_str(), id.to_string()],
            )?;
            Ok(())
        })?;
        self.get_signal(id)
    }

    fn transition_with_approval(
        &self,
        id: Uuid,
        to: SignalStatus,
        actor: &str,
        modification_notes: Option<&str>,
        rejection_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StoredSignal> {
        if actor.trim().is_empty() {
            return Err(Error::validation("approval actor is required"));
        }
        let current = self.get_signal(id)?;
        ensure_transition(current.status, to)?;
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE strategy_signals SET status = ?1 WHERE id = ?2",
                params![to.as_str(), id.to_string()],
            )?;
            tx.execute(
                "INSERT INTO trade_approvals
                     (id, signal_id, approved, approved_by, approved_at,
                      modification_notes, rejection_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    id.to_string(),
                    to == SignalStatus::Approved,
                    actor,
                    ts_to_sql(now),
                    modification_notes,
                    rejection_reason,
                ],
            )?;
            Ok(())
        })?;
        self.get_signal(id)
    }

    pub fn approval_for_signal(&self, signal_id: Uuid) -> Result<Option<Approval>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, signal_id, approved, approved_by, approved_at,
                        modification_notes, rejection_reason, broker_order_id
                 FROM trade_approvals WHERE signal_id = ?1
                 ORDER BY approved_at DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![signal_id.to_string()])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let id: String = row.get(0)?;
            let sig: String = row.get(1)?;
            let approved_at: String = row.get(4)?;
            Ok(Some(Approval {
                id: parse_uuid(&id)?,
                signal_id: parse_uuid(&sig)?,
                approved: row.get(2)?,
                approved_by: row.get(3)?,
                approved_at: ts_from_sql(&approved_at)?,
                modification_notes: row.get(5)?,
                rejection_reason: row.get(6)?,
                broker_order_id: row.get(7)?,
            }))
        })
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(anyhow::anyhow!("bad uuid '{raw}': {e}")))
}

fn signal_from_row(row: &Row<'_>) -> Result<StoredSignal> {
    let id: String = row.get("id")?;
    let signal_type: String = row.get("signal_type")?;
    let take_profits: String = row.get("take_profits")?;
    let indicators: String = row.get("indicators")?;
    let status: String = row.get("status")?;
    let correlation: Option<String> = row.get("correlation_id")?;
    let created_at: String = row.get("created_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;

    Ok(StoredSignal {
        id: parse_uuid(&id)?,
        strategy_id: row.get("strategy_id")?,
        artifact_id: row.get("artifact_id")?,
        artifact_hash: row.get("artifact_hash")?,
        symbol: row.get("symbol")?,
        signal_type: SignalType::parse(&signal_type)
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("bad signal type '{signal_type}'")))?,
        confidence: row.get("confidence")?,
        entry_price: row.get("entry_price")?,
        stop_loss: row.get("stop_loss")?,
        take_profits: serde_json::from_str(&take_profits).unwrap_or_default(),
        reason: row.get("reason")?,
        indicators: serde_json::from_str(&indicators).unwrap_or(serde_json::Value::Null),
        status: SignalStatus::parse(&status)?,
        correlation_id: correlation.as_deref().map(parse_uuid).transpose()?,
        created_at: ts_from_sql(&created_at)?,
        expires_at: opt_ts_from_sql(expires_at)?,
    })
}
