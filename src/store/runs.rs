use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signals::parse_uuid;
use super::{opt_ts_from_sql, ts_from_sql, ts_to_sql, Database};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Signal,
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Signal => "signal",
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "signal" => Ok(TriggerKind::Signal),
            "scheduled" => Ok(TriggerKind::Scheduled),
            "manual" => Ok(TriggerKind::Manual),
            other => Err(Error::validation(format!("unknown trigger type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(Error::Internal(anyhow::anyhow!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

/// Orchestration run row. Append-only except status/completion fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRun {
    pub id: Uuid,
    pub symbol: String,
    pub trigger_type: TriggerKind,
    pub trigger_id: Option<String>,
    pub status: RunStatus,
    pub correlation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub suggestion: Option<String>,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub plan_payload: Option<serde_json::Value>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub symbol: String,
    pub trigger_type: TriggerKind,
    pub trigger_id: Option<String>,
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub suggestion: String,
    pub confidence: f64,
    pub reasoning: String,
    pub plan_payload: serde_json::Value,
    pub duration_ms: u64,
}

impl Database {
    pub fn create_run(&self, new: &NewRun, now: DateTime<Utc>) -> Result<OrchestrationRun> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO orchestration_runs
                     (id, symbol, trigger_type, trigger_id, status, correlation_id, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    new.symbol,
                    new.trigger_type.as_str(),
                    new.trigger_id,
                    RunStatus::Running.as_str(),
                    new.correlation_id.to_string(),
                    ts_to_sql(now),
                ],
            )?;
            Ok(())
        })?;
        self.get_run(id)
    }

    pub fn get_run(&self, id: Uuid) -> Result<OrchestrationRun> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM orchestration_runs WHERE id = ?1")?;
            let mut rows = stmt.query(params![id.to_string()])?;
            let Some(row) = rows.next()? else {
                return Err(Error::NotFound("orchestration run", id.to_string()));
            };
            run_from_row(row)
        })
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<OrchestrationRun>> {
        let limit = if limit == 0 { 20 } else { limit };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM orchestration_runs ORDER BY started_at DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(run_from_row(row)?);
            }
            Ok(out)
        })
    }

    pub fn complete_run(
        &self,
        id: Uuid,
        completion: &RunCompletion,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE orchestration_runs
                 SET status = ?1, completed_at = ?2, suggestion = ?3,
                     confidence = ?4, reasoning = ?5, plan_payload = ?6,
                     duration_ms = ?7
                 WHERE id = ?8 AND status = ?9",
                params![
                    RunStatus::Completed.as_str(),
                    ts_to_sql(now),
                    completion.suggestion,
                    completion.confidence,
                    completion.reasoning,
                    completion.plan_payload.to_string(),
                    completion.duration_ms as i64,
                    id.to_string(),
                    RunStatus::Running.as_str(),
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(Error::conflict(format!("run {id} is not running")));
        }
        Ok(())
    }

    pub fn fail_run(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.finish_with_status(id, RunStatus::Failed, error, now)
    }

    pub fn cancel_run(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.finish_with_status(id, RunStatus::Cancelled, reason, now)
    }

    fn finish_with_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE orchestration_runs
                 SET status = ?1, completed_at = ?2, error = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    status.as_str(),
                    ts_to_sql(now),
                    error,
                    id.to_string(),
                    RunStatus::Running.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    /// Shutdown path: every still-running run is marked cancelled.
    pub fn mark_running_interrupted(&self, now: DateTime<Utc>) -> Result<u32> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE orchestration_runs
                 SET status = ?1, completed_at = ?2, error = 'interrupted at shutdown'
                 WHERE status = ?3",
                params![
                    RunStatus::Cancelled.as_str(),
                    ts_to_sql(now),
                    RunStatus::Running.as_str(),
                ],
            )?;
            Ok(updated as u32)
        })
    }

    pub fn run_counts(&self) -> Result<(u64, u64, u64)> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, count(*) FROM orchestration_runs GROUP BY status")?;
            let mut rows = stmt.query([])?;
            let (mut total, mut completed, mut failed) = (0u64, 0u64, 0u64);
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                total += count as u64;
                match status.as_str() {
                    "completed" => completed += count as u64,
                    "failed" => failed += count as u64,
                    _ => {}
                }
            }
            Ok((total, completed, failed))
        })
    }
}

fn run_from_row(row: &Row<'_>) -> Result<OrchestrationRun> {
    let id: String = row.get("id")?;
    let trigger_type: String = row.get("trigger_type")?;
    let status: String = row.get("status")?;
    let correlation: String = row.get("correlation_id")?;
    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let plan_payload: Option<String> = row.get("plan_payload")?;

    Ok(OrchestrationRun {
        id: parse_uuid(&id)?,
        symbol: row.get("symbol")?,
        trigger_type: TriggerKind::parse(&trigger_type)?,
        trigger_id: row.get("trigger_id")?,
        status: RunStatus::parse(&status)?,
        correlation_id: parse_uuid(&correlation)?,
        started_at: ts_from_sql(&started_at)?,
        completed_at: opt_ts_from_sql(completed_at)?,
        suggestion: row.get("suggestion")?,
        confidence: row.get("confidence")?,
        reasoning: row.get("reasoning")?,
        plan_payload: plan_payload.and_then(|raw| serde_json::from_str(&raw).ok()),
        duration_ms: row.get::<_, Option<i64>>("duration_ms")?.map(|ms| ms as u64),
        error: row.get("error")?,
    })
}
