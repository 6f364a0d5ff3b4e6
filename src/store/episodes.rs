use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::signals::parse_uuid;
use super::{ts_from_sql, ts_to_sql, Database};
use crate::ejlayer::{
    decay_weight, ContextDominance, Episode, EpisodeKind, EpisodeOutcome, Expectation,
    MarketContext, MoveDirection,
};
use crate::error::{Error, Result};

const DECAY_MIN_AGE_SECONDS: i64 = 3600;

impl Database {
    pub fn insert_episode(&self, episode: &Episode) -> Result<()> {
        episode.validate()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO market_episodes
                     (id, kind, symbol, strategy_name, artifact_ref, episode_at, context,
                      expected_direction, expected_magnitude_pct, expected_horizon_minutes,
                      expected_volatility_band, failure_modes, confidence,
                      uncertainty_budget, context_dominance, sequence_position,
                      action_taken, decay_weight, reinforcement_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19)",
                params![
                    episode.id.to_string(),
                    episode.kind.as_str(),
                    episode.symbol,
                    episode.strategy_name,
                    episode.artifact_ref,
                    ts_to_sql(episode.episode_at),
                    serde_json::to_string(&episode.context).unwrap_or_default(),
                    episode.expectation.direction.as_str(),
                    episode.expectation.magnitude_pct,
                    episode.expectation.horizon_minutes,
                    episode.expectation.volatility_band,
                    serde_json::to_string(&episode.expectation.failure_modes).unwrap_or_default(),
                    episode.confidence,
                    episode.uncertainty_budget,
                    episode.context_dominance.as_str(),
                    episode.sequence_position,
                    episode.action_taken,
                    episode.decay_weight,
                    episode.reinforcement_count,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_episode(&self, id: Uuid) -> Result<Episode> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM market_episodes WHERE id = ?1")?;
            let mut rows = stmt.query(params![id.to_string()])?;
            let Some(row) = rows.next()? else {
                return Err(Error::NotFound("episode", id.to_string()));
            };
            episode_from_row(row)
        })
    }

    /// Record the resolved outcome and surprise. An episode resolves once.
    pub fn record_episode_outcome(
        &self,
        id: Uuid,
        outcome: &EpisodeOutcome,
        surprise: f64,
        hindsight_notes: Option<&str>,
    ) -> Result<()> {
        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE market_episodes
                 SET outcome_direction = ?1, outcome_magnitude_pct = ?2,
                     outcome_duration_minutes = ?3, outcome_profitable = ?4,
                     outcome_pnl = ?5, surprise_score = ?6, hindsight_notes = ?7
                 WHERE id = ?8 AND outcome_direction IS NULL",
                params![
                    outcome.direction.as_str(),
                    outcome.magnitude_pct,
                    outcome.duration_minutes,
                    outcome.profitable,
                    outcome.pnl,
                    surprise,
                    hindsight_notes,
                    id.to_string(),
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(Error::conflict(format!(
                "episode {id} missing or already resolved"
            )));
        }
        Ok(())
    }

    pub fn recent_episodes(
        &self,
        symbol: &str,
        strategy_name: &str,
        limit: usize,
    ) -> Result<Vec<Episode>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM market_episodes
                 WHERE symbol = ?1 AND strategy_name = ?2
                 ORDER BY episode_at DESC LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![symbol, strategy_name, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(episode_from_row(row)?);
            }
            Ok(out)
        })
    }

    pub fn recent_surprises(
        &self,
        symbol: &str,
        strategy_name: &str,
        limit: usize,
    ) -> Result<Vec<f64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT surprise_score FROM market_episodes
                 WHERE symbol = ?1 AND strategy_name = ?2 AND surprise_score IS NOT NULL
                 ORDER BY episode_at DESC LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![symbol, strategy_name, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get(0)?);
            }
            Ok(out)
        })
    }

    /// Bump decay weight (capped at 1.0) and reinforcement count on every
    /// episode structurally similar to the given one.
    pub fn reinforce_matching(
        &self,
        symbol: &str,
        strategy_name: &str,
        dominance: ContextDominance,
        exclude: Uuid,
        increment: f64,
    ) -> Result<u32> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE market_episodes
                 SET decay_weight = min(1.0, decay_weight + ?1),
                     reinforcement_count = reinforcement_count + 1
                 WHERE symbol = ?2 AND strategy_name = ?3 AND context_dominance = ?4
                   AND id != ?5",
                params![
                    increment,
                    symbol,
                    strategy_name,
                    dominance.as_str(),
                    exclude.to_string(),
                ],
            )?;
            Ok(updated as u32)
        })
    }

    /// Recompute decay weights for all episodes older than one hour.
    /// sqlite has no `exp()`, so weights are computed here and written back
    /// inside a single transaction.
    pub fn apply_decay(&self, half_life_days: f64, now: DateTime<Utc>) -> Result<u32> {
        let cutoff = now - chrono::Duration::seconds(DECAY_MIN_AGE_SECONDS);
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT id, episode_at FROM market_episodes WHERE episode_at < ?1",
            )?;
            let mut rows = stmt.query(params![ts_to_sql(cutoff)])?;
            let mut updates: Vec<(String, f64)> = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let at: String = row.get(1)?;
                let age_days = (now - ts_from_sql(&at)?).num_seconds() as f64 / 86_400.0;
                updates.push((id, decay_weight(age_days, half_life_days)));
            }
            drop(rows);
            drop(stmt);
            let count = updates.len() as u32;
            for (id, weight) in updates {
                tx.execute(
                    "UPDATE market_episodes SET decay_weight = ?1 WHERE id = ?2",
                    params![weight, id],
                )?;
            }
            Ok(count)
        })
    }

    /// Upsert the (symbol, strategy, dominance) negative pattern and link
    /// the triggering episode.
    pub fn record_negative_pattern(&self, episode: &Episode, now: DateTime<Utc>) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO negative_patterns
                     (id, symbol, strategy_name, context_dominance, occurrences, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)
                 ON CONFLICT(symbol, strategy_name, context_dominance)
                 DO UPDATE SET occurrences = occurrences + 1, last_seen_at = ?5",
                params![
                    Uuid::new_v4().to_string(),
                    episode.symbol,
                    episode.strategy_name,
                    episode.context_dominance.as_str(),
                    ts_to_sql(now),
                ],
            )?;
            let pattern_id: String = tx.query_row(
                "SELECT id FROM negative_patterns
                 WHERE symbol = ?1 AND strategy_name = ?2 AND context_dominance = ?3",
                params![
                    episode.symbol,
                    episode.strategy_name,
                    episode.context_dominance.as_str(),
                ],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO episode_pattern_matches (id, episode_id, pattern_id, matched_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    episode.id.to_string(),
                    pattern_id,
                    ts_to_sql(now),
                ],
            )?;
            Ok(())
        })
    }

    pub fn negative_pattern_occurrences(&self, symbol: &str, strategy_name: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT coalesce(sum(occurrences), 0) FROM negative_patterns
                 WHERE symbol = ?1 AND strategy_name = ?2",
                params![symbol, strategy_name],
                |row| row.get(0),
            )?;
            Ok(total as u32)
        })
    }
}

fn episode_from_row(row: &Row<'_>) -> Result<Episode> {
    let id: String = row.get("id")?;
    let kind: String = row.get("kind")?;
    let episode_at: String = row.get("episode_at")?;
    let context: String = row.get("context")?;
    let expected_direction: String = row.get("expected_direction")?;
    let failure_modes: String = row.get("failure_modes")?;
    let dominance: String = row.get("context_dominance")?;
    let outcome_direction: Option<String> = row.get("outcome_direction")?;

    let outcome = match outcome_direction {
        Some(direction) => Some(EpisodeOutcome {
            direction: MoveDirection::parse(&direction)?,
            magnitude_pct: row.get::<_, Option<f64>>("outcome_magnitude_pct")?.unwrap_or(0.0),
            duration_minutes: row
                .get::<_, Option<i64>>("outcome_duration_minutes")?
                .unwrap_or(0),
            profitable: row.get::<_, Option<bool>>("outcome_profitable")?.unwrap_or(false),
            pnl: row.get::<_, Option<f64>>("outcome_pnl")?.unwrap_or(0.0),
        }),
        None => None,
    };

    Ok(Episode {
        id: parse_uuid(&id)?,
        kind: EpisodeKind::parse(&kind)?,
        symbol: row.get("symbol")?,
        strategy_name: row.get("strategy_name")?,
        artifact_ref: row.get("artifact_ref")?,
        episode_at: ts_from_sql(&episode_at)?,
        context: serde_json::from_str::<MarketContext>(&context).unwrap_or_default(),
        expectation: Expectation {
            direction: MoveDirection::parse(&expected_direction)?,
            magnitude_pct: row.get("expected_magnitude_pct")?,
            horizon_minutes: row.get("expected_horizon_minutes")?,
            volatility_band: row.get("expected_volatility_band")?,
            failure_modes: serde_json::from_str(&failure_modes).unwrap_or_default(),
        },
        confidence: row.get("confidence")?,
        uncertainty_budget: row.get("uncertainty_budget")?,
        context_dominance: ContextDominance::parse(&dominance)?,
        sequence_position: row.get("sequence_position")?,
        action_taken: row.get("action_taken")?,
        outcome,
        surprise_score: row.get("surprise_score")?,
        hindsight_notes: row.get("hindsight_notes")?,
        decay_weight: row.get("decay_weight")?,
        reinforcement_count: row.get::<_, i64>("reinforcement_count")? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn episode(at: DateTime<Utc>) -> Episode {
        Episode {
            id: Uuid::new_v4(),
            kind: EpisodeKind::Trade,
            symbol: "AAPL".into(),
            strategy_name: "rsi_momentum_v1".into(),
            artifact_ref: None,
            episode_at: at,
            context: MarketContext {
                price: 190.0,
                volume: 1_000_000.0,
                volatility: 0.2,
                spread: 0.02,
                regime: "trending".into(),
                macro_flags: vec![],
                liquidity: "deep".into(),
            },
            expectation: Expectation {
                direction: MoveDirection::Up,
                magnitude_pct: 2.0,
                horizon_minutes: 60,
                volatility_band: "normal".into(),
                failure_modes: vec!["gap risk".into()],
            },
            confidence: 0.7,
            uncertainty_budget: 0.8,
            context_dominance: ContextDominance::Technical,
            sequence_position: "standalone".into(),
            action_taken: "buy".into(),
            outcome: None,
            surprise_score: None,
            hindsight_notes: None,
            decay_weight: 1.0,
            reinforcement_count: 0,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let db = db();
        let stored = episode(now());
        db.insert_episode(&stored).unwrap();
        let loaded = db.get_episode(stored.id).unwrap();
        assert_eq!(loaded.symbol, "AAPL");
        assert_eq!(loaded.expectation.direction, MoveDirection::Up);
        assert_eq!(loaded.context.regime, "trending");
        assert!(loaded.outcome.is_none());
    }

    #[test]
    fn outcome_resolves_once() {
        let db = db();
        let stored = episode(now());
        db.insert_episode(&stored).unwrap();
        let outcome = EpisodeOutcome {
            direction: MoveDirection::Down,
            magnitude_pct: 2.0,
            duration_minutes: 60,
            profitable: false,
            pnl: -150.0,
        };
        db.record_episode_outcome(stored.id, &outcome, 0.5, Some("fought the tape"))
            .unwrap();
        let loaded = db.get_episode(stored.id).unwrap();
        assert_eq!(loaded.surprise_score, Some(0.5));
        assert_eq!(loaded.outcome.unwrap().pnl, -150.0);

        assert!(db
            .record_episode_outcome(stored.id, &outcome, 0.5, None)
            .is_err());
    }

    #[test]
    fn reinforcement_bumps_similar_episodes_only() {
        let db = db();
        let older = episode(now() - chrono::Duration::days(2));
        let mut other_symbol = episode(now() - chrono::Duration::days(2));
        other_symbol.symbol = "MSFT".into();
        let fresh = episode(now());
        db.insert_episode(&older).unwrap();
        db.insert_episode(&other_symbol).unwrap();
        db.insert_episode(&fresh).unwrap();

        let touched = db
            .reinforce_matching(
                "AAPL",
                "rsi_momentum_v1",
                ContextDominance::Technical,
                fresh.id,
                0.05,
            )
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(db.get_episode(older.id).unwrap().reinforcement_count, 1);
        assert_eq!(db.get_episode(other_symbol.id).unwrap().reinforcement_count, 0);
        assert_eq!(db.get_episode(fresh.id).unwrap().reinforcement_count, 0);
    }

    #[test]
    fn reinforcement_weight_caps_at_one() {
        let db = db();
        let stored = episode(now() - chrono::Duration::days(1));
        db.insert_episode(&stored).unwrap();
        for _ in 0..30 {
            db.reinforce_matching(
                "AAPL",
                "rsi_momentum_v1",
                ContextDominance::Technical,
                Uuid::new_v4(),
                0.05,
            )
            .unwrap();
        }
        let loaded = db.get_episode(stored.id).unwrap();
        assert!(loaded.decay_weight <= 1.0);
        assert_eq!(loaded.reinforcement_count, 30);
    }

    #[test]
    fn decay_skips_fresh_episodes() {
        let db = db();
        let fresh = episode(now() - chrono::Duration::minutes(30));
        let old = episode(now() - chrono::Duration::days(30));
        db.insert_episode(&fresh).unwrap();
        db.insert_episode(&old).unwrap();

        let touched = db.apply_decay(30.0, now()).unwrap();
        assert_eq!(touched, 1);
        assert!((db.get_episode(fresh.id).unwrap().decay_weight - 1.0).abs() < f64::EPSILON);
        let decayed = db.get_episode(old.id).unwrap().decay_weight;
        assert!((decayed - 0.5).abs() < 1e-6);
    }

    #[test]
    fn negative_pattern_upserts_and_links() {
        let db = db();
        let first = episode(now());
        let second = episode(now());
        db.insert_episode(&first).unwrap();
        db.insert_episode(&second).unwrap();

        db.record_negative_pattern(&first, now()).unwrap();
        db.record_negative_pattern(&second, now()).unwrap();

        assert_eq!(
            db.negative_pattern_occurrences("AAPL", "rsi_momentum_v1").unwrap(),
            2
        );
        assert_eq!(
            db.negative_pattern_occurrences("MSFT", "rsi_momentum_v1").unwrap(),
            0
        );
        let matches: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM episode_pattern_matches",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(matches, 2);
    }

    #[test]
    fn recent_surprises_only_resolved() {
        let db = db();
        let resolved = episode(now() - chrono::Duration::hours(3));
        let pending = episode(now());
        db.insert_episode(&resolved).unwrap();
        db.insert_episode(&pending).unwrap();
        db.record_episode_outcome(
            resolved.id,
            &EpisodeOutcome {
                direction: MoveDirection::Up,
                magnitude_pct: 1.0,
                duration_minutes: 30,
                profitable: true,
                pnl: 50.0,
            },
            0.25,
            None,
        )
        .unwrap();

        let surprises = db.recent_surprises("AAPL", "rsi_momentum_v1", 10).unwrap();
        assert_eq!(surprises, vec![0.25]);
    }
}
