use uuid::Uuid;

use super::{
    adjusted_confidence, should_abstain, surprise_score, uncertainty_budget, weighted_confidence,
    Episode, EpisodeOutcome, UncertaintyFactor, NEGATIVE_PATTERN_THRESHOLD,
    REINFORCEMENT_INCREMENT,
};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::store::Database;

const RECENT_EPISODE_WINDOW: usize = 20;
const RECENT_SURPRISE_WINDOW: usize = 10;

/// Confidence figures derived from the episode history, plus the abstain
/// verdict for the proposed action.
#[derive(Debug, Clone, Copy)]
pub struct JudgmentAssessment {
    pub weighted_confidence: f64,
    pub adjusted_confidence: f64,
    pub uncertainty_budget: f64,
    pub abstain: bool,
}

/// Experience & judgment layer: records every decision as an episode and
/// feeds surprise, decay, and reinforcement back into the next decision.
pub struct EjLayer {
    db: Database,
    clock: SharedClock,
    half_life_days: f64,
}

impl EjLayer {
    pub fn new(db: Database, clock: SharedClock, half_life_days: f64) -> Self {
        Self {
            db,
            clock,
            half_life_days,
        }
    }

    /// Derive confidence for a prospective decision on (symbol, strategy)
    /// from recent episodes, and decide whether to abstain.
    pub fn assess(
        &self,
        symbol: &str,
        strategy_name: &str,
        factors: &[UncertaintyFactor],
    ) -> Result<JudgmentAssessment> {
        let recent = self
            .db
            .recent_episodes(symbol, strategy_name, RECENT_EPISODE_WINDOW)?;
        let surprises = self
            .db
            .recent_surprises(symbol, strategy_name, RECENT_SURPRISE_WINDOW)?;
        let weighted = weighted_confidence(&recent);
        let adjusted = adjusted_confidence(weighted, &surprises);
        let budget = uncertainty_budget(factors);
        Ok(JudgmentAssessment {
            weighted_confidence: weighted,
            adjusted_confidence: adjusted,
            uncertainty_budget: budget,
            abstain: should_abstain(adjusted, budget),
        })
    }

    /// Persist one episode. Every orchestration run records exactly one,
    /// whether or not a trade was submitted.
    pub fn record(&self, episode: &Episode) -> Result<()> {
        self.db.insert_episode(episode)
    }

    /// Resolve an episode's outcome: compute surprise, persist it, decay
    /// aged episodes, reinforce structurally similar ones, and capture a
    /// negative pattern on a high-surprise miss.
    pub fn resolve(
        &self,
        episode_id: Uuid,
        outcome: &EpisodeOutcome,
        hindsight_notes: Option<&str>,
    ) -> Result<f64> {
        let episode = self.db.get_episode(episode_id)?;
        let surprise = surprise_score(&episode.expectation, outcome);
        self.db
            .record_episode_outcome(episode_id, outcome, surprise, hindsight_notes)?;

        let now = self.clock.now();
        let decayed = self.db.apply_decay(self.half_life_days, now)?;
        let reinforced = self.db.reinforce_matching(
            &episode.symbol,
            &episode.strategy_name,
            episode.context_dominance,
            episode_id,
            REINFORCEMENT_INCREMENT,
        )?;
        if surprise >= NEGATIVE_PATTERN_THRESHOLD {
            self.db.record_negative_pattern(&episode, now)?;
        }
        tracing::info!(
            episode = %episode_id,
            symbol = %episode.symbol,
            surprise,
            decayed,
            reinforced,
            "episode resolved"
        );
        Ok(surprise)
    }

    pub fn caution_count(&self, symbol: &str, strategy_name: &str) -> Result<u32> {
        self.db.negative_pattern_occurrences(symbol, strategy_name)
    }
}
