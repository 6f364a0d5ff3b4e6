pub mod service;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;
pub const REINFORCEMENT_INCREMENT: f64 = 0.05;
/// Surprise at or above this level records a negative pattern.
pub const NEGATIVE_PATTERN_THRESHOLD: f64 = 0.7;
const SURPRISE_CONFIDENCE_DRAG: f64 = 0.3;
const ABSTAIN_CONFIDENCE_FLOOR: f64 = 0.25;
const ABSTAIN_BUDGET_FLOOR: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeKind {
    Trade,
    Abstention,
    Deferral,
}

impl EpisodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeKind::Trade => "trade",
            EpisodeKind::Abstention => "abstention",
            EpisodeKind::Deferral => "deferral",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "trade" => Ok(EpisodeKind::Trade),
            "abstention" => Ok(EpisodeKind::Abstention),
            "deferral" => Ok(EpisodeKind::Deferral),
            other => Err(Error::Internal(anyhow::anyhow!(
                "unknown episode kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
    Flat,
}

impl MoveDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MoveDirection::Up => "up",
            MoveDirection::Down => "down",
            MoveDirection::Flat => "flat",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "up" => Ok(MoveDirection::Up),
            "down" => Ok(MoveDirection::Down),
            "flat" => Ok(MoveDirection::Flat),
            other => Err(Error::Internal(anyhow::anyhow!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

/// Which factor dominated the market context at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextDominance {
    Technical,
    Volatility,
    Liquidity,
    Macro,
    Regime,
    Mixed,
    Unclear,
}

impl ContextDominance {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextDominance::Technical => "technical",
            ContextDominance::Volatility => "volatility",
            ContextDominance::Liquidity => "liquidity",
            ContextDominance::Macro => "macro",
            ContextDominance::Regime => "regime",
            ContextDominance::Mixed => "mixed",
            ContextDominance::Unclear => "unclear",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "technical" => Ok(ContextDominance::Technical),
            "volatility" => Ok(ContextDominance::Volatility),
            "liquidity" => Ok(ContextDominance::Liquidity),
            "macro" => Ok(ContextDominance::Macro),
            "regime" => Ok(ContextDominance::Regime),
            "mixed" => Ok(ContextDominance::Mixed),
            "unclear" => Ok(ContextDominance::Unclear),
            other => Err(Error::Internal(anyhow::anyhow!(
                "unknown context dominance '{other}'"
            ))),
        }
    }
}

/// Pre-action expectations recorded with every episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expectation {
    pub direction: MoveDirection,
    pub magnitude_pct: f64,
    pub horizon_minutes: i64,
    pub volatility_band: String,
    #[serde(default)]
    pub failure_modes: Vec<String>,
}

/// Decision-time market context snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketContext {
    pub price: f64,
    pub volume: f64,
    pub volatility: f64,
    pub spread: f64,
    #[serde(default)]
    pub regime: String,
    #[serde(default)]
    pub macro_flags: Vec<String>,
    #[serde(default)]
    pub liquidity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeOutcome {
    pub direction: MoveDirection,
    pub magnitude_pct: f64,
    pub duration_minutes: i64,
    pub profitable: bool,
    pub pnl: f64,
}

/// One decision-point record: expectations up front, outcome and surprise
/// once the market resolves them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub kind: EpisodeKind,
    pub symbol: String,
    pub strategy_name: String,
    pub artifact_ref: Option<String>,
    pub episode_at: DateTime<Utc>,
    pub context: MarketContext,
    pub expectation: Expectation,
    pub confidence: f64,
    pub uncertainty_budget: f64,
    pub context_dominance: ContextDominance,
    pub sequence_position: String,
    pub action_taken: String,
    pub outcome: Option<EpisodeOutcome>,
    pub surprise_score: Option<f64>,
    pub hindsight_notes: Option<String>,
    pub decay_weight: f64,
    pub reinforcement_count: u32,
}

impl Episode {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::validation("episode symbol is required"));
        }
        if self.strategy_name.trim().is_empty() {
            return Err(Error::validation("episode strategy is required"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::validation(format!(
                "episode confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.uncertainty_budget) {
            return Err(Error::validation(format!(
                "uncertainty budget {} outside [0, 1]",
                self.uncertainty_budget
            )));
        }
        Ok(())
    }
}

/// A named drain on the uncertainty budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintyFactor {
    pub name: String,
    pub weight: f64,
    pub score: f64,
}

impl UncertaintyFactor {
    pub fn new(name: &str, weight: f64, score: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            score,
        }
    }
}

/// `0.5·direction_mismatch + 0.3·clamp(|Δmag|/expected) + 0.2·clamp(|Δt|/expected)`.
pub fn surprise_score(expectation: &Expectation, outcome: &EpisodeOutcome) -> f64 {
    let direction_mismatch = if expectation.direction == outcome.direction {
        0.0
    } else {
        1.0
    };
    let magnitude_term = ratio_clamped(
        (outcome.magnitude_pct - expectation.magnitude_pct).abs(),
        expectation.magnitude_pct.abs(),
    );
    let time_term = ratio_clamped(
        (outcome.duration_minutes - expectation.horizon_minutes).abs() as f64,
        expectation.horizon_minutes.abs() as f64,
    );
    0.5 * direction_mismatch + 0.3 * magnitude_term + 0.2 * time_term
}

fn ratio_clamped(delta: f64, expected: f64) -> f64 {
    if expected <= f64::EPSILON {
        return if delta > f64::EPSILON { 1.0 } else { 0.0 };
    }
    (delta / expected).clamp(0.0, 1.0)
}

/// Exponential decay: `exp(−ln 2 · age_days / half_life_days)`.
pub fn decay_weight(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || age_days <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * age_days / half_life_days).exp()
}

/// `Σ(conf·w)/Σw` with `w = decay_weight · (1 + reinforcement_count)`;
/// 0.5 with no usable history.
pub fn weighted_confidence(episodes: &[Episode]) -> f64 {
    let mut weight_sum = 0.0;
    let mut weighted = 0.0;
    for episode in episodes {
        let w = episode.decay_weight * (1.0 + f64::from(episode.reinforcement_count));
        weight_sum += w;
        weighted += episode.confidence * w;
    }
    if weight_sum <= 0.0 {
        return 0.5;
    }
    weighted / weight_sum
}

/// `clamp(weighted − 0.3 · mean(recent surprises), 0, 1)`.
pub fn adjusted_confidence(weighted: f64, recent_surprises: &[f64]) -> f64 {
    let mean_surprise = if recent_surprises.is_empty() {
        0.0
    } else {
        recent_surprises.iter().sum::<f64>() / recent_surprises.len() as f64
    };
    (weighted - SURPRISE_CONFIDENCE_DRAG * mean_surprise).clamp(0.0, 1.0)
}

/// `clamp(1 − Σ weight·score, 0, 1)`.
pub fn uncertainty_budget(factors: &[UncertaintyFactor]) -> f64 {
    let drained: f64 = factors.iter().map(|f| f.weight * f.score).sum();
    (1.0 - drained).clamp(0.0, 1.0)
}

/// Abstain when confidence or residual budget is depleted.
pub fn should_abstain(confidence: f64, budget: f64) -> bool {
    confidence < ABSTAIN_CONFIDENCE_FLOOR || budget < ABSTAIN_BUDGET_FLOOR
}
