use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::MemoryItem;
use crate::strategy::Signal;

const PLANNER_TIMEOUT: Duration = Duration::from_secs(30);

/// Planner output: a ranked action with its reasoning trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    pub action: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning_notes: String,
}

/// Everything the planner sees for one decision.
#[derive(Debug, Clone, Serialize)]
pub struct PlanningContext {
    pub correlation_id: Uuid,
    pub symbol: String,
    pub composed_context: String,
    pub constraints: BTreeMap<String, Value>,
    pub memories: Vec<MemoryItem>,
    pub signals: Vec<Signal>,
}

/// AI planner capability. A planner error is fatal to the run.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, context: &PlanningContext) -> Result<Plan>;
}

pub struct HttpPlanner {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PLANNER_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(anyhow::anyhow!("build planner client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(&self, context: &PlanningContext) -> Result<Plan> {
        let url = format!("{}/plan", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "correlation_id": context.correlation_id,
                "symbol": context.symbol,
                "context": context.composed_context,
                "constraints": context.constraints,
                "memories": context.memories,
            }))
            .send()
            .await
            .map_err(|e| Error::upstream("planner", e))?;
        if !response.status().is_success() {
            return Err(Error::upstream(
                "planner",
                format!("returned {}", response.status()),
            ));
        }
        response
            .json::<Plan>()
            .await
            .map_err(|e| Error::upstream("planner", format!("bad payload: {e}")))
    }
}

/// Deterministic fallback planner. Promotes the strongest fresh signal to
/// an action; holds otherwise. Used by tests and `PLANNER_MODE=builtin`.
pub struct RuleBasedPlanner;

#[async_trait]
impl Planner for RuleBasedPlanner {
    async fn plan(&self, context: &PlanningContext) -> Result<Plan> {
        let best = context
            .signals
            .iter()
            .filter(|s| !s.is_hold())
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let plan = match best {
            Some(signal) => Plan {
                summary: format!(
                    "{} {} per {} (confidence {:.2})",
                    signal.signal_type.as_str(),
                    signal.symbol,
                    signal.strategy_id,
                    signal.confidence
                ),
                steps: vec![
                    format!("validate {} signal levels", signal.strategy_id),
                    "size position under the active risk policy".to_string(),
                    "queue signal for human approval".to_string(),
                ],
                action: signal.signal_type.as_str().to_string(),
                confidence: signal.confidence,
                reasoning_notes: format!(
                    "{} recalled memories; strongest signal: {}",
                    context.memories.len(),
                    signal.reason
                ),
            },
            None => Plan {
                summary: format!("hold {} pending a qualifying signal", context.symbol),
                steps: vec!["continue monitoring".to_string()],
                action: "hold".to_string(),
                confidence: 0.5,
                reasoning_notes: format!(
                    "no actionable signal; {} recalled memories",
                    context.memories.len()
                ),
            },
        };
        Ok(plan)
    }
}

/// Placeholder wired when no planner URL is configured: every run fails
/// with an upstream error, as the pipeline contract requires.
pub struct UnconfiguredPlanner;

#[async_trait]
impl Planner for UnconfiguredPlanner {
    async fn plan(&self, _context: &PlanningContext) -> Result<Plan> {
        Err(Error::upstream("planner", "no planner service configured"))
    }
}
