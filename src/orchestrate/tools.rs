use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::planner::Plan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub name: String,
    pub success: bool,
}

/// Dispatches side-effectful tools a plan asks for (e.g. a position
/// sizer). The orchestrator only depends on this capability.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, plan: &Plan, correlation_id: Uuid) -> Result<Vec<ToolOutcome>>;
}

/// Default runner: executes nothing and reports an empty outcome list, so
/// the audit payload shape stays stable without side effects.
pub struct NoopToolRunner;

#[async_trait]
impl ToolRunner for NoopToolRunner {
    async fn run(&self, _plan: &Plan, _correlation_id: Uuid) -> Result<Vec<ToolOutcome>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_runner_returns_empty_outcomes() {
        let plan = Plan {
            summary: "hold".into(),
            steps: vec!["wait".into()],
            action: "hold".into(),
            confidence: 0.5,
            reasoning_notes: String::new(),
        };
        let outcomes = NoopToolRunner.run(&plan, Uuid::new_v4()).await.unwrap();
        assert!(outcomes.is_empty());
    }
}
