pub mod tools;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tools::{ToolOutcome, ToolRunner};

use crate::clock::SharedClock;
use crate::ejlayer::service::{EjLayer, JudgmentAssessment};
use crate::ejlayer::{
    ContextDominance, Episode, EpisodeKind, Expectation, MarketContext, MoveDirection,
    UncertaintyFactor,
};
use crate::error::{Error, Result};
use crate::lifecycle::{SignalProduct, SignalPublisher};
use crate::memory::{MemoryItem, MemoryQuery, MemorySource, MemoryStore};
use crate::planner::{Plan, Planner, PlanningContext};
use crate::redact::redact;
use crate::research::{ResearchBundle, ResearchClient};
use crate::store::runs::RunCompletion;
use crate::store::signals::NewSignal;
use crate::store::Database;
use crate::strategy::registry::StrategyRegistry;
use crate::strategy::{IndicatorSnapshot, Signal};

/// Memories recalled per run.
pub const RECALL_LIMIT: usize = 5;

/// One decision request: recall → analyze → plan → act → retain.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestrationRequest {
    pub bank: String,
    pub symbol: String,
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
    #[serde(default)]
    pub user_context: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub research_queries: Vec<String>,
}

impl OrchestrationRequest {
    pub fn validate(&self) -> Result<()> {
        if self.bank.trim().is_empty() {
            return Err(Error::validation("INVALID_REQUEST: bank is required"));
        }
        if self.symbol.trim().is_empty() {
            return Err(Error::validation("INVALID_REQUEST: symbol is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub plan: Plan,
    pub confidence: f64,
    pub abstained: bool,
    pub episode_id: Uuid,
    pub recalled: usize,
    pub tool_outcomes: Vec<ToolOutcome>,
}

/// Composes registry, memory, research, planner, tool runner, store, and
/// EJLayer into the decision loop. Stages are strictly sequential within
/// one run; the correlation id flows through every downstream call.
pub struct Orchestrator {
    registry: Arc<StrategyRegistry>,
    memory: Arc<dyn MemoryStore>,
    research: Option<Arc<dyn ResearchClient>>,
    planner: Arc<dyn Planner>,
    tools: Arc<dyn ToolRunner>,
    publisher: Arc<SignalPublisher>,
    db: Database,
    ejlayer: Arc<EjLayer>,
    clock: SharedClock,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<StrategyRegistry>,
        memory: Arc<dyn MemoryStore>,
        research: Option<Arc<dyn ResearchClient>>,
        planner: Arc<dyn Planner>,
        tools: Arc<dyn ToolRunner>,
        publisher: Arc<SignalPublisher>,
        db: Database,
        ejlayer: Arc<EjLayer>,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            memory,
            research,
            planner,
            tools,
            publisher,
            db,
            ejlayer,
            clock,
        }
    }

    /// Drive one run to completion and persist its final state. On a fatal
    /// error the run row is marked failed (or cancelled when the token
    /// fired) before the error returns to the caller.
    pub async fn drive(
        &self,
        run_id: Uuid,
        correlation_id: Uuid,
        request: OrchestrationRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        match self.pipeline(correlation_id, &request, &cancel).await {
            Ok(outcome) => {
                self.db.complete_run(
                    run_id,
                    &RunCompletion {
                        suggestion: outcome.plan.summary.clone(),
                        confidence: outcome.confidence,
                        reasoning: outcome.plan.reasoning_notes.clone(),
                        plan_payload: json!({
                            "plan": &outcome.plan,
                            "tools": &outcome.tool_outcomes,
                            "abstained": outcome.abstained,
                        }),
                        duration_ms: started.elapsed().as_millis() as u64,
                    },
                    self.clock.now(),
                )?;
                tracing::info!(
                    run = %run_id,
                    correlation = %correlation_id,
                    symbol = %request.symbol,
                    action = %outcome.plan.action,
                    confidence = outcome.confidence,
                    "orchestration run completed"
                );
                Ok(outcome)
            }
            Err(error) => {
                if cancel.is_cancelled() {
                    if let Err(persist) =
                        self.db.cancel_run(run_id, "cancelled", self.clock.now())
                    {
                        tracing::warn!(run = %run_id, "could not persist cancellation: {persist}");
                    }
                } else if let Err(persist) =
                    self.db.fail_run(run_id, &error.to_string(), self.clock.now())
                {
                    tracing::warn!(run = %run_id, "could not persist failure: {persist}");
                }
                tracing::warn!(run = %run_id, correlation = %correlation_id, "orchestration run failed: {error}");
                Err(error)
            }
        }
    }

    async fn pipeline(
        &self,
        correlation_id: Uuid,
        request: &OrchestrationRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        request.validate()?;
        ensure_active(cancel)?;

        // Recall. A memory failure here is surfaced, not swallowed.
        let recalled = self
            .memory
            .recall(
                &request.bank,
                &MemoryQuery::for_symbol(&request.symbol, RECALL_LIMIT),
            )
            .await?;
        tracing::debug!(correlation = %correlation_id, count = recalled.len(), "recall stage done");
        ensure_active(cancel)?;

        // Analyze. A hold or a strategy-lookup miss is skipped, not fatal.
        let fresh_signal = self.analyze(request, correlation_id)?;
        ensure_active(cancel)?;

        // Research is optional; failures are logged and omitted.
        let research = self.research_stage(request, correlation_id).await;
        ensure_active(cancel)?;

        let composed = compose_context(
            &request.user_context,
            &recalled,
            fresh_signal.as_ref(),
            research.as_ref(),
        );

        let signals: Vec<Signal> = fresh_signal.iter().cloned().collect();
        let plan = self
            .planner
            .plan(&PlanningContext {
                correlation_id,
                symbol: request.symbol.clone(),
                composed_context: composed,
                constraints: request.constraints.clone(),
                memories: recalled.clone(),
                signals: signals.clone(),
            })
            .await?;
        let confidence = normalize_confidence(plan.confidence);
        ensure_active(cancel)?;

        let strategy_name = request.strategy_id.as_deref().unwrap_or("orchestrator");
        let research_requested = !request.research_queries.is_empty();
        let factors = uncertainty_factors(
            recalled.len(),
            research_requested && research.is_none(),
            fresh_signal.is_some(),
            confidence,
        );
        let assessment = self
            .ejlayer
            .assess(&request.symbol, strategy_name, &factors)?;
        let cautions = self.ejlayer.caution_count(&request.symbol, strategy_name)?;

        let tool_outcomes = self.tools.run(&plan, correlation_id).await?;
        ensure_active(cancel)?;

        self.retain_decision(
            request,
            correlation_id,
            &plan,
            confidence,
            &signals,
            &tool_outcomes,
            cautions,
        )
        .await?;

        let episode = build_episode(
            request,
            &plan,
            confidence,
            &assessment,
            fresh_signal.as_ref(),
            research.is_some(),
            self.clock.now(),
        );
        self.ejlayer.record(&episode)?;

        Ok(RunOutcome {
            plan,
            confidence,
            abstained: assessment.abstain,
            episode_id: episode.id,
            recalled: recalled.len(),
            tool_outcomes,
        })
    }

    fn analyze(
        &self,
        request: &OrchestrationRequest,
        correlation_id: Uuid,
    ) -> Result<Option<Signal>> {
        let Some(strategy_id) = &request.strategy_id else {
            return Ok(None);
        };
        let Some(strategy) = self.registry.get(strategy_id) else {
            tracing::warn!(correlation = %correlation_id, strategy = %strategy_id, "strategy not registered, skipping analyze stage");
            return Ok(None);
        };
        let snapshot = IndicatorSnapshot::from_constraints(
            &request.symbol,
            self.clock.now(),
            &request.constraints,
        );
        let signal = strategy.evaluate(&snapshot);
        if signal.is_hold() {
            return Ok(None);
        }
        let stored = self.db.insert_signal(&NewSignal {
            signal: signal.clone(),
            artifact_id: None,
            artifact_hash: None,
            correlation_id: Some(correlation_id),
            expires_at: None,
        })?;
        self.publisher.publish(SignalProduct::from_stored(stored));
        Ok(Some(signal))
    }

    async fn research_stage(
        &self,
        request: &OrchestrationRequest,
        correlation_id: Uuid,
    ) -> Option<ResearchBundle> {
        if request.research_queries.is_empty() {
            return None;
        }
        let client = self.research.as_ref()?;
        match client
            .research(&request.symbol, &request.research_queries)
            .await
        {
            Ok(bundle) => Some(bundle),
            Err(error) => {
                tracing::warn!(
                    correlation = %correlation_id,
                    symbol = %request.symbol,
                    "research stage failed, omitting: {error}"
                );
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn retain_decision(
        &self,
        request: &OrchestrationRequest,
        correlation_id: Uuid,
        plan: &Plan,
        confidence: f64,
        signals: &[Signal],
        tool_outcomes: &[ToolOutcome],
        cautions: u32,
    ) -> Result<()> {
        let mut tags = request.tags.clone();
        if let Some(strategy_id) = &request.strategy_id {
            tags.push(strategy_id.clone());
        }

        let signal_summaries: Vec<Value> = signals
            .iter()
            .map(|s| {
                json!({
                    "symbol": s.symbol,
                    "type": s.signal_type.as_str(),
                    "entry": s.entry_price,
                    "confidence": s.confidence,
                })
            })
            .collect();

        let payload = json!({
            "constraints": request.constraints,
            "plan_summary": plan.summary,
            "plan_steps": plan.steps,
            "plan_action": plan.action,
            "plan_confidence": confidence,
            "reasoning_notes": plan.reasoning_notes,
            "tool_results": tool_outcomes,
            "signals": signal_summaries,
            "negative_pattern_cautions": cautions,
        });
        let Value::Object(scrubbed) = redact(&payload) else {
            return Err(Error::Internal(anyhow::anyhow!("redacted payload not an object")));
        };

        let item = MemoryItem {
            id: None,
            timestamp: self.clock.now(),
            kind: "decision".to_string(),
            symbol: request.symbol.clone(),
            tags,
            summary: plan.summary.clone(),
            data: scrubbed.into_iter().collect(),
            source: MemorySource {
                system: "verdict.orchestrator".to_string(),
                reference: Some(correlation_id.to_string()),
            },
        };
        // Retain failures are fatal to the run.
        self.memory.retain(&request.bank, item).await?;
        Ok(())
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::conflict("run cancelled"));
    }
    Ok(())
}

/// Confidence > 1 is treated as a percentage.
pub fn normalize_confidence(confidence: f64) -> f64 {
    let value = if confidence > 1.0 {
        confidence / 100.0
    } else {
        confidence
    };
    value.clamp(0.0, 1.0)
}

fn uncertainty_factors(
    recalled: usize,
    research_missing: bool,
    has_signal: bool,
    plan_confidence: f64,
) -> Vec<UncertaintyFactor> {
    vec![
        UncertaintyFactor::new(
            "thin_decision_history",
            0.25,
            1.0 - (recalled as f64 / RECALL_LIMIT as f64).min(1.0),
        ),
        UncertaintyFactor::new(
            "research_unavailable",
            0.20,
            if research_missing { 1.0 } else { 0.0 },
        ),
        UncertaintyFactor::new("no_fresh_signal", 0.25, if has_signal { 0.0 } else { 1.0 }),
        UncertaintyFactor::new("planner_uncertainty", 0.30, 1.0 - plan_confidence),
    ]
}

fn compose_context(
    user_context: &str,
    recalled: &[MemoryItem],
    signal: Option<&Signal>,
    research: Option<&ResearchBundle>,
) -> String {
    let mut sections = Vec::new();
    if !user_context.trim().is_empty() {
        sections.push(format!("Context: {user_context}"));
    }
    if !recalled.is_empty() {
        let lines: Vec<String> = recalled
            .iter()
            .enumerate()
            .map(|(i, item)| format!("  {}. {}", i + 1, item.summary))
            .collect();
        sections.push(format!("Recalled memories:\n{}", lines.join("\n")));
    }
    if let Some(signal) = signal {
        sections.push(format!(
            "Fresh signal: {} {} entry {} confidence {:.2}",
            signal.symbol,
            signal.signal_type.as_str(),
            signal
                .entry_price
                .map_or_else(|| "n/a".to_string(), |p| format!("{p:.2}")),
            signal.confidence,
        ));
    }
    if let Some(research) = research {
        let mut block = format!("Research: {}", research.summary);
        for point in &research.key_points {
            block.push_str(&format!("\n  - {point}"));
        }
        sections.push(block);
    }
    sections.join("\n\n")
}

fn build_episode(
    request: &OrchestrationRequest,
    plan: &Plan,
    confidence: f64,
    assessment: &JudgmentAssessment,
    signal: Option<&Signal>,
    research_used: bool,
    now: DateTime<Utc>,
) -> Episode {
    let action = if assessment.abstain {
        "abstain".to_string()
    } else {
        plan.action.clone()
    };
    let kind = if assessment.abstain {
        EpisodeKind::Abstention
    } else {
        match plan.action.as_str() {
            "buy" | "sell" => EpisodeKind::Trade,
            "defer" => EpisodeKind::Deferral,
            _ => EpisodeKind::Abstention,
        }
    };
    let direction = match plan.action.as_str() {
        "buy" => MoveDirection::Up,
        "sell" => MoveDirection::Down,
        _ => MoveDirection::Flat,
    };
    let num = |key: &str| {
        request
            .constraints
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };
    let price = num("price");
    let atr = num("atr");
    let context = MarketContext {
        price,
        volume: num("volume"),
        volatility: if price > 0.0 { atr / price } else { 0.0 },
        spread: 0.0,
        regime: request
            .constraints
            .get("market_trend")
            .and_then(Value::as_str)
            .unwrap_or("neutral")
            .to_string(),
        macro_flags: Vec::new(),
        liquidity: String::new(),
    };
    let dominance = if signal.is_some() {
        ContextDominance::Technical
    } else if research_used {
        ContextDominance::Macro
    } else {
        ContextDominance::Unclear
    };
    let magnitude = request
        .constraints
        .get("expected_magnitude_pct")
        .and_then(Value::as_f64)
        .unwrap_or(2.0);
    let horizon = request
        .constraints
        .get("expected_horizon_minutes")
        .and_then(Value::as_i64)
        .unwrap_or(60);

    Episode {
        id: Uuid::new_v4(),
        kind,
        symbol: request.symbol.clone(),
        strategy_name: request
            .strategy_id
            .clone()
            .unwrap_or_else(|| "orchestrator".to_string()),
        artifact_ref: None,
        episode_at: now,
        context,
        expectation: Expectation {
            direction,
            magnitude_pct: magnitude,
            horizon_minutes: horizon,
            volatility_band: "normal".to_string(),
            failure_modes: vec!["adverse regime shift".to_string()],
        },
        confidence,
        uncertainty_budget: assessment.uncertainty_budget,
        context_dominance: dominance,
        sequence_position: "standalone".to_string(),
        action_taken: action,
        outcome: None,
        surprise_score: None,
        hindsight_notes: None,
        decay_weight: 1.0,
        reinforcement_count: 0,
    }
}
