//! Orchestration + experience-layer scenarios exercised against the full
//! in-process app.

use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use verdict::ejlayer::{EpisodeOutcome, MoveDirection};
use verdict::risk::RiskPolicy;

mod common;
use common::{get_json, make_app, request_json};

/// Drive one orchestration run with a strategy attached and wait for it.
async fn completed_run(app: &common::TestApp, constraints: serde_json::Value) -> serde_json::Value {
    let (status, body) = request_json(
        &app.router,
        "POST",
        "/orchestrate",
        Some(json!({
            "symbol": "AAPL",
            "trigger_type": "manual",
            "context": "pipeline test",
            "strategy_id": "rsi_momentum_v1",
            "constraints": constraints,
            "tags": ["swing"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    let run_id = body["run_id"].as_str().unwrap().to_string();

    for _ in 0..100 {
        let (_, run) = get_json(&app.router, &format!("/api/v1/orchestrate/runs/{run_id}")).await;
        if run["status"] != "running" {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {run_id} never finished");
}

#[tokio::test]
async fn run_with_strategy_persists_signal_episode_and_memory() {
    let app = make_app(RiskPolicy::default());
    let run = completed_run(&app, json!({ "price": 190.0, "rsi": 25.0, "atr": 2.5 })).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["plan_payload"]["plan"]["action"], "buy");

    // analyze stage persisted a pending signal
    let (_, signals) = get_json(&app.router, "/api/v1/signals?status=pending").await;
    assert_eq!(signals.as_array().unwrap().len(), 1);

    // a decision memory landed in the default bank
    let (_, found) = get_json(
        &app.router,
        "/v1/memory/search?q=&bank=trade_decisions",
    )
    .await;
    assert_eq!(found["items"].as_array().unwrap().len(), 1);
    assert_eq!(found["items"][0]["type"], "decision");

    // exactly one episode for the pair
    let episodes = app.db.recent_episodes("AAPL", "rsi_momentum_v1", 10).unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].action_taken, "buy");
}

#[tokio::test]
async fn uninformative_constraints_still_complete_with_hold() {
    let app = make_app(RiskPolicy::default());
    let run = completed_run(&app, json!({})).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["plan_payload"]["plan"]["action"], "hold");
    // hold signals are skipped, not persisted
    let (_, signals) = get_json(&app.router, "/api/v1/signals").await;
    assert!(signals.as_array().unwrap().is_empty());
}

// ─── Scenario 6: episode surprise feedback ──────────────────────────────────

#[tokio::test]
async fn direction_miss_raises_surprise_and_lowers_next_confidence() {
    let app = make_app(RiskPolicy::default());

    // First decision records an episode with an upward expectation.
    let run = completed_run(
        &app,
        json!({
            "price": 190.0, "rsi": 25.0, "atr": 2.5,
            "expected_magnitude_pct": 2.0,
            "expected_horizon_minutes": 60,
        }),
    )
    .await;
    assert_eq!(run["status"], "completed");

    let episodes = app.db.recent_episodes("AAPL", "rsi_momentum_v1", 10).unwrap();
    let episode_id: Uuid = episodes[0].id;
    assert_eq!(episodes[0].expectation.direction, MoveDirection::Up);

    let ejlayer = verdict::ejlayer::service::EjLayer::new(
        app.db.clone(),
        app.clock.clone(),
        verdict::ejlayer::DEFAULT_HALF_LIFE_DAYS,
    );
    let before = ejlayer.assess("AAPL", "rsi_momentum_v1", &[]).unwrap();

    // Outcome lands opposite the expectation: down 2% in 60 minutes.
    let surprise = ejlayer
        .resolve(
            episode_id,
            &EpisodeOutcome {
                direction: MoveDirection::Down,
                magnitude_pct: 2.0,
                duration_minutes: 60,
                profitable: false,
                pnl: -150.0,
            },
            Some("direction flipped"),
        )
        .unwrap();
    assert!(surprise >= 0.5, "direction mismatch dominates: {surprise}");

    let after = ejlayer.assess("AAPL", "rsi_momentum_v1", &[]).unwrap();
    assert!(
        after.adjusted_confidence < before.adjusted_confidence,
        "next similar episode must start from lower derived confidence \
         ({} -> {})",
        before.adjusted_confidence,
        after.adjusted_confidence
    );
}

#[tokio::test]
async fn second_run_reuses_retained_memory() {
    let app = make_app(RiskPolicy::default());
    let first = completed_run(&app, json!({ "price": 190.0, "rsi": 25.0, "atr": 2.5 })).await;
    assert_eq!(first["status"], "completed");

    let second = completed_run(&app, json!({ "price": 191.0, "rsi": 26.0, "atr": 2.5 })).await;
    assert_eq!(second["status"], "completed");

    // the second run retained another decision on top of the first
    let (_, found) = get_json(&app.router, "/v1/memory/search?q=&bank=trade_decisions").await;
    assert_eq!(found["items"].as_array().unwrap().len(), 2);

    // runs listing shows both, newest first, both successful
    let (_, runs) = get_json(&app.router, "/api/v1/orchestrate/runs?limit=10").await;
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r["success"] == true));
}
