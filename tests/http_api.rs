//! End-to-end scenarios driven through the HTTP router in-process.

use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;

use verdict::risk::RiskPolicy;

mod common;
use common::{get_json, get_text, make_app, request_json};

// ─── Health & metrics ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_service_identity() {
    let app = make_app(RiskPolicy::default());
    let (status, body) = get_json(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "verdict");
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn prometheus_endpoint_renders_counters() {
    let app = make_app(RiskPolicy::default());
    let (status, text) = get_text(&app.router, "/metrics/prometheus").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("verdict_uptime_seconds"));
    assert!(text.contains("verdict_orchestration_runs_total 0"));
}

// ─── Scenario 1: register & backtest ────────────────────────────────────────

#[tokio::test]
async fn register_and_backtest_echoes_seed_and_hash() {
    let app = make_app(RiskPolicy::default());
    let (entry, _path) = app.register_sample_dataset("aapl-jan");

    let (status, body) = request_json(
        &app.router,
        "POST",
        "/backtest",
        Some(json!({
            "strategy": "rsi_momentum_v1",
            "symbols": ["AAPL"],
            "start_date": "2024-01-02",
            "end_date": "2024-01-08",
            "dataset_id": entry.id,
            "seed": 42,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["seed"], 42);
    assert_eq!(body["dataset_hash"].as_str().unwrap().len(), 12);
    assert_eq!(body["dataset_hash"].as_str().unwrap(), &entry.sha256[..12]);
    // 5 bars with no RSI data -> every evaluation holds
    assert_eq!(body["metrics"]["total_trades"], 0);
    assert_eq!(body["metrics"]["sharpe"], 0.0);
    assert_eq!(body["final_capital"], body["initial_capital"]);
}

// ─── Scenario 2: hash drift ─────────────────────────────────────────────────

#[tokio::test]
async fn mutated_dataset_is_rejected_with_conflict() {
    let app = make_app(RiskPolicy::default());
    let (entry, csv_path) = app.register_sample_dataset("aapl-jan");
    std::fs::write(&csv_path, common::SAMPLE_CSV.replace("190.4", "999.9")).unwrap();

    let (status, body) = request_json(
        &app.router,
        "POST",
        "/backtest",
        Some(json!({
            "strategy": "rsi_momentum_v1",
            "symbols": ["AAPL"],
            "start_date": "2024-01-02",
            "end_date": "2024-01-08",
            "dataset_id": entry.id,
            "seed": 42,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("dataset integrity"));
}

#[tokio::test]
async fn backtest_with_unknown_strategy_is_404() {
    let app = make_app(RiskPolicy::default());
    let (entry, _path) = app.register_sample_dataset("aapl-jan");
    let (status, _) = request_json(
        &app.router,
        "POST",
        "/backtest",
        Some(json!({
            "strategy": "nope",
            "symbols": ["AAPL"],
            "start_date": "2024-01-02",
            "end_date": "2024-01-08",
            "dataset_id": entry.id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Scenario 3: orchestrate then poll ──────────────────────────────────────

#[tokio::test]
async fn orchestrate_returns_running_then_completes() {
    let app = make_app(RiskPolicy::default());
    let (status, body) = request_json(
        &app.router,
        "POST",
        "/orchestrate",
        Some(json!({
            "symbol": "AAPL",
            "trigger_type": "manual",
            "context": "unit test",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "running");
    let run_id = body["run_id"].as_str().unwrap().to_string();

    // Poll until the background task lands the run.
    let mut run = serde_json::Value::Null;
    for _ in 0..100 {
        let (status, fetched) =
            get_json(&app.router, &format!("/api/v1/orchestrate/runs/{run_id}")).await;
        assert_eq!(status, StatusCode::OK);
        if fetched["status"] == "completed" {
            run = fetched;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(run["status"], "completed", "run never completed: {run}");
    let plan = &run["plan_payload"]["plan"];
    assert!(!plan["summary"].as_str().unwrap().is_empty());
    let confidence = run["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));

    let (status, listed) = get_json(&app.router, "/api/v1/orchestrate/runs?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["success"], true);
}

#[tokio::test]
async fn orchestrate_requires_symbol() {
    let app = make_app(RiskPolicy::default());
    let (status, _) = request_json(
        &app.router,
        "POST",
        "/orchestrate",
        Some(json!({ "symbol": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─── Scenario 4: approve & execute ──────────────────────────────────────────

#[tokio::test]
async fn approve_executes_and_writes_sized_trade() {
    let app = make_app(RiskPolicy::default());
    let signal_id = app.insert_pending_buy("AAPL", 190.0, 185.0, 200.0, 0.8);

    let (status, body) = request_json(
        &app.router,
        "POST",
        &format!("/api/v1/signals/{signal_id}/approve"),
        Some(json!({ "approved_by": "tester" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["signal"]["signal"]["status"], "approved");

    let trade = &body["trade"];
    let quantity = trade["quantity"].as_f64().unwrap();
    // qty * stop_distance stays within the 1% risk budget (+1 share slack)
    assert!(quantity * 5.0 <= 0.01 * 100_000.0 + 1.0);
    assert!(quantity > 0.0);
    assert_eq!(trade["symbol"], "AAPL");
    assert_eq!(trade["artifact_hash"], "cafebabe0001");

    let stored = app
        .db
        .trade_for_signal(signal_id)
        .unwrap()
        .expect("trade row written");
    assert_eq!(stored.quantity as f64, quantity);
}

#[tokio::test]
async fn reject_transitions_signal() {
    let app = make_app(RiskPolicy::default());
    let signal_id = app.insert_pending_buy("AAPL", 190.0, 185.0, 200.0, 0.8);
    let (status, body) = request_json(
        &app.router,
        "POST",
        &format!("/api/v1/signals/{signal_id}/reject"),
        Some(json!({ "approved_by": "tester", "rejection_reason": "too hot" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["signal"]["status"], "rejected");

    // terminal signals cannot be approved afterwards
    let (status, _) = request_json(
        &app.router,
        "POST",
        &format!("/api/v1/signals/{signal_id}/approve"),
        Some(json!({ "approved_by": "tester" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ─── Scenario 5: risk block ─────────────────────────────────────────────────

#[tokio::test]
async fn fourth_position_blocked_by_policy() {
    let policy = RiskPolicy {
        max_open_positions: 3,
        max_daily_loss: 50_000.0,
        ..RiskPolicy::default()
    };
    let app = make_app(policy);

    for symbol in ["AAPL", "MSFT", "NVDA"] {
        let signal_id = app.insert_pending_buy(symbol, 190.0, 185.0, 200.0, 0.8);
        let (status, body) = request_json(
            &app.router,
            "POST",
            &format!("/api/v1/signals/{signal_id}/approve"),
            Some(json!({ "approved_by": "tester" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
    }

    let fourth = app.insert_pending_buy("TSLA", 190.0, 185.0, 200.0, 0.8);
    let (status, body) = request_json(
        &app.router,
        "POST",
        &format!("/api/v1/signals/{fourth}/approve"),
        Some(json!({ "approved_by": "tester" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let codes: Vec<&str> = body["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["code"].as_str().unwrap())
        .collect();
    assert!(codes.contains(&"MAX_POSITIONS_EXCEEDED"));
    assert!(app.db.trade_for_signal(fourth).unwrap().is_none());
}

// ─── Signals & strategies surface ───────────────────────────────────────────

#[tokio::test]
async fn signal_list_filters_by_status_and_carries_strength() {
    let app = make_app(RiskPolicy::default());
    app.insert_pending_buy("AAPL", 190.0, 185.0, 200.0, 0.8);
    app.insert_pending_buy("MSFT", 400.0, 395.0, 420.0, 0.6);

    let (status, body) = get_json(&app.router, "/api/v1/signals?status=pending").await;
    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    let strengths: Vec<&str> = items
        .iter()
        .map(|i| i["strength"].as_str().unwrap())
        .collect();
    assert!(strengths.contains(&"strong"));
    assert!(strengths.contains(&"moderate"));

    let (_, by_symbol) = get_json(&app.router, "/api/v1/signals?symbol=MSFT").await;
    assert_eq!(by_symbol.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn strategies_list_and_analyze() {
    let app = make_app(RiskPolicy::default());
    let (status, body) = get_json(&app.router, "/api/v1/strategies").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, body) = request_json(
        &app.router,
        "POST",
        "/api/v1/strategies/rsi_momentum_v1/analyze",
        Some(json!({
            "symbol": "AAPL",
            "constraints": { "price": 190.0, "rsi": 25.0, "atr": 2.5 },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["signal"]["signal_type"], "buy");
    assert_eq!(body["signal"]["status"], "pending");

    let (status, recent) =
        get_json(&app.router, "/api/v1/strategies/rsi_momentum_v1/signals?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recent.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn analyze_with_unknown_strategy_is_404() {
    let app = make_app(RiskPolicy::default());
    let (status, _) = request_json(
        &app.router,
        "POST",
        "/api/v1/strategies/unknown/analyze",
        Some(json!({ "symbol": "AAPL", "constraints": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Memory proxy surface ───────────────────────────────────────────────────

#[tokio::test]
async fn memory_tools_retain_recall_reflect() {
    let app = make_app(RiskPolicy::default());

    let (status, body) = request_json(
        &app.router,
        "POST",
        "/tools",
        Some(json!({
            "tool": "memory.retain",
            "input": {
                "bank": "signals",
                "item": {
                    "timestamp": "2024-02-01T14:00:00Z",
                    "type": "signal",
                    "symbol": "AAPL",
                    "tags": ["Swing"],
                    "summary": "buy signal at 190",
                    "source": { "system": "test" },
                },
            },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(body["item"]["id"].is_string());
    assert_eq!(body["item"]["tags"][0], "swing");

    let (status, body) = request_json(
        &app.router,
        "POST",
        "/tools",
        Some(json!({
            "tool": "memory.recall",
            "input": { "bank": "signals", "query": { "symbol": "aapl" } },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, body) = request_json(
        &app.router,
        "POST",
        "/tools",
        Some(json!({
            "tool": "memory.reflect",
            "input": { "bank": "signals", "params": { "query": { "symbol": "AAPL" } } },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item"]["type"], "belief");

    let (status, body) = get_json(&app.router, "/v1/memory/banks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["banks"][0], "signals");

    let (status, body) =
        get_json(&app.router, "/v1/memory/search?q=buy+signal&bank=signals").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let app = make_app(RiskPolicy::default());
    let (status, _) = request_json(
        &app.router,
        "POST",
        "/tools",
        Some(json!({ "tool": "memory.delete", "input": { "bank": "x" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
