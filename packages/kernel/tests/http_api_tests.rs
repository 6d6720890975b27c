//! End-to-end HTTP scenarios against the in-process router.

mod common;

use axum::http::{Method, StatusCode};
use common::*;
use serde_json::json;

const OPERATOR: &str = "user:op:org-1";
const WORKER: &str = "agent:w1:org-1";
const SYSTEM: &str = "system:kernel";

fn report_mission(points: i64, duration: f64, bt: bool) -> serde_json::Value {
    json!({
        "goal": "generate-roast-report",
        "params": { "sessionId": "s1" },
        "signals": { "session": { "telemetryPoints": points, "durationSec": duration, "hasBT": bt } }
    })
}

#[tokio::test]
async fn happy_path_create_claim_complete() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, mission) = post(&app, "/missions", OPERATOR, report_mission(120, 200.0, true)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(mission["status"], "PENDING");
    assert_eq!(mission["governance"]["action"], "ALLOW");
    let mission_id = mission["missionId"].as_str().unwrap().to_string();

    let (status, claimed) = post(
        &app,
        "/missions/claim",
        WORKER,
        json!({ "agentName": "w1", "goals": ["generate-roast-report"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["missionId"], mission_id.as_str());
    assert_eq!(claimed["status"], "RUNNING");
    assert_eq!(claimed["attempts"], 1);
    let lease_id = claimed["leaseId"].as_str().unwrap().to_string();

    let (status, done) = post(
        &app,
        &format!("/missions/{mission_id}/complete"),
        WORKER,
        json!({ "summary": { "reportId": "r1" }, "leaseId": lease_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "DONE");
    assert_eq!(done["resultMeta"]["reportId"], "r1");
}

#[tokio::test]
async fn idempotent_create_returns_the_same_mission() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let mut body = report_mission(120, 200.0, true);
    body["idempotencyKey"] = json!("k-1");

    let (status, first) = post(&app, "/missions", OPERATOR, body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = post(&app, "/missions", OPERATOR, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["missionId"], second["missionId"]);
}

#[tokio::test]
async fn weak_sessions_are_quarantined_then_human_approved() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, mission) = post(&app, "/missions", OPERATOR, report_mission(5, 10.0, false)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(mission["status"], "QUARANTINED");
    assert_eq!(
        mission["governance"]["reasons"][0]["code"],
        "LOW_TELEMETRY_POINTS"
    );
    let mission_id = mission["missionId"].as_str().unwrap();

    // quarantined missions are not claimable
    let (status, _) = post(
        &app,
        "/missions/claim",
        WORKER,
        json!({ "agentName": "w1" }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, approved) = post(
        &app,
        &format!("/missions/{mission_id}/approve"),
        OPERATOR,
        json!({ "note": "ok" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "PENDING");
    assert_eq!(approved["governance"]["decidedBy"], "HUMAN");

    // approving twice is a state conflict
    let (status, error) = post(
        &app,
        &format!("/missions/{mission_id}/approve"),
        OPERATOR,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "Mission is not quarantined");
}

#[tokio::test]
async fn blocked_goal_is_a_successful_response_with_block_decision() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, mission) = post(
        &app,
        "/missions",
        OPERATOR,
        json!({ "goal": "mine-bitcoin" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(mission["status"], "BLOCKED");
    assert_eq!(mission["governance"]["action"], "BLOCK");
    assert_eq!(mission["governance"]["reasons"][0]["code"], "GOAL_NOT_ALLOWED");
}

#[tokio::test]
async fn rate_limited_admission_is_201_with_retry_status() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, _) = request(
        &app,
        Method::PUT,
        "/governor/config",
        Some(OPERATOR),
        Some(json!({
            "rateLimits": { "generate-roast-report": { "capacity": 1, "refillPerSec": 0.001 } }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, first) = post(&app, "/missions", OPERATOR, report_mission(120, 200.0, true)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "PENDING");

    let (status, second) = post(&app, "/missions", OPERATOR, report_mission(121, 201.0, true)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["status"], "RETRY");
    assert_eq!(second["governance"]["reasons"][0]["code"], "RATE_LIMITED");
    assert!(second["governance"]["reasons"][0]["details"]["nextRetryAt"].is_string());
}

#[tokio::test]
async fn auth_and_org_scoping() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    // no token
    let (status, error) = request(&app, Method::GET, "/missions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(error["error"].as_str().is_some());

    // garbage token
    let (status, _) = get(&app, "/missions", "wizard:w1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, mission) = post(&app, "/missions", OPERATOR, report_mission(120, 200.0, true)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(mission["context"]["orgId"], "org-1");
    let mission_id = mission["missionId"].as_str().unwrap();

    // same org reads fine; another org gets 403; SYSTEM sees everything
    let (status, _) = get(&app, &format!("/missions/{mission_id}"), OPERATOR).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&app, &format!("/missions/{mission_id}"), "user:eve:org-2").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = get(&app, &format!("/missions/{mission_id}"), SYSTEM).await;
    assert_eq!(status, StatusCode::OK);

    // org-2 workers never see org-1 missions through claim
    let (status, _) = post(
        &app,
        "/missions/claim",
        "agent:spy:org-2",
        json!({ "agentName": "spy" }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // unknown mission is 404
    let (status, _) = get(&app, "/missions/M-nope", OPERATOR).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validation_errors_are_400_with_error_body() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, error) = post(&app, "/missions", OPERATOR, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "goal is required");

    let (status, error) = post(&app, "/missions/claim", WORKER, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "agentName is required");

    // heartbeat without a lease id
    let (status, mission) = post(&app, "/missions", OPERATOR, report_mission(120, 200.0, true)).await;
    assert_eq!(status, StatusCode::CREATED);
    let mission_id = mission["missionId"].as_str().unwrap();
    let (status, error) = post(
        &app,
        &format!("/missions/{mission_id}/heartbeat"),
        WORKER,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "leaseId is required");

    let (status, error) = post(
        &app,
        &format!("/missions/{mission_id}/fail"),
        WORKER,
        json!({ "retryable": true }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "error is required");
}

#[tokio::test]
async fn worker_conflicts_map_to_409() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (_, mission) = post(&app, "/missions", OPERATOR, report_mission(120, 200.0, true)).await;
    let mission_id = mission["missionId"].as_str().unwrap().to_string();

    // heartbeat before any claim
    let (status, error) = post(
        &app,
        &format!("/missions/{mission_id}/heartbeat"),
        WORKER,
        json!({ "leaseId": "l-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "Mission is not running");

    let (_, claimed) = post(
        &app,
        "/missions/claim",
        WORKER,
        json!({ "agentName": "w1" }),
    )
    .await;
    let real_lease = claimed["leaseId"].as_str().unwrap();

    // stale lease on heartbeat and complete
    let (status, error) = post(
        &app,
        &format!("/missions/{mission_id}/heartbeat"),
        WORKER,
        json!({ "leaseId": "stale" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "Lease mismatch");

    let (status, _) = post(
        &app,
        &format!("/missions/{mission_id}/complete"),
        WORKER,
        json!({ "leaseId": real_lease }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // retryNow on a DONE mission
    let (status, _) = post(
        &app,
        &format!("/missions/{mission_id}/retryNow"),
        OPERATOR,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn governor_config_round_trip_rejects_unknown_fields() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, config) = get(&app, "/governor/config", OPERATOR).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["policy"]["allowedGoals"][0], "generate-roast-report");

    let (status, error) = request(
        &app,
        Method::PUT,
        "/governor/config",
        Some(OPERATOR),
        Some(json!({ "surprise": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("invalid governor config"));

    // agents may read but not write policy
    let (status, _) = get(&app, "/governor/config", WORKER).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &app,
        Method::PUT,
        "/governor/config",
        Some(WORKER),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn metrics_expose_status_and_derived_counters() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    post(&app, "/missions", OPERATOR, report_mission(120, 200.0, true)).await;
    post(&app, "/missions", OPERATOR, report_mission(5, 10.0, false)).await;

    let (status, metrics) = get(&app, "/missions/metrics", OPERATOR).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["total"], 2);
    assert_eq!(metrics["byStatus"]["PENDING"], 1);
    assert_eq!(metrics["byStatus"]["QUARANTINED"], 1);
    assert_eq!(metrics["quarantined"], 1);
    assert_eq!(metrics["approvedTotal"], 0);
}

#[tokio::test]
async fn proposal_surface_round_trip() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, proposal) = post(
        &app,
        "/proposals",
        OPERATOR,
        json!({
            "command": {
                "commandType": "SET_HEATER",
                "machineId": "mach-1",
                "targetValue": 70.0,
                "targetUnit": "percent",
                "constraints": { "minValue": 0.0, "maxValue": 100.0 }
            },
            "reasoning": "stall recovery"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(proposal["status"], "PENDING_APPROVAL");
    let proposal_id = proposal["proposalId"].as_str().unwrap().to_string();

    let (status, pending) = get(&app, "/proposals/pending", OPERATOR).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);

    // agents cannot approve
    let (status, _) = post(
        &app,
        &format!("/proposals/{proposal_id}/approve"),
        WORKER,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = post(
        &app,
        &format!("/proposals/{proposal_id}/approve"),
        OPERATOR,
        json!({ "approvedBy": "op" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "APPROVED");

    let (status, executing) = post(&app, &format!("/execute/{proposal_id}"), SYSTEM, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(executing["status"], "EXECUTING");

    let (status, aborted) = post(
        &app,
        &format!("/proposals/{proposal_id}/abort"),
        OPERATOR,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(aborted["status"], "ACCEPTED");

    let (status, after) = get(&app, &format!("/proposals/{proposal_id}"), OPERATOR).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["status"], "ABORTED");

    // reject requires a reason
    let (status, another) = post(
        &app,
        "/proposals",
        OPERATOR,
        json!({ "command": { "commandType": "SET_FAN", "machineId": "mach-1" } }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let another_id = another["proposalId"].as_str().unwrap();
    let (status, error) = post(
        &app,
        &format!("/proposals/{another_id}/reject"),
        OPERATOR,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "reason is required");
}

#[tokio::test]
async fn traces_and_registries_round_trip() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, _) = post(
        &app,
        "/agents",
        WORKER,
        json!({
            "name": "w1",
            "goals": ["generate-roast-report"],
            "deviceKey": { "deviceId": "dev-1", "publicKey": "pk-1" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, agents) = get(&app, "/agents", OPERATOR).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agents[0]["name"], "w1");

    let key = kernel.store.get_device_key("dev-1").await.unwrap().unwrap();
    assert_eq!(key.org_id, "org-1");

    let (status, _) = post(
        &app,
        "/tools",
        SYSTEM,
        json!({ "name": "roast-profiler", "description": "profile math" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, trace) = post(
        &app,
        "/traces",
        WORKER,
        json!({ "missionId": "M-1", "label": "claimed" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(trace["agent"], "w1");

    let (status, traces) = get(&app, "/traces/M-1", OPERATOR).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(traces.as_array().unwrap().len(), 1);

    // policy dry-run consumes no rate tokens and persists nothing
    let (status, check) = post(
        &app,
        "/policy/check",
        OPERATOR,
        json!({ "goal": "mine-bitcoin" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["action"], "BLOCK");
    assert_eq!(check["status"], "BLOCKED");
}

#[tokio::test]
async fn health_is_open_and_reports_store_state() {
    let kernel = test_kernel().await;
    let app = test_app(&kernel);

    let (status, body) = request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
