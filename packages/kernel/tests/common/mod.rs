// Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use kernel_core::kernel::actor::{Actor, ActorKind};
use kernel_core::kernel::commands::LoggingDispatcher;
use kernel_core::kernel::governor::engine::{
    AdmissionOutcome, Confidence, GovernanceAction,
};
use kernel_core::kernel::governor::MissionEvaluation;
use kernel_core::kernel::missions::model::{MissionContext, MissionStatus};
use kernel_core::kernel::missions::repo::CreateMission;
use kernel_core::kernel::store::KernelStore;
use kernel_core::server::middleware::DevActorResolver;
use kernel_core::server::{build_app, build_state, AppState};

/// One isolated kernel over a temp-dir sqlite file.
pub struct TestKernel {
    pub state: AppState,
    pub store: KernelStore,
    _dir: tempfile::TempDir,
}

pub async fn test_kernel() -> TestKernel {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("kernel.db");
    let store = KernelStore::connect(db_path.to_str().expect("utf-8 path"))
        .await
        .expect("open store");
    store.migrate().await.expect("migrate");

    let state = build_state(
        store.clone(),
        Arc::new(DevActorResolver),
        Arc::new(LoggingDispatcher),
    );
    TestKernel {
        state,
        store,
        _dir: dir,
    }
}

pub fn user(id: &str, org: Option<&str>) -> Actor {
    Actor {
        kind: ActorKind::User,
        id: id.to_string(),
        org_id: org.map(str::to_string),
        display: None,
    }
}

pub fn agent(id: &str, org: Option<&str>) -> Actor {
    Actor {
        kind: ActorKind::Agent,
        id: id.to_string(),
        org_id: org.map(str::to_string),
        display: None,
    }
}

pub fn system() -> Actor {
    Actor::system("test-system")
}

/// An ALLOW evaluation that lands the mission in PENDING, for tests that
/// exercise the repository directly without the governor.
pub fn pending_evaluation(now: DateTime<Utc>) -> MissionEvaluation {
    MissionEvaluation {
        decision: AdmissionOutcome {
            action: GovernanceAction::Allow,
            confidence: Confidence::Low,
            reasons: Vec::new(),
        }
        .into_decision(now),
        status: MissionStatus::Pending,
        next_retry_at: None,
    }
}

pub fn create_input(goal: &str, idempotency_key: Option<&str>) -> CreateMission {
    CreateMission {
        mission_id: None,
        idempotency_key: idempotency_key.map(str::to_string),
        goal: goal.to_string(),
        params: serde_json::json!({}),
        context: MissionContext::default(),
        subject_id: None,
        max_attempts: None,
        signals: None,
    }
}

// ── HTTP driving ─────────────────────────────────────────────────────

pub fn test_app(kernel: &TestKernel) -> Router {
    build_app(kernel.state.clone())
}

/// Fire one request at the router; returns status and parsed JSON body
/// (`Value::Null` for empty bodies).
pub async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub async fn post(
    app: &Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    request(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn get(app: &Router, uri: &str, token: &str) -> (StatusCode, serde_json::Value) {
    request(app, Method::GET, uri, Some(token), None).await
}
