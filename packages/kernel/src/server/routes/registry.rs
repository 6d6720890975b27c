//! Registry and policy affordances: agent/tool registration and admission
//! dry-runs.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kernel::actor::Actor;
use crate::kernel::governor::engine::GovernanceAction;
use crate::kernel::missions::model::{MissionSignals, MissionStatus};
use crate::kernel::registry::{AgentRegistration, ToolRegistration};
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyBody {
    pub device_id: Option<String>,
    pub org_id: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentBody {
    pub name: Option<String>,
    pub goals: Option<Vec<String>>,
    pub version: Option<String>,
    pub device_key: Option<DeviceKeyBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterToolBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub params_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheckBody {
    pub goal: Option<String>,
    pub signals: Option<MissionSignals>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheckResponse {
    pub action: GovernanceAction,
    pub status: MissionStatus,
    pub decision: serde_json::Value,
}

/// POST /agents — registry upsert, optionally persisting the device key the
/// agent presented.
pub async fn register_agent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<RegisterAgentBody>,
) -> ApiResult<Response> {
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::validation("name is required"))?;

    if let Some(device_key) = body.device_key {
        let device_id = device_key
            .device_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::validation("deviceKey.deviceId is required"))?;
        let public_key = device_key
            .public_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ApiError::validation("deviceKey.publicKey is required"))?;
        let org_id = device_key
            .org_id
            .or_else(|| actor.org_id.clone())
            .ok_or_else(|| ApiError::validation("deviceKey.orgId is required"))?;
        state
            .store
            .put_device_key(&device_id, &org_id, &public_key, Utc::now())
            .await?;
    }

    let registration = state
        .registry
        .register_agent(AgentRegistration {
            name,
            goals: body.goals.unwrap_or_default(),
            version: body.version,
            org_id: actor.org_id.clone(),
            registered_at: Utc::now(),
        })
        .await;
    Ok((StatusCode::CREATED, Json(registration)).into_response())
}

/// GET /agents
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentRegistration>> {
    Json(state.registry.list_agents().await)
}

/// POST /tools
pub async fn register_tool(
    State(state): State<AppState>,
    Json(body): Json<RegisterToolBody>,
) -> ApiResult<Response> {
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::validation("name is required"))?;

    let registration = state
        .registry
        .register_tool(ToolRegistration {
            name,
            description: body.description,
            params_schema: body.params_schema,
            registered_at: Utc::now(),
        })
        .await;
    Ok((StatusCode::CREATED, Json(registration)).into_response())
}

/// GET /tools
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolRegistration>> {
    Json(state.registry.list_tools().await)
}

/// POST /policy/check — pure admission dry-run; no rate-limit token is
/// consumed and nothing is persisted.
pub async fn policy_check(
    State(state): State<AppState>,
    Json(body): Json<PolicyCheckBody>,
) -> ApiResult<Json<PolicyCheckResponse>> {
    let goal = body
        .goal
        .filter(|g| !g.trim().is_empty())
        .ok_or_else(|| ApiError::validation("goal is required"))?;

    let outcome = state
        .governor
        .check_policy(&goal, body.signals.as_ref())
        .await?;
    let status = match outcome.action {
        GovernanceAction::Block => MissionStatus::Blocked,
        GovernanceAction::Quarantine => MissionStatus::Quarantined,
        _ => MissionStatus::Pending,
    };
    Ok(Json(PolicyCheckResponse {
        action: outcome.action,
        status,
        decision: json!(outcome),
    }))
}
