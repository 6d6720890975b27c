//! Mission surface: intake, worker claim/heartbeat/complete/fail, operator
//! approve/cancel/retry-now, listing and metrics.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;

use crate::kernel::actor::{Actor, OrgScope};
use crate::kernel::missions::model::{Mission, MissionContext, MissionError, MissionSignals};
use crate::kernel::missions::repo::{CreateMission, MissionMetrics};
use crate::kernel::missions::store::ListQuery;
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMissionRequest {
    pub mission_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub goal: Option<String>,
    pub params: Option<serde_json::Value>,
    pub context: Option<MissionContext>,
    pub subject_id: Option<String>,
    pub max_attempts: Option<i64>,
    pub signals: Option<MissionSignals>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    pub agent_name: Option<String>,
    pub goals: Option<Vec<String>>,
    pub lease_duration_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    pub lease_id: Option<String>,
    #[allow(dead_code)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBody {
    pub summary: Option<serde_json::Value>,
    pub lease_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailBody {
    pub error: Option<String>,
    pub details: Option<serde_json::Value>,
    pub retryable: Option<bool>,
    pub lease_id: Option<String>,
    pub backoff_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub status: Option<String>,
    pub goal: Option<String>,
    pub agent: Option<String>,
    pub session_id: Option<String>,
    pub subject_id: Option<String>,
    pub org_id: Option<String>,
    pub site_id: Option<String>,
    pub machine_id: Option<String>,
    pub limit: Option<i64>,
}

// ── Helpers ──────────────────────────────────────────────────────────

fn require_access(actor: &Actor, mission: &Mission) -> ApiResult<()> {
    if actor.can_access_org(mission.context.org_id.as_deref()) {
        Ok(())
    } else {
        Err(ApiError::forbidden("mission belongs to another org"))
    }
}

/// Fetch a mission the actor is allowed to touch, or 404/403.
async fn load_scoped(state: &AppState, actor: &Actor, mission_id: &str) -> ApiResult<Mission> {
    let mission = state
        .missions
        .get(mission_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Mission"))?;
    require_access(actor, &mission)?;
    Ok(mission)
}

// ── Handlers ─────────────────────────────────────────────────────────

/// POST /missions — 201 on create, 200 on idempotent hit. Rate-limited
/// admissions come back 201 with `status=RETRY`, never 429.
pub async fn create_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateMissionRequest>,
) -> ApiResult<Response> {
    let goal = body
        .goal
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .ok_or_else(|| ApiError::validation("goal is required"))?
        .to_string();

    let mut context = body.context.unwrap_or_default();
    if !actor.is_system() {
        if let Some(submitted) = context.org_id.as_deref() {
            if actor.org_id.as_deref() != Some(submitted) {
                return Err(ApiError::forbidden("context.orgId does not match your org"));
            }
        } else {
            context.org_id = actor.org_id.clone();
        }
    }

    // Idempotent replays short-circuit before admission so client retries do
    // not consume rate-limit tokens.
    if let Some(key) = body.idempotency_key.as_deref() {
        if let Some(existing) = state.missions.find_by_idempotency_key(key).await? {
            require_access(&actor, &existing)?;
            return Ok((StatusCode::OK, Json(existing)).into_response());
        }
    }

    let now = Utc::now();
    let evaluation = state
        .governor
        .evaluate_mission(&goal, &context, body.signals.as_ref(), now)
        .await?;

    let input = CreateMission {
        mission_id: body.mission_id,
        idempotency_key: body.idempotency_key,
        goal,
        params: body
            .params
            .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        context,
        subject_id: body.subject_id,
        max_attempts: body.max_attempts,
        signals: body.signals,
    };
    let created = state.missions.create(input, &evaluation, &actor, now).await?;

    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(created.mission)).into_response())
}

/// GET /missions
pub async fn list_missions(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Mission>>> {
    if let Some(requested) = params.org_id.as_deref() {
        if !actor.can_access_org(Some(requested)) {
            return Err(ApiError::forbidden("orgId filter outside your org"));
        }
    }

    let query = ListQuery {
        status: params.status,
        goal: params.goal,
        agent: params.agent,
        session_id: params.session_id,
        subject_id: params.subject_id,
        org_id: params.org_id,
        site_id: params.site_id,
        machine_id: params.machine_id,
        limit: params.limit,
    };
    let missions = state
        .missions
        .list(query, OrgScope::for_actor(&actor))
        .await?;
    Ok(Json(missions))
}

/// GET /missions/:id
pub async fn get_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(mission_id): Path<String>,
) -> ApiResult<Json<Mission>> {
    let mission = load_scoped(&state, &actor, &mission_id).await?;
    Ok(Json(mission))
}

/// POST /missions/claim — 200 with the claimed mission, 204 when nothing is
/// available.
pub async fn claim_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<ClaimBody>,
) -> ApiResult<Response> {
    let agent_name = body
        .agent_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::validation("agentName is required"))?
        .to_string();

    let claimed = state
        .missions
        .claim(
            agent_name,
            body.goals,
            OrgScope::for_actor(&actor),
            body.lease_duration_ms,
            Utc::now(),
        )
        .await?;

    match claimed {
        Some(mission) => Ok((StatusCode::OK, Json(mission)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /missions/:id/heartbeat
pub async fn heartbeat_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(mission_id): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> ApiResult<Json<Mission>> {
    let lease_id = body
        .lease_id
        .as_deref()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::validation("leaseId is required"))?;

    load_scoped(&state, &actor, &mission_id).await?;
    let mission = state
        .missions
        .heartbeat(&mission_id, lease_id, Utc::now())
        .await?;
    Ok(Json(mission))
}

/// POST /missions/:id/complete
pub async fn complete_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(mission_id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Json<Mission>> {
    load_scoped(&state, &actor, &mission_id).await?;
    let mission = state
        .missions
        .complete(&mission_id, body.summary, body.lease_id.as_deref(), Utc::now())
        .await?;
    Ok(Json(mission))
}

/// POST /missions/:id/fail
pub async fn fail_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(mission_id): Path<String>,
    Json(body): Json<FailBody>,
) -> ApiResult<Json<Mission>> {
    let error = body
        .error
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ApiError::validation("error is required"))?;

    load_scoped(&state, &actor, &mission_id).await?;
    let mission = state
        .missions
        .fail(
            &mission_id,
            MissionError {
                error,
                details: body.details,
            },
            body.retryable.unwrap_or(false),
            body.lease_id,
            body.backoff_ms,
            Utc::now(),
        )
        .await?;
    Ok(Json(mission))
}

/// POST /missions/:id/approve — 409 unless QUARANTINED.
pub async fn approve_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(mission_id): Path<String>,
    body: Option<Json<ApproveBody>>,
) -> ApiResult<Json<Mission>> {
    load_scoped(&state, &actor, &mission_id).await?;
    let note = body.and_then(|Json(b)| b.note);
    let mission = state
        .missions
        .approve(&mission_id, &actor, note, Utc::now())
        .await?;
    Ok(Json(mission))
}

/// POST /missions/:id/cancel
pub async fn cancel_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(mission_id): Path<String>,
) -> ApiResult<Json<Mission>> {
    load_scoped(&state, &actor, &mission_id).await?;
    let mission = state.missions.cancel(&mission_id, Utc::now()).await?;
    Ok(Json(mission))
}

/// POST /missions/:id/retryNow — 409 unless RETRY.
pub async fn retry_now_mission(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(mission_id): Path<String>,
) -> ApiResult<Json<Mission>> {
    load_scoped(&state, &actor, &mission_id).await?;
    let mission = state
        .missions
        .retry_now(&mission_id, &actor, Utc::now())
        .await?;
    Ok(Json(mission))
}

/// GET /missions/metrics
pub async fn mission_metrics(
    State(state): State<AppState>,
) -> ApiResult<Json<MissionMetrics>> {
    Ok(Json(state.missions.metrics().await?))
}
