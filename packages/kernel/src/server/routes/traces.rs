//! Execution trace surface (in-memory, process lifetime).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::kernel::actor::{Actor, ActorKind};
use crate::kernel::traces::TraceEvent;
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBody {
    pub mission_id: Option<String>,
    pub agent: Option<String>,
    pub label: Option<String>,
    pub data: Option<serde_json::Value>,
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TraceParams {
    pub limit: Option<usize>,
}

/// POST /traces
pub async fn post_trace(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<TraceBody>,
) -> ApiResult<Response> {
    let mission_id = body
        .mission_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::validation("missionId is required"))?;
    let label = body
        .label
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| ApiError::validation("label is required"))?;

    let agent = body.agent.or_else(|| {
        (actor.kind == ActorKind::Agent).then(|| actor.id.clone())
    });
    let event = TraceEvent {
        mission_id,
        agent,
        label,
        data: body.data,
        at: body.at.unwrap_or_else(Utc::now),
    };
    state.traces.record(event.clone()).await;
    Ok((StatusCode::CREATED, Json(event)).into_response())
}

/// GET /traces?limit=
pub async fn list_traces(
    State(state): State<AppState>,
    Query(params): Query<TraceParams>,
) -> Json<Vec<TraceEvent>> {
    let limit = params.limit.unwrap_or(100).min(1000);
    Json(state.traces.recent(limit).await)
}

/// GET /traces/:missionId
pub async fn mission_traces(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> Json<Vec<TraceEvent>> {
    Json(state.traces.for_mission(&mission_id).await)
}
