//! Command surface: proposal lifecycle, execution status, abort.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;

use crate::kernel::actor::{Actor, ActorKind};
use crate::kernel::commands::model::{AbortOutcome, CommandProposal, CommandSpec, ProposalStatus};
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeBody {
    pub command: Option<serde_json::Value>,
    pub reasoning: Option<String>,
    pub approval_timeout_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveProposalBody {
    #[allow(dead_code)]
    pub approved_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectProposalBody {
    #[allow(dead_code)]
    pub rejected_by: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBody {
    pub success: Option<bool>,
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListProposalParams {
    pub status: Option<String>,
}

/// POST /proposals
pub async fn propose(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<ProposeBody>,
) -> ApiResult<Response> {
    let command_value = body
        .command
        .ok_or_else(|| ApiError::validation("command is required"))?;
    let command: CommandSpec = serde_json::from_value(command_value)
        .map_err(|err| ApiError::validation(format!("invalid command: {err}")))?;

    let proposal = state
        .commands
        .propose(
            command,
            body.reasoning,
            actor,
            body.approval_timeout_seconds,
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)).into_response())
}

/// GET /proposals?status=
pub async fn list_proposals(
    State(state): State<AppState>,
    Query(params): Query<ListProposalParams>,
) -> ApiResult<Json<Vec<CommandProposal>>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<ProposalStatus>)
        .transpose()?;
    let proposals = state.commands.list(status, Utc::now()).await?;
    Ok(Json(proposals))
}

/// GET /proposals/pending
pub async fn pending_proposals(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<CommandProposal>>> {
    let proposals = state
        .commands
        .list(Some(ProposalStatus::PendingApproval), Utc::now())
        .await?;
    Ok(Json(proposals))
}

/// GET /proposals/:id
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<String>,
) -> ApiResult<Json<CommandProposal>> {
    let proposal = state
        .commands
        .get(&proposal_id, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("Proposal"))?;
    Ok(Json(proposal))
}

/// POST /proposals/:id/approve — operator-only; the governor may still turn
/// the approval into a rejection, reported in the returned proposal.
pub async fn approve_proposal(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(proposal_id): Path<String>,
    _body: Option<Json<ApproveProposalBody>>,
) -> ApiResult<Json<CommandProposal>> {
    if actor.kind == ActorKind::Agent {
        return Err(ApiError::forbidden("agents cannot approve commands"));
    }
    let proposal = state
        .commands
        .approve(&proposal_id, &actor, Utc::now())
        .await?;
    Ok(Json(proposal))
}

/// POST /proposals/:id/reject
pub async fn reject_proposal(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(proposal_id): Path<String>,
    Json(body): Json<RejectProposalBody>,
) -> ApiResult<Json<CommandProposal>> {
    if actor.kind == ActorKind::Agent {
        return Err(ApiError::forbidden("agents cannot reject commands"));
    }
    let reason = body
        .reason
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::validation("reason is required"))?;
    let proposal = state
        .commands
        .reject(&proposal_id, &actor, reason, Utc::now())
        .await?;
    Ok(Json(proposal))
}

/// POST /execute/:id
pub async fn execute_proposal(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(proposal_id): Path<String>,
) -> ApiResult<Json<CommandProposal>> {
    let proposal = state
        .commands
        .execute(&proposal_id, &actor, Utc::now())
        .await?;
    Ok(Json(proposal))
}

/// POST /proposals/:id/result — execution status report from the bridge.
pub async fn proposal_result(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(proposal_id): Path<String>,
    Json(body): Json<ResultBody>,
) -> ApiResult<Json<CommandProposal>> {
    let success = body
        .success
        .ok_or_else(|| ApiError::validation("success is required"))?;
    let proposal = state
        .commands
        .record_result(&proposal_id, success, body.detail, &actor, Utc::now())
        .await?;
    Ok(Json(proposal))
}

/// POST /proposals/:id/abort — `{status: ACCEPTED | FAILED, message}`.
pub async fn abort_proposal(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(proposal_id): Path<String>,
) -> ApiResult<Json<AbortOutcome>> {
    let outcome = state
        .commands
        .abort(&proposal_id, &actor, Utc::now())
        .await?;
    Ok(Json(outcome))
}
