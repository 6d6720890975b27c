//! Governor surface: read and replace the admission policy document.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;

use crate::kernel::actor::{Actor, ActorKind};
use crate::kernel::governor::{GovernorConfig, GovernorConfigPatch};
use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

/// GET /governor/config
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<GovernorConfig>> {
    let config = state.governor.config_store().get().await?;
    Ok(Json(config))
}

/// PUT /governor/config — full-document replace with per-field defaulting.
/// Unknown fields are rejected. Agents cannot change policy.
pub async fn put_config(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<GovernorConfig>> {
    if actor.kind == ActorKind::Agent {
        return Err(ApiError::forbidden("agents cannot change governor config"));
    }

    let patch: GovernorConfigPatch = serde_json::from_value(body)
        .map_err(|err| ApiError::validation(format!("invalid governor config: {err}")))?;
    let config = state.governor.config_store().set(patch, Utc::now()).await?;
    Ok(Json(config))
}
