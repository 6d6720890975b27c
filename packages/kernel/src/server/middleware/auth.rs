//! Bearer-token actor extraction.
//!
//! Authentication backends are pluggable behind [`ActorResolver`]. The dev
//! resolver accepts `kind:id[:org]` tokens; the external resolver validates
//! HS256 JWTs. Protected routes run [`require_actor`], which stores the
//! resolved [`Actor`] in request extensions.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::AuthMode;
use crate::kernel::{Actor, ActorKind};
use crate::server::app::AppState;
use crate::server::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Pluggable actor-identification backend.
#[async_trait]
pub trait ActorResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Actor, AuthError>;
}

/// Build the resolver configured by `AUTH_MODE`.
pub fn resolver_for(mode: &AuthMode) -> Arc<dyn ActorResolver> {
    match mode {
        AuthMode::Dev => Arc::new(DevActorResolver),
        AuthMode::External { jwt_secret } => Arc::new(JwtActorResolver::new(jwt_secret)),
    }
}

fn parse_kind(raw: &str) -> Result<ActorKind, AuthError> {
    match raw.to_ascii_uppercase().as_str() {
        "USER" => Ok(ActorKind::User),
        "AGENT" => Ok(ActorKind::Agent),
        "SYSTEM" => Ok(ActorKind::System),
        other => Err(AuthError::InvalidToken(format!(
            "unknown actor kind '{other}'"
        ))),
    }
}

/// `kind:id[:org]` tokens, e.g. `agent:w1:org-1`. Development only.
pub struct DevActorResolver;

#[async_trait]
impl ActorResolver for DevActorResolver {
    async fn resolve(&self, token: &str) -> Result<Actor, AuthError> {
        let mut parts = token.splitn(3, ':');
        let kind = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::InvalidToken("expected kind:id[:org]".to_string()))?;
        let org = parts.next().filter(|s| !s.is_empty());

        Ok(Actor {
            kind: parse_kind(kind)?,
            id: id.to_string(),
            org_id: org.map(str::to_string),
            display: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// HS256 JWTs from the external identity provider. Claims: `sub` (required),
/// `kind`, `org`, `name`, `exp`.
pub struct JwtActorResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtActorResolver {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl ActorResolver for JwtActorResolver {
    async fn resolve(&self, token: &str) -> Result<Actor, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        let kind = match claims.kind.as_deref() {
            Some(raw) => parse_kind(raw)?,
            None => ActorKind::User,
        };
        Ok(Actor {
            kind,
            id: claims.sub,
            org_id: claims.org,
            display: claims.name,
        })
    }
}

/// Middleware for protected routes: 401 unless a bearer token resolves to an
/// actor.
pub async fn require_actor(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let actor = state
        .resolver
        .resolve(token)
        .await
        .map_err(|err| ApiError::Unauthorized(err.to_string()))?;

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}
