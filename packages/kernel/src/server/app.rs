//! Application setup: shared state and the axum router.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::commands::{CommandDispatcher, CommandPipeline};
use crate::kernel::governor::{Governor, GovernorConfigStore};
use crate::kernel::missions::{MissionRepository, MissionStore};
use crate::kernel::ratelimit::RateLimiter;
use crate::kernel::registry::Registry;
use crate::kernel::store::KernelStore;
use crate::kernel::traces::TraceStore;
use crate::server::middleware::{require_actor, ActorResolver};
use crate::server::routes::{governor, health, missions, proposals, registry, traces};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: KernelStore,
    pub missions: Arc<MissionStore>,
    pub governor: Arc<Governor>,
    pub commands: Arc<CommandPipeline>,
    pub traces: Arc<TraceStore>,
    pub registry: Arc<Registry>,
    pub resolver: Arc<dyn ActorResolver>,
}

/// Wire the kernel services over one store.
pub fn build_state(
    store: KernelStore,
    resolver: Arc<dyn ActorResolver>,
    dispatcher: Arc<dyn CommandDispatcher>,
) -> AppState {
    let pool = store.pool().clone();
    let config_store = GovernorConfigStore::new(store.clone());
    let limiter = RateLimiter::new(pool.clone());
    let governor = Governor::new(config_store.clone(), limiter);
    let missions = MissionStore::new(MissionRepository::new(pool.clone()));
    let commands = CommandPipeline::new(pool, config_store, dispatcher);

    AppState {
        store,
        missions: Arc::new(missions),
        governor: Arc::new(governor),
        commands: Arc::new(commands),
        traces: Arc::new(TraceStore::new()),
        registry: Arc::new(Registry::new()),
        resolver,
    }
}

/// Build the Axum application router.
///
/// Everything except `/health` sits behind bearer-token actor resolution.
pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        // Mission surface
        .route(
            "/missions",
            post(missions::create_mission).get(missions::list_missions),
        )
        .route("/missions/claim", post(missions::claim_mission))
        .route("/missions/metrics", get(missions::mission_metrics))
        .route("/missions/:id", get(missions::get_mission))
        .route("/missions/:id/heartbeat", post(missions::heartbeat_mission))
        .route("/missions/:id/complete", post(missions::complete_mission))
        .route("/missions/:id/fail", post(missions::fail_mission))
        .route("/missions/:id/approve", post(missions::approve_mission))
        .route("/missions/:id/cancel", post(missions::cancel_mission))
        .route("/missions/:id/retryNow", post(missions::retry_now_mission))
        // Governor surface
        .route(
            "/governor/config",
            get(governor::get_config).put(governor::put_config),
        )
        // Command surface
        .route(
            "/proposals",
            post(proposals::propose).get(proposals::list_proposals),
        )
        .route("/proposals/pending", get(proposals::pending_proposals))
        .route("/proposals/:id", get(proposals::get_proposal))
        .route("/proposals/:id/approve", post(proposals::approve_proposal))
        .route("/proposals/:id/reject", post(proposals::reject_proposal))
        .route("/proposals/:id/result", post(proposals::proposal_result))
        .route("/proposals/:id/abort", post(proposals::abort_proposal))
        .route("/execute/:id", post(proposals::execute_proposal))
        // Traces and registries
        .route("/traces", post(traces::post_trace).get(traces::list_traces))
        .route("/traces/:missionId", get(traces::mission_traces))
        .route(
            "/agents",
            post(registry::register_agent).get(registry::list_agents),
        )
        .route(
            "/tools",
            post(registry::register_tool).get(registry::list_tools),
        )
        .route("/policy/check", post(registry::policy_check))
        .layer(middleware::from_fn_with_state(state.clone(), require_actor));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health::health_handler))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
