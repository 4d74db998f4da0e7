//! Axum router for broker and agent modes.
//!
//! Broker mode carries the full elevation/auth/catalog/executions surface;
//! agent mode is the local daemon: session store plus the auth bounce to
//! the broker. Middleware: CORS, request tracing, request counting.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::middleware::{self, Next};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the broker-mode router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Elevation
        .route(
            "/elevate",
            get(handlers::elevate::elevate_get).post(handlers::elevate::elevate_post),
        )
        .route(
            "/elevate/llm",
            get(handlers::elevate::elevate_llm_get).post(handlers::elevate::elevate_llm_post),
        )
        .route(
            "/elevate/resume",
            get(handlers::elevate::resume_get).post(handlers::elevate::resume_post),
        )
        // Auth
        .route("/auth", get(handlers::auth::auth_start))
        .route("/auth/request/{provider}", get(handlers::auth::auth_request))
        .route("/auth/callback/{provider}", get(handlers::auth::auth_callback))
        // Catalog
        .route("/roles", get(handlers::catalog::list_roles))
        .route("/role/{role}", get(handlers::catalog::get_role))
        .route("/providers", get(handlers::catalog::list_providers))
        .route("/provider/{provider}", get(handlers::catalog::get_provider))
        .route(
            "/provider/{provider}/roles",
            get(handlers::catalog::provider_roles),
        )
        .route(
            "/provider/{provider}/permissions",
            get(handlers::catalog::provider_permissions),
        )
        .route(
            "/provider/{provider}/authorizeSession",
            post(handlers::auth::provider_authorize_session),
        )
        .route("/workflows", get(handlers::catalog::list_workflows))
        .route("/workflow/{name}", get(handlers::catalog::get_workflow))
        // Executions
        .route("/executions", get(handlers::executions::list_executions))
        .route("/execution/{id}", get(handlers::executions::get_execution))
        .route(
            "/execution/{id}/terminate",
            get(handlers::executions::terminate_execution),
        )
        // Registration
        .route("/register", post(handlers::system::register));

    shared_router(state, api)
}

/// Build the agent-mode (local daemon) router.
pub fn build_agent_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/sessions",
            get(handlers::sessions::list_sessions).post(handlers::sessions::create_session),
        )
        .route(
            "/sessions/callback",
            get(handlers::sessions::session_callback),
        )
        .route(
            "/session/{provider}",
            get(handlers::sessions::get_session),
        )
        .route(
            "/session/{provider}",
            delete(handlers::sessions::delete_session),
        )
        .route("/auth", get(handlers::sessions::agent_auth));

    shared_router(state, api)
}

fn shared_router(state: AppState, api: Router<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest(&state.config.server.base_path.clone(), api)
        .route("/health", get(handlers::system::health))
        .route("/metrics", get(handlers::system::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn count_requests(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    state.counters.total_requests.fetch_add(1, Ordering::Relaxed);
    next.run(request).await
}
