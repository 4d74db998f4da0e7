//! Agent-mode session endpoints: the local daemon's session store surface.
//!
//! Secrets never leave this surface: listings expose the provider and
//! expiry only, never the sealed session material.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use grantor_core::encoding::decode_local_session;
use grantor_types::error::Problem;
use grantor_types::session::SessionCreateRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub provider: String,
    pub expiry: DateTime<Utc>,
    pub expired: bool,
}

pub async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<BTreeMap<String, SessionSummary>>> {
    let config = state.sessions.load().await?;
    let sessions = config
        .sessions
        .into_iter()
        .map(|(provider, session)| {
            let summary = SessionSummary {
                provider: provider.clone(),
                expiry: session.expiry,
                expired: session.is_expired(),
            };
            (provider, summary)
        })
        .collect();
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    let session = state
        .sessions
        .get_session(&provider)
        .await?
        .ok_or_else(|| {
            Problem::validation(format!("no session for provider: {provider}")).with_status(404)
        })?;
    Ok(Json(SessionSummary {
        provider,
        expired: session.is_expired(),
        expiry: session.expiry,
    }))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionCreateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = decode_local_session(&request.session)?;
    if session.is_expired() {
        return Err(Problem::validation("session is already expired").into());
    }
    state.sessions.put_session(&request.provider, session).await?;
    Ok(Json(json!({"stored": true, "provider": request.provider})))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.sessions.remove_session(&provider).await?;
    if !removed {
        return Err(Problem::validation(format!("no session for provider: {provider}"))
            .with_status(404)
            .into());
    }
    Ok(Json(json!({"removed": true, "provider": provider})))
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentAuthQuery {
    #[serde(default)]
    pub provider: String,
}

/// GET /auth (agent mode): bounce to the broker with the local callback.
pub async fn agent_auth(
    State(state): State<AppState>,
    Query(query): Query<AgentAuthQuery>,
) -> Response {
    let local = format!(
        "http://{}{}/sessions/callback",
        state.config.server.bind_addr(),
        state.config.server.base_path
    );
    let mut url = format!(
        "{}{}/auth?callback={}",
        state.config.broker_url, state.config.server.base_path, local
    );
    if !query.provider.is_empty() {
        url.push_str(&format!("&provider={}", query.provider));
    }
    (StatusCode::FOUND, [(LOCATION, url)]).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SessionCallbackQuery {
    pub session: String,
    pub provider: String,
}

/// GET /sessions/callback: the broker redirects here after a browser
/// login; the session lands in the local store, completing the rendezvous
/// a waiting CLI is parked on.
pub async fn session_callback(
    State(state): State<AppState>,
    Query(query): Query<SessionCallbackQuery>,
) -> ApiResult<Response> {
    let session = decode_local_session(&query.session)?;
    state.sessions.put_session(&query.provider, session).await?;
    tracing::info!(provider = %query.provider, "session stored via browser callback");
    Ok((
        StatusCode::OK,
        "Login complete. You can close this window and return to the terminal.",
    )
        .into_response())
}
