//! OAuth login endpoints: start, provider request, and the callback that
//! dispatches on the sealed state's type.

use axum::extract::{Path, Query, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::StatusCode;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Json;
use grantor_core::elevate::WorkflowManager;
use grantor_core::encoding::{
    encode_local_session, seal_session, EncodedType, EncodingWrapper,
};
use grantor_types::error::Problem;
use grantor_types::session::LocalSession;
use grantor_types::task::WorkflowTask;
use grantor_types::user::{AuthorizeRedirect, AuthorizeUser};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::http::error::{ApiError, ApiResult};
use crate::http::extractors::{ACTIVE_COOKIE, SESSION_COOKIE_PREFIX};
use crate::state::AppState;

/// State payload for plain (non-workflow) browser logins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthWrapper {
    pub callback: String,
    #[serde(default)]
    pub client: String,
    pub provider: String,
    pub code: String,
}

impl AuthWrapper {
    pub fn new(callback: &str, client: &str, provider: &str) -> Self {
        Self {
            callback: callback.to_string(),
            client: client.to_string(),
            provider: provider.to_string(),
            code: Uuid::new_v4().simple().to_string()[..12].to_uppercase(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthStartQuery {
    pub callback: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub client: String,
}

/// GET /auth: start a login and redirect to the identity provider.
pub async fn auth_start(
    State(state): State<AppState>,
    Query(query): Query<AuthStartQuery>,
) -> ApiResult<Response> {
    let provider_name = if query.provider.is_empty() {
        "default".to_string()
    } else {
        query.provider.clone()
    };
    start_login(&state, &provider_name, &query.callback, &query.client).await
}

/// GET /auth/request/:provider: start a login against a named provider.
pub async fn auth_request(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<AuthStartQuery>,
) -> ApiResult<Response> {
    start_login(&state, &provider, &query.callback, &query.client).await
}

async fn start_login(
    state: &AppState,
    provider_name: &str,
    callback: &str,
    client: &str,
) -> ApiResult<Response> {
    let provider = state.services.providers.get(provider_name)?;
    let wrapper = AuthWrapper::new(callback, client, provider_name);

    let sealed_state = EncodingWrapper::new(
        EncodedType::Auth,
        serde_json::to_value(&wrapper)
            .map_err(|e| Problem::runtime(format!("state serialization failed: {e}")))?,
    )
    .encode_and_encrypt(state.services.encryptor.as_ref())?;

    let redirect: AuthorizeRedirect = provider
        .authorizor()?
        .authorize_session(&AuthorizeUser {
            scopes: Vec::new(),
            state: sealed_state,
            redirect_uri: state.services.urls.auth_callback_url(provider_name),
            code: String::new(),
        })
        .await?;

    tracing::info!(provider = provider_name, "redirecting to identity provider");
    Ok((StatusCode::FOUND, [(LOCATION, redirect.url)]).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: String,
    pub state: String,
}

/// GET /auth/callback/:provider: the identity provider sends the user
/// back here. The sealed state decides what happens next: a workflow task
/// resumes, a plain auth establishes a browser session.
pub async fn auth_callback(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Response> {
    let wrapper = EncodingWrapper::decode_and_decrypt(
        &query.state,
        state.services.encryptor.as_ref(),
    )
    .map_err(|problem| ApiError(problem.with_status(400)))?;

    match wrapper.wrapper_type {
        EncodedType::WorkflowTask => {
            let task: WorkflowTask = serde_json::from_value(wrapper.data)
                .map_err(|e| Problem::validation(format!("invalid workflow state: {e}")))?;
            complete_workflow_login(&state, &provider_name, task, &query.code).await
        }
        EncodedType::Auth => {
            let auth: AuthWrapper = serde_json::from_value(wrapper.data)
                .map_err(|e| Problem::validation(format!("invalid auth state: {e}")))?;
            complete_browser_login(&state, &provider_name, auth, &query.code).await
        }
        other => Err(ApiError(
            Problem::validation(format!("unexpected state type: {other}")).with_status(400),
        )),
    }
}

/// The user authenticated mid-elevation: attach the principal and resume.
async fn complete_workflow_login(
    state: &AppState,
    provider_name: &str,
    mut task: WorkflowTask,
    code: &str,
) -> ApiResult<Response> {
    let provider = state.services.providers.get(provider_name)?;
    let session = provider
        .authorizor()?
        .create_session(&AuthorizeUser {
            scopes: Vec::new(),
            state: String::new(),
            redirect_uri: state.services.urls.auth_callback_url(provider_name),
            code: code.to_string(),
        })
        .await?;

    task.set_user(session.user.clone());
    let finished = state.manager.resume_workflow(task).await?;

    let cookie = session_cookie(state, provider_name, &session)?;
    let response = WorkflowManager::to_response(&finished);
    Ok((
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, cookie.0), (SET_COOKIE, cookie.1)]),
        Json(response),
    )
        .into_response())
}

/// Plain browser login: seal the session, set cookies, bounce to the
/// requested callback with the portable session attached.
async fn complete_browser_login(
    state: &AppState,
    provider_name: &str,
    auth: AuthWrapper,
    code: &str,
) -> ApiResult<Response> {
    let provider = state.services.providers.get(provider_name)?;
    let session = provider
        .authorizor()?
        .create_session(&AuthorizeUser {
            scopes: Vec::new(),
            state: String::new(),
            redirect_uri: state.services.urls.auth_callback_url(provider_name),
            code: code.to_string(),
        })
        .await?;

    let (session_cookie, active_cookie) = session_cookie(state, provider_name, &session)?;

    let encoded = encode_local_session(&local_session(state, &session)?)?;
    let destination = if auth.callback.is_empty() {
        "/".to_string()
    } else {
        let separator = if auth.callback.contains('?') { '&' } else { '?' };
        format!(
            "{}{}session={}&provider={}",
            auth.callback, separator, encoded, provider_name
        )
    };

    tracing::info!(provider = provider_name, "browser session established");
    Ok((
        StatusCode::FOUND,
        AppendHeaders([
            (LOCATION, destination),
            (SET_COOKIE, session_cookie),
            (SET_COOKIE, active_cookie),
        ]),
    )
        .into_response())
}

fn local_session(
    state: &AppState,
    session: &grantor_types::session::Session,
) -> Result<LocalSession, Problem> {
    Ok(LocalSession {
        version: 1,
        expiry: session.expiry,
        session: seal_session(session, state.services.encryptor.as_ref())?,
    })
}

/// Build the per-provider session cookie and the active-provider marker.
fn session_cookie(
    state: &AppState,
    provider: &str,
    session: &grantor_types::session::Session,
) -> Result<(String, String), Problem> {
    let encoded = encode_local_session(&local_session(state, session)?)?;
    let session_cookie = format!(
        "{SESSION_COOKIE_PREFIX}{provider}={encoded}; Path=/; HttpOnly; SameSite=Lax"
    );
    let active_cookie = format!("{ACTIVE_COOKIE}={provider}; Path=/; SameSite=Lax");
    Ok((session_cookie, active_cookie))
}

/// POST /provider/:p/authorizeSession: proxy surface used by agent-mode
/// clients to mint identity-provider redirects through the broker.
pub async fn provider_authorize_session(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    Json(request): Json<AuthorizeUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let provider = state.services.providers.get(&provider_name)?;
    let redirect = provider.authorizor()?.authorize_session(&request).await?;
    Ok(Json(json!({"url": redirect.url})))
}
