//! `/elevate` family: submit, resume, and the AI path.

use std::sync::atomic::Ordering;

use axum::extract::{Query, State};
use axum::Json;
use grantor_core::elevate::WorkflowManager;
use grantor_core::encoding::unseal_task;
use grantor_types::elevate::{ElevateLlmRequest, ElevateResponse, ElevateStaticRequest};
use grantor_types::error::{ErrorKind, Problem};
use grantor_types::task::TaskStatus;
use serde::Deserialize;

use crate::http::error::{ApiError, ApiResult};
use crate::http::extractors::MaybeSession;
use crate::state::AppState;

/// GET-form elevation request; `providers` is comma-separated.
#[derive(Debug, Default, Deserialize)]
pub struct ElevateQuery {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub providers: String,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub identities: String,
}

impl From<ElevateQuery> for ElevateStaticRequest {
    fn from(query: ElevateQuery) -> Self {
        let mut providers: Vec<String> = query
            .providers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if providers.is_empty() && !query.provider.is_empty() {
            providers.push(query.provider);
        }
        ElevateStaticRequest {
            role: query.role,
            providers,
            workflow: query.workflow,
            reason: query.reason,
            duration: query.duration,
            identities: query
                .identities
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            session: None,
        }
    }
}

pub async fn elevate_get(
    State(state): State<AppState>,
    session: MaybeSession,
    Query(query): Query<ElevateQuery>,
) -> ApiResult<Json<ElevateResponse>> {
    submit(state, session, query.into()).await.map(Json)
}

pub async fn elevate_post(
    State(state): State<AppState>,
    session: MaybeSession,
    Json(request): Json<ElevateStaticRequest>,
) -> ApiResult<Json<ElevateResponse>> {
    submit(state, session, request).await.map(Json)
}

async fn submit(
    state: AppState,
    session: MaybeSession,
    mut raw: ElevateStaticRequest,
) -> ApiResult<ElevateResponse> {
    state.counters.elevate_requests.fetch_add(1, Ordering::Relaxed);

    // A middleware-extracted session beats one embedded in the request.
    if let MaybeSession(Some(auth)) = session {
        raw.session = Some(auth.local);
    }

    let request = state.manager.resolve_request(&raw)?;
    let ticket = state.manager.create_workflow(request).await?;

    if ticket.task.user.is_some() {
        // Session already established: run straight away.
        let finished = state.manager.resume_workflow(ticket.task).await?;
        return Ok(WorkflowManager::to_response(&finished));
    }

    // Authentication required first: hand back the redirect.
    Ok(ElevateResponse {
        status: TaskStatus::Pending,
        output: None,
        url: Some(ticket.url),
    })
}

#[derive(Debug, Deserialize)]
pub struct ResumeQuery {
    pub state: String,
}

pub async fn resume_get(
    State(state): State<AppState>,
    Query(query): Query<ResumeQuery>,
) -> ApiResult<Json<ElevateResponse>> {
    resume(state, &query.state).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct ResumeBody {
    pub state: String,
}

pub async fn resume_post(
    State(state): State<AppState>,
    Json(body): Json<ResumeBody>,
) -> ApiResult<Json<ElevateResponse>> {
    resume(state, &body.state).await.map(Json)
}

async fn resume(state: AppState, sealed: &str) -> ApiResult<ElevateResponse> {
    let task = unseal_task(sealed, state.services.encryptor.as_ref()).map_err(|problem| {
        // A tampered or undecodable state is a client error on this
        // surface, still typed `authentication`.
        if problem.kind == ErrorKind::Authentication {
            ApiError(problem.with_status(400))
        } else {
            ApiError(Problem::new(
                ErrorKind::Authentication,
                "Invalid resume state",
                problem.detail,
            )
            .with_status(400))
        }
    })?;

    let finished = state.manager.resume_workflow(task).await?;
    Ok(WorkflowManager::to_response(&finished))
}

pub async fn elevate_llm_get(
    State(state): State<AppState>,
    Query(request): Query<ElevateLlmRequest>,
) -> ApiResult<Json<ElevateStaticRequest>> {
    Ok(Json(state.manager.llm_request(&request.reason).await?))
}

pub async fn elevate_llm_post(
    State(state): State<AppState>,
    Json(request): Json<ElevateLlmRequest>,
) -> ApiResult<Json<ElevateStaticRequest>> {
    Ok(Json(state.manager.llm_request(&request.reason).await?))
}
