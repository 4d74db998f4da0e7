//! Execution listing, inspection and termination.

use axum::extract::{Path, Query, State};
use axum::Json;
use grantor_core::durable::{ExecutionFilter, ExecutionInfo};
use grantor_types::error::Problem;
use grantor_types::task::TaskStatus;
use serde::Deserialize;
use serde_json::json;

use crate::http::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub approved: Option<bool>,
}

pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionsQuery>,
) -> ApiResult<Json<Vec<ExecutionInfo>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(Problem::validation)?;
    let filter = ExecutionFilter {
        status,
        user: query.user,
        role: query.role,
        workflow: query.workflow,
        provider: query.provider,
        approved: query.approved,
    };
    Ok(Json(state.manager.list_executions(&filter).await?))
}

#[derive(Debug, serde::Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub info: ExecutionInfo,
    /// Full task snapshot, when it could be read within the query timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<grantor_types::task::WorkflowTask>,
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecutionDetail>> {
    let (info, task) = state
        .manager
        .get_execution(&id)
        .await?
        .ok_or_else(|| Problem::validation(format!("unknown execution: {id}")).with_status(404))?;
    Ok(Json(ExecutionDetail { info, task }))
}

pub async fn terminate_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .manager
        .terminate(&id, "terminated by operator")
        .await?;
    Ok(Json(json!({"terminated": true, "id": id})))
}
