//! Read-only catalog surface: roles, providers, workflows.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use grantor_types::error::Problem;
use grantor_types::provider::{ProviderCapability, ProviderPermission, ProviderRole};
use grantor_types::role::Role;
use serde::{Deserialize, Serialize};

use crate::http::error::ApiResult;
use crate::state::AppState;

const API_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RolesResponse {
    pub version: String,
    pub roles: BTreeMap<String, Role>,
}

pub async fn list_roles(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Json<RolesResponse> {
    let catalog = state.manager.catalog();
    let roles = catalog
        .roles
        .values()
        .filter(|role| role.enabled)
        .filter(|role| match &query.provider {
            Some(provider) => role.providers.iter().any(|p| p == provider),
            None => true,
        })
        .map(|role| (role.name.clone(), role.resolve(&catalog.roles)))
        .collect();
    Json(RolesResponse {
        version: API_VERSION.to_string(),
        roles,
    })
}

pub async fn get_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Role>> {
    let catalog = state.manager.catalog();
    let role = catalog
        .resolve_role(&name)
        .ok_or_else(|| Problem::validation(format!("unknown role: {name}")).with_status(404))?;
    Ok(Json(role))
}

#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub description: String,
    pub provider: String,
    pub capabilities: Vec<ProviderCapability>,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub version: String,
    pub providers: BTreeMap<String, ProviderSummary>,
}

fn summarize(provider: &grantor_core::provider::Provider) -> ProviderSummary {
    ProviderSummary {
        name: provider.config.name.clone(),
        description: provider.config.description.clone(),
        provider: provider.config.provider.clone(),
        capabilities: provider.config.capabilities.clone(),
        enabled: provider.config.enabled,
    }
}

pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let providers = state
        .services
        .providers
        .names()
        .into_iter()
        .filter_map(|name| state.services.providers.get(name).ok())
        .map(|provider| (provider.name().to_string(), summarize(&provider)))
        .collect();
    Json(ProvidersResponse {
        version: API_VERSION.to_string(),
        providers,
    })
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProviderSummary>> {
    let provider = state.services.providers.get(&name)?;
    Ok(Json(summarize(&provider)))
}

pub async fn provider_roles(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CatalogQuery>,
) -> ApiResult<Json<Vec<ProviderRole>>> {
    let provider = state.services.providers.get(&name)?;
    let roles = provider.rbac()?.list_roles(query.filter.as_deref()).await?;
    Ok(Json(roles))
}

pub async fn provider_permissions(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CatalogQuery>,
) -> ApiResult<Json<Vec<ProviderPermission>>> {
    let provider = state.services.providers.get(&name)?;
    let permissions = provider
        .rbac()?
        .list_permissions(query.filter.as_deref())
        .await?;
    Ok(Json(permissions))
}

#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub description: String,
    pub authentication: String,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct WorkflowsResponse {
    pub version: String,
    pub workflows: BTreeMap<String, WorkflowSummary>,
}

pub async fn list_workflows(State(state): State<AppState>) -> Json<WorkflowsResponse> {
    let catalog = state.manager.catalog();
    let workflows = catalog
        .workflows
        .values()
        .map(|workflow| {
            (
                workflow.name.clone(),
                WorkflowSummary {
                    name: workflow.name.clone(),
                    description: workflow.description.clone(),
                    authentication: workflow.authentication.clone(),
                    enabled: workflow.enabled,
                },
            )
        })
        .collect();
    Json(WorkflowsResponse {
        version: API_VERSION.to_string(),
        workflows,
    })
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<grantor_types::workflow::Workflow>> {
    let catalog = state.manager.catalog();
    let workflow = catalog
        .workflow(&name)
        .cloned()
        .ok_or_else(|| Problem::validation(format!("unknown workflow: {name}")).with_status(404))?;
    Ok(Json(workflow))
}
