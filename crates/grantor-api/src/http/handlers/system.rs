//! Health, metrics and client registration.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use grantor_types::health::{HealthResponse, HealthState, MetricsInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut services = std::collections::BTreeMap::new();
    services.insert(
        "scheduler".to_string(),
        HealthState::Healthy,
    );
    services.insert(
        "durable".to_string(),
        if state.services.is_durable() {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        },
    );

    Json(HealthResponse {
        status: HealthState::Healthy,
        api_base_path: state.config.server.base_path.clone(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsInfo> {
    let catalog = state.manager.catalog();
    let uptime = Utc::now() - state.started_at;
    Json(MetricsInfo {
        uptime: format!("{}s", uptime.num_seconds()),
        total_requests: state.counters.total_requests.load(Ordering::Relaxed),
        roles_count: catalog.roles.len(),
        workflows_count: catalog.workflows.len(),
        providers_count: state.services.providers.len(),
        elevate_requests: state.counters.elevate_requests.load(Ordering::Relaxed),
    })
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    #[serde(default)]
    pub callback: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub client_id: String,
    pub name: String,
}

/// POST /register: agent registration. The broker hands back a client id
/// the agent includes when starting logins.
pub async fn register(Json(request): Json<RegisterRequest>) -> Json<RegisterResponse> {
    let client_id = Uuid::new_v4().to_string();
    tracing::info!(name = %request.name, client_id = %client_id, "registered client");
    Json(RegisterResponse {
        client_id,
        name: request.name,
    })
}
