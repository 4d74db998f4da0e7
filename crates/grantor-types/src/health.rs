//! Health and metrics response shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthState,
    #[serde(rename = "path")]
    pub api_base_path: String,
    pub timestamp: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, HealthState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsInfo {
    pub uptime: String,
    pub total_requests: u64,
    pub roles_count: usize,
    pub workflows_count: usize,
    pub providers_count: usize,
    pub elevate_requests: u64,
}
