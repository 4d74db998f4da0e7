//! `grantor.monitor`: best-effort observation hooks for the session's
//! lifetime. Failures here never block an elevation.

use std::sync::Arc;

use async_trait::async_trait;
use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::CallTask;
use serde_json::Value;

use super::{CallOutcome, WorkflowFunction};
use crate::services::Services;

pub struct MonitorFunction {
    _services: Arc<Services>,
}

impl MonitorFunction {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            _services: services,
        }
    }
}

#[async_trait]
impl WorkflowFunction for MonitorFunction {
    fn name(&self) -> &str {
        "grantor.monitor"
    }

    fn description(&self) -> &str {
        "Sets up best-effort observation hooks for the elevation's duration"
    }

    async fn execute(
        &self,
        task: &mut WorkflowTask,
        _call: &CallTask,
        _input: &Value,
    ) -> Result<CallOutcome, Problem> {
        // TODO: wire provider audit-log subscriptions once a provider
        // exposes them; for now the hook is observability-only.
        tracing::info!(
            workflow_id = %task.workflow_id,
            "monitoring hook registered for elevation window"
        );
        Ok(CallOutcome::Output(Value::Null))
    }
}
