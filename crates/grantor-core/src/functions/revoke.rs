//! `grantor.revoke`, the compensation leg: remove the granted role from
//! every provider, handing back whatever grant metadata the authorization
//! recorded in context.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::CallTask;
use serde_json::{json, Map, Value};

use super::{CallOutcome, WorkflowFunction};
use crate::services::Services;

pub struct RevokeFunction {
    services: Arc<Services>,
}

impl RevokeFunction {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl WorkflowFunction for RevokeFunction {
    fn name(&self) -> &str {
        "grantor.revoke"
    }

    fn description(&self) -> &str {
        "Revokes a previously granted role from each provider"
    }

    async fn execute(
        &self,
        task: &mut WorkflowTask,
        _call: &CallTask,
        _input: &Value,
    ) -> Result<CallOutcome, Problem> {
        let elevation = task
            .as_elevation()
            .map_err(|e| Problem::validation(format!("context is not an elevation request: {e}")))?;
        let user = elevation
            .user
            .clone()
            .ok_or_else(|| Problem::validation("elevation request has no authenticated user"))?;
        let Some(role) = elevation.request.role.clone() else {
            return Err(Problem::validation("elevation request has no role"));
        };

        let recorded_grants = task
            .context
            .get("grants")
            .cloned()
            .unwrap_or(Value::Null);

        tracing::info!(
            workflow_id = %task.workflow_id,
            user = %user.email,
            role = %role.name,
            providers = ?elevation.request.providers,
            "executing revocation"
        );

        let mut revoked = Map::new();
        let mut failure: Option<Problem> = None;

        // Revoke everywhere we can even when one provider fails; report the
        // first failure after the sweep.
        for provider_name in &elevation.request.providers {
            let metadata = recorded_grants
                .get(provider_name)
                .cloned()
                .unwrap_or(Value::Null);
            let result = async {
                let provider = self.services.providers.get(provider_name)?;
                provider.rbac()?.revoke_role(&user, &role, &metadata).await
            }
            .await;

            match result {
                Ok(metadata) => {
                    revoked.insert(provider_name.clone(), metadata);
                }
                Err(problem) => {
                    tracing::error!(
                        provider = %provider_name,
                        error = %problem,
                        "revocation failed"
                    );
                    failure.get_or_insert(problem);
                }
            }
        }

        if let Some(problem) = failure {
            return Err(problem);
        }

        Ok(CallOutcome::Output(json!({
            "revoked": true,
            "revoked_at": Utc::now().to_rfc3339(),
            "providers": Value::Object(revoked),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_elevation_context, service_fixture};
    use grantor_types::workflow::TaskBase;

    fn call() -> CallTask {
        CallTask {
            call: "grantor.revoke".into(),
            with: None,
            base: TaskBase::default(),
        }
    }

    #[tokio::test]
    async fn revokes_with_recorded_metadata() {
        let (services, fixture) = service_fixture();
        let function = RevokeFunction::new(services);
        let mut task = sample_elevation_context(true);
        task.merge_context(json!({"grants": {"aws": {"assignment": "aws/ops"}}}));

        let outcome = function
            .execute(&mut task, &call(), &Value::Null)
            .await
            .unwrap();
        let CallOutcome::Output(output) = outcome else {
            panic!("expected output")
        };
        assert_eq!(output["revoked"], json!(true));
        assert_eq!(fixture.aws.revocations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revokes_even_without_metadata() {
        // Local-mode revocation tasks are sealed before grants exist; the
        // provider must cope with a null metadata payload.
        let (services, fixture) = service_fixture();
        let function = RevokeFunction::new(services);
        let mut task = sample_elevation_context(true);

        function
            .execute(&mut task, &call(), &Value::Null)
            .await
            .unwrap();
        assert_eq!(fixture.aws.revocations.lock().unwrap().len(), 1);
    }
}
