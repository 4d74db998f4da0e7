//! `grantor.validate`: elevation request validation.
//!
//! Static mode is authoritative: duration normalization, role/reason/user
//! presence and provider resolution. LLM mode is advisory only; it may
//! annotate the context but can never gate authorization by itself.

use std::sync::Arc;

use async_trait::async_trait;
use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::CallTask;
use serde_json::{json, Value};

use super::{CallOutcome, WorkflowFunction};
use crate::services::Services;

pub const VALIDATOR_STATIC: &str = "static";
pub const VALIDATOR_LLM: &str = "llm";

pub struct ValidateFunction {
    services: Arc<Services>,
}

impl ValidateFunction {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl WorkflowFunction for ValidateFunction {
    fn name(&self) -> &str {
        "grantor.validate"
    }

    fn description(&self) -> &str {
        "Validates the incoming access request: roles, providers, duration and requestor"
    }

    fn optional_parameters(&self) -> Value {
        json!({"validator": VALIDATOR_STATIC})
    }

    async fn validate(
        &self,
        task: &WorkflowTask,
        _call: &CallTask,
        _input: &Value,
    ) -> Result<(), Problem> {
        let elevation = task
            .as_elevation()
            .map_err(|e| Problem::validation(format!("context is not an elevation request: {e}")))?;

        if elevation.request.role.is_none() {
            return Err(Problem::validation("role must be provided"));
        }
        if elevation.request.reason.is_empty() {
            return Err(Problem::validation("reason must be provided"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        task: &mut WorkflowTask,
        call: &CallTask,
        _input: &Value,
    ) -> Result<CallOutcome, Problem> {
        let with = call.with.as_ref().cloned().unwrap_or_else(|| json!({}));
        let validator = with
            .get("validator")
            .and_then(Value::as_str)
            .unwrap_or(VALIDATOR_STATIC);

        let mut elevation = task
            .as_elevation()
            .map_err(|e| Problem::validation(format!("context is not an elevation request: {e}")))?;

        // Default and normalize the duration before anything consumes it.
        if elevation.request.duration.is_empty() {
            elevation.request.duration = "1h".to_string();
        }
        let duration = elevation
            .request
            .as_duration()
            .map_err(|e| Problem::validation(e.to_string()))?;

        tracing::info!(
            validator,
            role = elevation.request.role.as_ref().map(|r| r.name.as_str()).unwrap_or(""),
            duration_minutes = duration.num_minutes(),
            "validating elevation request"
        );

        // Every named provider must resolve and be able to grant.
        for provider_name in &elevation.request.providers {
            let provider = self.services.providers.get(provider_name)?;
            provider.rbac()?;
        }

        match validator {
            VALIDATOR_STATIC => {
                if elevation.user.is_none() {
                    return Err(Problem::validation(
                        "user must be provided for static validation",
                    ));
                }
            }
            VALIDATOR_LLM => {
                // Advisory only: background checks may comment on the
                // reason, but authorization never hinges on the verdict.
                tracing::info!(
                    reason = %elevation.request.reason,
                    "llm validation requested; treating as advisory"
                );
            }
            other => {
                return Err(Problem::configuration(format!("unknown validator: {other}")));
            }
        }

        task.merge_context(json!({"duration": elevation.request.duration}));

        let merged = serde_json::to_value(&elevation)
            .map_err(|e| Problem::runtime(format!("elevation serialization failed: {e}")))?;
        Ok(CallOutcome::Output(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{service_fixture, sample_elevation_context};
    use grantor_types::workflow::TaskBase;

    fn call(with: Value) -> CallTask {
        CallTask {
            call: "grantor.validate".into(),
            with: Some(with),
            base: TaskBase::default(),
        }
    }

    #[tokio::test]
    async fn static_validation_passes_with_user() {
        let (services, _) = service_fixture();
        let function = ValidateFunction::new(services);
        let mut task = sample_elevation_context(true);

        let outcome = function
            .execute(&mut task, &call(json!({"validator": "static"})), &Value::Null)
            .await
            .unwrap();
        match outcome {
            CallOutcome::Output(v) => {
                assert_eq!(v["reason"], json!("deploy hotfix"));
                assert_eq!(v["user"]["email"], json!("ada@example.com"));
            }
            _ => panic!("expected output"),
        }
    }

    #[tokio::test]
    async fn static_validation_requires_user() {
        let (services, _) = service_fixture();
        let function = ValidateFunction::new(services);
        let mut task = sample_elevation_context(false);

        let err = function
            .execute(&mut task, &call(json!({"validator": "static"})), &Value::Null)
            .await
            .unwrap_err();
        assert!(err.detail.contains("user must be provided"));
    }

    #[tokio::test]
    async fn empty_duration_defaults_to_one_hour() {
        let (services, _) = service_fixture();
        let function = ValidateFunction::new(services);
        let mut task = sample_elevation_context(true);
        if let Value::Object(ctx) = &mut task.context {
            ctx.insert("duration".into(), json!(""));
        }

        function
            .execute(&mut task, &call(json!({})), &Value::Null)
            .await
            .unwrap();
        assert_eq!(task.context["duration"], json!("1h"));
    }

    #[tokio::test]
    async fn sub_minute_duration_is_rejected() {
        let (services, _) = service_fixture();
        let function = ValidateFunction::new(services);
        let mut task = sample_elevation_context(true);
        if let Value::Object(ctx) = &mut task.context {
            ctx.insert("duration".into(), json!("30s"));
        }

        let err = function
            .execute(&mut task, &call(json!({})), &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Validation);
        assert!(err.detail.contains("at least 1 minutes"));
    }

    #[tokio::test]
    async fn unknown_validator_is_configuration_problem() {
        let (services, _) = service_fixture();
        let function = ValidateFunction::new(services);
        let mut task = sample_elevation_context(true);

        let err = function
            .execute(&mut task, &call(json!({"validator": "oracle"})), &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn llm_mode_is_advisory_and_does_not_require_user() {
        let (services, _) = service_fixture();
        let function = ValidateFunction::new(services);
        let mut task = sample_elevation_context(false);

        let outcome = function
            .execute(&mut task, &call(json!({"validator": "llm"})), &Value::Null)
            .await;
        assert!(outcome.is_ok());
    }
}
