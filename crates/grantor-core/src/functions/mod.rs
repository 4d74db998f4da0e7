//! Named workflow functions and their registry.
//!
//! Functions are the pluggable half of the call dispatcher: registered by
//! name (lowercased, idempotent), validated against required parameters,
//! then executed with the live workflow task. The `grantor.*` built-ins in
//! this module implement the elevation lifecycle: validate → notify →
//! approvals → authorize → revoke (+ monitor).

mod approvals;
mod authorize;
mod monitor;
mod notify;
mod revoke;
mod validate;

pub use approvals::ApprovalsFunction;
pub use authorize::AuthorizeFunction;
pub use monitor::MonitorFunction;
pub use notify::NotifyFunction;
pub use revoke::RevokeFunction;
pub use validate::ValidateFunction;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::CallTask;
use serde_json::Value;

use crate::services::Services;

/// What a function call produced.
#[derive(Debug)]
pub enum CallOutcome {
    Output(Value),
    /// Park the workflow (`waiting`) until an external signal resumes it.
    /// `entrypoint` overrides where the resume re-enters (the current task
    /// when `None`); `output` is recorded as the workflow output while
    /// parked.
    Suspend {
        entrypoint: Option<String>,
        output: Value,
    },
}

impl CallOutcome {
    /// Park at the current task with no output.
    pub fn park() -> Self {
        CallOutcome::Suspend {
            entrypoint: None,
            output: Value::Null,
        }
    }
}

#[async_trait]
pub trait WorkflowFunction: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Parameters that must be present in `call.with`.
    fn required_parameters(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Optional parameters with their defaults, merged under the caller's
    /// `with` before execution.
    fn optional_parameters(&self) -> Value {
        serde_json::json!({})
    }

    /// Cheap structural validation before execution.
    async fn validate(
        &self,
        _task: &WorkflowTask,
        _call: &CallTask,
        _input: &Value,
    ) -> Result<(), Problem> {
        Ok(())
    }

    /// Perform the call. `call.with` arrives fully interpolated.
    async fn execute(
        &self,
        task: &mut WorkflowTask,
        call: &CallTask,
        input: &Value,
    ) -> Result<CallOutcome, Problem>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-indexed function registry.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn WorkflowFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry preloaded with the `grantor.*` built-ins.
    pub fn with_builtins(services: Arc<Services>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ValidateFunction::new(Arc::clone(&services))));
        registry.register(Arc::new(NotifyFunction::new(Arc::clone(&services))));
        registry.register(Arc::new(ApprovalsFunction::new(Arc::clone(&services))));
        registry.register(Arc::new(AuthorizeFunction::new(Arc::clone(&services))));
        registry.register(Arc::new(RevokeFunction::new(Arc::clone(&services))));
        registry.register(Arc::new(MonitorFunction::new(services)));
        registry
    }

    pub fn register(&mut self, function: Arc<dyn WorkflowFunction>) {
        let key = function.name().to_lowercase();
        if self.functions.insert(key, function).is_some() {
            tracing::debug!("replaced existing function registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkflowFunction>> {
        self.functions.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Merge a function's optional-parameter defaults under the provided
    /// arguments and check every required parameter is present.
    pub fn effective_arguments(
        function: &dyn WorkflowFunction,
        with: Option<&Value>,
    ) -> Result<Value, Problem> {
        let mut merged = function.optional_parameters();
        if let (Value::Object(target), Some(Value::Object(provided))) = (&mut merged, with) {
            for (key, value) in provided {
                target.insert(key.clone(), value.clone());
            }
        } else if let Some(provided) = with {
            merged = provided.clone();
        }

        for required in function.required_parameters() {
            let present = merged
                .get(required)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !present {
                return Err(Problem::validation(format!(
                    "function {} requires parameter '{}'",
                    function.name(),
                    required
                )));
            }
        }
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoFunction;

    #[async_trait]
    impl WorkflowFunction for EchoFunction {
        fn name(&self) -> &str {
            "test.echo"
        }

        fn required_parameters(&self) -> Vec<&'static str> {
            vec!["message"]
        }

        fn optional_parameters(&self) -> Value {
            serde_json::json!({"loud": false})
        }

        async fn execute(
            &self,
            _task: &mut WorkflowTask,
            call: &CallTask,
            _input: &Value,
        ) -> Result<CallOutcome, Problem> {
            Ok(CallOutcome::Output(
                call.with.clone().unwrap_or(Value::Null),
            ))
        }
    }

    #[test]
    fn registration_is_case_insensitive_and_idempotent() {
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(EchoFunction));
        registry.register(Arc::new(EchoFunction));
        assert!(registry.get("TEST.ECHO").is_some());
        assert_eq!(registry.names(), vec!["test.echo"]);
    }

    #[test]
    fn effective_arguments_merges_defaults_and_checks_required() {
        let function = EchoFunction;
        let with = serde_json::json!({"message": "hi"});
        let merged =
            FunctionRegistry::effective_arguments(&function, Some(&with)).unwrap();
        assert_eq!(merged["message"], "hi");
        assert_eq!(merged["loud"], false);

        let err = FunctionRegistry::effective_arguments(&function, None).unwrap_err();
        assert!(err.detail.contains("requires parameter 'message'"));
    }
}
