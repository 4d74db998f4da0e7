//! Call dispatch: built-in transports and registered named functions.

use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::CallTask;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::build_vars;
use super::runner::{ExecOutcome, WorkflowRunner};
use crate::expr::traverse_and_evaluate;
use crate::functions::{CallOutcome, FunctionRegistry};
use crate::transport::is_builtin_transport;

impl WorkflowRunner {
    pub(crate) async fn execute_call(
        &self,
        task: &mut WorkflowTask,
        call: &CallTask,
        input: Value,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        tracing::info!(call = %call.call, reference = %task.reference(), "executing call");

        // Interpolate `with` before anything sees it, so expressions like
        // `\( $context.user.email )` are materialized for the callee.
        let interpolated = match &call.with {
            Some(with) => {
                let vars = build_vars(task);
                Some(traverse_and_evaluate(with, &input, &vars)?)
            }
            None => None,
        };

        if is_builtin_transport(&call.call) {
            let args = interpolated.unwrap_or_else(|| Value::Object(Default::default()));
            let output = self.transport.execute(&call.call, &args).await?;
            return Ok(ExecOutcome::Value(output));
        }

        let function = self.functions.get(&call.call).ok_or_else(|| {
            Problem::configuration(format!("function '{}' not found", call.call))
        })?;

        let effective =
            FunctionRegistry::effective_arguments(&*function, interpolated.as_ref())?;
        let interpolated_call = CallTask {
            call: call.call.clone(),
            with: Some(effective),
            base: call.base.clone(),
        };

        function
            .validate(task, &interpolated_call, &input)
            .await
            .map_err(|problem| problem.with_instance(task.reference()))?;

        match function.execute(task, &interpolated_call, &input).await? {
            CallOutcome::Output(value) => Ok(ExecOutcome::Value(value)),
            CallOutcome::Suspend { entrypoint, output } => {
                if let Some(entrypoint) = entrypoint {
                    task.set_entrypoint(entrypoint);
                }
                task.output = output;
                Ok(ExecOutcome::Suspend)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::WorkflowFunction;
    use crate::transport::UnsupportedTransport;
    use async_trait::async_trait;
    use grantor_types::task::TaskStatus;
    use grantor_types::workflow::{parse_document, Workflow};
    use serde_json::json;
    use std::sync::Arc;

    struct CaptureFunction;

    #[async_trait]
    impl WorkflowFunction for CaptureFunction {
        fn name(&self) -> &str {
            "test.capture"
        }

        async fn execute(
            &self,
            _task: &mut WorkflowTask,
            call: &CallTask,
            _input: &Value,
        ) -> Result<CallOutcome, Problem> {
            Ok(CallOutcome::Output(call.with.clone().unwrap()))
        }
    }

    struct SuspendFunction;

    #[async_trait]
    impl WorkflowFunction for SuspendFunction {
        fn name(&self) -> &str {
            "test.park"
        }

        async fn execute(
            &self,
            _task: &mut WorkflowTask,
            _call: &CallTask,
            _input: &Value,
        ) -> Result<CallOutcome, Problem> {
            Ok(CallOutcome::park())
        }
    }

    fn runner_with(functions: Vec<Arc<dyn WorkflowFunction>>) -> WorkflowRunner {
        let mut registry = FunctionRegistry::new();
        for function in functions {
            registry.register(function);
        }
        WorkflowRunner::new(Arc::new(registry), Arc::new(UnsupportedTransport))
    }

    fn task_for(yaml: &str, context: Value) -> WorkflowTask {
        let document = parse_document(yaml).unwrap();
        WorkflowTask::new(
            Workflow {
                name: document.document.name.clone(),
                description: String::new(),
                authentication: "default".into(),
                workflow: Some(document),
                enabled: true,
            },
            context,
        )
    }

    #[tokio::test]
    async fn with_arguments_are_interpolated_before_dispatch() {
        let yaml = r##"
document: { name: calls }
do:
  - notify:
      call: test.capture
      with:
        message: ${ "User \( $context.user.name ) wants \( $context.role.name )" }
        to: "#access"
"##;
        let mut task = task_for(
            yaml,
            json!({"user": {"name": "ada"}, "role": {"name": "ops"}}),
        );
        let out = runner_with(vec![Arc::new(CaptureFunction)])
            .run(&mut task, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out["message"], json!("User ada wants ops"));
        assert_eq!(out["to"], json!("#access"));
    }

    #[tokio::test]
    async fn suspend_outcome_parks_workflow_at_task() {
        let yaml = r#"
document: { name: parks }
do:
  - before: { set: { staged: true } }
  - gate: { call: test.park }
  - after: { set: { done: true } }
"#;
        let mut task = task_for(yaml, json!({}));
        runner_with(vec![Arc::new(SuspendFunction)])
            .run(&mut task, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.entrypoint, "gate");
    }
}
