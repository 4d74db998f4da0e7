//! `try` task execution: recovery blocks with retry policies.

use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::{CatchSpec, TryTask};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::build_vars;
use super::runner::{backoff_delay, Control, ExecOutcome, WorkflowRunner};
use crate::expr::evaluate_guard;

const DEFAULT_ERROR_VAR: &str = "$error";

impl WorkflowRunner {
    /// Run the `try` block; retry per policy on matching transient errors;
    /// on a matching error run `catch.do` with the error bound; otherwise
    /// propagate.
    pub(crate) async fn execute_try(
        &self,
        task: &mut WorkflowTask,
        try_task: &TryTask,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        let policy = try_task.catch.as_ref().and_then(|c| c.retry.as_ref());
        let max_attempts = policy.map(|p| p.max_attempts.max(1)).unwrap_or(1);
        let mut attempt = 1u32;

        let problem = loop {
            match self
                .run_list(task, &try_task.try_, input.clone(), None, 1, cancel)
                .await
            {
                Ok(outcome) => {
                    return Ok(match outcome.control {
                        Control::Suspended => ExecOutcome::Suspend,
                        Control::EndWorkflow => ExecOutcome::Directive(
                            outcome.value,
                            grantor_types::workflow::FlowDirective::End,
                        ),
                        Control::Completed => ExecOutcome::Value(outcome.value),
                    });
                }
                Err(problem) => {
                    let retryable = policy
                        .map(|p| p.retries(problem.kind))
                        .unwrap_or(false);
                    if retryable && attempt < max_attempts {
                        let delay = backoff_delay(policy.expect("retryable implies policy"), attempt);
                        tracing::warn!(
                            attempt,
                            kind = %problem.kind,
                            delay_ms = delay.as_millis() as u64,
                            "try block failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    break problem;
                }
            }
        };

        let Some(catch) = &try_task.catch else {
            return Err(problem);
        };
        if !self.catch_matches(task, catch, &problem)? {
            return Err(problem);
        }

        tracing::info!(
            kind = %problem.kind,
            instance = %problem.instance,
            "error caught, running recovery block"
        );
        self.run_catch(task, catch, problem, input, cancel).await
    }

    fn catch_matches(
        &self,
        task: &WorkflowTask,
        catch: &CatchSpec,
        problem: &Problem,
    ) -> Result<bool, Problem> {
        // Structural filter: every listed field must equal the problem's.
        if let Some(filter) = &catch.errors {
            let payload = problem.to_value();
            for (key, expected) in &filter.with {
                if payload.get(key) != Some(expected) {
                    return Ok(false);
                }
            }
        }

        // Expression filter with the error in scope.
        if let Some(when) = &catch.when {
            let mut vars = build_vars(task);
            vars.insert(
                error_var_name(catch).trim_start_matches('$').to_string(),
                problem.to_value(),
            );
            return evaluate_guard(when, &problem.to_value(), &vars);
        }

        Ok(true)
    }

    async fn run_catch(
        &self,
        task: &mut WorkflowTask,
        catch: &CatchSpec,
        problem: Problem,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        let Some(do_) = &catch.do_ else {
            // Recovery with no block: the error is swallowed and the try's
            // input flows on.
            return Ok(ExecOutcome::Value(input));
        };

        let var = error_var_name(catch);
        let saved = task.local_vars.get(&var).cloned();
        let mut bindings = serde_json::Map::new();
        bindings.insert(var.clone(), problem.to_value());
        task.add_local_vars(bindings);

        let result = self.run_list(task, do_, input, None, 1, cancel).await;

        match saved {
            Some(value) => {
                task.local_vars.insert(var, value);
            }
            None => {
                task.local_vars.remove(&var);
            }
        }

        let outcome = result?;
        Ok(match outcome.control {
            Control::Suspended => ExecOutcome::Suspend,
            Control::EndWorkflow => ExecOutcome::Directive(
                outcome.value,
                grantor_types::workflow::FlowDirective::End,
            ),
            Control::Completed => ExecOutcome::Value(outcome.value),
        })
    }
}

fn error_var_name(catch: &CatchSpec) -> String {
    let name = catch.as_.as_deref().unwrap_or(DEFAULT_ERROR_VAR);
    if name.starts_with('$') {
        name.to_string()
    } else {
        format!("${name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{CallOutcome, FunctionRegistry, WorkflowFunction};
    use crate::transport::UnsupportedTransport;
    use async_trait::async_trait;
    use grantor_types::workflow::{parse_document, CallTask, Workflow};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn runner() -> WorkflowRunner {
        WorkflowRunner::new(
            Arc::new(FunctionRegistry::new()),
            Arc::new(UnsupportedTransport),
        )
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
    async fn matching_catch_recovers() {
        let yaml = r#"
document: { name: tries }
do:
  - guarded:
      try:
        - boom:
            raise:
              error: { type: communication, title: Upstream down, detail: dial failed }
      catch:
        errors:
          with: { type: communication }
        do:
          - fallback: { set: { recovered: true, why: "${ $error.title }" } }
"#;
        let mut task = task_for(yaml, json!({}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["recovered"], json!(true));
        assert_eq!(out["why"], json!("Upstream down"));
        assert!(task.local_vars.is_empty());
    }

    #[tokio::test]
    async fn non_matching_filter_propagates() {
        let yaml = r#"
document: { name: tries }
do:
  - guarded:
      try:
        - boom:
            raise:
              error: { type: validation, title: Bad input }
      catch:
        errors:
          with: { type: communication }
        do:
          - fallback: { set: { recovered: true } }
"#;
        let mut task = task_for(yaml, json!({}));
        let err = runner()
            .run(&mut task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn when_filter_consults_error_binding() {
        let yaml = r#"
document: { name: tries }
do:
  - guarded:
      try:
        - boom:
            raise:
              error: { type: timeout, status: 504, title: Slow }
      catch:
        when: "${ $error.status == 504 }"
        do:
          - fallback: { set: { recovered: true } }
"#;
        let mut task = task_for(yaml, json!({}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["recovered"], json!(true));
    }

    struct FlakyFunction {
        attempts: Arc<AtomicU32>,
        succeed_on: u32,
    }

    #[async_trait]
    impl WorkflowFunction for FlakyFunction {
        fn name(&self) -> &str {
            "test.flaky"
        }

        async fn execute(
            &self,
            _task: &mut WorkflowTask,
            _call: &CallTask,
            _input: &Value,
        ) -> Result<CallOutcome, Problem> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(CallOutcome::Output(json!({"attempt": n})))
            } else {
                Err(Problem::communication("transient failure"))
            }
        }
    }

    #[tokio::test]
    async fn retry_policy_reruns_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(FlakyFunction {
            attempts: Arc::clone(&attempts),
            succeed_on: 3,
        }));
        let runner = WorkflowRunner::new(Arc::new(registry), Arc::new(UnsupportedTransport));

        let yaml = r#"
document: { name: tries }
do:
  - guarded:
      try:
        - unstable: { call: test.flaky }
      catch:
        retry:
          max_attempts: 5
          initial_delay_ms: 1
          jitter: false
"#;
        let mut task = task_for(yaml, json!({}));
        let out = runner.run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["attempt"], json!(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let yaml = r#"
document: { name: tries }
do:
  - guarded:
      try:
        - bad:
            raise:
              error: { type: validation, title: Nope }
      catch:
        retry:
          max_attempts: 5
          initial_delay_ms: 1
        errors:
          with: { type: communication }
"#;
        let mut task = task_for(yaml, json!({}));
        let err = runner()
            .run(&mut task, &CancellationToken::new())
            .await
            .unwrap_err();
        // No retries, no recovery: the validation error comes straight out.
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn catch_without_do_swallows_error() {
        let yaml = r#"
document: { name: tries }
do:
  - prep: { set: { before: true } }
  - guarded:
      try:
        - boom:
            raise:
              error: { type: runtime, title: Oops }
      catch:
        errors:
          with: { type: runtime }
  - after: { set: { after: true } }
"#;
        let mut task = task_for(yaml, json!({}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["before"], json!(true));
        assert_eq!(out["after"], json!(true));
    }
}
