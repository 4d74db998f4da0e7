//! `fork` task execution: concurrent branches with optional competition.
//!
//! Every branch runs against its own deep-cloned [`WorkflowTask`] under a
//! child cancellation token. `compete: false` preserves declaration order
//! in the output array; `compete: true` returns the first successful
//! branch's output and cancels the rest.

use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::ForkTask;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::runner::{StepResult, WorkflowRunner};

impl WorkflowRunner {
    pub(crate) async fn execute_fork(
        &self,
        task: &WorkflowTask,
        fork: &ForkTask,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, Problem> {
        let branches = &fork.fork.branches;
        if branches.is_empty() {
            return Err(Problem::validation("fork requires at least one branch"));
        }

        let branch_cancel = cancel.child_token();
        let mut join_set: JoinSet<(usize, Result<Value, Problem>)> = JoinSet::new();

        for (index, item) in branches.0.iter().enumerate() {
            let runner = self.clone();
            let item = item.clone();
            let mut branch_task = task.clone();
            let branch_input = input.clone();
            let token = branch_cancel.clone();

            join_set.spawn(async move {
                if token.is_cancelled() {
                    return (index, Err(Problem::runtime("branch cancelled")));
                }
                let result = runner
                    .run_task_item(&mut branch_task, &item, branch_input, &token)
                    .await;
                let result = match result {
                    Ok(StepResult::Output(value, _)) => Ok(value),
                    Ok(StepResult::Suspend) => {
                        Err(Problem::configuration("cannot suspend inside a fork branch"))
                    }
                    Err(problem) => Err(problem),
                };
                (index, result)
            });
        }

        let compete = fork.fork.compete;
        let mut results: Vec<Option<Value>> = vec![None; branches.len()];
        let mut first_error: Option<Problem> = None;

        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined.map_err(|e| {
                Problem::runtime(format!("fork branch panicked or was aborted: {e}"))
            })?;

            match result {
                Ok(value) => {
                    if compete {
                        // First success wins; the rest observe cancellation.
                        branch_cancel.cancel();
                        join_set.abort_all();
                        tracing::debug!(winner = index, "fork compete settled");
                        return Ok(value);
                    }
                    results[index] = Some(value);
                }
                Err(problem) => {
                    if !compete {
                        branch_cancel.cancel();
                        join_set.abort_all();
                        return Err(problem);
                    }
                    // Compete tolerates losers failing; only if every branch
                    // fails does the fork fail.
                    first_error.get_or_insert(problem);
                }
            }
        }

        if compete {
            return Err(first_error
                .unwrap_or_else(|| Problem::runtime("all fork branches failed")));
        }

        Ok(Value::Array(
            results.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::transport::UnsupportedTransport;
    use grantor_types::task::TaskStatus;
    use grantor_types::workflow::{parse_document, Workflow};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

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
    async fn parallel_fork_preserves_declaration_order() {
        let yaml = r#"
document: { name: forks }
do:
  - both:
      fork:
        branches:
          - slow:
              do:
                - nap: { wait: 50ms }
                - out: { set: { branch: slow } }
          - fast: { set: { branch: fast } }
"#;
        let mut task = task_for(yaml, json!({}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        // The slow branch finishes last but stays first in the output.
        assert_eq!(out[0]["branch"], json!("slow"));
        assert_eq!(out[1]["branch"], json!("fast"));
    }

    #[tokio::test]
    async fn compete_returns_winner_and_cancels_loser() {
        let yaml = r#"
document: { name: races }
do:
  - race:
      fork:
        compete: true
        branches:
          - quick:
              do:
                - nap: { wait: 10ms }
                - out: { set: { winner: quick } }
          - slow:
              do:
                - nap: { wait: 10s }
                - out: { set: { winner: slow } }
"#;
        let mut task = task_for(yaml, json!({}));
        let started = std::time::Instant::now();
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["winner"], json!("quick"));
        // The 10s branch must have been cancelled, not awaited.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn compete_survives_a_losing_branch_error() {
        let yaml = r#"
document: { name: races }
do:
  - race:
      fork:
        compete: true
        branches:
          - broken: { set: { x: "${ 1 / 0 }" } }
          - steady:
              do:
                - nap: { wait: 10ms }
                - out: { set: { winner: steady } }
"#;
        let mut task = task_for(yaml, json!({}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["winner"], json!("steady"));
    }

    #[tokio::test]
    async fn parallel_fork_fails_fast_on_branch_error() {
        let yaml = r#"
document: { name: forks }
do:
  - both:
      fork:
        branches:
          - broken: { set: { x: "${ .a + {} }" } }
          - fine: { set: { ok: true } }
"#;
        let mut task = task_for(yaml, json!({"a": 1}));
        let err = runner()
            .run(&mut task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Expression);
    }

    #[tokio::test]
    async fn branch_context_mutations_stay_in_branch() {
        let yaml = r#"
document: { name: forks }
do:
  - both:
      fork:
        branches:
          - a:
              set: { fromA: true }
              export:
                as: { leaked: true }
          - b: { set: { fromB: true } }
"#;
        let mut task = task_for(yaml, json!({"seed": 1}));
        runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        // Branches ran on deep clones; the parent context is untouched.
        assert_eq!(task.context, json!({"seed": 1}));
    }
}
