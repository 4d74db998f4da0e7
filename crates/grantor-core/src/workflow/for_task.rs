//! `for` task execution: iteration with scoped variables.

use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::ForTask;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::build_vars;
use super::runner::{Control, ExecOutcome, WorkflowRunner};
use crate::expr::{evaluate_guard, evaluate_str};

const DEFAULT_EACH: &str = "$item";
const DEFAULT_AT: &str = "$index";

impl WorkflowRunner {
    /// Iterate the evaluated iterable, binding the item/index variables per
    /// iteration. Output accumulates: iteration N's output is iteration
    /// N+1's input. The bindings are restored on every exit path, including
    /// errors, so shadowed outer variables survive.
    pub(crate) async fn execute_for(
        &self,
        task: &mut WorkflowTask,
        for_task: &ForTask,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        let each = normalize_var(for_task.for_.each.as_deref(), DEFAULT_EACH);
        let at = normalize_var(for_task.for_.at.as_deref(), DEFAULT_AT);

        let vars = build_vars(task);
        let iterable = evaluate_str(&for_task.for_.in_, &input, &vars)?;

        // Save shadowed bindings so nested loops with default names restore
        // the outer scope on exit.
        let saved_each = task.local_vars.get(&each).cloned();
        let saved_at = task.local_vars.get(&at).cloned();

        let result = self
            .iterate(task, for_task, &each, &at, iterable, input, cancel)
            .await;

        restore_var(task, &each, saved_each);
        restore_var(task, &at, saved_at);

        result
    }

    async fn iterate(
        &self,
        task: &mut WorkflowTask,
        for_task: &ForTask,
        each: &str,
        at: &str,
        iterable: Value,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        let items: Vec<Value> = match iterable {
            Value::Array(items) => items,
            // Nothing to iterate: the input passes through untouched.
            Value::Null => return Ok(ExecOutcome::Value(input)),
            single => vec![single],
        };

        let mut output = input;
        for (index, item) in items.into_iter().enumerate() {
            let mut bindings = Map::new();
            bindings.insert(each.to_string(), item);
            bindings.insert(at.to_string(), Value::from(index));
            task.add_local_vars(bindings);

            let outcome = self
                .run_list(task, &for_task.do_, output, None, 1, cancel)
                .await?;

            output = outcome.value;
            match outcome.control {
                Control::Completed => {}
                Control::EndWorkflow => {
                    return Ok(ExecOutcome::Directive(
                        output,
                        grantor_types::workflow::FlowDirective::End,
                    ));
                }
                Control::Suspended => {
                    return Err(Problem::configuration(
                        "cannot suspend inside a for loop",
                    ));
                }
            }

            if let Some(while_) = &for_task.while_ {
                let vars = build_vars(task);
                if !evaluate_guard(while_, &output, &vars)? {
                    break;
                }
            }
        }

        Ok(ExecOutcome::Value(output))
    }
}

fn normalize_var(name: Option<&str>, default: &str) -> String {
    let name = name.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(default);
    if name.starts_with('$') {
        name.to_string()
    } else {
        format!("${name}")
    }
}

fn restore_var(task: &mut WorkflowTask, name: &str, saved: Option<Value>) {
    match saved {
        Some(value) => {
            task.local_vars.insert(name.to_string(), value);
        }
        None => {
            task.local_vars.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::transport::UnsupportedTransport;
    use grantor_types::workflow::{parse_document, Workflow};
    use serde_json::json;
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
    async fn binds_default_item_and_index() {
        let yaml = r#"
document: { name: loops }
do:
  - collect:
      for: { in: "${ $context.providers }" }
      do:
        - tag:
            set:
              last: "${ $item }"
              position: "${ $index }"
"#;
        let mut task = task_for(yaml, json!({"providers": ["aws", "gcp"]}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["last"], json!("gcp"));
        assert_eq!(out["position"], json!(1));
    }

    #[tokio::test]
    async fn custom_names_are_dollar_normalized() {
        let yaml = r#"
document: { name: loops }
do:
  - collect:
      for: { each: provider, at: n, in: "${ $context.providers }" }
      do:
        - tag: { set: { seen: "${ $provider }", nth: "${ $n }" } }
"#;
        let mut task = task_for(yaml, json!({"providers": ["aws"]}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["seen"], json!("aws"));
        assert_eq!(out["nth"], json!(0));
    }

    #[tokio::test]
    async fn output_accumulates_across_iterations() {
        let yaml = r#"
document: { name: loops }
do:
  - sum:
      for: { in: "${ $context.ns }" }
      do:
        - acc: { set: { total: "${ (.total // 0) + $item }" } }
"#;
        let mut task = task_for(yaml, json!({"ns": [1, 2, 3]}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["total"], json!(6));
    }

    #[tokio::test]
    async fn while_short_circuits() {
        let yaml = r#"
document: { name: loops }
do:
  - bounded:
      for: { in: "${ $context.ns }" }
      while: "${ .total < 3 }"
      do:
        - acc: { set: { total: "${ (.total // 0) + $item }" } }
"#;
        let mut task = task_for(yaml, json!({"ns": [1, 1, 1, 1, 1]}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["total"], json!(3));
    }

    #[tokio::test]
    async fn local_vars_removed_after_loop_even_on_error() {
        let yaml = r#"
document: { name: loops }
do:
  - boom:
      for: { in: "${ $context.ns }" }
      do:
        - bad: { set: { x: "${ 1 / 0 }" } }
"#;
        let mut task = task_for(yaml, json!({"ns": [1]}));
        let err = runner()
            .run(&mut task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Expression);
        assert!(task.local_vars.is_empty());
    }

    #[tokio::test]
    async fn null_iterable_passes_input_through() {
        let yaml = r#"
document: { name: loops }
do:
  - prep: { set: { untouched: true } }
  - noloop:
      for: { in: "${ $context.missing }" }
      do:
        - never: { set: { ran: true } }
"#;
        let mut task = task_for(yaml, json!({}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out, json!({"untouched": true}));
    }

    #[tokio::test]
    async fn scalar_iterable_runs_once() {
        let yaml = r#"
document: { name: loops }
do:
  - single:
      for: { in: "${ $context.only }" }
      do:
        - tag: { set: { item: "${ $item }", idx: "${ $index }" } }
"#;
        let mut task = task_for(yaml, json!({"only": "aws"}));
        let out = runner().run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(out["item"], json!("aws"));
        assert_eq!(out["idx"], json!(0));
    }
}
