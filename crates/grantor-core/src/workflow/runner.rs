//! The task-graph interpreter.
//!
//! Walks a task list in declaration order, driving each task through the
//! input → execute → output → export pipeline and applying flow directives
//! (`continue`, `exit`, `end`, named jumps). Execution state lives on the
//! [`WorkflowTask`]; the runner itself is cheap to clone and shared across
//! fork branches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use grantor_types::duration::parse_duration;
use grantor_types::error::Problem;
use grantor_types::event::CloudEvent;
use grantor_types::task::{TaskStatus, WorkflowTask};
use grantor_types::workflow::{
    EmitTask, FlowDirective, ListenTask, RaiseError, RaiseTask, RetryPolicy, RunTask, SetTask,
    SwitchTask, Task, TaskItem, TaskList, WaitTask,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{build_vars, schema::validate_schema};
use crate::durable::DurableBackend;
use crate::expr::{evaluate_guard, evaluate_str, traverse_and_evaluate};
use crate::functions::FunctionRegistry;
use crate::transport::CallTransport;

/// Default start-to-close timeout for call dispatch (5 minutes).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Cap on visits to a single task key within one list walk; exceeding it is
/// a `runtime` problem (trivial infinite-loop detection).
pub const DEFAULT_LOOP_CAP: u32 = 100;

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct WorkflowRunner {
    pub(crate) functions: Arc<FunctionRegistry>,
    pub(crate) transport: Arc<dyn CallTransport>,
    pub(crate) backend: Option<Arc<dyn DurableBackend>>,
    loop_cap: u32,
}

/// How a list walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    /// Fell off the end of the list (or hit `exit`).
    Completed,
    /// An `end` directive terminated the whole workflow.
    EndWorkflow,
    /// A task suspended awaiting an external signal.
    Suspended,
}

pub(crate) struct ListOutcome {
    pub value: Value,
    pub control: Control,
}

/// What a single task produced.
pub(crate) enum StepResult {
    Output(Value, FlowDirective),
    Suspend,
}

/// Raw execution result of a task variant, before output/export transforms.
pub(crate) enum ExecOutcome {
    Value(Value),
    /// Switch tasks yield a directive instead of transforming data.
    Directive(Value, FlowDirective),
    Suspend,
}

impl WorkflowRunner {
    pub fn new(functions: Arc<FunctionRegistry>, transport: Arc<dyn CallTransport>) -> Self {
        Self {
            functions,
            transport,
            backend: None,
            loop_cap: DEFAULT_LOOP_CAP,
        }
    }

    /// Attach a durable backend: steps checkpoint through it and `emit`
    /// becomes a recorded activity.
    pub fn with_backend(mut self, backend: Arc<dyn DurableBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_loop_cap(mut self, cap: u32) -> Self {
        self.loop_cap = cap;
        self
    }

    /// Execute (or resume) a workflow task to its next rest point:
    /// completion, fault or suspension.
    pub async fn run(
        &self,
        task: &mut WorkflowTask,
        cancel: &CancellationToken,
    ) -> Result<Value, Problem> {
        let document = task
            .document()
            .cloned()
            .ok_or_else(|| {
                Problem::configuration(format!(
                    "workflow '{}' has no document to execute",
                    task.workflow.name
                ))
            })?;

        task.set_status(TaskStatus::Running);
        task.task_reference = vec!["do".to_string()];
        self.checkpoint(task).await;

        tracing::info!(
            workflow_id = %task.workflow_id,
            workflow = %task.workflow.name,
            entrypoint = %task.entrypoint,
            "running workflow"
        );

        // Consume the entrypoint: a fresh suspension (or a suspending
        // function nominating its own resume point) repopulates it.
        let entry = std::mem::take(&mut task.entrypoint);
        let entrypoint = if entry.is_empty() { None } else { Some(entry) };
        let input = task.input.clone();

        let result = self
            .run_list(task, &document.do_, input, entrypoint, 0, cancel)
            .await;

        match result {
            Ok(outcome) => {
                task.output = outcome.value.clone();
                match outcome.control {
                    Control::Suspended => {
                        task.set_status(TaskStatus::Waiting);
                        tracing::info!(
                            workflow_id = %task.workflow_id,
                            entrypoint = %task.entrypoint,
                            "workflow suspended"
                        );
                    }
                    _ => {
                        task.set_status(TaskStatus::Completed);
                        task.entrypoint.clear();
                    }
                }
                self.checkpoint(task).await;
                Ok(outcome.value)
            }
            Err(problem) => {
                task.output = problem.to_value();
                task.set_status(TaskStatus::Faulted);
                self.checkpoint(task).await;
                tracing::error!(
                    workflow_id = %task.workflow_id,
                    kind = %problem.kind,
                    instance = %problem.instance,
                    "workflow faulted: {}",
                    problem.detail
                );
                Err(problem)
            }
        }
    }

    async fn checkpoint(&self, task: &WorkflowTask) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.checkpoint(task).await {
                tracing::warn!(workflow_id = %task.workflow_id, error = %e, "checkpoint failed");
            }
        }
    }

    /// Walk one task list. `start` selects the entry key (resume); `depth`
    /// is 0 for the workflow's main list.
    pub(crate) fn run_list<'a>(
        &'a self,
        task: &'a mut WorkflowTask,
        list: &'a TaskList,
        input: Value,
        start: Option<String>,
        depth: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ListOutcome, Problem>> {
        Box::pin(async move {
            let mut visited: HashMap<String, u32> = HashMap::new();
            let mut idx = match &start {
                Some(key) => {
                    list.find(key)
                        .ok_or_else(|| {
                            Problem::configuration(format!("unknown entrypoint task '{key}'"))
                        })?
                        .0
                }
                None => 0,
            };
            let mut current = input;

            while idx < list.len() {
                if cancel.is_cancelled() {
                    return Err(Problem::runtime("workflow cancelled")
                        .with_instance(task.reference()));
                }

                let item = &list.0[idx];
                let visits = visited.entry(item.key.clone()).or_insert(0);
                *visits += 1;
                if *visits > self.loop_cap {
                    return Err(Problem::runtime(format!(
                        "task '{}' visited more than {} times, aborting probable loop",
                        item.key, self.loop_cap
                    ))
                    .with_instance(task.reference()));
                }

                match self.run_task_item(task, item, current, cancel).await? {
                    StepResult::Suspend => {
                        if depth == 0 && task.entrypoint.is_empty() {
                            task.set_entrypoint(&item.key);
                        }
                        return Ok(ListOutcome {
                            value: task.output.clone(),
                            control: Control::Suspended,
                        });
                    }
                    StepResult::Output(value, directive) => {
                        current = value;
                        self.checkpoint(task).await;
                        match directive {
                            FlowDirective::Continue => idx += 1,
                            FlowDirective::Exit => {
                                return Ok(ListOutcome {
                                    value: current,
                                    control: Control::Completed,
                                });
                            }
                            FlowDirective::End => {
                                return Ok(ListOutcome {
                                    value: current,
                                    control: Control::EndWorkflow,
                                });
                            }
                            FlowDirective::Task(name) => {
                                idx = list
                                    .find(&name)
                                    .ok_or_else(|| {
                                        Problem::configuration(format!(
                                            "flow directive targets unknown task '{name}'"
                                        ))
                                        .with_instance(task.reference())
                                    })?
                                    .0;
                            }
                        }
                    }
                }
            }

            Ok(ListOutcome {
                value: current,
                control: Control::Completed,
            })
        })
    }

    /// One task through the full pipeline, with reference bookkeeping.
    ///
    /// Boxed because this call graph is mutually recursive with
    /// [`Self::execute_fork`] (a fork branch runs a nested task item); an
    /// unboxed `async fn` here would give the pipeline an infinitely-sized
    /// future type.
    pub(crate) fn run_task_item<'a>(
        &'a self,
        task: &'a mut WorkflowTask,
        item: &'a TaskItem,
        input: Value,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<StepResult, Problem>> {
        Box::pin(async move {
            task.push_reference(&item.key);
            let result = self.run_task_pipeline(task, item, input, cancel).await;
            let result = result.map_err(|problem| {
                if problem.instance.is_empty() {
                    problem.with_instance(task.reference())
                } else {
                    problem
                }
            });
            task.pop_reference();
            result
        })
    }

    async fn run_task_pipeline(
        &self,
        task: &mut WorkflowTask,
        item: &TaskItem,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<StepResult, Problem> {
        let base = item.task.base().clone();

        // Guard: a falsy `if` skips the task entirely.
        if let Some(guard) = &base.if_ {
            let vars = build_vars(task);
            if !evaluate_guard(guard, &input, &vars)? {
                tracing::debug!(task = %item.key, "guard false, skipping task");
                return Ok(StepResult::Output(input, FlowDirective::Continue));
            }
        }

        // Input: validate the raw input, then transform.
        if let Some(spec) = &base.input {
            if let Some(schema) = &spec.schema {
                validate_schema(schema, &input, &format!("{}.input", item.key))?;
            }
        }
        let task_input = match base.input.as_ref().and_then(|spec| spec.from.as_ref()) {
            Some(from) => {
                let vars = build_vars(task);
                traverse_and_evaluate(from, &input, &vars)?
            }
            None => input,
        };

        // Execute, wrapped in timeout and retry policy.
        let outcome = self
            .execute_with_policy(task, item, task_input, &base.timeout, &base.retry, cancel)
            .await?;

        let (raw_output, directive_override) = match outcome {
            ExecOutcome::Suspend => return Ok(StepResult::Suspend),
            ExecOutcome::Value(value) => (value, None),
            ExecOutcome::Directive(value, directive) => (value, Some(directive)),
        };

        // Output: transform, then validate.
        let task_output = match base.output.as_ref().and_then(|spec| spec.as_.as_ref()) {
            Some(as_) => {
                let vars = build_vars(task);
                traverse_and_evaluate(as_, &raw_output, &vars)?
            }
            None => raw_output,
        };
        if let Some(spec) = &base.output {
            if let Some(schema) = &spec.schema {
                validate_schema(schema, &task_output, &format!("{}.output", item.key))?;
            }
        }

        // Export: evaluate against the task output and merge into context.
        if let Some(spec) = &base.export {
            if let Some(as_) = &spec.as_ {
                let vars = build_vars(task);
                let patch = traverse_and_evaluate(as_, &task_output, &vars)?;
                if let Some(schema) = &spec.schema {
                    validate_schema(schema, &patch, &format!("{}.export", item.key))?;
                }
                task.merge_context(patch);
            }
        }

        task.output = task_output.clone();

        let directive = directive_override
            .or_else(|| base.then.clone())
            .unwrap_or(FlowDirective::Continue);

        Ok(StepResult::Output(task_output, directive))
    }

    /// Apply task-level timeout and retry policy around variant execution.
    async fn execute_with_policy(
        &self,
        task: &mut WorkflowTask,
        item: &TaskItem,
        input: Value,
        timeout: &Option<String>,
        retry: &Option<RetryPolicy>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        let deadline = match timeout {
            Some(spec) => Some(parse_duration(spec).map_err(|e| {
                Problem::configuration(format!("invalid task timeout: {e}"))
            })?),
            // Call dispatch gets a default start-to-close timeout.
            None if matches!(item.task, Task::Call(_)) => {
                Some(chrono::Duration::seconds(DEFAULT_CALL_TIMEOUT.as_secs() as i64))
            }
            None => None,
        };

        let max_attempts = retry.as_ref().map(|p| p.max_attempts.max(1)).unwrap_or(1);
        let mut attempt = 1u32;

        loop {
            let result = self
                .execute_bounded(task, item, input.clone(), deadline, cancel)
                .await;

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(problem) => {
                    let retryable = retry
                        .as_ref()
                        .map(|policy| policy.retries(problem.kind))
                        .unwrap_or(false);
                    if !retryable || attempt >= max_attempts {
                        return Err(problem);
                    }
                    let policy = retry.as_ref().expect("retryable implies policy");
                    let delay = backoff_delay(policy, attempt);
                    tracing::warn!(
                        task = %item.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        kind = %problem.kind,
                        "task failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn execute_bounded(
        &self,
        task: &mut WorkflowTask,
        item: &TaskItem,
        input: Value,
        deadline: Option<chrono::Duration>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        let Some(deadline) = deadline else {
            return self.execute_task(task, item, input, cancel).await;
        };
        let deadline = deadline
            .to_std()
            .map_err(|_| Problem::configuration("task timeout must be positive"))?;
        match tokio::time::timeout(deadline, self.execute_task(task, item, input, cancel)).await
        {
            Ok(result) => result,
            Err(_) => Err(Problem::timeout(format!(
                "task '{}' exceeded its {}s timeout",
                item.key,
                deadline.as_secs()
            ))
            .with_instance(task.reference())),
        }
    }

    /// Dispatch by variant.
    pub(crate) async fn execute_task(
        &self,
        task: &mut WorkflowTask,
        item: &TaskItem,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        match &item.task {
            Task::Set(set) => self.execute_set(task, set, input).map(ExecOutcome::Value),
            Task::Switch(switch) => self.execute_switch(task, switch, input),
            Task::Call(call) => self.execute_call(task, call, input, cancel).await,
            Task::For(for_task) => self
                .execute_for(task, for_task, input, cancel)
                .await,
            Task::Fork(fork) => self
                .execute_fork(task, fork, input, cancel)
                .await
                .map(ExecOutcome::Value),
            Task::Try(try_task) => self.execute_try(task, try_task, input, cancel).await,
            Task::Raise(raise) => self.execute_raise(task, raise, input),
            Task::Emit(emit) => self.execute_emit(task, emit, input).await,
            Task::Wait(wait) => self.execute_wait(wait, input, cancel).await,
            Task::Listen(listen) => self.execute_listen(listen, input),
            Task::Run(run) => self.execute_run(task, run, input).await,
            Task::Do(do_task) => {
                let outcome = self
                    .run_list(task, &do_task.do_, input, None, 1, cancel)
                    .await?;
                match outcome.control {
                    Control::Suspended => Ok(ExecOutcome::Suspend),
                    Control::EndWorkflow => {
                        Ok(ExecOutcome::Directive(outcome.value, FlowDirective::End))
                    }
                    Control::Completed => Ok(ExecOutcome::Value(outcome.value)),
                }
            }
        }
    }

    // --- simple variants ---

    fn execute_set(
        &self,
        task: &WorkflowTask,
        set: &SetTask,
        input: Value,
    ) -> Result<Value, Problem> {
        let vars = build_vars(task);
        let evaluated = traverse_and_evaluate(&set.set, &input, &vars)?;
        let Value::Object(patch) = evaluated else {
            return Err(Problem::expression("set body must evaluate to a map"));
        };
        // Merge over the current output when it is a map, replace otherwise.
        let mut merged = match input {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            merged.insert(key, value);
        }
        Ok(Value::Object(merged))
    }

    fn execute_switch(
        &self,
        task: &WorkflowTask,
        switch: &SwitchTask,
        input: Value,
    ) -> Result<ExecOutcome, Problem> {
        let vars = build_vars(task);
        let mut default = None;

        for case in &switch.switch {
            match &case.when {
                None => default = Some(case.then.clone()),
                Some(when) => {
                    if evaluate_guard(when, &input, &vars)? {
                        tracing::debug!(directive = %case.then.as_str(), "switch case matched");
                        return Ok(ExecOutcome::Directive(input, case.then.clone()));
                    }
                }
            }
        }

        match default {
            Some(directive) => Ok(ExecOutcome::Directive(input, directive)),
            None => Err(Problem::expression("no matching switch case")
                .with_instance(task.reference())),
        }
    }

    fn execute_raise(
        &self,
        task: &WorkflowTask,
        raise: &RaiseTask,
        input: Value,
    ) -> Result<ExecOutcome, Problem> {
        let definition = match &raise.raise.error {
            RaiseError::Definition(definition) => definition.clone(),
            RaiseError::Reference(reference) => task
                .document()
                .and_then(|doc| doc.use_.errors.get(reference))
                .cloned()
                .ok_or_else(|| {
                    Problem::validation(format!(
                        "error definition '{reference}' not found in 'use.errors'"
                    ))
                })?,
        };

        let vars = build_vars(task);
        let title = evaluate_str(&definition.title, &input, &vars)?;
        let detail = evaluate_str(&definition.detail, &input, &vars)?;

        let mut problem = Problem::new(
            definition.kind,
            title.as_str().unwrap_or(&definition.title).to_string(),
            detail.as_str().unwrap_or(&definition.detail).to_string(),
        )
        .with_instance(task.reference());
        if let Some(status) = definition.status {
            problem = problem.with_status(status);
        }
        Err(problem)
    }

    async fn execute_emit(
        &self,
        task: &WorkflowTask,
        emit: &EmitTask,
        input: Value,
    ) -> Result<ExecOutcome, Problem> {
        let Some(backend) = &self.backend else {
            return Err(Problem::configuration(
                "emit tasks require the durable backend; in-process mode does not record events",
            ));
        };

        let vars = build_vars(task);
        let with = Value::Object(emit.emit.event.with.clone().into_iter().collect());
        let attributes = traverse_and_evaluate(&with, &input, &vars)?;

        let mut event = CloudEvent::new(
            attributes
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or(grantor_types::event::EVENT_SOURCE),
            attributes
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("io.grantor.event"),
        );
        if let Some(subject) = attributes.get("subject").and_then(Value::as_str) {
            event = event.with_subject(subject);
        }
        if let Some(data) = attributes.get("data") {
            event = event.with_json_data(data.clone());
        }

        backend.record_event(&task.workflow_id, &event).await?;
        let output = serde_json::to_value(&event)
            .map_err(|e| Problem::runtime(format!("event serialization failed: {e}")))?;
        Ok(ExecOutcome::Value(output))
    }

    async fn execute_wait(
        &self,
        wait: &WaitTask,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, Problem> {
        let duration = parse_duration(&wait.wait)
            .map_err(|e| Problem::configuration(format!("invalid wait duration: {e}")))?;
        let duration = duration
            .to_std()
            .map_err(|_| Problem::configuration("wait duration must be positive"))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(Problem::runtime("workflow cancelled")),
            _ = tokio::time::sleep(duration) => Ok(ExecOutcome::Value(input)),
        }
    }

    fn execute_listen(
        &self,
        listen: &ListenTask,
        input: Value,
    ) -> Result<ExecOutcome, Problem> {
        // When the resumed input carries an event matching the filter, the
        // listen completes with that event; otherwise the workflow parks.
        if let Value::Object(filter) = &listen.listen.to {
            if let Value::Object(event) = &input {
                let matches = filter
                    .iter()
                    .all(|(key, expected)| event.get(key) == Some(expected));
                if matches && !filter.is_empty() {
                    return Ok(ExecOutcome::Value(input));
                }
            }
        }
        Ok(ExecOutcome::Suspend)
    }

    async fn execute_run(
        &self,
        task: &WorkflowTask,
        run: &RunTask,
        input: Value,
    ) -> Result<ExecOutcome, Problem> {
        let vars = build_vars(task);
        let command = evaluate_str(&run.run.shell.command, &input, &vars)?;
        let Some(command) = command.as_str() else {
            return Err(Problem::expression("shell command must evaluate to a string"));
        };

        let mut arguments = Vec::with_capacity(run.run.shell.arguments.len());
        for argument in &run.run.shell.arguments {
            let evaluated = evaluate_str(argument, &input, &vars)?;
            arguments.push(match evaluated {
                Value::String(s) => s,
                other => other.to_string(),
            });
        }

        let output = tokio::process::Command::new(command)
            .args(&arguments)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Problem::runtime(format!("failed to run '{command}': {e}")))?;

        Ok(ExecOutcome::Value(serde_json::json!({
            "code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        })))
    }
}

/// Exponential backoff with a hard delay cap and optional jitter.
pub(crate) fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let factor = policy.multiplier.max(1.0).powi(exponent as i32);
    let delay_ms = ((policy.initial_delay_ms as f64) * factor)
        .min(policy.max_delay_ms as f64) as u64;
    let delay_ms = if policy.jitter {
        // Random-enough jitter in [50%, 100%] without a dedicated RNG.
        let nonce = uuid::Uuid::new_v4().as_bytes()[0] as u64;
        delay_ms / 2 + (delay_ms / 2) * nonce / 255
    } else {
        delay_ms
    };
    Duration::from_millis(delay_ms)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
