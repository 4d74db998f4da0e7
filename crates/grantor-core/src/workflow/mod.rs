//! The workflow runtime: task-graph interpretation.

mod call;
mod for_task;
mod fork;
pub mod runner;
pub mod schema;
mod try_task;

pub use runner::WorkflowRunner;

use grantor_types::task::WorkflowTask;
use serde_json::json;

use crate::expr::Vars;

/// Assemble the variable scope an expression sees at a given point of
/// execution: `$context`, `$input`, `$output`, `$workflow`, `$task`, plus
/// whatever local vars (`$item`, `$index`, catch bindings) are in scope.
pub(crate) fn build_vars(task: &WorkflowTask) -> Vars {
    let mut vars = Vars::new();
    vars.insert("context".to_string(), task.context.clone());
    vars.insert("input".to_string(), task.input.clone());
    vars.insert("output".to_string(), task.output.clone());
    vars.insert(
        "workflow".to_string(),
        json!({
            "id": task.workflow_id,
            "name": task.workflow.name,
            "status": task.status,
        }),
    );
    vars.insert(
        "task".to_string(),
        json!({
            "reference": task.reference(),
        }),
    );
    for (name, value) in &task.local_vars {
        vars.insert(
            name.trim_start_matches('$').to_string(),
            value.clone(),
        );
    }
    vars
}
