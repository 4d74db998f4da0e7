//! The mutable execution instance of a workflow.
//!
//! A [`WorkflowTask`] is created by the orchestrator, mutated exclusively by
//! the runner while executing, and may be sealed into an envelope between
//! HTTP hops (browser redirects, approval callbacks, scheduler callbacks).
//! Its `workflow_id` is stable across suspend/resume so durable signals and
//! callback URLs always land on the same execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::elevate::ElevateRequestInternal;
use crate::user::User;
use crate::workflow::{Workflow, WorkflowDocument};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow execution:
/// `pending → running → (waiting ↔ running)* → {completed | faulted | cancelled | suspended}`.
///
/// `waiting` means the execution is parked on an external event (approval,
/// durable signal); `suspended` is a manual pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Waiting,
    Suspended,
    Completed,
    Faulted,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Faulted | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Suspended => "suspended",
            TaskStatus::Completed => "completed",
            TaskStatus::Faulted => "faulted",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "waiting" => Ok(TaskStatus::Waiting),
            "suspended" => Ok(TaskStatus::Suspended),
            "completed" => Ok(TaskStatus::Completed),
            "faulted" => Ok(TaskStatus::Faulted),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowTask
// ---------------------------------------------------------------------------

/// Per-run mutable state. Deep-clonable: fork branches each get their own
/// copy and never share mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Stable identifier used by the durable backend and callback URLs.
    pub workflow_id: String,
    /// The workflow being executed (name, authentication, document).
    pub workflow: Workflow,
    /// Task key in the main list to resume from; empty means start.
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    /// Workflow-wide scratchpad written by `export`.
    #[serde(default)]
    pub context: Value,
    /// Expression-scope variables (`$item`, `$index`, ...) currently bound.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub local_vars: Map<String, Value>,
    /// Authenticated principal, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Breadcrumb of the current position in the task graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_reference: Vec<String>,
}

impl WorkflowTask {
    /// Create a fresh execution for a workflow with an initial context.
    ///
    /// The workflow id is derived from a fingerprint of the workflow name
    /// and initial context plus a random nonce, so retried submissions get
    /// distinct executions while one execution's id never changes.
    pub fn new(workflow: Workflow, context: Value) -> Self {
        let workflow_id = generate_workflow_id(&workflow.name, &context);
        Self {
            workflow_id,
            workflow,
            entrypoint: String::new(),
            status: TaskStatus::Pending,
            input: Value::Null,
            output: Value::Null,
            context,
            local_vars: Map::new(),
            user: None,
            task_reference: Vec::new(),
        }
    }

    pub fn document(&self) -> Option<&WorkflowDocument> {
        self.workflow.workflow.as_ref()
    }

    pub fn set_entrypoint(&mut self, entrypoint: impl Into<String>) {
        self.entrypoint = entrypoint.into();
    }

    pub fn set_user(&mut self, user: User) {
        // The user also becomes visible to expressions and functions through
        // the workflow context.
        if let Value::Object(map) = &mut self.context {
            map.insert(
                "user".to_string(),
                serde_json::to_value(&user).unwrap_or(Value::Null),
            );
        }
        self.user = Some(user);
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Shallow-merge an object patch into the workflow context.
    pub fn merge_context(&mut self, patch: Value) {
        let Value::Object(patch) = patch else {
            return;
        };
        if !self.context.is_object() {
            self.context = Value::Object(Map::new());
        }
        if let Value::Object(ctx) = &mut self.context {
            for (key, value) in patch {
                ctx.insert(key, value);
            }
        }
    }

    /// The workflow context interpreted as an elevation request.
    pub fn as_elevation(&self) -> Result<ElevateRequestInternal, serde_json::Error> {
        serde_json::from_value(self.context.clone())
    }

    // --- task reference breadcrumbs ---

    pub fn push_reference(&mut self, segment: &str) {
        self.task_reference.push(segment.to_string());
    }

    pub fn pop_reference(&mut self) {
        self.task_reference.pop();
    }

    /// Colon-separated reference path of the current position, e.g.
    /// `do:grant` or `do:each_provider:grant_one`.
    pub fn reference(&self) -> String {
        self.task_reference.join(":")
    }

    // --- expression-scope variables ---

    pub fn add_local_vars(&mut self, vars: Map<String, Value>) {
        for (key, value) in vars {
            self.local_vars.insert(key, value);
        }
    }

    pub fn remove_local_vars<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.local_vars.remove(name);
        }
    }
}

/// Fingerprint + nonce workflow id: `wf-<sha256/12 hex>-<uuid/8>`.
fn generate_workflow_id(workflow_name: &str, context: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_name.as_bytes());
    hasher.update(context.to_string().as_bytes());
    let digest = hasher.finalize();
    let fingerprint: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    let nonce = Uuid::new_v4().simple().to_string();
    format!("wf-{}-{}", fingerprint, &nonce[..8])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
