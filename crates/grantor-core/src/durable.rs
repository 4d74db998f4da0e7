//! The durable execution seam.
//!
//! When a backend is configured, executions survive process death: the
//! serialized [`WorkflowTask`] is checkpointed after every step, signals
//! are recorded idempotently per workflow id, and at-time signals fire even
//! across restarts. Typed search attributes (`status`, `user`, `role`,
//! `workflow`, `provider`, `task`, `approved`) are exposed so the listing
//! surface can filter executions without deserializing them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantor_types::error::Problem;
use grantor_types::event::CloudEvent;
use grantor_types::task::{TaskStatus, WorkflowTask};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signals a running (or waiting) execution can receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// Replace the stored task and continue from its entrypoint.
    Resume { task: Box<WorkflowTask> },
    /// Deliver a CloudEvent to a pending `approvals`/`listen` task.
    Event { event: CloudEvent },
    /// Fast-path to `cancelled`, compensating first when approved.
    Terminate {
        reason: String,
        scheduled_at: DateTime<Utc>,
    },
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Resume { .. } => "resume",
            Signal::Event { .. } => "event",
            Signal::Terminate { .. } => "terminate",
        }
    }
}

/// Search-attribute snapshot of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    #[serde(rename = "id")]
    pub workflow_id: String,
    pub status: TaskStatus,
    #[serde(rename = "started_at")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "finished_at", skip_serializing_if = "Option::is_none")]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub provider: String,
    /// Key of the task the execution last touched.
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub approved: bool,
}

/// Filter over the typed search attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub status: Option<TaskStatus>,
    pub user: Option<String>,
    pub role: Option<String>,
    pub workflow: Option<String>,
    pub provider: Option<String>,
    pub approved: Option<bool>,
}

/// A scheduled signal that has come due.
#[derive(Debug, Clone)]
pub struct DueSignal {
    pub id: Uuid,
    pub workflow_id: String,
    pub signal: Signal,
}

#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Persist a new execution (signal-with-start upserts through here).
    async fn start(&self, task: &WorkflowTask) -> Result<(), Problem>;

    /// Checkpoint the current task state and refresh search attributes.
    async fn checkpoint(&self, task: &WorkflowTask) -> Result<(), Problem>;

    /// Record a signal for an execution. Returns `false` when an identical
    /// signal was already recorded for this workflow id (idempotent
    /// delivery).
    async fn record_signal(&self, workflow_id: &str, signal: &Signal) -> Result<bool, Problem>;

    /// Schedule a signal for future delivery; returns the schedule id used
    /// for rollback.
    async fn schedule_signal(
        &self,
        workflow_id: &str,
        signal: Signal,
        at: DateTime<Utc>,
    ) -> Result<Uuid, Problem>;

    /// Cancel a scheduled signal (rollback half of schedule-before-grant).
    async fn cancel_scheduled(&self, id: Uuid) -> Result<(), Problem>;

    /// Atomically claim scheduled signals whose time has come.
    async fn due_signals(&self, now: DateTime<Utc>) -> Result<Vec<DueSignal>, Problem>;

    /// Record an emitted CloudEvent against an execution's history.
    async fn record_event(&self, workflow_id: &str, event: &CloudEvent) -> Result<(), Problem>;

    // --- queries ---

    async fn is_approved(&self, workflow_id: &str) -> Result<bool, Problem>;

    async fn set_approved(&self, workflow_id: &str, approved: bool) -> Result<(), Problem>;

    /// Current task snapshot; `None` when the execution is unknown.
    async fn get_workflow_task(&self, workflow_id: &str)
        -> Result<Option<WorkflowTask>, Problem>;

    /// Lightweight description from search attributes only. This is the
    /// fallback the listing surface uses when a full snapshot read times
    /// out or is unavailable.
    async fn describe(&self, workflow_id: &str) -> Result<Option<ExecutionInfo>, Problem>;

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionInfo>, Problem>;
}
