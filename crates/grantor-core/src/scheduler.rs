//! The scheduler seam: at-time jobs that guarantee revocation.
//!
//! Two implementations satisfy [`Scheduler`]: a local in-process at-time
//! scheduler that fires an HTTP self-callback, and a durable one that
//! records a signal on the execution store. Either way the invariant is the
//! same: `grantor.authorize` schedules **before** granting and rolls the
//! job back if the grant fails, so no grant ever exists without a pending
//! revocation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use grantor_types::error::Problem;
use uuid::Uuid;

use crate::durable::Signal;

/// Work performed when a job fires.
pub enum JobAction {
    /// Run a closure.
    Callback(JobTask),
    /// Issue an HTTP GET to a resume callback URL (local mode).
    HttpResume { url: String },
    /// Deliver a signal to a workflow execution (durable mode).
    Signal { workflow_id: String, signal: Signal },
}

pub type JobTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A unit of scheduled work: one-shot (`at`) or recurring (`schedule`).
pub struct Job {
    pub id: Uuid,
    pub at: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
    pub action: JobAction,
}

impl Job {
    /// One-shot job firing at a specific instant.
    pub fn at(at: DateTime<Utc>, action: JobAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Some(at),
            schedule: None,
            action,
        }
    }

    /// Recurring job on a cron expression.
    pub fn recurring(schedule: impl Into<String>, action: JobAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: None,
            schedule: Some(schedule.into()),
            action,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("at", &self.at)
            .field("schedule", &self.schedule)
            .finish()
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn initialize(&self) -> Result<(), Problem>;

    async fn shutdown(&self) -> Result<(), Problem>;

    /// Accept a job. Returning `Ok` is a promise that the job will fire;
    /// callers rely on this for the schedule-before-grant invariant.
    async fn add_job(&self, job: Job) -> Result<(), Problem>;

    /// Remove a pending job (the rollback half of schedule-before-grant).
    async fn remove_job(&self, id: Uuid) -> Result<(), Problem>;
}
