//! Scheduler backed by the durable execution store.
//!
//! `add_job` records a signal-at-time row; the orchestrator's signal pump
//! delivers it when due. Because the row is written in the same store that
//! holds the execution, a scheduled revocation survives process death,
//! the invariant the local scheduler cannot give.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use grantor_core::durable::DurableBackend;
use grantor_core::scheduler::{Job, JobAction, Scheduler};
use grantor_types::error::Problem;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct DurableScheduler {
    backend: Arc<dyn DurableBackend>,
    /// Job ids mapped to the backend's schedule ids for rollback.
    schedules: Mutex<HashMap<Uuid, Uuid>>,
}

impl DurableScheduler {
    pub fn new(backend: Arc<dyn DurableBackend>) -> Self {
        Self {
            backend,
            schedules: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Scheduler for DurableScheduler {
    async fn initialize(&self) -> Result<(), Problem> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Problem> {
        Ok(())
    }

    async fn add_job(&self, job: Job) -> Result<(), Problem> {
        let at = job
            .at
            .ok_or_else(|| Problem::configuration("durable scheduler requires an 'at' time"))?;
        let JobAction::Signal {
            workflow_id,
            signal,
        } = job.action
        else {
            return Err(Problem::configuration(
                "durable scheduler only accepts signal jobs",
            ));
        };

        let schedule_id = self
            .backend
            .schedule_signal(&workflow_id, signal, at)
            .await?;
        self.schedules.lock().await.insert(job.id, schedule_id);
        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> Result<(), Problem> {
        let Some(schedule_id) = self.schedules.lock().await.remove(&id) else {
            return Ok(());
        };
        self.backend.cancel_scheduled(schedule_id).await
    }
}
