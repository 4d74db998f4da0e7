//! In-process at-time scheduler.
//!
//! One-shot jobs ride `tokio-cron-scheduler`; at fire time the job either
//! runs its closure or issues an HTTP GET to the resume callback URL that
//! carries the sealed revocation task. Only suitable when a single broker
//! process owns the timeline; the durable scheduler is preferred when a
//! backend is available.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use grantor_core::scheduler::{Job, JobAction, Scheduler};
use grantor_types::error::Problem;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

pub struct LocalScheduler {
    scheduler: JobScheduler,
    client: reqwest::Client,
    /// Our job ids mapped to the underlying scheduler's ids for removal.
    jobs: Arc<Mutex<HashMap<Uuid, Uuid>>>,
}

impl LocalScheduler {
    pub async fn new() -> Result<Self, Problem> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Problem::configuration(format!("scheduler init failed: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Problem::configuration(format!("http client init failed: {e}")))?;
        Ok(Self {
            scheduler,
            client,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn fire_resume(client: reqwest::Client, url: String) {
        tracing::info!(url = %redact_state(&url), "executing scheduled revocation callback");
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("scheduled revocation callback delivered");
            }
            Ok(response) => {
                tracing::error!(
                    status = response.status().as_u16(),
                    "revocation callback returned non-success status"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to call revocation callback");
            }
        }
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn initialize(&self) -> Result<(), Problem> {
        self.scheduler
            .start()
            .await
            .map_err(|e| Problem::configuration(format!("scheduler start failed: {e}")))
    }

    async fn shutdown(&self) -> Result<(), Problem> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| Problem::runtime(format!("scheduler shutdown failed: {e}")))
    }

    async fn add_job(&self, job: Job) -> Result<(), Problem> {
        let at = job
            .at
            .ok_or_else(|| Problem::configuration("local scheduler requires an 'at' time"))?;

        let delay = (at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let instant = Instant::now() + delay;

        let client = self.client.clone();
        let cron_job = match job.action {
            JobAction::HttpResume { url } => CronJob::new_one_shot_at_instant_async(
                instant,
                move |_id, _scheduler| {
                    let client = client.clone();
                    let url = url.clone();
                    Box::pin(async move {
                        Self::fire_resume(client, url).await;
                    })
                },
            ),
            JobAction::Callback(task) => CronJob::new_one_shot_at_instant_async(
                instant,
                move |_id, _scheduler| {
                    let task = Arc::clone(&task);
                    Box::pin(async move {
                        task().await;
                    })
                },
            ),
            JobAction::Signal { .. } => {
                return Err(Problem::configuration(
                    "signal jobs require the durable scheduler",
                ));
            }
        }
        .map_err(|e| Problem::configuration(format!("failed to build job: {e}")))?;

        let scheduled_id = self
            .scheduler
            .add(cron_job)
            .await
            .map_err(|e| Problem::configuration(format!("failed to schedule job: {e}")))?;

        self.jobs.lock().await.insert(job.id, scheduled_id);
        tracing::info!(job_id = %job.id, fire_at = %at.to_rfc3339(), "scheduled local job");
        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> Result<(), Problem> {
        let Some(scheduled_id) = self.jobs.lock().await.remove(&id) else {
            return Ok(());
        };
        self.scheduler
            .remove(&scheduled_id)
            .await
            .map_err(|e| Problem::runtime(format!("failed to remove job: {e}")))
    }
}

/// Resume URLs embed sealed state; keep it out of the logs.
fn redact_state(url: &str) -> String {
    match url.split_once("state=") {
        Some((prefix, _)) => format!("{prefix}state=<redacted>"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn one_shot_callback_fires_once() {
        let scheduler = LocalScheduler::new().await.unwrap();
        scheduler.initialize().await.unwrap();

        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);
        let task: grantor_core::scheduler::JobTask = Arc::new(move || {
            let fired = Arc::clone(&fired_clone);
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }) as BoxFuture<'static, ()>
        });

        let job = Job::at(
            Utc::now() + chrono::Duration::milliseconds(250),
            JobAction::Callback(task),
        );
        scheduler.add_job(job).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn removed_job_does_not_fire() {
        let scheduler = LocalScheduler::new().await.unwrap();
        scheduler.initialize().await.unwrap();

        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);
        let task: grantor_core::scheduler::JobTask = Arc::new(move || {
            let fired = Arc::clone(&fired_clone);
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }) as BoxFuture<'static, ()>
        });

        let job = Job::at(
            Utc::now() + chrono::Duration::milliseconds(500),
            JobAction::Callback(task),
        );
        let id = job.id;
        scheduler.add_job(job).await.unwrap();
        scheduler.remove_job(id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        scheduler.shutdown().await.unwrap();
    }

    #[test]
    fn redaction_hides_sealed_state() {
        let url = "https://broker/api/v1/elevate/resume?state=SECRETBLOB";
        assert!(!redact_state(url).contains("SECRETBLOB"));
    }
}
