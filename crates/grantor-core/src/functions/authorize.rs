//! `grantor.authorize`: grant the role and guarantee its revocation.
//!
//! The ordering here is the broker's core safety property: the revocation
//! is scheduled *before* any provider grant is issued, and the schedule is
//! rolled back if a grant fails. A grant can therefore never exist without
//! a pending revocation. With multiple providers the grants are applied in
//! order; a failure part-way compensates every provider already granted
//! before the error is reported.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantor_types::error::Problem;
use grantor_types::task::{TaskStatus, WorkflowTask};
use grantor_types::workflow::CallTask;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{CallOutcome, WorkflowFunction};
use crate::durable::Signal;
use crate::scheduler::{Job, JobAction};
use crate::services::Services;

pub struct AuthorizeFunction {
    services: Arc<Services>,
}

impl AuthorizeFunction {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

enum ScheduleHandle {
    Durable(Uuid),
    Local(Uuid),
}

#[async_trait]
impl WorkflowFunction for AuthorizeFunction {
    fn name(&self) -> &str {
        "grantor.authorize"
    }

    fn description(&self) -> &str {
        "Grants the requested role via each provider and schedules its revocation"
    }

    fn required_parameters(&self) -> Vec<&'static str> {
        vec!["revocation"]
    }

    async fn execute(
        &self,
        task: &mut WorkflowTask,
        call: &CallTask,
        _input: &Value,
    ) -> Result<CallOutcome, Problem> {
        let elevation = task
            .as_elevation()
            .map_err(|e| Problem::validation(format!("context is not an elevation request: {e}")))?;
        if !elevation.request.is_valid() {
            return Err(Problem::validation("invalid elevation request"));
        }
        let user = elevation
            .user
            .clone()
            .ok_or_else(|| Problem::validation("elevation request has no authenticated user"))?;
        let Some(role) = elevation.request.role.clone() else {
            return Err(Problem::validation("elevation request has no role"));
        };

        let duration = elevation
            .request
            .as_duration()
            .map_err(|e| Problem::validation(e.to_string()))?;

        let authorized_at = Utc::now();
        let revocation_at = authorized_at + duration;

        let revocation_entry = call
            .with
            .as_ref()
            .and_then(|w| w.get("revocation"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        // Re-delivered signals must not grant twice.
        if let Some(backend) = &self.services.durable {
            if backend.is_approved(&task.workflow_id).await? {
                tracing::info!(workflow_id = %task.workflow_id, "execution already authorized");
                return Ok(CallOutcome::Suspend {
                    entrypoint: if revocation_entry.is_empty() {
                        None
                    } else {
                        Some(revocation_entry)
                    },
                    output: json!({
                        "authorized_at": authorized_at.to_rfc3339(),
                        "revocation_at": revocation_at.to_rfc3339(),
                    }),
                });
            }
        }

        tracing::info!(
            workflow_id = %task.workflow_id,
            user = %user.email,
            role = %role.name,
            providers = ?elevation.request.providers,
            revocation_at = %revocation_at.to_rfc3339(),
            "executing authorization"
        );

        // Schedule first; fail closed if the schedule is not accepted.
        let handle = self
            .schedule_revocation(task, &revocation_entry, revocation_at)
            .await
            .map_err(|e| {
                tracing::error!(workflow_id = %task.workflow_id, error = %e, "failed to schedule revocation");
                Problem::configuration(format!("failed to schedule revocation: {}", e.detail))
            })?;

        // Grant per provider, compensating on partial failure.
        let mut grants = Map::new();
        for provider_name in &elevation.request.providers {
            let grant = async {
                let provider = self.services.providers.get(provider_name)?;
                provider.rbac()?.authorize_role(&user, &role).await
            }
            .await;

            match grant {
                Ok(metadata) => {
                    grants.insert(provider_name.clone(), metadata);
                }
                Err(problem) => {
                    tracing::error!(
                        provider = %provider_name,
                        error = %problem,
                        "grant failed, compensating"
                    );
                    self.compensate(&user, &role, &grants).await;
                    self.rollback_schedule(handle).await;
                    return Err(problem);
                }
            }
        }

        if let Some(backend) = &self.services.durable {
            backend.set_approved(&task.workflow_id, true).await?;
        }

        let output = json!({
            "authorized_at": authorized_at.to_rfc3339(),
            "revocation_at": revocation_at.to_rfc3339(),
            "grants": Value::Object(grants.clone()),
        });

        // The grant metadata must survive into the revocation leg.
        task.merge_context(json!({
            "authorized_at": authorized_at.to_rfc3339(),
            "revocation_at": revocation_at.to_rfc3339(),
            "grants": Value::Object(grants),
        }));

        tracing::info!(
            workflow_id = %task.workflow_id,
            revocation_at = %revocation_at.to_rfc3339(),
            "authorization granted and revocation scheduled"
        );

        // The workflow now waits for the scheduler to signal it into the
        // revocation task; it must not fall through into `revoke` inline.
        Ok(CallOutcome::Suspend {
            entrypoint: if revocation_entry.is_empty() {
                None
            } else {
                Some(revocation_entry)
            },
            output,
        })
    }
}

impl AuthorizeFunction {
    /// Schedule the future revocation: a durable signal when a backend is
    /// configured, otherwise a local at-time job firing the HTTP resume
    /// callback. Returns a handle for rollback.
    async fn schedule_revocation(
        &self,
        task: &WorkflowTask,
        revocation_entry: &str,
        revocation_at: DateTime<Utc>,
    ) -> Result<ScheduleHandle, Problem> {
        // The task the revocation resumes into. Grant metadata is not known
        // yet; the durable resume path re-adopts the stored context and the
        // provider revoke tolerates absent metadata.
        let mut revocation_task = task.clone();
        revocation_task.set_entrypoint(revocation_entry);
        revocation_task.set_status(TaskStatus::Pending);
        revocation_task.input = Value::Null;
        revocation_task.local_vars = Map::new();

        if let Some(backend) = &self.services.durable {
            let signal = if revocation_entry.is_empty() {
                // Without a revocation task there is nothing to resume into:
                // terminate the execution at expiry instead.
                Signal::Terminate {
                    reason: "no revocation task provided".to_string(),
                    scheduled_at: revocation_at,
                }
            } else {
                Signal::Resume {
                    task: Box::new(revocation_task),
                }
            };
            let id = backend
                .schedule_signal(&task.workflow_id, signal, revocation_at)
                .await?;
            return Ok(ScheduleHandle::Durable(id));
        }

        if revocation_entry.is_empty() {
            return Err(Problem::configuration(
                "a revocation task is required without a durable backend",
            ));
        }

        let url = self
            .services
            .urls
            .resume_url(&revocation_task, self.services.encryptor.as_ref())?;
        let job = Job::at(revocation_at, JobAction::HttpResume { url });
        let job_id = job.id;
        self.services.scheduler.add_job(job).await?;
        Ok(ScheduleHandle::Local(job_id))
    }

    async fn rollback_schedule(&self, handle: ScheduleHandle) {
        let result = match handle {
            ScheduleHandle::Durable(id) => match &self.services.durable {
                Some(backend) => backend.cancel_scheduled(id).await,
                None => Ok(()),
            },
            ScheduleHandle::Local(id) => self.services.scheduler.remove_job(id).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to roll back revocation schedule");
        }
    }

    /// Best-effort revocation of already-granted providers after a partial
    /// failure. Failures are logged; the original grant error is what the
    /// caller reports.
    async fn compensate(
        &self,
        user: &grantor_types::user::User,
        role: &grantor_types::role::Role,
        grants: &Map<String, Value>,
    ) {
        for (provider_name, metadata) in grants {
            let result = async {
                let provider = self.services.providers.get(provider_name)?;
                provider.rbac()?.revoke_role(user, role, metadata).await
            }
            .await;
            match result {
                Ok(_) => {
                    tracing::info!(provider = %provider_name, "compensated partial grant");
                }
                Err(e) => {
                    tracing::error!(
                        provider = %provider_name,
                        error = %e,
                        "failed to compensate partial grant"
                    );
                }
            }
        }
    }
}
