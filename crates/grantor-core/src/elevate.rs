//! The elevation orchestrator: the glue between HTTP, sessions, the
//! runner and the durable backend.
//!
//! A typical elevation: the client submits reason + role + providers, the
//! orchestrator validates and resolves a workflow, checks for a usable
//! session (otherwise minting an identity-provider redirect whose state is
//! the sealed workflow task), and on callback resumes the task through the
//! runner, either in-process or checkpointed on the durable backend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use grantor_types::elevate::{ElevateRequest, ElevateResponse, ElevateStaticRequest};
use grantor_types::error::Problem;
use grantor_types::role::Role;
use grantor_types::task::{TaskStatus, WorkflowTask};
use grantor_types::user::AuthorizeUser;
use grantor_types::workflow::Workflow;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::durable::{DueSignal, ExecutionFilter, ExecutionInfo, Signal};
use crate::encoding::{seal_task, unseal_session};
use crate::functions::{CallOutcome, FunctionRegistry};
use crate::services::Services;
use crate::workflow::WorkflowRunner;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable snapshot of the operator-configured roles and workflows.
/// Dynamic reload replaces the whole snapshot; in-flight readers keep the
/// one they started with.
#[derive(Default)]
pub struct Catalog {
    pub roles: HashMap<String, Role>,
    pub workflows: HashMap<String, Workflow>,
}

impl Catalog {
    pub fn new(roles: Vec<Role>, workflows: Vec<Workflow>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.name.clone(), r)).collect(),
            workflows: workflows
                .into_iter()
                .map(|w| (w.name.clone(), w))
                .collect(),
        }
    }

    /// A role with inheritance resolved, only when enabled.
    pub fn resolve_role(&self, name: &str) -> Option<Role> {
        let role = self.roles.get(name)?;
        if !role.enabled {
            return None;
        }
        Some(role.resolve(&self.roles))
    }

    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name).filter(|w| w.enabled)
    }
}

// ---------------------------------------------------------------------------
// LLM seam
// ---------------------------------------------------------------------------

/// Black-box seam for the AI elevation path: turn an English reason into a
/// structured request. Implementations live outside the core.
#[async_trait]
pub trait LlmAdvisor: Send + Sync {
    async fn elevate_request(&self, reason: &str) -> Result<ElevateStaticRequest, Problem>;
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// The workflow task paired with where the client must go next.
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub task: WorkflowTask,
    pub url: String,
}

pub struct WorkflowManager {
    services: Arc<Services>,
    functions: Arc<FunctionRegistry>,
    runner: WorkflowRunner,
    catalog: RwLock<Arc<Catalog>>,
    llm: Option<Arc<dyn LlmAdvisor>>,
    /// Cancellation tokens for in-flight executions, keyed by workflow id.
    cancellations: DashMap<String, CancellationToken>,
}

impl WorkflowManager {
    pub fn new(
        services: Arc<Services>,
        functions: Arc<FunctionRegistry>,
        runner: WorkflowRunner,
        catalog: Catalog,
    ) -> Self {
        Self {
            services,
            functions,
            runner,
            catalog: RwLock::new(Arc::new(catalog)),
            llm: None,
            cancellations: DashMap::new(),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmAdvisor>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().expect("catalog lock poisoned").clone()
    }

    /// Replace the whole catalog snapshot (dynamic reload).
    pub fn replace_catalog(&self, catalog: Catalog) {
        *self.catalog.write().expect("catalog lock poisoned") = Arc::new(catalog);
    }

    // -----------------------------------------------------------------
    // Request resolution
    // -----------------------------------------------------------------

    /// Resolve a raw static request: role lookup (with inheritance), the
    /// provider list and the processing workflow.
    pub fn resolve_request(
        &self,
        raw: &ElevateStaticRequest,
    ) -> Result<ElevateRequest, Problem> {
        if raw.reason.is_empty() {
            return Err(Problem::validation("reason must be provided"));
        }

        let catalog = self.catalog();
        let role = catalog.resolve_role(&raw.role).ok_or_else(|| {
            Problem::validation(format!("unknown or disabled role: {}", raw.role))
        })?;

        let providers = if raw.providers.is_empty() {
            role.providers.clone()
        } else {
            raw.providers.clone()
        };

        let request = ElevateRequest {
            role: Some(role),
            providers,
            workflow: raw.workflow.clone(),
            reason: raw.reason.clone(),
            duration: raw.duration.clone(),
            identities: raw.identities.clone(),
            session: raw.session.clone(),
        };

        if !request.is_valid() {
            return Err(Problem::validation(
                "elevation request needs a role, at least one provider and a reason",
            ));
        }
        if !request.duration.is_empty() {
            request
                .as_duration()
                .map_err(|e| Problem::validation(e.to_string()))?;
        }

        Ok(request)
    }

    // -----------------------------------------------------------------
    // Elevation entry
    // -----------------------------------------------------------------

    /// Start an elevation: returns the created task and the URL the client
    /// must follow: the identity provider when no session is usable, the
    /// resume endpoint otherwise.
    pub async fn create_workflow(
        &self,
        request: ElevateRequest,
    ) -> Result<WorkflowRequest, Problem> {
        let workflow_name = request
            .workflow_name()
            .map(str::to_string)
            .ok_or_else(|| {
                Problem::configuration("no workflow configured for this role")
            })?;

        let catalog = self.catalog();
        let workflow = catalog
            .workflow(&workflow_name)
            .cloned()
            .ok_or_else(|| {
                Problem::configuration(format!("unknown workflow: {workflow_name}"))
            })?;
        if workflow.workflow.is_none() {
            return Err(Problem::configuration(format!(
                "workflow '{workflow_name}' has no document"
            )));
        }

        let mut context = request.as_map();
        if let Value::Object(map) = &mut context {
            map.insert("workflow".into(), Value::String(workflow_name.clone()));
        }
        let mut task = WorkflowTask::new(workflow.clone(), context);

        tracing::info!(
            workflow_id = %task.workflow_id,
            workflow = %workflow_name,
            role = request.role.as_ref().map(|r| r.name.as_str()).unwrap_or(""),
            "starting elevation workflow"
        );

        let auth_provider = self
            .services
            .providers
            .get(&workflow.authentication)?;

        // A valid, unexpired session skips the login redirect entirely.
        if let Some(local) = &request.session {
            if !local.is_expired() {
                match unseal_session(local, self.services.encryptor.as_ref()) {
                    Ok(session) => {
                        match auth_provider.authorizor()?.validate_session(&session).await {
                            Ok(()) => {
                                task.set_user(session.user);
                                let url = self
                                    .services
                                    .urls
                                    .resume_url(&task, self.services.encryptor.as_ref())?;
                                return Ok(WorkflowRequest { task, url });
                            }
                            Err(e) => {
                                tracing::info!(error = %e, "session rejected by provider, re-authenticating");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to unseal session, re-authenticating");
                    }
                }
            } else {
                tracing::info!("existing session has expired, re-authenticating");
            }
        }

        let state = seal_task(&task, self.services.encryptor.as_ref())?;
        let redirect = auth_provider
            .authorizor()?
            .authorize_session(&AuthorizeUser {
                scopes: Vec::new(),
                state,
                redirect_uri: self
                    .services
                    .urls
                    .auth_callback_url(&workflow.authentication),
                code: String::new(),
            })
            .await?;

        tracing::info!(url = %redirect.url, "redirecting user to identity provider");
        Ok(WorkflowRequest {
            task,
            url: redirect.url,
        })
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Resume a workflow task (from sealed state or a signal). Faults are
    /// reported on the returned task's status, not as errors.
    pub async fn resume_workflow(&self, task: WorkflowTask) -> Result<WorkflowTask, Problem> {
        if let Some(backend) = &self.services.durable {
            // Signal-with-start: make sure the execution exists, record the
            // resume for idempotency, then drive it.
            backend.start(&task).await?;
            let signal = Signal::Resume {
                task: Box::new(task.clone()),
            };
            let fresh = backend.record_signal(&task.workflow_id, &signal).await?;
            if !fresh {
                tracing::info!(
                    workflow_id = %task.workflow_id,
                    "duplicate resume signal ignored"
                );
                // Hand back the stored snapshot instead of re-running.
                if let Some(stored) = backend.get_workflow_task(&task.workflow_id).await? {
                    return Ok(stored);
                }
            }
        }
        self.run_workflow_task(task).await
    }

    /// Drive a task through the runner to its next rest point.
    pub async fn run_workflow_task(
        &self,
        mut task: WorkflowTask,
    ) -> Result<WorkflowTask, Problem> {
        self.hydrate(&mut task)?;

        let cancel = CancellationToken::new();
        self.cancellations
            .insert(task.workflow_id.clone(), cancel.clone());

        let result = self.runner.run(&mut task, &cancel).await;
        self.cancellations.remove(&task.workflow_id);

        match result {
            Ok(_) => Ok(task),
            Err(problem) => {
                // The fault is recorded on the task itself; infrastructure
                // callers still see it in status/output.
                tracing::warn!(
                    workflow_id = %task.workflow_id,
                    kind = %problem.kind,
                    "workflow finished faulted"
                );
                Ok(task)
            }
        }
    }

    /// Re-attach the workflow document when a sealed task travelled without
    /// one (or the catalog has a newer revision).
    fn hydrate(&self, task: &mut WorkflowTask) -> Result<(), Problem> {
        if task.workflow.workflow.is_some() {
            return Ok(());
        }
        let catalog = self.catalog();
        let workflow = catalog.workflow(&task.workflow.name).ok_or_else(|| {
            Problem::configuration(format!(
                "workflow '{}' is not registered",
                task.workflow.name
            ))
        })?;
        task.workflow = workflow.clone();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------

    /// Deliver a signal to an execution. Used by the scheduler pump and the
    /// terminate endpoint.
    pub async fn handle_signal(
        &self,
        workflow_id: &str,
        signal: Signal,
    ) -> Result<(), Problem> {
        match signal {
            Signal::Resume { task } => {
                let mut resumed = *task;
                if let Some(backend) = &self.services.durable {
                    // The stored checkpoint has the freshest context (grant
                    // metadata recorded after the resume task was sealed);
                    // adopt it and keep the signal's entrypoint.
                    if let Some(stored) = backend.get_workflow_task(workflow_id).await? {
                        resumed.context = stored.context;
                        if resumed.user.is_none() {
                            resumed.user = stored.user;
                        }
                    }
                }
                resumed.set_status(TaskStatus::Pending);
                self.run_workflow_task(resumed).await?;
                Ok(())
            }
            Signal::Event { event } => {
                let backend = self.services.durable.as_ref().ok_or_else(|| {
                    Problem::configuration("event signals require the durable backend")
                })?;
                let mut stored = backend
                    .get_workflow_task(workflow_id)
                    .await?
                    .ok_or_else(|| {
                        Problem::configuration(format!("unknown execution: {workflow_id}"))
                    })?;
                stored.input = serde_json::to_value(&event)
                    .map_err(|e| Problem::runtime(format!("event serialization failed: {e}")))?;
                stored.set_status(TaskStatus::Pending);
                self.run_workflow_task(stored).await?;
                Ok(())
            }
            Signal::Terminate { reason, .. } => self.terminate(workflow_id, &reason).await,
        }
    }

    /// Terminate an execution: cancel in-flight work, run the revoke
    /// compensation when the elevation was already approved, and mark the
    /// execution cancelled.
    pub async fn terminate(&self, workflow_id: &str, reason: &str) -> Result<(), Problem> {
        tracing::info!(workflow_id, reason, "terminating execution");

        if let Some((_, token)) = self.cancellations.remove(workflow_id) {
            token.cancel();
        }

        let Some(backend) = &self.services.durable else {
            return Ok(());
        };

        let Some(mut stored) = backend.get_workflow_task(workflow_id).await? else {
            return Err(Problem::configuration(format!(
                "unknown execution: {workflow_id}"
            )));
        };

        if backend.is_approved(workflow_id).await? && !stored.is_terminal() {
            // Compensation: a granted elevation must not outlive its
            // execution.
            if let Some(revoke) = self.functions.get("grantor.revoke") {
                let call = grantor_types::workflow::CallTask {
                    call: "grantor.revoke".into(),
                    with: None,
                    base: Default::default(),
                };
                match revoke.execute(&mut stored, &call, &Value::Null).await {
                    Ok(CallOutcome::Output(_)) | Ok(CallOutcome::Suspend { .. }) => {
                        tracing::info!(workflow_id, "compensating revocation completed");
                    }
                    Err(e) => {
                        tracing::error!(workflow_id, error = %e, "compensating revocation failed");
                    }
                }
            }
        }

        stored.set_status(TaskStatus::Cancelled);
        stored.output = serde_json::json!({"reason": reason});
        backend.checkpoint(&stored).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Scheduled-signal pump
    // -----------------------------------------------------------------

    /// Poll the durable backend for scheduled signals that have come due
    /// and deliver them. No-op without a backend.
    pub async fn pump_due_signals(&self) -> Result<usize, Problem> {
        let Some(backend) = &self.services.durable else {
            return Ok(0);
        };
        let due = backend.due_signals(chrono::Utc::now()).await?;
        let count = due.len();
        for DueSignal {
            workflow_id,
            signal,
            ..
        } in due
        {
            tracing::info!(
                workflow_id = %workflow_id,
                kind = signal.kind(),
                "delivering scheduled signal"
            );
            if let Err(e) = self.handle_signal(&workflow_id, signal).await {
                tracing::error!(
                    workflow_id = %workflow_id,
                    error = %e,
                    "scheduled signal delivery failed"
                );
            }
        }
        Ok(count)
    }

    /// Spawn the background loop delivering due scheduled signals.
    pub fn spawn_signal_pump(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.pump_due_signals().await {
                            tracing::warn!(error = %e, "signal pump tick failed");
                        }
                    }
                }
            }
        })
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionInfo>, Problem> {
        match &self.services.durable {
            Some(backend) => backend.list_executions(filter).await,
            None => Ok(Vec::new()),
        }
    }

    /// Describe an execution, attaching the full task snapshot when it can
    /// be read within a short timeout. The describe half always answers
    /// from search attributes, so a slow snapshot read still yields status
    /// and start time.
    pub async fn get_execution(
        &self,
        workflow_id: &str,
    ) -> Result<Option<(ExecutionInfo, Option<WorkflowTask>)>, Problem> {
        let Some(backend) = &self.services.durable else {
            return Ok(None);
        };
        let snapshot = tokio::time::timeout(
            Duration::from_secs(2),
            backend.get_workflow_task(workflow_id),
        )
        .await
        .ok()
        .and_then(Result::ok)
        .flatten();

        let info = backend.describe(workflow_id).await?;
        Ok(info.map(|info| (info, snapshot)))
    }

    /// Turn a finished (or parked) task into the HTTP-facing response.
    pub fn to_response(task: &WorkflowTask) -> ElevateResponse {
        ElevateResponse {
            status: task.status,
            output: if task.output.is_null() {
                None
            } else {
                Some(task.output.clone())
            },
            url: None,
        }
    }

    pub async fn llm_request(&self, reason: &str) -> Result<ElevateStaticRequest, Problem> {
        match &self.llm {
            Some(llm) => llm.elevate_request(reason).await,
            None => Err(Problem::configuration(
                "no language model service is configured",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::unseal_task;
    use crate::testutil::{
        sample_role, sample_user, sample_workflow, service_fixture,
    };
    use crate::transport::UnsupportedTransport;
    use grantor_types::event::CloudEvent;
    use grantor_types::session::LocalSession;
    use serde_json::json;

    fn manager() -> (Arc<WorkflowManager>, crate::testutil::Fixture) {
        let (services, fixture) = service_fixture();
        let functions = Arc::new(FunctionRegistry::with_builtins(Arc::clone(&services)));
        let runner = WorkflowRunner::new(
            Arc::clone(&functions),
            Arc::new(UnsupportedTransport),
        );
        let catalog = Catalog::new(vec![sample_role()], vec![sample_workflow()]);
        (
            Arc::new(WorkflowManager::new(services, functions, runner, catalog)),
            fixture,
        )
    }

    fn static_request() -> ElevateStaticRequest {
        ElevateStaticRequest {
            role: "ops".into(),
            providers: vec!["aws".into()],
            workflow: String::new(),
            reason: "deploy hotfix".into(),
            duration: "1h".into(),
            identities: Vec::new(),
            session: None,
        }
    }

    #[test]
    fn resolve_request_resolves_role_and_defaults_providers() {
        let (manager, _) = manager();
        let mut raw = static_request();
        raw.providers.clear();
        let request = manager.resolve_request(&raw).unwrap();
        assert_eq!(request.providers, vec!["aws"]);
        assert_eq!(request.role.as_ref().unwrap().name, "ops");
    }

    #[test]
    fn resolve_request_rejects_unknown_role() {
        let (manager, _) = manager();
        let mut raw = static_request();
        raw.role = "ghost".into();
        let err = manager.resolve_request(&raw).unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_workflow_without_session_redirects_to_idp() {
        let (manager, _) = manager();
        let request = manager.resolve_request(&static_request()).unwrap();
        let ticket = manager.create_workflow(request).await.unwrap();
        assert!(ticket.url.starts_with("https://idp.test/authorize?state="));
        assert!(ticket.task.user.is_none());

        // The state round-trips back into the same workflow task.
        let state = ticket.url.split("state=").nth(1).unwrap();
        let restored = unseal_task(state, &crate::encoding::IdentityEncryptor).unwrap();
        assert_eq!(restored.workflow_id, ticket.task.workflow_id);
    }

    #[tokio::test]
    async fn create_workflow_with_valid_session_skips_login() {
        let (manager, _) = manager();
        let mut request = manager.resolve_request(&static_request()).unwrap();

        let session = grantor_types::session::Session {
            uuid: uuid::Uuid::new_v4(),
            user: sample_user(),
            access_token: "t".into(),
            refresh_token: String::new(),
            expiry: chrono::Utc::now() + chrono::Duration::hours(1),
        };
        let sealed = crate::encoding::seal_session(
            &session,
            &crate::encoding::IdentityEncryptor,
        )
        .unwrap();
        request.session = Some(LocalSession {
            version: 1,
            expiry: session.expiry,
            session: sealed,
        });

        let ticket = manager.create_workflow(request).await.unwrap();
        assert!(ticket.url.contains("/elevate/resume?state="));
        assert_eq!(ticket.task.user.as_ref().unwrap().email, "ada@example.com");
    }

    #[tokio::test]
    async fn full_elevation_run_suspends_at_approvals_then_completes() {
        let (manager, fixture) = manager();
        let request = manager.resolve_request(&static_request()).unwrap();
        let ticket = manager.create_workflow(request).await.unwrap();

        let mut task = ticket.task;
        task.set_user(sample_user());

        // First leg: validate + notify, then park at the approvals gate.
        let parked = manager.resume_workflow(task).await.unwrap();
        assert_eq!(parked.status, TaskStatus::Waiting);
        assert_eq!(parked.entrypoint, "approve");
        assert_eq!(fixture.slack.notifications.lock().unwrap().len(), 1);
        assert!(fixture.aws.grants.lock().unwrap().is_empty());

        // Approval arrives: resume from the gate with the event as input.
        let mut approved = parked.clone();
        approved.input =
            serde_json::to_value(CloudEvent::approval(true, "lead@example.com")).unwrap();
        approved.set_status(TaskStatus::Pending);
        let granted = manager.resume_workflow(approved).await.unwrap();

        // grant ran and the workflow is parked awaiting its scheduled
        // revocation; revoke has not run inline.
        assert_eq!(fixture.aws.grants.lock().unwrap().len(), 1);
        assert_eq!(fixture.scheduler.pending(), 1);
        assert_eq!(granted.status, TaskStatus::Waiting);
        assert_eq!(granted.entrypoint, "revoke");
        assert!(fixture.aws.revocations.lock().unwrap().is_empty());
        assert_eq!(granted.context["grants"]["aws"]["assignment"], json!("aws/ops"));
    }

    #[tokio::test]
    async fn denial_faults_the_workflow_without_granting() {
        let (manager, fixture) = manager();
        let request = manager.resolve_request(&static_request()).unwrap();
        let ticket = manager.create_workflow(request).await.unwrap();

        let mut task = ticket.task;
        task.set_user(sample_user());
        let parked = manager.resume_workflow(task).await.unwrap();

        let mut denied = parked;
        denied.input =
            serde_json::to_value(CloudEvent::approval(false, "lead@example.com")).unwrap();
        denied.set_status(TaskStatus::Pending);
        let finished = manager.resume_workflow(denied).await.unwrap();

        assert_eq!(finished.status, TaskStatus::Faulted);
        assert_eq!(finished.output["type"], json!("authorization"));
        assert!(fixture.aws.grants.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn revocation_leg_revokes_grant() {
        let (manager, fixture) = manager();
        let request = manager.resolve_request(&static_request()).unwrap();
        let ticket = manager.create_workflow(request).await.unwrap();
        let mut task = ticket.task;
        task.set_user(sample_user());

        let parked = manager.resume_workflow(task).await.unwrap();
        let mut approved = parked;
        approved.input =
            serde_json::to_value(CloudEvent::approval(true, "lead@example.com")).unwrap();
        approved.set_status(TaskStatus::Pending);
        let granted = manager.resume_workflow(approved).await.unwrap();
        assert_eq!(granted.entrypoint, "revoke");

        // Simulate the scheduler firing: resume into the revoke task.
        let mut revocation = granted.clone();
        revocation.input = Value::Null;
        revocation.set_status(TaskStatus::Pending);
        let done = manager.resume_workflow(revocation).await.unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.output["revoked"], json!(true));
        assert_eq!(fixture.aws.revocations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn llm_path_without_advisor_is_configuration_problem() {
        let (manager, _) = manager();
        let err = manager.llm_request("I need prod access").await.unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Configuration);
    }
}
