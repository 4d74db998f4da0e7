//! Test doubles shared across the crate's unit tests: recording provider
//! clients, a controllable scheduler and a canonical elevation fixture.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use grantor_types::error::Problem;
use grantor_types::provider::{
    NotificationRequest, ProviderCapability, ProviderConfig, ProviderPermission, ProviderRole,
};
use grantor_types::role::Role;
use grantor_types::session::Session;
use grantor_types::task::WorkflowTask;
use grantor_types::user::{AuthorizeRedirect, AuthorizeUser, User};
use grantor_types::workflow::{parse_document, Workflow};
use serde_json::json;
use uuid::Uuid;

use crate::encoding::IdentityEncryptor;
use crate::provider::{
    Authorizor, Notifier, Provider, ProviderClient, ProviderRegistry, Rbac,
};
use crate::scheduler::{Job, Scheduler};
use crate::services::{BrokerUrls, Services};

// ---------------------------------------------------------------------------
// Recording provider clients
// ---------------------------------------------------------------------------

pub struct RecordingRbac {
    pub name: String,
    pub fail_grants: bool,
    pub grants: Mutex<Vec<String>>,
    pub revocations: Mutex<Vec<String>>,
}

impl RecordingRbac {
    pub fn new(name: &str, fail_grants: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_grants,
            grants: Mutex::new(Vec::new()),
            revocations: Mutex::new(Vec::new()),
        })
    }
}

impl ProviderClient for RecordingRbac {
    fn rbac(&self) -> Option<&dyn Rbac> {
        Some(self)
    }
}

#[async_trait]
impl Rbac for RecordingRbac {
    async fn authorize_role(
        &self,
        user: &User,
        role: &Role,
    ) -> Result<serde_json::Value, Problem> {
        if self.fail_grants {
            return Err(Problem::communication(format!(
                "{}: grant endpoint unreachable",
                self.name
            )));
        }
        self.grants.lock().unwrap().push(user.email.clone());
        Ok(json!({"assignment": format!("{}/{}", self.name, role.name)}))
    }

    async fn revoke_role(
        &self,
        user: &User,
        _role: &Role,
        _metadata: &serde_json::Value,
    ) -> Result<serde_json::Value, Problem> {
        self.revocations.lock().unwrap().push(user.email.clone());
        Ok(json!({"removed": true}))
    }

    async fn list_roles(&self, _filter: Option<&str>) -> Result<Vec<ProviderRole>, Problem> {
        Ok(vec![ProviderRole {
            id: "ops".into(),
            name: "ops".into(),
            description: "operations".into(),
        }])
    }

    async fn get_role(&self, name: &str) -> Result<ProviderRole, Problem> {
        if name == "ops" {
            Ok(ProviderRole {
                id: "ops".into(),
                name: "ops".into(),
                description: "operations".into(),
            })
        } else {
            Err(Problem::validation(format!("unknown role: {name}")))
        }
    }

    async fn list_permissions(
        &self,
        _filter: Option<&str>,
    ) -> Result<Vec<ProviderPermission>, Problem> {
        Ok(Vec::new())
    }

    async fn get_permission(&self, name: &str) -> Result<ProviderPermission, Problem> {
        Err(Problem::validation(format!("unknown permission: {name}")))
    }
}

pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<NotificationRequest>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notifications: Mutex::new(Vec::new()),
        })
    }
}

impl ProviderClient for RecordingNotifier {
    fn notifier(&self) -> Option<&dyn Notifier> {
        Some(self)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, payload: &NotificationRequest) -> Result<(), Problem> {
        self.notifications.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Authorizor double: hands out a fixed user without any real redirect.
pub struct StaticAuthorizor {
    pub user: User,
}

impl ProviderClient for StaticAuthorizor {
    fn authorizor(&self) -> Option<&dyn Authorizor> {
        Some(self)
    }
}

#[async_trait]
impl Authorizor for StaticAuthorizor {
    async fn authorize_session(
        &self,
        request: &AuthorizeUser,
    ) -> Result<AuthorizeRedirect, Problem> {
        Ok(AuthorizeRedirect {
            url: format!("https://idp.test/authorize?state={}", request.state),
        })
    }

    async fn create_session(&self, _request: &AuthorizeUser) -> Result<Session, Problem> {
        Ok(Session {
            uuid: Uuid::new_v4(),
            user: self.user.clone(),
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expiry: Utc::now() + chrono::Duration::hours(8),
        })
    }

    async fn validate_session(&self, session: &Session) -> Result<(), Problem> {
        if session.is_expired() {
            return Err(Problem::authentication("session expired"));
        }
        Ok(())
    }

    async fn renew_session(&self, session: &Session) -> Result<Session, Problem> {
        let mut renewed = session.clone();
        renewed.expiry = Utc::now() + chrono::Duration::hours(8);
        Ok(renewed)
    }
}

// ---------------------------------------------------------------------------
// Controllable scheduler
// ---------------------------------------------------------------------------

pub struct TestScheduler {
    pub fail: bool,
    jobs: Mutex<Vec<Uuid>>,
}

impl TestScheduler {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            jobs: Mutex::new(Vec::new()),
        })
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl Scheduler for TestScheduler {
    async fn initialize(&self) -> Result<(), Problem> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Problem> {
        Ok(())
    }

    async fn add_job(&self, job: Job) -> Result<(), Problem> {
        if self.fail {
            return Err(Problem::configuration("scheduler unavailable"));
        }
        self.jobs.lock().unwrap().push(job.id);
        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> Result<(), Problem> {
        self.jobs.lock().unwrap().retain(|j| *j != id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture assembly
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub scheduler: Arc<TestScheduler>,
    pub aws: Arc<RecordingRbac>,
    pub gcp: Arc<RecordingRbac>,
    pub slack: Arc<RecordingNotifier>,
}

pub fn service_fixture() -> (Arc<Services>, Fixture) {
    service_fixture_with(false, None)
}

pub fn service_fixture_with(
    failing_scheduler: bool,
    failing_provider: Option<&str>,
) -> (Arc<Services>, Fixture) {
    let aws = RecordingRbac::new("aws", failing_provider == Some("aws"));
    let gcp = RecordingRbac::new("gcp", failing_provider == Some("gcp"));
    let slack = RecordingNotifier::new();
    let scheduler = TestScheduler::new(failing_scheduler);

    let mut registry = ProviderRegistry::new();
    registry.register(Provider::new(
        ProviderConfig {
            name: "aws".into(),
            provider: "aws".into(),
            capabilities: vec![ProviderCapability::Rbac],
            ..Default::default()
        },
        aws.clone(),
    ));
    registry.register(Provider::new(
        ProviderConfig {
            name: "gcp".into(),
            provider: "gcp".into(),
            capabilities: vec![ProviderCapability::Rbac],
            ..Default::default()
        },
        gcp.clone(),
    ));
    registry.register(Provider::new(
        ProviderConfig {
            name: "slack".into(),
            provider: "slack".into(),
            capabilities: vec![ProviderCapability::Notifier],
            ..Default::default()
        },
        slack.clone(),
    ));
    registry.register(Provider::new(
        ProviderConfig {
            name: "default".into(),
            provider: "oauth2".into(),
            capabilities: vec![ProviderCapability::Authorizor],
            ..Default::default()
        },
        Arc::new(StaticAuthorizor {
            user: sample_user(),
        }),
    ));

    let services = Arc::new(Services {
        providers: Arc::new(registry),
        scheduler: scheduler.clone(),
        encryptor: Arc::new(IdentityEncryptor),
        durable: None,
        urls: BrokerUrls::new("https://broker.test", "/api/v1"),
    });

    (
        services,
        Fixture {
            scheduler,
            aws,
            gcp,
            slack,
        },
    )
}

pub fn sample_user() -> User {
    User {
        email: "ada@example.com".into(),
        name: "Ada".into(),
        username: "ada".into(),
        ..Default::default()
    }
}

pub fn sample_role() -> Role {
    Role {
        name: "ops".into(),
        description: "operations".into(),
        providers: vec!["aws".into()],
        workflows: vec!["slack_approval".into()],
        enabled: true,
        ..Default::default()
    }
}

pub const CANONICAL_WORKFLOW_YAML: &str = r##"
document:
  name: slack_approval
  version: 0.1.0
do:
  - validate:
      call: grantor.validate
      with: { validator: static }
  - notify:
      call: grantor.notify
      with:
        provider: slack
        to: "#access"
        message: ${ "User \( $context.user.name ) wants \( $context.role.name )" }
        approvals: true
  - approve:
      call: grantor.approvals
      with: { provider: slack }
  - grant:
      call: grantor.authorize
      with: { revocation: revoke }
  - revoke:
      call: grantor.revoke
"##;

pub fn sample_workflow() -> Workflow {
    Workflow {
        name: "slack_approval".into(),
        description: "Slack-gated elevation".into(),
        authentication: "default".into(),
        workflow: Some(parse_document(CANONICAL_WORKFLOW_YAML).expect("canonical workflow parses")),
        enabled: true,
    }
}

/// A workflow task whose context is a resolved elevation request.
pub fn sample_elevation_context(with_user: bool) -> WorkflowTask {
    let context = json!({
        "role": sample_role(),
        "providers": ["aws"],
        "workflow": "slack_approval",
        "reason": "deploy hotfix",
        "duration": "1h",
    });
    let mut task = WorkflowTask::new(sample_workflow(), context);
    if with_user {
        task.set_user(sample_user());
    }
    task
}
