//! Shared service handles threaded through functions and the orchestrator.

use std::sync::Arc;

use grantor_types::error::Problem;
use grantor_types::task::WorkflowTask;

use crate::durable::DurableBackend;
use crate::encoding::{seal_task, Encryptor};
use crate::provider::ProviderRegistry;
use crate::scheduler::Scheduler;

/// Everything a built-in function or the orchestrator needs to reach:
/// providers, the revocation scheduler, the sealing service, the optional
/// durable backend and the broker's public URLs.
pub struct Services {
    pub providers: Arc<ProviderRegistry>,
    pub scheduler: Arc<dyn Scheduler>,
    pub encryptor: Arc<dyn Encryptor>,
    pub durable: Option<Arc<dyn DurableBackend>>,
    pub urls: BrokerUrls,
}

impl Services {
    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }
}

/// Public URL surface of the broker, used to mint callback links.
#[derive(Debug, Clone)]
pub struct BrokerUrls {
    /// Externally reachable origin, e.g. `https://broker.example.com`.
    pub public_url: String,
    /// API base path, default `/api/v1`.
    pub api_base_path: String,
}

impl BrokerUrls {
    pub fn new(public_url: impl Into<String>, api_base_path: impl Into<String>) -> Self {
        Self {
            public_url: trim_trailing_slash(public_url.into()),
            api_base_path: api_base_path.into(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}{}", self.public_url, self.api_base_path, path)
    }

    /// The URL that resumes a sealed workflow task.
    pub fn resume_url(
        &self,
        task: &WorkflowTask,
        encryptor: &dyn Encryptor,
    ) -> Result<String, Problem> {
        let state = seal_task(task, encryptor)?;
        Ok(format!("{}?state={}", self.api("/elevate/resume"), state))
    }

    /// OAuth callback for an identity provider.
    pub fn auth_callback_url(&self, provider: &str) -> String {
        self.api(&format!("/auth/callback/{provider}"))
    }

    /// Login entry for an identity provider.
    pub fn auth_request_url(&self, provider: &str) -> String {
        self.api(&format!("/auth/request/{provider}"))
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
