//! Application state wiring all services together.
//!
//! `AppState` pins the core seams to their infra implementations: AEAD
//! envelope crypto, the SQLite durable backend (when configured), the
//! matching scheduler flavour, the provider registry built from config,
//! and the workflow manager. Used by both the HTTP handlers and the CLI.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use grantor_core::elevate::{Catalog, WorkflowManager};
use grantor_core::encoding::Encryptor;
use grantor_core::functions::FunctionRegistry;
use grantor_core::scheduler::Scheduler;
use grantor_core::services::{BrokerUrls, Services};
use grantor_core::workflow::WorkflowRunner;
use grantor_infra::crypto::AesGcmEncryptor;
use grantor_infra::providers::build_provider;
use grantor_infra::scheduler::{DurableScheduler, LocalScheduler};
use grantor_infra::sessions::SessionManager;
use grantor_infra::sqlite::{DatabasePool, SqliteDurableBackend};
use grantor_infra::transport::HttpTransport;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

/// Request counters surfaced by `/metrics`.
#[derive(Default)]
pub struct Counters {
    pub total_requests: AtomicU64,
    pub elevate_requests: AtomicU64,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub manager: Arc<WorkflowManager>,
    pub services: Arc<Services>,
    pub sessions: Arc<SessionManager>,
    pub counters: Arc<Counters>,
    pub started_at: DateTime<Utc>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();

        // Envelope crypto: passphrase wins over key file when both are set.
        let encryptor: Arc<dyn Encryptor> = match &config.encryption.passphrase {
            Some(passphrase) => Arc::new(AesGcmEncryptor::from_passphrase(&SecretString::from(
                passphrase.clone(),
            ))?),
            None => Arc::new(AesGcmEncryptor::from_key_file(&config.key_file())?),
        };

        // Provider registry, built once from config.
        let mut registry = grantor_core::provider::ProviderRegistry::new();
        for provider_config in &config.providers {
            if !provider_config.enabled {
                continue;
            }
            match build_provider(provider_config.clone()) {
                Ok(provider) => registry.register(provider),
                Err(e) => {
                    tracing::warn!(
                        provider = %provider_config.name,
                        error = %e,
                        "skipping provider with invalid configuration"
                    );
                }
            }
        }
        let providers = Arc::new(registry);
        tracing::info!(providers = providers.len(), "provider registry built");

        // Durable backend + scheduler flavour.
        let mut durable: Option<Arc<dyn grantor_core::durable::DurableBackend>> = None;
        let scheduler: Arc<dyn Scheduler> = match &config.durable {
            Some(durable_config) => {
                let pool = DatabasePool::new(&durable_config.database_url).await?;
                let backend = Arc::new(SqliteDurableBackend::new(pool).await?);
                // Crash recovery before anything resumes.
                backend.recover_interrupted().await?;
                durable = Some(backend.clone());
                Arc::new(DurableScheduler::new(backend))
            }
            None => {
                let local = LocalScheduler::new().await?;
                local.initialize().await?;
                Arc::new(local)
            }
        };

        let services = Arc::new(Services {
            providers,
            scheduler,
            encryptor,
            durable,
            urls: BrokerUrls::new(config.server.public_url(), config.server.base_path.clone()),
        });

        let functions = Arc::new(FunctionRegistry::with_builtins(Arc::clone(&services)));

        let mut runner = WorkflowRunner::new(
            Arc::clone(&functions),
            Arc::new(HttpTransport::new()?),
        );
        if let Some(backend) = &services.durable {
            runner = runner.with_backend(Arc::clone(backend));
        }

        let catalog = Catalog::new(config.roles.clone(), config.collect_workflows()?);
        tracing::info!(
            roles = catalog.roles.len(),
            workflows = catalog.workflows.len(),
            durable = services.is_durable(),
            "catalog loaded"
        );

        let manager = Arc::new(WorkflowManager::new(
            Arc::clone(&services),
            functions,
            runner,
            catalog,
        ));

        // Scheduled-signal pump: delivers due revocations in durable mode.
        if services.is_durable() {
            manager.spawn_signal_pump(Duration::from_secs(5), shutdown.child_token());
        }

        let session_path = config
            .session_file
            .clone()
            .unwrap_or_else(SessionManager::default_path);
        let sessions = Arc::new(SessionManager::new(session_path)?);

        Ok(Self {
            config: Arc::new(config),
            manager,
            services,
            sessions,
            counters: Arc::new(Counters::default()),
            started_at: Utc::now(),
            shutdown,
        })
    }
}
