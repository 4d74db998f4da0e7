//! Minimal broker configuration.
//!
//! One YAML file holds the server settings, the envelope key source and
//! the role/provider/workflow catalogs. Workflow documents can be inlined
//! or discovered from a directory of YAML files.

use std::path::{Path, PathBuf};

use grantor_types::role::Role;
use grantor_types::provider::ProviderConfig;
use grantor_types::workflow::{parse_document, Workflow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Presence of a database URL switches the broker into durable mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<DurableConfig>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    /// Directory of workflow document YAML files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,
    /// Session file override (defaults to `~/.config/grantor/sessions.yaml`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
    /// Broker origin the agent-mode commands talk to.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable origin used in callback URLs.
    #[serde(default)]
    pub public_url: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
            base_path: default_base_path(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn public_url(&self) -> String {
        if self.public_url.is_empty() {
            format!("http://{}:{}", self.host, self.port)
        } else {
            self.public_url.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Path to a hex key file; generated on first use when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Alternatively derive the key from a passphrase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableConfig {
    pub database_url: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/api/v1".to_string()
}

fn default_broker_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            encryption: EncryptionConfig::default(),
            durable: None,
            roles: Vec::new(),
            providers: Vec::new(),
            workflows: Vec::new(),
            workflows_dir: None,
            session_file: None,
            broker_url: default_broker_url(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path, `GRANTOR_CONFIG`, or
    /// `~/.config/grantor/config.yaml`; defaults when none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var("GRANTOR_CONFIG") {
                Ok(env_path) => Some(PathBuf::from(env_path)),
                Err(_) => {
                    let default = Self::default_path();
                    default.exists().then_some(default)
                }
            },
        };

        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(&path)?;
        let config: AppConfig = serde_yaml_ng::from_str(&raw)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home)
            .join(".config")
            .join("grantor")
            .join("config.yaml")
    }

    pub fn key_file(&self) -> PathBuf {
        self.encryption.key_file.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Path::new(&home)
                .join(".config")
                .join("grantor")
                .join("envelope.key")
        })
    }

    /// All workflows: the inline list plus any discovered documents.
    pub fn collect_workflows(&self) -> anyhow::Result<Vec<Workflow>> {
        let mut workflows = self.workflows.clone();

        if let Some(dir) = &self.workflows_dir {
            let entries = std::fs::read_dir(dir)?;
            for entry in entries.flatten() {
                let path = entry.path();
                let is_yaml = path
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false);
                if !is_yaml {
                    continue;
                }
                let raw = std::fs::read_to_string(&path)?;
                match parse_document(&raw) {
                    Ok(document) => workflows.push(Workflow {
                        name: document.document.name.clone(),
                        description: String::new(),
                        authentication: "default".into(),
                        workflow: Some(document),
                        enabled: true,
                    }),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping invalid workflow document");
                    }
                }
            }
        }

        Ok(workflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.server.base_path, "/api/v1");
        assert!(config.durable.is_none());
    }

    #[test]
    fn parses_full_config() {
        let yaml = r#"
server:
  host: 0.0.0.0
  port: 9090
  public_url: https://broker.example.com
durable:
  database_url: sqlite:///var/lib/grantor/grantor.db
roles:
  - name: ops
    providers: [aws]
    workflows: [slack_approval]
providers:
  - name: slack
    provider: slack
    capabilities: [notifier]
    config: { token: xoxb-1 }
"#;
        let config: AppConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.roles[0].name, "ops");
        assert!(config.durable.is_some());
        assert_eq!(config.server.public_url(), "https://broker.example.com");
    }

    #[test]
    fn collects_workflows_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("approval.yaml"),
            "document: { name: approval }\ndo:\n  - ok: { set: { done: true } }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = AppConfig {
            workflows_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let workflows = config.collect_workflows().unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].name, "approval");
    }
}
