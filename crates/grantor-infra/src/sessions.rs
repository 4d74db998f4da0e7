//! Filesystem-backed session manager and the CLI↔daemon rendezvous.
//!
//! Sessions live in a YAML file (`~/.config/grantor/sessions.yaml` by
//! default) keyed by provider. Writes are atomic (temp file + rename) and
//! serialized behind a mutex. `await_refresh` blocks on a notification
//! primitive (an in-process `Notify` plus a filesystem watcher for writes
//! from other processes), never on a busy poll.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use grantor_types::error::Problem;
use grantor_types::session::{LocalSession, LocalSessionConfig, SESSION_CONFIG_VERSION};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, Notify};

pub struct SessionManager {
    path: PathBuf,
    lock: Mutex<()>,
    changed: Arc<Notify>,
    /// Keeps the filesystem watcher alive for the manager's lifetime.
    _watcher: Option<RecommendedWatcher>,
}

impl SessionManager {
    /// Open (or create) the session store at `path`, watching its directory
    /// for out-of-process refreshes.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, Problem> {
        let path: PathBuf = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Problem::configuration(format!("cannot create session dir: {e}")))?;
        }

        let changed = Arc::new(Notify::new());
        let watcher = Self::spawn_watcher(&path, Arc::clone(&changed));

        Ok(Self {
            path,
            lock: Mutex::new(()),
            changed,
            _watcher: watcher,
        })
    }

    /// Default location: `~/.config/grantor/sessions.yaml`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home)
            .join(".config")
            .join("grantor")
            .join("sessions.yaml")
    }

    fn spawn_watcher(path: &Path, changed: Arc<Notify>) -> Option<RecommendedWatcher> {
        let watch_dir = path.parent()?.to_path_buf();
        let file_name = path.file_name()?.to_os_string();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            let Ok(event) = result else { return };
            let touched = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n == file_name.as_os_str()).unwrap_or(false));
            if touched {
                changed.notify_waiters();
            }
        })
        .ok()?;

        if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            tracing::warn!(error = %e, "session file watcher unavailable; cross-process refresh disabled");
            return None;
        }
        Some(watcher)
    }

    // -----------------------------------------------------------------
    // Reads & writes
    // -----------------------------------------------------------------

    pub async fn load(&self) -> Result<LocalSessionConfig, Problem> {
        let _guard = self.lock.lock().await;
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> Result<LocalSessionConfig, Problem> {
        if !self.path.exists() {
            return Ok(LocalSessionConfig::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Problem::runtime(format!("cannot read session file: {e}")))?;
        serde_yaml_ng::from_str(&raw)
            .map_err(|e| Problem::validation(format!("corrupt session file: {e}")))
    }

    /// Atomic write: serialize to a temp file in the same directory, then
    /// rename over the target.
    async fn write(&self, config: &LocalSessionConfig) -> Result<(), Problem> {
        let _guard = self.lock.lock().await;
        let yaml = serde_yaml_ng::to_string(config)
            .map_err(|e| Problem::runtime(format!("session serialization failed: {e}")))?;

        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)
            .map_err(|e| Problem::runtime(format!("cannot write session file: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Problem::runtime(format!("cannot replace session file: {e}")))?;

        self.changed.notify_waiters();
        Ok(())
    }

    pub async fn get_session(&self, provider: &str) -> Result<Option<LocalSession>, Problem> {
        Ok(self.load().await?.sessions.get(provider).cloned())
    }

    pub async fn put_session(
        &self,
        provider: &str,
        session: LocalSession,
    ) -> Result<(), Problem> {
        let mut config = self.load().await?;
        config.version = SESSION_CONFIG_VERSION;
        config.sessions.insert(provider.to_string(), session);
        self.write(&config).await?;
        tracing::info!(provider, "stored session");
        Ok(())
    }

    pub async fn remove_session(&self, provider: &str) -> Result<bool, Problem> {
        let mut config = self.load().await?;
        let removed = config.sessions.remove(provider).is_some();
        if removed {
            self.write(&config).await?;
            tracing::info!(provider, "removed session");
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------
    // Rendezvous
    // -----------------------------------------------------------------

    /// Block until the session file changes, then return the fresh config.
    /// Bounded by `timeout`.
    pub async fn await_refresh(&self, timeout: Duration) -> Result<LocalSessionConfig, Problem> {
        let mut notified = std::pin::pin!(self.changed.notified());
        notified.as_mut().enable();
        tokio::time::timeout(timeout, notified)
            .await
            .map_err(|_| Problem::timeout("timed out waiting for session refresh"))?;
        self.load().await
    }

    /// Block until `provider` has an unexpired session, bounded by
    /// `timeout`. This is the CLI's side of the login rendezvous: the
    /// browser callback lands on the local daemon, which writes the session
    /// file and wakes the waiter.
    pub async fn await_provider_refresh(
        &self,
        provider: &str,
        timeout: Duration,
    ) -> Result<LocalSession, Problem> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the notification before checking so a write between the
            // check and the wait is never lost.
            let mut notified = std::pin::pin!(self.changed.notified());
            notified.as_mut().enable();

            if let Some(session) = self.get_session(provider).await? {
                if !session.is_expired() {
                    return Ok(session);
                }
            }

            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| {
                    Problem::timeout(format!(
                        "timed out waiting for a session for provider '{provider}'"
                    ))
                })?;
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Err(Problem::timeout(format!(
                    "timed out waiting for a session for provider '{provider}'"
                )));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session(expires_in_hours: i64) -> LocalSession {
        LocalSession {
            version: 1,
            expiry: Utc::now() + chrono::Duration::hours(expires_in_hours),
            session: "sealed-blob".into(),
        }
    }

    #[tokio::test]
    async fn put_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().join("sessions.yaml")).unwrap();

        assert!(manager.get_session("google").await.unwrap().is_none());
        manager.put_session("google", session(8)).await.unwrap();
        assert!(manager.get_session("google").await.unwrap().is_some());

        assert!(manager.remove_session("google").await.unwrap());
        assert!(manager.get_session("google").await.unwrap().is_none());
        assert!(!manager.remove_session("google").await.unwrap());
    }

    #[tokio::test]
    async fn write_is_atomic_leaving_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.yaml");
        let manager = SessionManager::new(&path).unwrap();
        manager.put_session("google", session(8)).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext == "tmp")
                    .unwrap_or(false)
            })
            .collect();
        assert!(leftovers.is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn await_provider_refresh_wakes_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            Arc::new(SessionManager::new(dir.path().join("sessions.yaml")).unwrap());

        let waiter = Arc::clone(&manager);
        let handle = tokio::spawn(async move {
            waiter
                .await_provider_refresh("google", Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.put_session("google", session(8)).await.unwrap();

        let refreshed = handle.await.unwrap().unwrap();
        assert_eq!(refreshed.session, "sealed-blob");
    }

    #[tokio::test]
    async fn await_provider_refresh_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().join("sessions.yaml")).unwrap();

        let err = manager
            .await_provider_refresh("google", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn expired_session_does_not_satisfy_rendezvous() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().join("sessions.yaml")).unwrap();
        manager.put_session("google", session(-1)).await.unwrap();

        let err = manager
            .await_provider_refresh("google", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Timeout);
    }
}
