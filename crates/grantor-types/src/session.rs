//! Session envelopes.
//!
//! Two shapes exist: the *remote* [`Session`] carrying tokens, which never
//! leaves the server side in cleartext, and the *portable* [`LocalSession`]
//! whose `session` field is the sealed remote session. A local session is
//! safe to place in URL state, a bearer header, a cookie or on disk; without
//! the encryption service key it exposes nothing but an expiry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::User;

/// Current version of the on-disk session file format.
pub const SESSION_CONFIG_VERSION: u32 = 1;

/// Server-side session established after an identity-provider callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub uuid: Uuid,
    pub user: User,
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now()
    }
}

/// Portable session wrapper: versioned, with the remote session sealed into
/// an opaque string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSession {
    pub version: u32,
    pub expiry: DateTime<Utc>,
    /// Sealed remote [`Session`] (encode-and-encrypt envelope).
    pub session: String,
}

impl LocalSession {
    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now()
    }
}

/// `POST /sessions` body used by the local agent to store a session handed
/// back from the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateRequest {
    pub provider: String,
    /// Encoded local session envelope.
    pub session: String,
}

/// The YAML document persisted at `~/.config/grantor/sessions.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSessionConfig {
    #[serde(default)]
    pub version: u32,
    /// Sessions keyed by provider name.
    #[serde(default)]
    pub sessions: BTreeMap<String, LocalSession>,
}

impl LocalSessionConfig {
    pub fn new() -> Self {
        Self {
            version: SESSION_CONFIG_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}
