//! Session extraction middleware.
//!
//! A request can carry a local session in several places; they are tried
//! in order: per-provider cookies (the `grantor_active` cookie naming the
//! active provider), `Authorization: Bearer`, then `X-API-Key`. Every
//! candidate is decoded as a local-session envelope and its inner remote
//! session decrypted; failures surface as 401 and clear no state.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use grantor_core::encoding::{decode_local_session, unseal_session};
use grantor_types::error::Problem;
use grantor_types::session::{LocalSession, Session};

use crate::http::error::ApiError;
use crate::state::AppState;

/// Cookie carrying the active provider name.
pub const ACTIVE_COOKIE: &str = "grantor_active";
/// Prefix for per-provider session cookies.
pub const SESSION_COOKIE_PREFIX: &str = "grantor_session_";

/// An authenticated caller: the decrypted remote session plus the portable
/// envelope it arrived in.
pub struct SessionAuth {
    pub session: Session,
    pub local: LocalSession,
    /// Which provider authenticated the caller, when known.
    pub provider: Option<String>,
}

/// Optional flavour: `None` when no credential is present, 401 only when a
/// credential is present but invalid.
pub struct MaybeSession(pub Option<SessionAuth>);

fn cookies(parts: &Parts) -> Vec<(String, String)> {
    parts
        .headers
        .get_all("cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Candidate encoded sessions in precedence order.
fn candidates(parts: &Parts) -> Vec<(Option<String>, String)> {
    let mut found = Vec::new();
    let cookie_pairs = cookies(parts);

    let active = cookie_pairs
        .iter()
        .find(|(name, _)| name == ACTIVE_COOKIE)
        .map(|(_, value)| value.clone());

    // The active provider's cookie first, then any other session cookies.
    let mut provider_cookies: Vec<(String, String)> = cookie_pairs
        .iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(SESSION_COOKIE_PREFIX)
                .map(|provider| (provider.to_string(), value.clone()))
        })
        .collect();
    provider_cookies.sort_by_key(|(provider, _)| Some(provider.clone()) != active);
    for (provider, value) in provider_cookies {
        found.push((Some(provider), value));
    }

    if let Some(auth) = parts
        .headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        found.push((None, auth.trim().to_string()));
    }

    if let Some(key) = parts
        .headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
    {
        found.push((None, key.trim().to_string()));
    }

    found
}

fn authenticate(state: &AppState, parts: &Parts) -> Result<Option<SessionAuth>, Problem> {
    let candidates = candidates(parts);
    if candidates.is_empty() {
        return Ok(None);
    }

    let mut last_error = Problem::authentication("no valid session credential");
    for (provider, encoded) in candidates {
        let local = match decode_local_session(&encoded) {
            Ok(local) => local,
            Err(e) => {
                last_error = Problem::authentication(e.detail);
                continue;
            }
        };
        if local.is_expired() {
            last_error = Problem::authentication("session expired");
            continue;
        }
        match unseal_session(&local, state.services.encryptor.as_ref()) {
            Ok(session) => {
                return Ok(Some(SessionAuth {
                    session,
                    local,
                    provider,
                }));
            }
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match authenticate(state, parts) {
            Ok(Some(auth)) => Ok(auth),
            Ok(None) => Err(ApiError(Problem::authentication(
                "missing session credential; provide a session cookie, bearer token or X-API-Key",
            ))),
            Err(problem) => Err(ApiError(problem)),
        }
    }
}

impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match authenticate(state, parts) {
            Ok(auth) => Ok(MaybeSession(auth)),
            Err(problem) => Err(ApiError(problem)),
        }
    }
}
