//! grantor-infra: concrete backends for the broker's seams.
//!
//! AEAD envelope crypto, the SQLite durable execution store, local and
//! durable schedulers, OAuth2/Slack/memory/remote provider clients, the
//! filesystem session manager and the reqwest call transport.

pub mod crypto;
pub mod providers;
pub mod scheduler;
pub mod sessions;
pub mod sqlite;
pub mod transport;
