//! Observability bootstrap for grantor binaries.

pub mod tracing_setup;
