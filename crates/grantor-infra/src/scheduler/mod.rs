//! Scheduler implementations: local at-time jobs and durable signal rows.

mod durable;
mod local;

pub use durable::DurableScheduler;
pub use local::LocalScheduler;
