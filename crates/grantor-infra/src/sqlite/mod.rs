//! SQLite persistence: the durable execution store.

mod durable;
mod pool;

pub use durable::SqliteDurableBackend;
pub use pool::DatabasePool;
