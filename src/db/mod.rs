//! Database layer: pool and the PostgreSQL store.

mod pool;
mod repositories;

pub use pool::{create_pool, run_migrations, DbPool};
pub use repositories::*;
