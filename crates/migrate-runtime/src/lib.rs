//! Migration runtime: database adapters, the migration lock, the ledger and
//! the runner that ties them together.

pub mod adapter;
pub mod loader;
pub mod lock;
pub mod runner;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{
    DatabaseAdapter, MySqlAdapter, PostgresAdapter, QueryOutput, Row, SqliteAdapter, Value,
};
pub use loader::MigrationLoader;
pub use lock::LockManager;
pub use runner::{ChecksumDrift, MigrationRunner, VerifyReport};
pub use state::StateTracker;
