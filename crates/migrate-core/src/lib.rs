pub mod checksum;
pub mod config;
pub mod error;
pub mod migration;

pub use checksum::ChecksumValidator;
pub use config::{DatabaseKind, MigrateConfig};
pub use error::{LockFailure, MigrateError, Result};
pub use migration::{
    AppliedMigration, Direction, DownOptions, Migration, MigrationResult, MigrationStatus,
    MigrationStatusSummary, UpOptions,
};
