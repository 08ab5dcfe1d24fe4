//! Migration data model shared by the loader, the ledger and the runner.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// A migration loaded from a `.up.sql` / `.down.sql` file pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    /// Base file name, e.g. `20260131153000_create_users`.
    pub name: String,
    /// Leading 14 digits of the name (YYYYMMDDHHMMSS).
    pub timestamp: i64,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
    #[serde(skip)]
    pub up_sql: String,
    #[serde(skip)]
    pub down_sql: String,
    /// SHA-256 of `up_sql`.
    pub checksum: String,
}

impl Migration {
    /// SQL body for the given direction.
    pub fn sql(&self, direction: Direction) -> &str {
        match direction {
            Direction::Up => &self.up_sql,
            Direction::Down => &self.down_sql,
        }
    }

    /// Whether `target` names this migration, either by full name or by timestamp.
    pub fn matches(&self, target: &str) -> bool {
        self.name == target || self.timestamp.to_string() == target
    }
}

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status recorded in the `migrations_history` ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Success,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Success => "SUCCESS",
            MigrationStatus::Failed => "FAILED",
            MigrationStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SUCCESS" => Ok(MigrationStatus::Success),
            "FAILED" => Ok(MigrationStatus::Failed),
            "ROLLED_BACK" => Ok(MigrationStatus::RolledBack),
            other => Err(MigrateError::Validation(format!(
                "unknown migration status '{}'",
                other
            ))),
        }
    }
}

/// A row of the `migrations_history` ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    pub id: i64,
    pub name: String,
    pub applied_at: NaiveDateTime,
    pub applied_by: String,
    pub checksum: String,
    pub duration_ms: i64,
    pub status: MigrationStatus,
    pub error_message: Option<String>,
}

/// Outcome of executing (or validating) a single migration.
#[derive(Debug)]
pub struct MigrationResult {
    pub migration: Migration,
    pub direction: Direction,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<MigrateError>,
}

impl MigrationResult {
    pub fn succeeded(migration: Migration, direction: Direction, duration_ms: u64) -> Self {
        Self {
            migration,
            direction,
            duration_ms,
            success: true,
            error: None,
        }
    }

    pub fn failed(
        migration: Migration,
        direction: Direction,
        duration_ms: u64,
        error: MigrateError,
    ) -> Self {
        Self {
            migration,
            direction,
            duration_ms,
            success: false,
            error: Some(error),
        }
    }

    /// Error message, if the migration failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Options for applying pending migrations.
#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    /// Apply at most this many migrations.
    pub count: Option<usize>,
    /// Stop after this migration (name or timestamp), inclusive.
    pub to: Option<String>,
    /// Validate without executing.
    pub dry_run: bool,
    /// Warn about destructive statements before running them.
    pub require_confirmation: bool,
}

/// Options for rolling back applied migrations.
#[derive(Debug, Clone, Default)]
pub struct DownOptions {
    /// Roll back this many migrations (default 1).
    pub count: Option<usize>,
    /// Roll back everything applied after this migration (name or timestamp).
    pub to: Option<String>,
    /// Warn about destructive statements before running them.
    pub require_confirmation: bool,
}

/// Snapshot of applied and pending migrations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatusSummary {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<Migration>,
    pub applied_count: usize,
    pub pending_count: usize,
    pub last_applied: Option<AppliedMigration>,
}

impl MigrationStatusSummary {
    pub fn new(applied: Vec<AppliedMigration>, pending: Vec<Migration>) -> Self {
        Self {
            applied_count: applied.len(),
            pending_count: pending.len(),
            last_applied: applied.first().cloned(),
            applied,
            pending,
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}
