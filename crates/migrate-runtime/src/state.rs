//! Reads and writes the `migrations_history` ledger.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use migrate_core::error::Result;
use migrate_core::migration::{AppliedMigration, MigrationStatus};

use crate::adapter::{DatabaseAdapter, Row, Value, MIGRATIONS_TABLE};

/// Ledger access for one adapter.
///
/// The ledger holds the current state per migration name: applying inserts a
/// row, rolling back deletes it.
pub struct StateTracker {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl StateTracker {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn ensure_table(&self) -> Result<()> {
        self.adapter.ensure_migrations_table().await
    }

    /// All ledger rows, most recently applied first.
    pub async fn get_applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let sql = format!(
            "SELECT id, name, applied_at, applied_by, checksum, duration_ms, status, error_message \
             FROM {} ORDER BY applied_at DESC, id DESC",
            MIGRATIONS_TABLE
        );
        let output = self.adapter.execute_query(&sql, &[]).await?;
        output.rows.iter().map(applied_from_row).collect()
    }

    pub async fn get_applied_names(&self) -> Result<HashSet<String>> {
        Ok(self
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    pub async fn mark_applied(
        &self,
        name: &str,
        checksum: &str,
        duration_ms: u64,
        applied_by: &str,
    ) -> Result<()> {
        self.insert(
            name,
            checksum,
            duration_ms,
            applied_by,
            MigrationStatus::Success,
            None,
        )
        .await?;
        debug!(migration = %name, "Recorded migration as applied");
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        name: &str,
        checksum: &str,
        duration_ms: u64,
        error_message: &str,
        applied_by: &str,
    ) -> Result<()> {
        self.insert(
            name,
            checksum,
            duration_ms,
            applied_by,
            MigrationStatus::Failed,
            Some(error_message),
        )
        .await?;
        debug!(migration = %name, "Recorded migration as failed");
        Ok(())
    }

    /// Remove the ledger row for `name`.
    pub async fn mark_rolled_back(&self, name: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE name = {}",
            MIGRATIONS_TABLE,
            self.adapter.kind().placeholder(1)
        );
        self.adapter
            .execute_query(&sql, &[Value::from(name)])
            .await?;
        debug!(migration = %name, "Removed migration from ledger");
        Ok(())
    }

    pub async fn get_last_applied(&self) -> Result<Option<AppliedMigration>> {
        Ok(self.get_applied_migrations().await?.into_iter().next())
    }

    async fn insert(
        &self,
        name: &str,
        checksum: &str,
        duration_ms: u64,
        applied_by: &str,
        status: MigrationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let kind = self.adapter.kind();
        let placeholders: Vec<String> = (1..=6).map(|i| kind.placeholder(i)).collect();
        let sql = format!(
            "INSERT INTO {} (name, applied_by, checksum, duration_ms, status, error_message) \
             VALUES ({})",
            MIGRATIONS_TABLE,
            placeholders.join(", ")
        );

        self.adapter
            .execute_query(
                &sql,
                &[
                    Value::from(name),
                    Value::from(applied_by),
                    Value::from(checksum),
                    Value::from(duration_ms),
                    Value::from(status.as_str()),
                    Value::from(error_message),
                ],
            )
            .await?;
        Ok(())
    }
}

fn applied_from_row(row: &Row) -> Result<AppliedMigration> {
    Ok(AppliedMigration {
        id: row.try_i64("id")?,
        name: row.try_string("name")?,
        applied_at: row.try_timestamp("applied_at")?,
        applied_by: row.try_string("applied_by")?,
        checksum: row.try_string("checksum")?,
        duration_ms: row.try_i64("duration_ms")?,
        status: row.try_string("status")?.parse()?,
        error_message: row.try_opt_string("error_message")?,
    })
}
