//! Migration runner with cross-process locking.
//!
//! Applies and rolls back migrations one at a time, each inside its own
//! transaction, while holding the global migration lock. A batch stops at the
//! first failure.

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use tracing::{error, info, warn};

use migrate_core::checksum::ChecksumValidator;
use migrate_core::config::MigrateConfig;
use migrate_core::error::{MigrateError, Result};
use migrate_core::migration::{
    AppliedMigration, Direction, DownOptions, Migration, MigrationResult, MigrationStatus,
    MigrationStatusSummary, UpOptions,
};

use crate::adapter::{self, DatabaseAdapter};
use crate::loader::MigrationLoader;
use crate::lock::LockManager;
use crate::state::StateTracker;

/// A ledger checksum that no longer matches the file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumDrift {
    pub name: String,
    pub expected: String,
    pub actual: String,
}

/// Result of comparing the ledger against the migration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Number of successfully applied migrations checked.
    pub checked: usize,
    pub drifted: Vec<ChecksumDrift>,
    /// Applied migrations whose files are gone.
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty() && self.missing.is_empty()
    }
}

/// Drives apply and rollback against one database.
pub struct MigrationRunner {
    adapter: Arc<dyn DatabaseAdapter>,
    loader: MigrationLoader,
    lock: LockManager,
    state: StateTracker,
    checksum: ChecksumValidator,
    destructive: Regex,
}

impl MigrationRunner {
    pub fn new(
        adapter: Arc<dyn DatabaseAdapter>,
        loader: MigrationLoader,
        lock: LockManager,
        state: StateTracker,
    ) -> Result<Self> {
        let destructive = Regex::new(r"(?i)\b(DROP|DELETE|TRUNCATE|ALTER\s+TABLE\s+\w+\s+DROP)\b")
            .map_err(|e| MigrateError::Config(format!("Invalid destructive pattern: {}", e)))?;

        Ok(Self {
            adapter,
            loader,
            lock,
            state,
            checksum: ChecksumValidator::new(),
            destructive,
        })
    }

    /// Connect to the configured database and wire up every component.
    pub async fn connect(config: &MigrateConfig) -> Result<Self> {
        let adapter = adapter::connect(&config.database.url).await?;
        let checksum = ChecksumValidator::new();
        let loader = MigrationLoader::new(&config.migrations_dir, checksum)?;
        let lock = LockManager::new(adapter.clone(), config.lock.key, config.lock.timeout_secs);
        let state = StateTracker::new(adapter.clone());
        Self::new(adapter, loader, lock, state)
    }

    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.adapter
    }

    pub fn loader(&self) -> &MigrationLoader {
        &self.loader
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.adapter.disconnect().await
    }

    /// Apply pending migrations in ascending order.
    ///
    /// Returns one result per migration attempted; the last one is the
    /// failure if the batch stopped early. Nothing pending returns an empty
    /// list without taking the lock.
    pub async fn up(&self, options: &UpOptions) -> Result<Vec<MigrationResult>> {
        self.state.ensure_table().await?;

        let pending = self.select_pending(options).await?;
        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(Vec::new());
        }
        info!(count = pending.len(), "Found pending migrations");

        if options.dry_run {
            return Ok(self.dry_run(pending));
        }

        let applied_by = current_user();
        self.lock
            .with_lock(|| {
                self.execute_migrations(
                    pending,
                    Direction::Up,
                    options.require_confirmation,
                    &applied_by,
                )
            })
            .await
    }

    /// Roll back the most recently applied migrations, newest first.
    pub async fn down(&self, options: &DownOptions) -> Result<Vec<MigrationResult>> {
        self.state.ensure_table().await?;

        let targets = self.select_rollback(options).await?;
        if targets.is_empty() {
            info!("No migrations to roll back");
            return Ok(Vec::new());
        }
        info!(count = targets.len(), "Rolling back migrations");

        let applied_by = current_user();
        self.lock
            .with_lock(|| {
                self.execute_migrations(
                    targets,
                    Direction::Down,
                    options.require_confirmation,
                    &applied_by,
                )
            })
            .await
    }

    /// The migrations `up` would run with these options, without running them.
    pub async fn pending(&self, options: &UpOptions) -> Result<Vec<Migration>> {
        self.state.ensure_table().await?;
        self.select_pending(options).await
    }

    /// The migrations `down` would roll back with these options.
    pub async fn rollback_plan(&self, options: &DownOptions) -> Result<Vec<Migration>> {
        self.state.ensure_table().await?;
        self.select_rollback(options).await
    }

    /// Applied and pending migrations.
    pub async fn status(&self) -> Result<MigrationStatusSummary> {
        self.state.ensure_table().await?;
        let applied = self.state.get_applied_migrations().await?;
        let names = applied.iter().map(|m| m.name.clone()).collect();
        let pending = self.loader.load_pending(&names)?;
        Ok(MigrationStatusSummary::new(applied, pending))
    }

    /// Compare every successfully applied migration with its file on disk.
    pub async fn verify(&self) -> Result<VerifyReport> {
        self.state.ensure_table().await?;

        let mut report = VerifyReport::default();
        for applied in self.successful_rows().await? {
            report.checked += 1;
            match self.loader.load_by_name(&applied.name)? {
                None => {
                    warn!(migration = %applied.name, "Applied migration file is missing");
                    report.missing.push(applied.name);
                }
                Some(migration) if migration.checksum != applied.checksum => {
                    warn!(migration = %applied.name, "Checksum drift detected");
                    report.drifted.push(ChecksumDrift {
                        name: applied.name,
                        expected: applied.checksum,
                        actual: migration.checksum,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(report)
    }

    /// Like [`verify`](Self::verify), but fails on the first problem.
    pub async fn verify_or_err(&self) -> Result<()> {
        self.state.ensure_table().await?;

        for applied in self.successful_rows().await? {
            let migration = self
                .loader
                .load_by_name(&applied.name)?
                .ok_or_else(|| MigrateError::MigrationFileNotFound(applied.name.clone()))?;
            self.checksum
                .validate_or_err(&applied.name, &applied.checksum, &migration.up_sql)?;
        }
        Ok(())
    }

    /// Whether the SQL contains statements that drop or delete data.
    pub fn is_destructive(&self, sql: &str) -> bool {
        self.destructive.is_match(sql)
    }

    async fn successful_rows(&self) -> Result<Vec<AppliedMigration>> {
        Ok(self
            .state
            .get_applied_migrations()
            .await?
            .into_iter()
            .filter(|m| m.status == MigrationStatus::Success)
            .collect())
    }

    async fn select_pending(&self, options: &UpOptions) -> Result<Vec<Migration>> {
        let applied = self.state.get_applied_names().await?;
        let all = self.loader.load_all()?;

        let candidates = match options.to.as_deref() {
            Some(target) => {
                let end = all
                    .iter()
                    .position(|m| m.matches(target))
                    .ok_or_else(|| MigrateError::MigrationFileNotFound(target.to_string()))?;
                &all[..=end]
            }
            None => &all[..],
        };

        let mut pending: Vec<Migration> = candidates
            .iter()
            .filter(|m| !applied.contains(&m.name))
            .cloned()
            .collect();
        if let Some(count) = options.count {
            pending.truncate(count);
        }
        Ok(pending)
    }

    async fn select_rollback(&self, options: &DownOptions) -> Result<Vec<Migration>> {
        let applied = self.state.get_applied_migrations().await?;

        let selected: Vec<&AppliedMigration> = match options.to.as_deref() {
            Some(target) => {
                let end = applied
                    .iter()
                    .position(|m| is_target(&m.name, target))
                    .ok_or_else(|| {
                        MigrateError::Validation(format!(
                            "Target migration is not applied: {}",
                            target
                        ))
                    })?;
                let newer = applied[..end].iter();
                match options.count {
                    Some(count) => newer.take(count).collect(),
                    None => newer.collect(),
                }
            }
            None => applied.iter().take(options.count.unwrap_or(1)).collect(),
        };

        // Every file must exist before anything is rolled back
        selected
            .into_iter()
            .map(|row| {
                self.loader
                    .load_by_name(&row.name)?
                    .ok_or_else(|| MigrateError::MigrationFileNotFound(row.name.clone()))
            })
            .collect()
    }

    async fn execute_migrations(
        &self,
        migrations: Vec<Migration>,
        direction: Direction,
        require_confirmation: bool,
        applied_by: &str,
    ) -> Result<Vec<MigrationResult>> {
        let mut results = Vec::with_capacity(migrations.len());

        for migration in migrations {
            if require_confirmation && self.is_destructive(migration.sql(direction)) {
                warn!(
                    migration = %migration.name,
                    direction = %direction,
                    "Destructive operation detected"
                );
            }

            let result = self.execute_one(migration, direction, applied_by).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }

        Ok(results)
    }

    async fn execute_one(
        &self,
        migration: Migration,
        direction: Direction,
        applied_by: &str,
    ) -> MigrationResult {
        info!(migration = %migration.name, direction = %direction, "Executing migration");
        let started = Instant::now();

        match self
            .run_in_transaction(&migration, direction, applied_by, started)
            .await
        {
            Ok(()) => {
                let duration_ms = elapsed_ms(started);
                info!(
                    migration = %migration.name,
                    direction = %direction,
                    duration_ms,
                    "Migration completed"
                );
                MigrationResult::succeeded(migration, direction, duration_ms)
            }
            Err(e) => {
                if let Err(rollback_err) = self.adapter.rollback().await {
                    warn!(migration = %migration.name, error = %rollback_err, "Rollback failed");
                }
                let duration_ms = elapsed_ms(started);
                error!(
                    migration = %migration.name,
                    direction = %direction,
                    error = %e,
                    "Migration failed"
                );

                if direction == Direction::Up {
                    if let Err(mark_err) = self
                        .state
                        .mark_failed(
                            &migration.name,
                            &migration.checksum,
                            duration_ms,
                            &e.to_string(),
                            applied_by,
                        )
                        .await
                    {
                        warn!(migration = %migration.name, error = %mark_err, "Could not record failure");
                    }
                }

                MigrationResult::failed(migration, direction, duration_ms, e)
            }
        }
    }

    async fn run_in_transaction(
        &self,
        migration: &Migration,
        direction: Direction,
        applied_by: &str,
        started: Instant,
    ) -> Result<()> {
        self.adapter.begin_transaction().await?;
        self.adapter
            .execute_query(migration.sql(direction), &[])
            .await?;

        match direction {
            Direction::Up => {
                self.state
                    .mark_applied(
                        &migration.name,
                        &migration.checksum,
                        elapsed_ms(started),
                        applied_by,
                    )
                    .await?
            }
            Direction::Down => self.state.mark_rolled_back(&migration.name).await?,
        }

        self.adapter.commit().await
    }

    fn dry_run(&self, migrations: Vec<Migration>) -> Vec<MigrationResult> {
        migrations
            .into_iter()
            .map(|migration| {
                info!(migration = %migration.name, "[DRY-RUN] Would execute migration");
                let started = Instant::now();

                if self.is_destructive(&migration.up_sql) {
                    warn!(migration = %migration.name, "[DRY-RUN] Destructive operation detected");
                }

                match validate_sql(&migration.up_sql) {
                    Ok(()) => {
                        MigrationResult::succeeded(migration, Direction::Up, elapsed_ms(started))
                    }
                    Err(e) => MigrationResult::failed(
                        migration,
                        Direction::Up,
                        elapsed_ms(started),
                        e,
                    ),
                }
            })
            .collect()
    }
}

/// Static checks run by a dry run.
fn validate_sql(sql: &str) -> Result<()> {
    let open = sql.matches('(').count();
    let close = sql.matches(')').count();
    if open != close {
        return Err(MigrateError::Validation("Unmatched parentheses".into()));
    }
    Ok(())
}

/// Whether a ledger name is the target, given as a full name or a timestamp.
fn is_target(name: &str, target: &str) -> bool {
    name == target
        || name
            .strip_prefix(target)
            .is_some_and(|rest| rest.starts_with('_'))
}

/// Identity recorded as `applied_by`.
fn current_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
