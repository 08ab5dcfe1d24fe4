//! End-to-end runs against a temporary SQLite database.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use migrate_core::config::MigrateConfig;
use migrate_core::error::MigrateError;
use migrate_core::migration::{DownOptions, MigrationStatus, UpOptions};
use migrate_core::{ChecksumValidator, LockFailure};
use migrate_runtime::{DatabaseAdapter, MigrationRunner, SqliteAdapter, StateTracker, Value};

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("migrations")).unwrap();
        Self { dir }
    }

    fn migrations_dir(&self) -> PathBuf {
        self.dir.path().join("migrations")
    }

    fn database_url(&self) -> String {
        format!("sqlite://{}", self.dir.path().join("app.db").display())
    }

    fn write(&self, name: &str, up: &str, down: &str) {
        fs::write(self.migrations_dir().join(format!("{}.up.sql", name)), up).unwrap();
        fs::write(self.migrations_dir().join(format!("{}.down.sql", name)), down).unwrap();
    }

    async fn runner(&self) -> MigrationRunner {
        let mut config = MigrateConfig::default_with_database_url(&self.database_url());
        config.migrations_dir = self.migrations_dir().display().to_string();
        MigrationRunner::connect(&config).await.unwrap()
    }
}

async fn table_exists(runner: &MigrationRunner, table: &str) -> bool {
    let out = runner
        .adapter()
        .execute_query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )
        .await
        .unwrap();
    out.rows[0].try_i64("n").unwrap() == 1
}

fn ledger(runner: &MigrationRunner) -> StateTracker {
    StateTracker::new(runner.adapter().clone())
}

fn three_tables(fx: &Fixture) {
    fx.write(
        "20260101000000_create_a",
        "CREATE TABLE a (id INTEGER PRIMARY KEY);",
        "DROP TABLE a;",
    );
    fx.write(
        "20260201000000_create_b",
        "CREATE TABLE b (id INTEGER PRIMARY KEY);",
        "DROP TABLE b;",
    );
    fx.write(
        "20260301000000_create_c",
        "CREATE TABLE c (id INTEGER PRIMARY KEY);",
        "DROP TABLE c;",
    );
}

#[tokio::test]
async fn test_apply_then_detect_edited_migration() {
    let fx = Fixture::new();
    let create_users = "CREATE TABLE users (\n    id INTEGER PRIMARY KEY,\n    name TEXT NOT NULL\n);\n";
    fx.write("20260101010101_create_users", create_users, "DROP TABLE users;");
    fx.write(
        "20260201010101_add_email",
        "ALTER TABLE users ADD COLUMN email TEXT;",
        "ALTER TABLE users DROP COLUMN email;",
    );
    let runner = fx.runner().await;

    let results = runner.up(&UpOptions::default()).await.unwrap();
    let names: Vec<_> = results.iter().map(|r| r.migration.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["20260101010101_create_users", "20260201010101_add_email"]
    );
    assert!(results.iter().all(|r| r.success));

    let applied = ledger(&runner).get_applied_migrations().await.unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|m| m.status == MigrationStatus::Success));
    let users = applied
        .iter()
        .find(|m| m.name == "20260101010101_create_users")
        .unwrap();
    assert_eq!(users.checksum, ChecksumValidator::new().calculate(create_users));
    assert!(runner.verify().await.unwrap().is_clean());

    // Nothing left to do
    assert!(runner.up(&UpOptions::default()).await.unwrap().is_empty());

    fx.write(
        "20260101010101_create_users",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
        "DROP TABLE users;",
    );
    let report = runner.verify().await.unwrap();
    assert_eq!(report.drifted.len(), 1);
    assert_eq!(report.drifted[0].name, "20260101010101_create_users");
    assert!(matches!(
        runner.verify_or_err().await,
        Err(MigrateError::ChecksumMismatch { .. })
    ));

    runner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_failed_migration_is_rolled_back_and_recorded() {
    let fx = Fixture::new();
    fx.write(
        "20260101000000_create_a",
        "CREATE TABLE a (id INTEGER PRIMARY KEY);",
        "DROP TABLE a;",
    );
    fx.write(
        "20260201000000_broken",
        "CREATE TABLE b (id INTEGER PRIMARY KEY);\nINSERT INTO no_such_table (id) VALUES (1);",
        "DROP TABLE b;",
    );
    fx.write(
        "20260301000000_create_c",
        "CREATE TABLE c (id INTEGER PRIMARY KEY);",
        "DROP TABLE c;",
    );
    let runner = fx.runner().await;

    let results = runner.up(&UpOptions::default()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert!(!results[1].success);
    let message = results[1].error_message().unwrap();
    assert!(message.contains("no_such_table"));

    // The partial work of the failed migration is gone, later ones never ran
    assert!(table_exists(&runner, "a").await);
    assert!(!table_exists(&runner, "b").await);
    assert!(!table_exists(&runner, "c").await);

    let applied = ledger(&runner).get_applied_migrations().await.unwrap();
    assert_eq!(applied.len(), 2);
    let failed = applied
        .iter()
        .find(|m| m.name == "20260201000000_broken")
        .unwrap();
    assert_eq!(failed.status, MigrationStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("no_such_table"));

    runner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_deferred_constraint_failure_at_commit_is_reported() {
    let fx = Fixture::new();
    fx.write(
        "20260101000000_create_users",
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        "DROP TABLE users;",
    );
    fx.write(
        "20260201000000_create_posts",
        "CREATE TABLE posts (\n    id INTEGER PRIMARY KEY,\n    \
         user_id INTEGER REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED\n);\n\
         INSERT INTO posts (user_id) VALUES (99);",
        "DROP TABLE posts;",
    );
    let runner = fx.runner().await;

    let results = runner.up(&UpOptions::default()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[1].error_message().unwrap().contains("FOREIGN KEY"));
    runner.disconnect().await.unwrap();

    // A fresh connection sees exactly what was reported
    let runner = fx.runner().await;
    assert!(table_exists(&runner, "users").await);
    assert!(!table_exists(&runner, "posts").await);

    let applied = ledger(&runner).get_applied_migrations().await.unwrap();
    assert_eq!(applied.len(), 2);
    let status_of = |name: &str| {
        applied
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.status)
            .unwrap()
    };
    assert_eq!(status_of("20260101000000_create_users"), MigrationStatus::Success);
    assert_eq!(status_of("20260201000000_create_posts"), MigrationStatus::Failed);

    runner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_count_then_rollback_most_recent() {
    let fx = Fixture::new();
    three_tables(&fx);
    let runner = fx.runner().await;

    let options = UpOptions {
        count: Some(2),
        ..Default::default()
    };
    assert_eq!(runner.up(&options).await.unwrap().len(), 2);
    assert!(table_exists(&runner, "b").await);
    assert!(!table_exists(&runner, "c").await);

    let status = runner.status().await.unwrap();
    assert_eq!(status.applied_count, 2);
    assert_eq!(status.pending_count, 1);
    assert_eq!(
        status.last_applied.unwrap().name,
        "20260201000000_create_b"
    );

    assert_eq!(runner.up(&UpOptions::default()).await.unwrap().len(), 1);

    let options = DownOptions {
        count: Some(2),
        ..Default::default()
    };
    let results = runner.down(&options).await.unwrap();
    let names: Vec<_> = results.iter().map(|r| r.migration.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["20260301000000_create_c", "20260201000000_create_b"]
    );
    assert!(results.iter().all(|r| r.success));

    assert!(table_exists(&runner, "a").await);
    assert!(!table_exists(&runner, "b").await);
    assert!(!table_exists(&runner, "c").await);

    let names = ledger(&runner).get_applied_names().await.unwrap();
    assert_eq!(names.len(), 1);
    assert!(names.contains("20260101000000_create_a"));

    runner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_up_and_down_to_target() {
    let fx = Fixture::new();
    three_tables(&fx);
    let runner = fx.runner().await;

    let options = UpOptions {
        to: Some("20260201000000_create_b".into()),
        ..Default::default()
    };
    assert_eq!(runner.up(&options).await.unwrap().len(), 2);
    assert!(!table_exists(&runner, "c").await);

    runner.up(&UpOptions::default()).await.unwrap();

    let options = DownOptions {
        to: Some("20260101000000".into()),
        ..Default::default()
    };
    assert_eq!(runner.down(&options).await.unwrap().len(), 2);
    assert!(table_exists(&runner, "a").await);
    assert!(!table_exists(&runner, "b").await);

    runner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_dry_run_leaves_database_untouched() {
    let fx = Fixture::new();
    three_tables(&fx);
    fx.write(
        "20260401000000_unbalanced",
        "CREATE TABLE d (id INTEGER PRIMARY KEY;",
        "DROP TABLE d;",
    );
    let runner = fx.runner().await;

    let options = UpOptions {
        dry_run: true,
        ..Default::default()
    };
    let results = runner.up(&options).await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(!results[3].success);
    assert!(results[3]
        .error_message()
        .unwrap()
        .contains("Unmatched parentheses"));

    assert!(!table_exists(&runner, "a").await);
    assert!(ledger(&runner)
        .get_applied_migrations()
        .await
        .unwrap()
        .is_empty());

    runner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_run_fails_fast_while_locked() {
    let fx = Fixture::new();
    three_tables(&fx);
    let runner = fx.runner().await;
    // Create the ledger before another process takes the lock
    runner.status().await.unwrap();

    let other = SqliteAdapter::new();
    other.connect(&fx.database_url()).await.unwrap();
    other.acquire_lock(12345, 30).await.unwrap();

    let err = runner.up(&UpOptions::default()).await.unwrap_err();
    assert_eq!(err.lock_failure(), Some(LockFailure::Busy));
    assert!(err.to_string().contains("Another migration may be in progress"));

    other.release_lock(12345).await.unwrap();
    other.disconnect().await.unwrap();

    assert_eq!(runner.up(&UpOptions::default()).await.unwrap().len(), 3);
    runner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_missing_down_file_blocks_every_command() {
    let fx = Fixture::new();
    fs::write(
        fx.migrations_dir().join("20260101000000_orphan.up.sql"),
        "CREATE TABLE orphan (id INTEGER);",
    )
    .unwrap();
    let runner = fx.runner().await;

    assert!(matches!(
        runner.up(&UpOptions::default()).await,
        Err(MigrateError::MigrationPair { .. })
    ));
    assert!(!table_exists(&runner, "orphan").await);
    runner.disconnect().await.unwrap();
}
