//! SQLite adapter.
//!
//! SQLite has no advisory locks. The migration lock is an exclusive write
//! transaction (`BEGIN EXCLUSIVE`) held for the whole run, so the timeout is
//! ignored and a second process fails immediately with a busy error.
//! While that lock is held, per-migration transactions become savepoints.
//! Committing one commits the lock transaction and begins a new exclusive
//! one, so a migration's work is durable before the next one starts.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow,
};
use sqlx::{Column, ConnectOptions, Connection, Row as _, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use migrate_core::config::DatabaseKind;
use migrate_core::error::{LockFailure, MigrateError, Result};

use super::{
    is_blank_statement, returns_rows, split_sql_statements, DatabaseAdapter,
    QueryOutput, Row, Value,
};

/// `SQLITE_BUSY` primary result code.
const SQLITE_BUSY: i64 = 5;

const SAVEPOINT: &str = "migrate_tx";

const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now')),
    applied_by TEXT NOT NULL,
    checksum TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'SUCCESS',
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_migrations_history_name ON migrations_history(name);
CREATE INDEX IF NOT EXISTS idx_migrations_history_applied_at ON migrations_history(applied_at DESC);
"#;

#[derive(Default)]
struct State {
    conn: Option<SqliteConnection>,
    transaction_depth: u32,
    lock_held: bool,
}

/// SQLite implementation of [`DatabaseAdapter`].
#[derive(Default)]
pub struct SqliteAdapter {
    state: Mutex<State>,
}

impl SqliteAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn connect(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.conn.is_some() {
            return Err(MigrateError::Connection(
                "Already connected to database".into(),
            ));
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MigrateError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // Lock contention must surface as an error, not a wait
            .busy_timeout(Duration::ZERO);

        let conn = options.connect().await.map_err(|e| {
            MigrateError::Connection(format!("Failed to open SQLite database: {}", e))
        })?;
        state.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(conn) = state.conn.take() else {
            return Ok(());
        };
        state.transaction_depth = 0;
        state.lock_held = false;

        conn.close().await.map_err(|e| {
            MigrateError::Connection(format!("Failed to close SQLite database: {}", e))
        })
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.conn.is_some()
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput> {
        let mut state = self.state.lock().await;
        let conn = state.conn.as_mut().ok_or(MigrateError::NotConnected)?;
        run_script(conn, sql, params).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let depth = state.transaction_depth;
        let lock_held = state.lock_held;
        let conn = state.conn.as_mut().ok_or(MigrateError::NotConnected)?;

        if depth == 0 {
            let sql = if lock_held {
                format!("SAVEPOINT {}", SAVEPOINT)
            } else {
                "BEGIN EXCLUSIVE".to_string()
            };
            run_one(conn, &sql, &[]).await?;
        }
        state.transaction_depth += 1;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.conn.is_none() || state.transaction_depth == 0 {
            return Err(MigrateError::TransactionState(
                "No transaction in progress".into(),
            ));
        }

        state.transaction_depth -= 1;
        if state.transaction_depth > 0 {
            return Ok(());
        }
        let lock_held = state.lock_held;
        let Some(conn) = state.conn.as_mut() else {
            return Ok(());
        };

        if !lock_held {
            return commit_or_rollback(conn).await;
        }

        if let Err(e) = run_one(conn, &format!("RELEASE SAVEPOINT {}", SAVEPOINT), &[]).await {
            if let Err(rollback_err) = rollback_savepoint(conn).await {
                warn!(error = %rollback_err, "Failed to undo savepoint after release failure");
            }
            return Err(e);
        }

        let committed = commit_or_rollback(conn).await;
        let relocked = raw(conn, "BEGIN EXCLUSIVE").await;
        if let Err(e) = relocked {
            warn!(error = %e, "Could not re-take the SQLite exclusive lock after commit");
            state.lock_held = false;
        }
        committed
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.transaction_depth == 0 {
            return Ok(());
        }
        state.transaction_depth = 0;
        let lock_held = state.lock_held;

        let Some(conn) = state.conn.as_mut() else {
            return Ok(());
        };
        if lock_held {
            // Undo the migration but keep the outer exclusive transaction
            rollback_savepoint(conn).await?;
        } else {
            run_one(conn, "ROLLBACK", &[]).await?;
        }
        Ok(())
    }

    async fn acquire_lock(&self, _key: i64, timeout_secs: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.lock_held {
            return Ok(());
        }
        if state.transaction_depth > 0 {
            return Err(MigrateError::TransactionState(
                "Cannot take the SQLite lock inside an open transaction".into(),
            ));
        }
        let conn = state.conn.as_mut().ok_or(MigrateError::NotConnected)?;

        match raw(conn, "BEGIN EXCLUSIVE").await {
            Ok(_) => {
                state.lock_held = true;
                debug!(ignored_timeout_secs = timeout_secs, "SQLite exclusive lock acquired");
                Ok(())
            }
            Err(e) if is_busy(&e) => Err(MigrateError::lock(
                LockFailure::Busy,
                "Database is locked by another process (SQLite does not support advisory lock timeouts)",
            )),
            Err(e) => Err(MigrateError::lock(LockFailure::Failed, e.to_string())),
        }
    }

    async fn release_lock(&self, _key: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.lock_held {
            return Ok(());
        }
        state.lock_held = false;
        state.transaction_depth = 0;
        let Some(conn) = state.conn.as_mut() else {
            return Ok(());
        };

        commit_or_rollback(conn).await
    }

    async fn ensure_migrations_table(&self) -> Result<()> {
        self.execute_query(CREATE_MIGRATIONS_TABLE, &[]).await?;
        Ok(())
    }
}

/// Commit the open transaction. A failed COMMIT (a deferred constraint, for
/// one) leaves the transaction open, so it is rolled back before returning.
async fn commit_or_rollback(conn: &mut SqliteConnection) -> Result<()> {
    let Err(e) = raw(conn, "COMMIT").await else {
        return Ok(());
    };
    if let Err(rollback_err) = raw(conn, "ROLLBACK").await {
        warn!(error = %rollback_err, "Rollback after failed commit failed");
    }
    Err(MigrateError::SqlExecution(e.to_string()))
}

async fn rollback_savepoint(conn: &mut SqliteConnection) -> Result<()> {
    run_one(conn, &format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT), &[]).await?;
    run_one(conn, &format!("RELEASE SAVEPOINT {}", SAVEPOINT), &[]).await?;
    Ok(())
}

async fn raw(conn: &mut SqliteConnection, sql: &str) -> std::result::Result<(), sqlx::Error> {
    sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql))
        .await
        .map(|_| ())
}

/// Execute a script one statement at a time, returning the rows of the last
/// statement and the total affected-row count.
async fn run_script(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[Value],
) -> Result<QueryOutput> {
    let statements: Vec<String> = split_sql_statements(sql)
        .into_iter()
        .filter(|s| !is_blank_statement(s))
        .collect();

    if statements.len() > 1 && !params.is_empty() {
        return Err(MigrateError::SqlExecution(
            "Parameters are not supported with multiple statements".into(),
        ));
    }

    let mut output = QueryOutput::default();
    for statement in &statements {
        let result = run_one(conn, statement, params).await?;
        output.rows_affected += result.rows_affected;
        output.rows = result.rows;
    }
    Ok(output)
}

async fn run_one(conn: &mut SqliteConnection, sql: &str, params: &[Value]) -> Result<QueryOutput> {
    let query = bind_all(sqlx::query(sql), params);

    let output = if returns_rows(sql) {
        query
            .fetch_all(&mut *conn)
            .await
            .map(|rows| QueryOutput::with_rows(rows.iter().map(decode_row).collect()))
    } else {
        query
            .execute(&mut *conn)
            .await
            .map(|r| QueryOutput::affected(r.rows_affected()))
    };

    output.map_err(|e| MigrateError::SqlExecution(e.to_string()))
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param.clone() {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::Float(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Timestamp(v) => query.bind(v),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Row {
    let columns = row
        .columns()
        .iter()
        .map(|col| {
            let value = decode_first!(row, col.ordinal();
                i64 => Value::Int,
                f64 => Value::Float,
                String => Value::Text,
                NaiveDateTime => Value::Timestamp,
                bool => Value::Bool,
            );
            (col.name().to_string(), value)
        })
        .collect();
    Row::new(columns)
}

fn is_busy(e: &sqlx::Error) -> bool {
    let Some(db) = e.as_database_error() else {
        return false;
    };
    let busy_code = db
        .code()
        .and_then(|code| code.parse::<i64>().ok())
        .is_some_and(|code| code % 256 == SQLITE_BUSY);
    busy_code || db.message().contains("database is locked")
}
