//! In-memory database adapter that records every call.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use migrate_core::config::DatabaseKind;
use migrate_core::error::{LockFailure, MigrateError, Result};

use crate::adapter::{DatabaseAdapter, QueryOutput, Value};

/// A call made against a [`MockAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Connect { url: String },
    Disconnect,
    Execute { sql: String, params: Vec<Value> },
    BeginTransaction,
    Commit,
    Rollback,
    AcquireLock { key: i64, timeout_secs: u64 },
    ReleaseLock { key: i64 },
    EnsureMigrationsTable,
}

#[derive(Default)]
struct Behavior {
    connected: bool,
    failing_queries: Vec<(String, String)>,
    responses: Vec<(String, QueryOutput)>,
    acquire_failure: Option<(LockFailure, String)>,
    release_failure: Option<String>,
}

/// Mock adapter for tests.
///
/// Queries succeed with an empty result unless a scripted response or an
/// injected failure matches a substring of the SQL text.
#[derive(Clone)]
pub struct MockAdapter {
    kind: DatabaseKind,
    calls: Arc<RwLock<Vec<AdapterCall>>>,
    behavior: Arc<RwLock<Behavior>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new(DatabaseKind::Sqlite)
    }
}

impl MockAdapter {
    /// Create an unconnected mock posing as the given backend.
    pub fn new(kind: DatabaseKind) -> Self {
        Self {
            kind,
            calls: Arc::new(RwLock::new(Vec::new())),
            behavior: Arc::new(RwLock::new(Behavior::default())),
        }
    }

    /// Create a mock that is already connected.
    pub fn connected() -> Self {
        let mock = Self::default();
        mock.behavior_mut().connected = true;
        mock
    }

    /// Fail any query whose SQL contains `pattern`.
    pub fn fail_query_containing(&self, pattern: &str, message: &str) {
        self.behavior_mut()
            .failing_queries
            .push((pattern.to_string(), message.to_string()));
    }

    /// Answer any query whose SQL contains `pattern` with `output`.
    pub fn respond_to(&self, pattern: &str, output: QueryOutput) {
        self.behavior_mut()
            .responses
            .push((pattern.to_string(), output));
    }

    pub fn fail_acquire_lock(&self, kind: LockFailure, message: &str) {
        self.behavior_mut().acquire_failure = Some((kind, message.to_string()));
    }

    pub fn fail_release_lock(&self, message: &str) {
        self.behavior_mut().release_failure = Some(message.to_string());
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&AdapterCall) -> bool) -> usize {
        self.calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| predicate(c))
            .count()
    }

    /// SQL text of every executed query, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                AdapterCall::Execute { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn record(&self, call: AdapterCall) {
        self.calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn behavior(&self) -> RwLockReadGuard<'_, Behavior> {
        self.behavior.read().unwrap_or_else(|e| e.into_inner())
    }

    fn behavior_mut(&self) -> RwLockWriteGuard<'_, Behavior> {
        self.behavior.write().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.behavior().connected {
            Ok(())
        } else {
            Err(MigrateError::NotConnected)
        }
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn connect(&self, url: &str) -> Result<()> {
        self.record(AdapterCall::Connect {
            url: url.to_string(),
        });
        let mut behavior = self.behavior_mut();
        if behavior.connected {
            return Err(MigrateError::Connection(
                "Already connected to database".into(),
            ));
        }
        behavior.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(AdapterCall::Disconnect);
        self.behavior_mut().connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.behavior().connected
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput> {
        self.record(AdapterCall::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.ensure_connected()?;

        let behavior = self.behavior();
        if let Some((_, message)) = behavior
            .failing_queries
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(MigrateError::SqlExecution(message.clone()));
        }

        Ok(behavior
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.record(AdapterCall::BeginTransaction);
        self.ensure_connected()
    }

    async fn commit(&self) -> Result<()> {
        self.record(AdapterCall::Commit);
        self.ensure_connected()
    }

    async fn rollback(&self) -> Result<()> {
        self.record(AdapterCall::Rollback);
        Ok(())
    }

    async fn acquire_lock(&self, key: i64, timeout_secs: u64) -> Result<()> {
        self.record(AdapterCall::AcquireLock { key, timeout_secs });
        self.ensure_connected()?;
        match &self.behavior().acquire_failure {
            Some((kind, message)) => Err(MigrateError::lock(*kind, message.clone())),
            None => Ok(()),
        }
    }

    async fn release_lock(&self, key: i64) -> Result<()> {
        self.record(AdapterCall::ReleaseLock { key });
        match &self.behavior().release_failure {
            Some(message) => Err(MigrateError::SqlExecution(message.clone())),
            None => Ok(()),
        }
    }

    async fn ensure_migrations_table(&self) -> Result<()> {
        self.record(AdapterCall::EnsureMigrationsTable);
        self.ensure_connected()
    }
}
