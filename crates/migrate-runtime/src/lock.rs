//! Global migration lock.
//!
//! Ensures only one process applies migrations at a time, whatever the
//! backend's locking primitive is.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use migrate_core::error::{LockFailure, MigrateError, Result};

use crate::adapter::DatabaseAdapter;

/// Acquires and releases the migration lock for one key and timeout.
pub struct LockManager {
    adapter: Arc<dyn DatabaseAdapter>,
    key: i64,
    timeout_secs: u64,
}

impl LockManager {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, key: i64, timeout_secs: u64) -> Self {
        Self {
            adapter,
            key,
            timeout_secs,
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub async fn acquire_lock(&self) -> Result<()> {
        info!(
            lock_key = self.key,
            timeout_secs = self.timeout_secs,
            "Acquiring migration lock"
        );

        self.adapter
            .acquire_lock(self.key, self.timeout_secs)
            .await
            .map_err(|e| {
                let kind = e.lock_failure().unwrap_or(LockFailure::Failed);
                MigrateError::lock(
                    kind,
                    format!(
                        "Failed to acquire migration lock (key: {}, timeout: {}s). \
                         Another migration may be in progress: {}",
                        self.key, self.timeout_secs, e
                    ),
                )
            })?;

        debug!(lock_key = self.key, "Migration lock acquired");
        Ok(())
    }

    /// Release the lock. Failures are logged, never returned.
    pub async fn release_lock(&self) {
        match self.adapter.release_lock(self.key).await {
            Ok(()) => debug!(lock_key = self.key, "Migration lock released"),
            Err(e) => warn!(lock_key = self.key, error = %e, "Failed to release migration lock"),
        }
    }

    /// Run `f` while holding the lock.
    ///
    /// The lock is released on every path out of `f`, and `f`'s result is
    /// returned as is.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire_lock().await?;

        let result = f().await;

        // Always release lock, even on error
        self.release_lock().await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AdapterCall, MockAdapter};

    fn manager(mock: &Arc<MockAdapter>) -> LockManager {
        LockManager::new(mock.clone(), 42, 5)
    }

    #[tokio::test]
    async fn test_with_lock_releases_after_success() {
        let mock = Arc::new(MockAdapter::connected());
        let value = manager(&mock).with_lock(|| async { Ok(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(
            mock.calls(),
            vec![
                AdapterCall::AcquireLock {
                    key: 42,
                    timeout_secs: 5
                },
                AdapterCall::ReleaseLock { key: 42 },
            ]
        );
    }

    #[tokio::test]
    async fn test_with_lock_releases_once_and_returns_operation_error() {
        let mock = Arc::new(MockAdapter::connected());
        let err = manager(&mock)
            .with_lock(|| async { Err::<(), _>(MigrateError::SqlExecution("boom".into())) })
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::SqlExecution(ref m) if m == "boom"));
        assert_eq!(mock.count(|c| matches!(c, AdapterCall::ReleaseLock { .. })), 1);
    }

    #[tokio::test]
    async fn test_release_failure_does_not_mask_result() {
        let mock = Arc::new(MockAdapter::connected());
        mock.fail_release_lock("connection reset");

        let value = manager(&mock).with_lock(|| async { Ok("done") }).await;
        assert_eq!(value.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_acquire_failure_is_descriptive_and_skips_body() {
        let mock = Arc::new(MockAdapter::connected());
        mock.fail_acquire_lock(LockFailure::Timeout, "Lock timeout after 5 seconds");

        let mut ran = false;
        let err = manager(&mock)
            .with_lock(|| {
                ran = true;
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert!(!ran);
        assert_eq!(err.lock_failure(), Some(LockFailure::Timeout));
        let msg = err.to_string();
        assert!(msg.contains("key: 42"));
        assert!(msg.contains("Another migration may be in progress"));
        assert_eq!(mock.count(|c| matches!(c, AdapterCall::ReleaseLock { .. })), 0);
    }
}
