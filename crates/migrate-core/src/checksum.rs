//! Checksum calculation for migration files.
//!
//! A migration's checksum is the SHA-256 of its exact up-SQL text. The value is
//! stored in the ledger at apply time; recomputing it later and comparing is how
//! edits to already-applied migrations are detected.

use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};

/// Calculates and validates migration checksums.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumValidator;

impl ChecksumValidator {
    pub fn new() -> Self {
        Self
    }

    /// Hexadecimal SHA-256 of the SQL text. Whitespace-sensitive.
    pub fn calculate(&self, sql: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether `actual_sql` still hashes to `expected`.
    pub fn validate(&self, expected: &str, actual_sql: &str) -> bool {
        self.calculate(actual_sql) == expected
    }

    /// Like [`validate`](Self::validate), but returns a
    /// [`MigrateError::ChecksumMismatch`] carrying both digests.
    pub fn validate_or_err(&self, name: &str, expected: &str, actual_sql: &str) -> Result<()> {
        let actual = self.calculate(actual_sql);
        if actual == expected {
            Ok(())
        } else {
            Err(MigrateError::ChecksumMismatch {
                name: name.to_string(),
                expected: expected.to_string(),
                actual,
            })
        }
    }
}
