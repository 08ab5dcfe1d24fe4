//! Loads migration file pairs from the migrations directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use migrate_core::checksum::ChecksumValidator;
use migrate_core::error::{MigrateError, Result};
use migrate_core::migration::Migration;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// Reads `<timestamp>_<description>.up.sql` / `.down.sql` pairs.
pub struct MigrationLoader {
    dir: PathBuf,
    checksum: ChecksumValidator,
    name_pattern: Regex,
}

impl MigrationLoader {
    pub fn new(dir: impl Into<PathBuf>, checksum: ChecksumValidator) -> Result<Self> {
        let name_pattern = Regex::new(r"^(\d{14})_(.+)$")
            .map_err(|e| MigrateError::Config(format!("Invalid migration name pattern: {}", e)))?;
        Ok(Self {
            dir: dir.into(),
            checksum,
            name_pattern,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every migration on disk, ascending by timestamp.
    ///
    /// Fails on the first malformed name or unpaired up-file; nothing is
    /// skipped.
    pub fn load_all(&self) -> Result<Vec<Migration>> {
        if !self.dir.is_dir() {
            return Err(MigrateError::Config(format!(
                "Migrations directory not found: {}",
                self.dir.display()
            )));
        }

        let mut migrations = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(UP_SUFFIX) else {
                continue;
            };
            migrations.push(self.load_pair(name, &path)?);
        }

        migrations.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });
        debug!(count = migrations.len(), dir = %self.dir.display(), "Loaded migrations");
        Ok(migrations)
    }

    /// Migrations whose names are not in `applied`, ascending.
    pub fn load_pending(&self, applied: &HashSet<String>) -> Result<Vec<Migration>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|m| !applied.contains(&m.name))
            .collect())
    }

    /// The migration called `name`, or `None` if no such file pair exists.
    pub fn load_by_name(&self, name: &str) -> Result<Option<Migration>> {
        let up_path = self.dir.join(format!("{}{}", name, UP_SUFFIX));
        if !up_path.is_file() {
            return Ok(None);
        }
        self.load_pair(name, &up_path).map(Some)
    }

    fn load_pair(&self, name: &str, up_path: &Path) -> Result<Migration> {
        let timestamp = self
            .name_pattern
            .captures(name)
            .and_then(|caps| caps.get(1))
            .and_then(|ts| ts.as_str().parse::<i64>().ok())
            .ok_or_else(|| MigrateError::MalformedName {
                name: name.to_string(),
            })?;

        let down_path = up_path.with_file_name(format!("{}{}", name, DOWN_SUFFIX));
        if !down_path.is_file() {
            return Err(MigrateError::MigrationPair {
                name: name.to_string(),
            });
        }

        let up_sql = std::fs::read_to_string(up_path)?;
        let down_sql = std::fs::read_to_string(&down_path)?;
        let checksum = self.checksum.calculate(&up_sql);

        Ok(Migration {
            name: name.to_string(),
            timestamp,
            up_path: up_path.to_path_buf(),
            down_path,
            up_sql,
            down_sql,
            checksum,
        })
    }
}
