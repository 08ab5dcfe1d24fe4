mod database;
mod logging;

pub use database::{redact_url, DatabaseConfig, DatabaseKind};
pub use logging::LoggingConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MigrateError, Result};

/// Default file name looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "migrate.toml";

/// Root configuration for the migration tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// Directory holding `*.up.sql` / `*.down.sql` pairs.
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration lock configuration.
    #[serde(default)]
    pub lock: LockConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            database: DatabaseConfig::default(),
            lock: LockConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MigrateConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MigrateError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;

        toml::from_str(&content)
            .map_err(|e| MigrateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the file if it exists, then apply environment overrides.
    ///
    /// Environment variables take precedence over the file. The database URL
    /// must be set by one of the two.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration pointing at the given database.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: url.to_string(),
            },
            ..Default::default()
        }
    }

    /// Override fields from environment variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(dir) = lookup("MIGRATIONS_DIR") {
            self.migrations_dir = dir;
        }
        if let Some(key) = lookup("LOCK_KEY") {
            self.lock.key = parse_env_number("LOCK_KEY", &key)?;
        }
        if let Some(timeout) = lookup("LOCK_TIMEOUT") {
            self.lock.timeout_secs = parse_env_number("LOCK_TIMEOUT", &timeout)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.json_format = match format.as_str() {
                "json" => true,
                "text" => false,
                other => {
                    return Err(MigrateError::Config(format!(
                        "LOG_FORMAT must be 'json' or 'text', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(file) = lookup("LOG_FILE") {
            self.logging.file = Some(file);
        }

        Ok(())
    }

    /// Check that the merged configuration is usable.
    pub fn validate(&self) -> Result<()> {
        // An unresolved ${VAR} placeholder counts as unset
        if self.database.url.is_empty() || self.database.url.contains("${") {
            return Err(MigrateError::Config(
                "DATABASE_URL not configured. Set DATABASE_URL environment variable or add [database] url to migrate.toml".into(),
            ));
        }
        self.database.kind()?;
        Ok(())
    }

    /// Write a starter configuration file.
    pub fn write_default(path: impl AsRef<Path>, database_url: &str) -> Result<()> {
        let config = Self::default_with_database_url(database_url);
        let content = toml::to_string_pretty(&config)
            .map_err(|e| MigrateError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// Migration lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Advisory lock key shared by every process migrating this database.
    #[serde(default = "default_lock_key")]
    pub key: i64,

    /// Seconds to wait for the lock. Ignored by SQLite.
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: default_lock_key(),
            timeout_secs: default_lock_timeout(),
        }
    }
}

fn default_migrations_dir() -> String {
    "./migrations".to_string()
}

fn default_lock_key() -> i64 {
    12345
}

fn default_lock_timeout() -> u64 {
    30
}

fn parse_env_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MigrateError::Config(format!("{} must be a number, got '{}'", name, value)))
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| MigrateError::Config(format!("Invalid substitution pattern: {}", e)))?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    Ok(result)
}
