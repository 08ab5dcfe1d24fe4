use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Database configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. The scheme selects the backend.
    #[serde(default)]
    pub url: String,
}

impl DatabaseConfig {
    /// Backend selected by the URL scheme.
    pub fn kind(&self) -> Result<DatabaseKind> {
        DatabaseKind::from_url(&self.url)
    }
}

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    MySql,
    Sqlite,
}

impl DatabaseKind {
    /// Detect the backend from a connection string.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DatabaseKind::Postgres)
        } else if url.starts_with("mysql://") {
            Ok(DatabaseKind::MySql)
        } else if url.starts_with("sqlite://") {
            Ok(DatabaseKind::Sqlite)
        } else {
            Err(MigrateError::UnsupportedDatabase(format!(
                "Unknown database type in connection string: {}",
                redact_url(url)
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::MySql => "mysql",
            DatabaseKind::Sqlite => "sqlite",
        }
    }

    /// Bind placeholder for the `index`-th parameter (1-based).
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DatabaseKind::Postgres => format!("${}", index),
            DatabaseKind::MySql | DatabaseKind::Sqlite => "?".to_string(),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hide the password component of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}
