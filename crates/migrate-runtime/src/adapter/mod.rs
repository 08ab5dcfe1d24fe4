//! Database backend abstraction.
//!
//! Every backend implements [`DatabaseAdapter`] over a single dedicated
//! connection. The connection carries the open transaction and the
//! session-level migration lock, so both must live on the same session.

/// Decode a column by trying each listed type in order; `NULL` and
/// undecodable values become [`Value::Null`].
macro_rules! decode_first {
    ($row:expr, $idx:expr; $($ty:ty => $map:expr),+ $(,)?) => {{
        let mut value: Option<$crate::adapter::Value> = None;
        $(
            if value.is_none() {
                if let Ok(v) = ::sqlx::Row::try_get::<Option<$ty>, _>($row, $idx) {
                    value = Some(v.map($map).unwrap_or($crate::adapter::Value::Null));
                }
            }
        )+
        value.unwrap_or($crate::adapter::Value::Null)
    }};
}

mod mysql;
mod postgres;
mod sqlite;
mod value;

pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;
pub use value::{QueryOutput, Row, Value};

use std::sync::Arc;

use async_trait::async_trait;
use migrate_core::config::DatabaseKind;
use migrate_core::error::Result;

/// Name of the ledger table.
pub const MIGRATIONS_TABLE: &str = "migrations_history";

/// Backend-specific connection, execution, transaction and lock control.
///
/// Transactions nest by reference count: only the outermost
/// `begin_transaction` / `commit` pair reaches the database. `rollback`
/// always unwinds every level and is a no-op when nothing is open.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Backend this adapter talks to.
    fn kind(&self) -> DatabaseKind;

    /// Open the connection. Fails if already connected.
    async fn connect(&self, url: &str) -> Result<()>;

    /// Close the connection. No-op when not connected.
    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Execute a statement with positional parameters.
    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput>;

    async fn begin_transaction(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Take the cross-process migration lock. No-op if already held.
    async fn acquire_lock(&self, key: i64, timeout_secs: u64) -> Result<()>;

    /// Release the migration lock. No-op if not held.
    async fn release_lock(&self, key: i64) -> Result<()>;

    /// Create the ledger table and its indexes if missing.
    async fn ensure_migrations_table(&self) -> Result<()>;
}

/// Create an unconnected adapter for a backend.
pub fn adapter_for(kind: DatabaseKind) -> Arc<dyn DatabaseAdapter> {
    match kind {
        DatabaseKind::Postgres => Arc::new(PostgresAdapter::new()),
        DatabaseKind::MySql => Arc::new(MySqlAdapter::new()),
        DatabaseKind::Sqlite => Arc::new(SqliteAdapter::new()),
    }
}

/// Create and connect the adapter selected by the URL scheme.
pub async fn connect(url: &str) -> Result<Arc<dyn DatabaseAdapter>> {
    let kind = DatabaseKind::from_url(url)?;
    let adapter = adapter_for(kind);
    adapter.connect(url).await?;
    tracing::debug!(backend = %kind, "Connected to database");
    Ok(adapter)
}

/// Whether a statement produces a result set.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let head = sql
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("--"))
        .unwrap_or("")
        .to_ascii_uppercase();

    ["SELECT", "WITH", "SHOW", "PRAGMA", "VALUES", "EXPLAIN"]
        .iter()
        .any(|kw| head.starts_with(kw))
        || sql
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| word.eq_ignore_ascii_case("RETURNING"))
}

/// Whether a statement is empty or only comments.
pub(crate) fn is_blank_statement(statement: &str) -> bool {
    statement.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with("--")
    })
}

/// Split SQL into individual statements, respecting quoted text, line
/// comments and dollar-quoted bodies (PL/pgSQL functions contain semicolons
/// inside `$$` delimiters).
pub(crate) fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_line_comment = false;
    let mut in_dollar_quote = false;
    let mut dollar_tag = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        if in_single_quote {
            // '' is an escaped quote and keeps us inside the literal
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_single_quote = false;
                }
            }
            continue;
        }

        if !in_dollar_quote {
            if c == '\'' {
                in_single_quote = true;
                continue;
            }
            if c == '-' && chars.peek() == Some(&'-') {
                in_line_comment = true;
                continue;
            }
        }

        if c == '$' {
            let mut potential_tag = String::from("$");

            while let Some(&next_c) = chars.peek() {
                if next_c == '$' {
                    chars.next();
                    potential_tag.push('$');
                    current.push('$');
                    break;
                } else if next_c.is_alphanumeric() || next_c == '_' {
                    chars.next();
                    potential_tag.push(next_c);
                    current.push(next_c);
                } else {
                    break;
                }
            }

            if potential_tag.len() >= 2 && potential_tag.ends_with('$') {
                if in_dollar_quote && potential_tag == dollar_tag {
                    in_dollar_quote = false;
                    dollar_tag.clear();
                } else if !in_dollar_quote {
                    in_dollar_quote = true;
                    dollar_tag = potential_tag;
                }
            }
        }

        if c == ';' && !in_dollar_quote {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }

    let stmt = current.trim().trim_end_matches(';').trim().to_string();
    if !stmt.is_empty() {
        statements.push(stmt);
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_statements() {
        let stmts = split_sql_statements("SELECT 1; SELECT 2; SELECT 3;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[test]
    fn test_split_without_trailing_semicolon() {
        let stmts = split_sql_statements("CREATE TABLE a (id INT);\nCREATE TABLE b (id INT)");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "CREATE TABLE b (id INT)");
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION touch() RETURNS void AS $$
BEGIN
    SELECT 1;
    SELECT 2;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE FUNCTION"));
        assert!(stmts[0].contains("$$ LANGUAGE plpgsql"));
        assert!(stmts[1].contains("SELECT 3"));
    }

    #[test]
    fn test_split_with_tagged_dollar_quote() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$; SELECT 2;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "DO $body$ BEGIN PERFORM 1; END $body$");
    }

    #[test]
    fn test_split_ignores_semicolons_in_strings_and_comments() {
        let sql = "INSERT INTO notes (body) VALUES ('a;b''c;');\n-- trailing; comment\nSELECT 1;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO notes (body) VALUES ('a;b''c;')");
        assert!(stmts[1].ends_with("SELECT 1"));
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT * FROM t"));
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("-- header\nWITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(returns_rows("INSERT INTO t (a)\nVALUES (1)\nRETURNING id"));
        assert!(!returns_rows("INSERT INTO returning_log (a) VALUES (1)"));
        assert!(!returns_rows("INSERT INTO t (a) VALUES (1)"));
        assert!(!returns_rows("CREATE TABLE t (id INT)"));
    }

    #[test]
    fn test_blank_statement() {
        assert!(is_blank_statement("  \n-- only a comment\n"));
        assert!(!is_blank_statement("-- c\nSELECT 1"));
    }
}
