//! Core traits for the database-agnostic REST layer.
//!
//! - [`Dialect`]: SQL syntax facts the query compiler needs from a backend
//! - [`Adapter`]: Connection lifecycle, query execution, introspection and DDL
//! - [`TransactionContext`]: A unit of work bound to one pooled connection
//!
//! The compiler only ever sees a `&dyn Dialect`; the REST layer sees a
//! `&dyn Adapter`. Concrete backends live in [`crate::drivers`].

use std::fmt;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;

use super::schema::{Capabilities, SchemaInfo, SecurityPolicy, TableInfo};
use super::value::{Row, SqlValue};

/// Dialect tag exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    PostgreSql,
    TSql,
    MySql,
}

impl DialectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::PostgreSql => "postgresql",
            DialectKind::TSql => "tsql",
            DialectKind::MySql => "mysql",
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dialect pages through a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    OffsetFetch,
}

/// How a single-row mutation hands the affected row back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// `... RETURNING *` appended to the statement.
    Suffix,
    /// `OUTPUT INSERTED.*` / `OUTPUT DELETED.*` placed before `VALUES` / `WHERE`.
    OutputClause,
    /// The dialect cannot return rows from a mutation.
    Unsupported,
}

/// SQL syntax facts for one backend.
///
/// Implementations are stateless and cheap to clone.
pub trait Dialect: Send + Sync {
    /// Dialect tag.
    fn kind(&self) -> DialectKind;

    /// Dialect name (`postgresql`, `tsql`, `mysql`).
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - PostgreSQL: `"identifier"`
    /// - T-SQL: `[identifier]`
    /// - MySQL: `` `identifier` ``
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Placeholder for the parameter at 0-based `position`.
    ///
    /// - PostgreSQL: `$1`, `$2`, ...
    /// - T-SQL: `@param0`, `@param1`, ...
    /// - MySQL: `?`
    fn param_placeholder(&self, position: usize) -> String;

    /// Pagination syntax.
    fn pagination(&self) -> PaginationStyle;

    /// Whether OFFSET paging is only valid after an ORDER BY.
    fn requires_order_for_offset(&self) -> bool {
        self.pagination() == PaginationStyle::OffsetFetch
    }

    /// Row-return syntax for INSERT/UPDATE/DELETE.
    fn returning(&self) -> ReturningStyle;

    /// Whether `ILIKE` exists natively.
    fn supports_ilike(&self) -> bool {
        false
    }

    /// Whether `IS TRUE` / `IS FALSE` exist natively.
    fn supports_is_boolean(&self) -> bool {
        false
    }

    /// Quote `schema.table`, or just `table` when no schema is given.
    fn qualify(&self, schema: Option<&str>, table: &str) -> Result<String> {
        match schema {
            Some(schema) => Ok(format!(
                "{}.{}",
                self.quote_ident(schema)?,
                self.quote_ident(table)?
            )),
            None => self.quote_ident(table),
        }
    }
}

/// Column descriptor attached to a [`QueryResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,

    /// Native type name reported by the driver.
    pub data_type: String,

    /// Best effort. Drivers do not expose result-set nullability, so this is
    /// `true` unless the backend says otherwise.
    pub nullable: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        }
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Returned rows (empty for statements without a result set).
    pub rows: Vec<Row>,

    /// Rows returned, or rows affected for statements without a result set.
    pub row_count: u64,

    /// Result column descriptors.
    pub fields: Vec<FieldInfo>,
}

impl QueryResult {
    /// Result of a statement that returns rows.
    pub fn from_rows(rows: Vec<Row>, fields: Vec<FieldInfo>) -> Self {
        Self {
            row_count: rows.len() as u64,
            rows,
            fields,
        }
    }

    /// Result of a statement that only reports affected rows.
    pub fn affected(row_count: u64) -> Self {
        Self {
            row_count,
            ..Default::default()
        }
    }

    /// Take the first row, if any.
    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}

/// Unit of work bound to one dedicated connection.
///
/// The connection stays checked out of the pool until `commit` or
/// `rollback` consumes the context. Dropping an unfinished context returns
/// the connection without committing.
#[async_trait]
pub trait TransactionContext: Send {
    /// Execute a statement inside the transaction.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Commit and release the connection.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back and release the connection.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A database backend.
///
/// One adapter owns one connection pool. All methods take `&self`, so an
/// adapter is shared as `Arc<dyn Adapter>` between concurrent requests.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provider name the adapter was registered under.
    fn name(&self) -> &str;

    /// SQL syntax facts for the compiler.
    fn dialect(&self) -> &dyn Dialect;

    /// Backend capabilities.
    fn capabilities(&self) -> Capabilities;

    // ===== Lifecycle =====

    /// Build the pool and probe it with one lightweight query.
    async fn connect(&self) -> Result<()>;

    /// Release all pooled connections. Calling it twice is harmless.
    async fn disconnect(&self) -> Result<()>;

    // ===== Queries =====

    /// Execute a parameterized statement.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Execute a statement and return its first row, if any.
    async fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        Ok(self.query(sql, params).await?.into_first())
    }

    /// Check out a dedicated connection and issue BEGIN on it.
    ///
    /// Prefer [`transaction`], which guarantees commit or rollback.
    async fn begin(&self) -> Result<Box<dyn TransactionContext>>;

    // ===== Introspection =====

    /// Base table names in a schema, ordered by name.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Full metadata for one table, or `None` if it does not exist.
    async fn get_table(&self, name: &str, schema: &str) -> Result<Option<TableInfo>>;

    /// Schemas, tables, views and functions reachable from `schema`.
    async fn get_schema(&self, schema: &str) -> Result<SchemaInfo>;

    // ===== DDL =====

    /// Create a table with its keys and indexes in one transaction.
    async fn create_table(&self, table: &TableInfo) -> Result<()>;

    /// Drop a table if it exists.
    async fn drop_table(&self, schema: &str, name: &str) -> Result<()>;

    // ===== Security =====

    /// Create a row-level security policy unless it already exists.
    async fn apply_security_policy(&self, policy: &SecurityPolicy) -> Result<()>;

    /// Drop a policy. Missing policies are not an error.
    async fn remove_security_policy(&self, schema: &str, table: &str, name: &str) -> Result<()>;
}

/// Run `f` inside a transaction.
///
/// Commits when `f` returns `Ok`. Rolls back when `f` returns `Err` or
/// panics, then hands the error (or the panic) back to the caller. The
/// connection goes back to the pool in every case.
///
/// ```rust,ignore
/// let id = transaction(adapter.as_ref(), move |tx| {
///     Box::pin(async move {
///         tx.query(&insert.sql, &insert.params).await?;
///         Ok(42)
///     })
/// })
/// .await?;
/// ```
pub async fn transaction<T, F>(adapter: &dyn Adapter, f: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn TransactionContext) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = adapter.begin().await?;

    let outcome = AssertUnwindSafe(f(tx.as_mut())).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            tx.commit().await?;
            debug!("{}: transaction committed", adapter.name());
            Ok(value)
        }
        Ok(Err(e)) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("{}: rollback failed: {}", adapter.name(), rollback_err);
            }
            Err(e)
        }
        Err(panic) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("{}: rollback after panic failed: {}", adapter.name(), rollback_err);
            }
            std::panic::resume_unwind(panic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RestError;
    use crate::testing::RecordingAdapter;

    #[test]
    fn test_dialect_kind_names() {
        assert_eq!(DialectKind::PostgreSql.as_str(), "postgresql");
        assert_eq!(DialectKind::TSql.to_string(), "tsql");
        assert_eq!(
            serde_json::to_string(&DialectKind::MySql).unwrap(),
            "\"mysql\""
        );
    }

    #[test]
    fn test_query_result_constructors() {
        let mut row = Row::new();
        row.insert("id", 1);
        let result = QueryResult::from_rows(vec![row.clone()], vec![FieldInfo::new("id", "int4")]);
        assert_eq!(result.row_count, 1);
        assert!(result.fields[0].nullable);
        assert_eq!(result.into_first(), Some(row));

        let affected = QueryResult::affected(7);
        assert_eq!(affected.row_count, 7);
        assert!(affected.rows.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_commits_on_ok() {
        let adapter = RecordingAdapter::new("postgresql");
        let value = transaction(&adapter, |tx| {
            Box::pin(async move {
                tx.query("INSERT 1", &[SqlValue::Int(1)]).await?;
                tx.query("INSERT 2", &[]).await?;
                Ok::<i32, RestError>(7)
            })
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(adapter.statements(), vec!["BEGIN", "INSERT 1", "INSERT 2", "COMMIT"]);
        assert_eq!(adapter.calls()[1].params, vec![SqlValue::Int(1)]);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_and_returns_error() {
        let adapter = RecordingAdapter::new("tsql");
        let err = transaction(&adapter, |tx| {
            Box::pin(async move {
                tx.query("INSERT 1", &[]).await?;
                Err::<i32, RestError>(RestError::validation("row 2 rejected"))
            })
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("row 2 rejected"));
        assert_eq!(adapter.statements(), vec!["BEGIN", "INSERT 1", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_statement_error() {
        let adapter = RecordingAdapter::new("postgresql").with_responder(|sql, _| {
            if sql == "INSERT 2" {
                Err(RestError::Backend("duplicate key".into()))
            } else {
                Ok(QueryResult::affected(1))
            }
        });
        let result = transaction(&adapter, |tx| {
            Box::pin(async move {
                tx.query("INSERT 1", &[]).await?;
                tx.query("INSERT 2", &[]).await?;
                tx.query("INSERT 3", &[]).await?;
                Ok::<(), RestError>(())
            })
        })
        .await;

        assert!(matches!(result, Err(RestError::Backend(_))));
        assert_eq!(
            adapter.statements(),
            vec!["BEGIN", "INSERT 1", "INSERT 2", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_and_resumes_panic() {
        let adapter = RecordingAdapter::new("postgresql");
        let explode = true;
        let outcome = AssertUnwindSafe(transaction(&adapter, move |tx| {
            Box::pin(async move {
                tx.query("INSERT 1", &[]).await?;
                if explode {
                    panic!("callback panicked");
                }
                Ok::<i32, RestError>(1)
            })
        }))
        .catch_unwind()
        .await;

        let panic = outcome.err().unwrap();
        assert_eq!(panic.downcast_ref::<&str>(), Some(&"callback panicked"));
        assert_eq!(adapter.statements(), vec!["BEGIN", "INSERT 1", "ROLLBACK"]);
    }
}
