//! Error types for the REST query layer.

use thiserror::Error;

/// Main error type for adapter, compiler and REST operations.
#[derive(Error, Debug)]
pub enum RestError {
    /// Backend unreachable or credentials rejected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Adapter used before `connect` or after `disconnect`.
    #[error("Adapter is not connected - call connect() first")]
    NotConnected,

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Filter grammar references an operator the compiler does not implement.
    #[error("Unsupported filter operator '{operator}'. Supported operators: eq, neq, gt, gte, lt, lte, like, ilike, in, is")]
    UnsupportedOperator { operator: String },

    /// Single-row operation on a table without a primary key.
    #[error("Table {0} has no primary key")]
    MissingPrimaryKey(String),

    /// Single-row operation matched nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request rejected before any SQL was generated.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// PostgreSQL rejected or failed to execute a statement.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server rejected or failed to execute a statement.
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// Backend failure that did not originate from a driver error type.
    #[error("Backend error: {0}")]
    Backend(String),

    /// No factory registered under the requested provider name.
    #[error("Unknown provider '{name}'. Known providers: {}", known.join(", "))]
    UnknownProvider { name: String, known: Vec<String> },

    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RestError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        RestError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        RestError::Validation(message.into())
    }

    /// Reclassify a failure during `connect` as a connection error.
    ///
    /// Pool timeouts, probe failures and setup queries all mean the backend
    /// is not usable; `Connection` errors pass through unchanged.
    pub fn during_connect(self, target: &str) -> Self {
        match self {
            RestError::Connection(_) => self,
            other => RestError::Connection(format!("{}: {}", target, other)),
        }
    }

    /// Whether the error originated from the database rather than the caller.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            RestError::Postgres(_) | RestError::Mssql(_) | RestError::Backend(_)
        )
    }

    /// HTTP status code the REST boundary reports for this error.
    ///
    /// A missing primary key is reported as 404 on the single-row routes,
    /// the same as a missing row.
    pub fn status_code(&self) -> u16 {
        match self {
            RestError::UnsupportedOperator { .. } | RestError::Validation(_) => 400,
            RestError::MissingPrimaryKey(_) | RestError::NotFound(_) => 404,
            RestError::Connection(_) | RestError::NotConnected | RestError::Pool { .. } => 503,
            _ => 500,
        }
    }

    /// Short machine-readable code used in REST error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RestError::Connection(_) | RestError::NotConnected | RestError::Pool { .. } => {
                "connection_error"
            }
            RestError::UnsupportedOperator { .. } => "unsupported_operator",
            RestError::MissingPrimaryKey(_) => "missing_primary_key",
            RestError::NotFound(_) => "not_found",
            RestError::Validation(_) => "validation_error",
            RestError::Postgres(_) | RestError::Mssql(_) | RestError::Backend(_) => {
                "backend_query_error"
            }
            RestError::UnknownProvider { .. } => "unknown_provider",
            RestError::Config(_) | RestError::Io(_) | RestError::Yaml(_) | RestError::Json(_) => {
                "internal_error"
            }
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            RestError::Config(_)
            | RestError::Yaml(_)
            | RestError::Io(_)
            | RestError::UnknownProvider { .. } => 2,
            RestError::Connection(_) | RestError::NotConnected | RestError::Pool { .. } => 3,
            RestError::UnsupportedOperator { .. }
            | RestError::Validation(_)
            | RestError::MissingPrimaryKey(_)
            | RestError::NotFound(_) => 4,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sqlrest operations.
pub type Result<T> = std::result::Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RestError::validation("no filters").status_code(), 400);
        assert_eq!(
            RestError::UnsupportedOperator {
                operator: "cs".into()
            }
            .status_code(),
            400
        );
        assert_eq!(RestError::NotFound("users/1".into()).status_code(), 404);
        assert_eq!(RestError::MissingPrimaryKey("logs".into()).status_code(), 404);
        assert_eq!(RestError::Backend("boom".into()).status_code(), 500);
        assert_eq!(RestError::NotConnected.status_code(), 503);
    }

    #[test]
    fn test_unsupported_operator_names_operator() {
        let err = RestError::UnsupportedOperator {
            operator: "fts".into(),
        };
        assert!(err.to_string().contains("'fts'"));
    }

    #[test]
    fn test_unknown_provider_lists_known() {
        let err = RestError::UnknownProvider {
            name: "oracle".into(),
            known: vec!["mssql".into(), "postgresql".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("oracle"));
        assert!(msg.contains("mssql, postgresql"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_backend_classification() {
        assert!(RestError::Backend("x".into()).is_backend());
        assert!(!RestError::validation("x").is_backend());
        assert_eq!(RestError::Backend("x".into()).code(), "backend_query_error");
    }

    #[test]
    fn test_during_connect_reclassifies_setup_failures() {
        let timeout = RestError::pool("timed out waiting for a connection", "connection probe")
            .during_connect("db:1433/app");
        assert!(matches!(timeout, RestError::Connection(_)));
        assert_eq!(timeout.status_code(), 503);
        assert_eq!(timeout.exit_code(), 3);
        assert!(timeout.to_string().contains("db:1433/app"));

        let setup = RestError::Backend("permission denied for pg_extension".into())
            .during_connect("db:5432/app");
        assert!(matches!(setup, RestError::Connection(_)));
        assert_eq!(setup.code(), "connection_error");

        let already = RestError::Connection("refused".into()).during_connect("db");
        assert_eq!(already.to_string(), "Connection error: refused");
    }
}
