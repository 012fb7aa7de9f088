//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL adapter (tokio-postgres + deadpool)
//! - [`mssql`]: SQL Server adapter (tiberius + bb8)
//! - [`mysql`]: MySQL dialect facts only
//! - [`common`]: Shared utilities (TLS, catalog row folding)
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect`, and `Adapter` if the backend is executable
//! 3. Add an enum variant to `DialectImpl`
//! 4. Register a factory in `AdapterRegistry::with_builtins()`

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;

// Re-export common utilities
pub use common::{SslMode, TlsBuilder};

// Re-export driver types
pub use mssql::{MssqlAdapter, MssqlDialect};
pub use mysql::MysqlDialect;
pub use postgres::{PostgresAdapter, PostgresDialect};

use crate::core::traits::{Dialect, DialectKind, PaginationStyle, ReturningStyle};
use crate::error::{RestError, Result};

/// Enum-based static dispatch for dialects.
///
/// Used where a dialect is chosen by name without an adapter, e.g. the
/// `compile` CLI command.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Postgres(PostgresDialect),
    Mssql(MssqlDialect),
    Mysql(MysqlDialect),
}

impl Dialect for DialectImpl {
    fn kind(&self) -> DialectKind {
        match self {
            DialectImpl::Postgres(d) => d.kind(),
            DialectImpl::Mssql(d) => d.kind(),
            DialectImpl::Mysql(d) => d.kind(),
        }
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        match self {
            DialectImpl::Postgres(d) => d.quote_ident(name),
            DialectImpl::Mssql(d) => d.quote_ident(name),
            DialectImpl::Mysql(d) => d.quote_ident(name),
        }
    }

    fn param_placeholder(&self, position: usize) -> String {
        match self {
            DialectImpl::Postgres(d) => d.param_placeholder(position),
            DialectImpl::Mssql(d) => d.param_placeholder(position),
            DialectImpl::Mysql(d) => d.param_placeholder(position),
        }
    }

    fn pagination(&self) -> PaginationStyle {
        match self {
            DialectImpl::Postgres(d) => d.pagination(),
            DialectImpl::Mssql(d) => d.pagination(),
            DialectImpl::Mysql(d) => d.pagination(),
        }
    }

    fn requires_order_for_offset(&self) -> bool {
        match self {
            DialectImpl::Postgres(d) => d.requires_order_for_offset(),
            DialectImpl::Mssql(d) => d.requires_order_for_offset(),
            DialectImpl::Mysql(d) => d.requires_order_for_offset(),
        }
    }

    fn returning(&self) -> ReturningStyle {
        match self {
            DialectImpl::Postgres(d) => d.returning(),
            DialectImpl::Mssql(d) => d.returning(),
            DialectImpl::Mysql(d) => d.returning(),
        }
    }

    fn supports_ilike(&self) -> bool {
        match self {
            DialectImpl::Postgres(d) => d.supports_ilike(),
            DialectImpl::Mssql(d) => d.supports_ilike(),
            DialectImpl::Mysql(d) => d.supports_ilike(),
        }
    }

    fn supports_is_boolean(&self) -> bool {
        match self {
            DialectImpl::Postgres(d) => d.supports_is_boolean(),
            DialectImpl::Mssql(d) => d.supports_is_boolean(),
            DialectImpl::Mysql(d) => d.supports_is_boolean(),
        }
    }
}

impl DialectImpl {
    /// Create a dialect implementation from a dialect or provider name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not recognized.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(DialectImpl::Postgres(PostgresDialect::new())),
            "tsql" | "mssql" | "sqlserver" | "sql_server" => {
                Ok(DialectImpl::Mssql(MssqlDialect::new()))
            }
            "mysql" | "mariadb" => Ok(DialectImpl::Mysql(MysqlDialect::new())),
            other => Err(RestError::Config(format!(
                "Unknown dialect: '{}'. Supported dialects: postgresql, tsql, mysql",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_impl_from_name() {
        assert_eq!(DialectImpl::from_name("postgres").unwrap().name(), "postgresql");
        assert_eq!(DialectImpl::from_name("MSSQL").unwrap().name(), "tsql");
        assert_eq!(DialectImpl::from_name("tsql").unwrap().name(), "tsql");
        assert_eq!(DialectImpl::from_name("mariadb").unwrap().name(), "mysql");

        let err = DialectImpl::from_name("oracle").unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_dialect_impl_dispatch() {
        let dialect = DialectImpl::from_name("tsql").unwrap();
        assert_eq!(dialect.quote_ident("t").unwrap(), "[t]");
        assert_eq!(dialect.param_placeholder(1), "@param1");
        assert!(dialect.requires_order_for_offset());

        let dialect = DialectImpl::from_name("pg").unwrap();
        assert_eq!(dialect.param_placeholder(1), "$2");
        assert!(dialect.supports_is_boolean());
    }
}
