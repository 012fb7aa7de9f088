//! # sqlrest
//!
//! Database-agnostic REST query layer for PostgreSQL and SQL Server.
//!
//! This library provides:
//!
//! - **Filter parsing** of PostgREST-style query strings (`age=gte.18&order=name.desc`)
//! - **Query compilation** into parameterized SQL for each dialect
//! - **Adapters** with pooled connections, transactions and DDL
//! - **Schema introspection** into one canonical table/column/key model
//! - **REST handlers** producing `{ data, count, total }` envelopes
//! - **Change polling** over a cursor column
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlrest::{AdapterRegistry, Config, Method, RestRequest, RestService};
//!
//! #[tokio::main]
//! async fn main() -> sqlrest::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let registry = AdapterRegistry::with_builtins();
//!     let adapter = registry.create(&config.provider, &config).await?;
//!
//!     let service = RestService::new(adapter, &config);
//!     let request = RestRequest::new(Method::Get, "users").with_param("age", "gte.18");
//!     let response = service.handle(request).await;
//!     println!("{} {}", response.status, response.body);
//!     Ok(())
//! }
//! ```

pub mod changes;
pub mod compiler;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod filter;
pub mod rest;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use changes::{ChangeBatch, ChangePoller};
pub use compiler::{CompiledQuery, QueryCompiler, TableRef};
pub use config::{Config, ConnectionConfig};
pub use core::{
    transaction, Adapter, AdapterRegistry, Dialect, DialectKind, QueryResult, Row, SchemaInfo,
    SqlValue, TableInfo, TransactionContext,
};
pub use drivers::{DialectImpl, MssqlAdapter, PostgresAdapter};
pub use error::{RestError, Result};
pub use filter::{parse_query, Filter, FilterQuery, Operator};
pub use rest::{Method, RestRequest, RestResponse, RestService};
