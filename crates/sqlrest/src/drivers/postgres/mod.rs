//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax facts for PostgreSQL
//! - [`PostgresAdapter`]: Pooled adapter with `information_schema`/`pg_catalog` introspection

mod adapter;
mod ddl;
mod dialect;
mod introspect;
mod params;

pub use adapter::PostgresAdapter;
pub use dialect::{logical_type, PostgresDialect};
