//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: T-SQL syntax facts for the compiler
//! - [`MssqlAdapter`]: Tiberius/bb8 backed [`crate::core::Adapter`]

mod adapter;
mod connection;
mod ddl;
mod dialect;
mod introspect;
mod params;

pub use adapter::MssqlAdapter;
pub use dialect::{logical_type, MssqlDialect};
