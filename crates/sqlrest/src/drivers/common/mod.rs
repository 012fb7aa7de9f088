//! Common utilities shared across database drivers.
//!
//! - [`tls`]: TLS settings for PostgreSQL and SQL Server connections
//! - [`normalize`]: Folding of per-column catalog rows into grouped metadata

pub mod normalize;
pub mod tls;

pub use tls::{SslMode, TlsBuilder};
