//! MySQL/MariaDB dialect.
//!
//! - [`MysqlDialect`]: Backtick quoting, `?` placeholders, `LIMIT/OFFSET`
//!
//! Queries can be compiled for MySQL, but no adapter executes them.

mod dialect;

pub use dialect::MysqlDialect;
