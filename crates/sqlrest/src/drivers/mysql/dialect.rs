//! MySQL/MariaDB SQL dialect.
//!
//! Only the syntax facts are provided; there is no MySQL adapter.

use crate::core::identifier::quote_mysql;
use crate::core::traits::{Dialect, DialectKind, PaginationStyle, ReturningStyle};
use crate::error::Result;

/// MySQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mysql(name)
    }

    fn param_placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn pagination(&self) -> PaginationStyle {
        PaginationStyle::LimitOffset
    }

    fn returning(&self) -> ReturningStyle {
        ReturningStyle::Unsupported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_dialect() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.name(), "mysql");
        assert_eq!(dialect.quote_ident("users").unwrap(), "`users`");
        assert_eq!(dialect.param_placeholder(0), "?");
        assert_eq!(dialect.param_placeholder(5), "?");
        assert_eq!(dialect.returning(), ReturningStyle::Unsupported);
    }
}
