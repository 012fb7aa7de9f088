//! Identifier validation and quoting.
//!
//! Table, column and schema names cannot be bound as parameters. Every name
//! that ends up in generated SQL is checked by [`validate_identifier`] and
//! wrapped by one of the [`QuoteStyle`]s, with the closing delimiter doubled.

use crate::error::{RestError, Result};

/// Longest identifier accepted, in bytes. SQL Server allows 128 characters;
/// PostgreSQL (63) and MySQL (64) truncate or reject earlier themselves.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject names no backend can store: empty, containing NUL or other
/// control characters, or longer than [`MAX_IDENTIFIER_LENGTH`].
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RestError::validation("Identifier cannot be empty"));
    }
    if let Some(c) = name.chars().find(|c| c.is_control()) {
        let what = if c == '\0' { "null byte" } else { "control character" };
        return Err(RestError::Validation(format!(
            "Identifier {:?} contains a {}",
            name, what
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(RestError::Validation(format!(
            "Identifier exceeds maximum length of {} bytes ({} given)",
            MAX_IDENTIFIER_LENGTH,
            name.len()
        )));
    }
    Ok(())
}

/// Delimiter pair used by a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// `"name"` (PostgreSQL, ANSI).
    DoubleQuote,
    /// `[name]` (SQL Server).
    Bracket,
    /// `` `name` `` (MySQL).
    Backtick,
}

impl QuoteStyle {
    fn delimiters(self) -> (char, char) {
        match self {
            QuoteStyle::DoubleQuote => ('"', '"'),
            QuoteStyle::Bracket => ('[', ']'),
            QuoteStyle::Backtick => ('`', '`'),
        }
    }

    /// Validate and quote a single identifier.
    pub fn quote(self, name: &str) -> Result<String> {
        validate_identifier(name)?;
        let (open, close) = self.delimiters();
        let mut out = String::with_capacity(name.len() + 2);
        out.push(open);
        for c in name.chars() {
            if c == close {
                out.push(close);
            }
            out.push(c);
        }
        out.push(close);
        Ok(out)
    }

    /// `schema.table` with both parts quoted.
    pub fn qualify(self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("{}.{}", self.quote(schema)?, self.quote(table)?))
    }
}

pub fn quote_pg(name: &str) -> Result<String> {
    QuoteStyle::DoubleQuote.quote(name)
}

pub fn quote_mysql(name: &str) -> Result<String> {
    QuoteStyle::Backtick.quote(name)
}

pub fn quote_mssql(name: &str) -> Result<String> {
    QuoteStyle::Bracket.quote(name)
}

pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    QuoteStyle::DoubleQuote.qualify(schema, table)
}

pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    QuoteStyle::Bracket.qualify(schema, table)
}

/// Render a string as a single-quoted SQL literal for DDL text that cannot
/// take parameters (role names inside predicate functions, dynamic EXEC).
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Unicode string literal for SQL Server (`N'...'`).
pub fn mssql_string_literal(value: &str) -> String {
    format!("N{}", string_literal(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_accepts_unusual_names() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects() {
        let err = |name: &str| validate_identifier(name).unwrap_err().to_string();
        assert!(err("").contains("empty"));
        assert!(err("table\0name").contains("null byte"));
        assert!(err("a\nb").contains("control character"));
        assert!(err(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1)).contains("maximum length"));
    }

    #[test]
    fn test_quote_styles_double_the_closing_delimiter() {
        assert_eq!(quote_pg("users").unwrap(), "\"users\"");
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
        assert_eq!(quote_mysql("a`b").unwrap(), "`a``b`");
        assert_eq!(
            quote_mssql("Robert]; DROP TABLE x;--").unwrap(),
            "[Robert]]; DROP TABLE x;--]"
        );
        // only the closing bracket needs escaping
        assert_eq!(quote_mssql("a[b").unwrap(), "[a[b]");
    }

    #[test]
    fn test_quote_pg_leaves_single_quotes_alone() {
        assert_eq!(
            quote_pg("Robert'); DROP TABLE Students;--").unwrap(),
            "\"Robert'); DROP TABLE Students;--\""
        );
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify_pg("public", "users").unwrap(), "\"public\".\"users\"");
        assert_eq!(qualify_mssql("dbo", "users").unwrap(), "[dbo].[users]");
        assert_eq!(
            QuoteStyle::Backtick.qualify("shop", "orders").unwrap(),
            "`shop`.`orders`"
        );
        assert!(qualify_pg("", "users").is_err());
        assert!(qualify_mssql("dbo", "t\0").is_err());
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(string_literal("o'brien"), "'o''brien'");
        assert_eq!(mssql_string_literal("app_reader"), "N'app_reader'");
    }
}
