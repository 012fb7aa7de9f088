//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Double-quoted identifiers, `$N` placeholders, `LIMIT/OFFSET` paging and
//! `RETURNING *` for mutations.

use crate::core::identifier::quote_pg;
use crate::core::schema::LogicalType;
use crate::core::traits::{Dialect, DialectKind, PaginationStyle, ReturningStyle};
use crate::error::Result;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::PostgreSql
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn param_placeholder(&self, position: usize) -> String {
        // PostgreSQL parameters are 1-based
        format!("${}", position + 1)
    }

    fn pagination(&self) -> PaginationStyle {
        PaginationStyle::LimitOffset
    }

    fn returning(&self) -> ReturningStyle {
        ReturningStyle::Suffix
    }

    fn supports_ilike(&self) -> bool {
        true
    }

    fn supports_is_boolean(&self) -> bool {
        true
    }
}

/// Classify a PostgreSQL type name (`udt_name` or `data_type` spelling).
pub fn logical_type(data_type: &str) -> LogicalType {
    match data_type.to_lowercase().as_str() {
        "bool" | "boolean" => LogicalType::Boolean,
        "int2" | "smallint" | "smallserial" => LogicalType::SmallInt,
        "int4" | "integer" | "int" | "serial" => LogicalType::Integer,
        "int8" | "bigint" | "bigserial" => LogicalType::BigInt,
        "numeric" | "decimal" | "money" => LogicalType::Decimal,
        "float4" | "float8" | "real" | "double precision" => LogicalType::Float,
        "text" | "varchar" | "character varying" | "bpchar" | "character" | "char" | "name"
        | "citext" => LogicalType::Text,
        "bytea" => LogicalType::Binary,
        "uuid" => LogicalType::Uuid,
        "json" | "jsonb" => LogicalType::Json,
        "date" => LogicalType::Date,
        "time" | "time without time zone" | "timetz" | "time with time zone" => LogicalType::Time,
        "timestamp" | "timestamp without time zone" => LogicalType::Timestamp,
        "timestamptz" | "timestamp with time zone" => LogicalType::TimestampTz,
        _ => LogicalType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(dialect.quote_ident("my\"table").unwrap(), "\"my\"\"table\"");
        assert!(dialect.quote_ident("").is_err());
    }

    #[test]
    fn test_param_placeholder_is_one_based() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.param_placeholder(0), "$1");
        assert_eq!(dialect.param_placeholder(9), "$10");
    }

    #[test]
    fn test_dialect_facts() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.name(), "postgresql");
        assert_eq!(dialect.pagination(), PaginationStyle::LimitOffset);
        assert!(!dialect.requires_order_for_offset());
        assert_eq!(dialect.returning(), ReturningStyle::Suffix);
        assert!(dialect.supports_ilike());
        assert_eq!(
            dialect.qualify(Some("public"), "users").unwrap(),
            "\"public\".\"users\""
        );
    }

    #[test]
    fn test_logical_type() {
        assert_eq!(logical_type("int4"), LogicalType::Integer);
        assert_eq!(logical_type("character varying"), LogicalType::Text);
        assert_eq!(logical_type("timestamptz"), LogicalType::TimestampTz);
        assert_eq!(logical_type("jsonb"), LogicalType::Json);
        assert_eq!(logical_type("tsvector"), LogicalType::Unknown);
    }
}
