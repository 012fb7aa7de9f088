//! SQL Server (T-SQL) dialect (Strategy pattern).
//!
//! Bracketed identifiers, `@paramN` placeholders, `OFFSET/FETCH` paging and
//! `OUTPUT INSERTED.*` / `OUTPUT DELETED.*` for mutations.

use crate::core::identifier::quote_mssql;
use crate::core::schema::LogicalType;
use crate::core::traits::{Dialect, DialectKind, PaginationStyle, ReturningStyle};
use crate::error::Result;

/// Prefix of compiled T-SQL placeholders.
pub const PARAM_PREFIX: &str = "@param";

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::TSql
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mssql(name)
    }

    fn param_placeholder(&self, position: usize) -> String {
        // 0-based; rewritten to tiberius' @P1.. at execution time
        format!("{}{}", PARAM_PREFIX, position)
    }

    fn pagination(&self) -> PaginationStyle {
        PaginationStyle::OffsetFetch
    }

    fn returning(&self) -> ReturningStyle {
        ReturningStyle::OutputClause
    }
}

/// Classify a SQL Server type name.
pub fn logical_type(data_type: &str) -> LogicalType {
    match data_type.to_lowercase().as_str() {
        "bit" => LogicalType::Boolean,
        "tinyint" | "smallint" => LogicalType::SmallInt,
        "int" => LogicalType::Integer,
        "bigint" => LogicalType::BigInt,
        "decimal" | "numeric" | "money" | "smallmoney" => LogicalType::Decimal,
        "float" | "real" => LogicalType::Float,
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "sysname" | "xml" => {
            LogicalType::Text
        }
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => LogicalType::Binary,
        "uniqueidentifier" => LogicalType::Uuid,
        "date" => LogicalType::Date,
        "time" => LogicalType::Time,
        "datetime" | "datetime2" | "smalldatetime" => LogicalType::Timestamp,
        "datetimeoffset" => LogicalType::TimestampTz,
        _ => LogicalType::Unknown,
    }
}
