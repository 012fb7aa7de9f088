//! Core abstractions shared by every backend.
//!
//! - [`schema`]: Canonical table, column, index, foreign-key and policy metadata
//! - [`value`]: Tagged SQL values and ordered rows
//! - [`traits`]: The `Dialect`, `Adapter` and `TransactionContext` contracts
//! - [`registry`]: Provider name → adapter factory map
//! - [`identifier`]: Identifier validation and quoting
//!
//! Driver modules (`drivers/postgres`, `drivers/mssql`) implement these
//! contracts; the filter parser, compiler and REST layer depend only on them.

pub mod identifier;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use registry::{AdapterFactory, AdapterRegistry};
pub use schema::{
    Capabilities, ColumnInfo, ForeignKeyInfo, FunctionInfo, IndexInfo, LogicalType,
    PolicyOperation, ReferentialAction, SchemaInfo, SecurityPolicy, TableInfo, ViewInfo,
};
pub use traits::{
    transaction, Adapter, Dialect, DialectKind, FieldInfo, PaginationStyle, QueryResult,
    ReturningStyle, TransactionContext,
};
pub use value::{Row, SqlValue};
