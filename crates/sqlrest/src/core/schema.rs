//! Canonical schema metadata shared by every backend.
//!
//! Adapters normalize their catalog views into these types; the compiler and
//! the REST layer only ever see this shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Facts about a backend that callers may branch on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Row-level security with native filtering predicates.
    pub native_row_security: bool,
    /// Logical replication / change data capture built into the engine.
    pub native_replication: bool,
    /// A native JSON column type.
    pub native_json: bool,
    /// Publish/subscribe notifications (e.g. LISTEN/NOTIFY).
    pub pub_sub: bool,
    /// Built-in full-text search.
    pub full_text_search: bool,
    /// Pool ceiling configured for this adapter.
    pub max_connections: usize,
    /// Extensions installed in the connected database.
    pub supported_extensions: Vec<String>,
}

/// Table metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnInfo>,

    /// Primary key column names in key order.
    pub primary_keys: Vec<String>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKeyInfo>,

    /// Indexes, including the one backing the primary key when the backend reports it.
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    /// Create an empty table descriptor.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Drop primary-key names that have no matching column.
    ///
    /// Catalog facets are fetched independently, so a concurrent ALTER can
    /// leave a key column behind that the column facet no longer reports.
    pub fn retain_known_primary_keys(&mut self) {
        let names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        self.primary_keys.retain(|pk| names.contains(pk));
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Native type name as reported by the backend (e.g. "varchar", "int4").
    pub data_type: String,

    /// Backend-independent classification of `data_type`.
    pub logical_type: LogicalType,

    /// Whether the column is nullable.
    pub is_nullable: bool,

    /// Raw default expression in backend syntax.
    pub default_value: Option<String>,

    /// Whether this is an identity/auto-increment column.
    pub is_identity: bool,

    /// Maximum character/byte length, when bounded.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<i32>,

    /// Numeric scale.
    pub scale: Option<i32>,
}

impl ColumnInfo {
    /// Create a nullable column of the given native type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            logical_type,
            is_nullable: true,
            default_value: None,
            is_identity: false,
            max_length: None,
            precision: None,
            scale: None,
        }
    }
}

/// Canonical classification of native column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Float,
    Text,
    Binary,
    Uuid,
    Json,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Unknown,
}

impl LogicalType {
    /// Whether values of this type are numbers in JSON.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            LogicalType::SmallInt
                | LogicalType::Integer
                | LogicalType::BigInt
                | LogicalType::Decimal
                | LogicalType::Float
        )
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    /// Index name.
    pub name: String,

    /// Key columns in key order.
    pub columns: Vec<String>,

    /// Whether this is a unique index.
    pub is_unique: bool,

    /// Whether the index backs the primary key.
    pub is_primary: bool,
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyInfo {
    /// Constraint name.
    pub name: String,

    /// Local columns, in constraint ordinal order.
    pub columns: Vec<String>,

    /// Referenced schema.
    pub referenced_schema: String,

    /// Referenced table.
    pub referenced_table: String,

    /// Referenced columns, paired positionally with `columns`.
    pub referenced_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: ReferentialAction,

    /// ON UPDATE action.
    pub on_update: ReferentialAction,
}

/// Canonical referential action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    #[default]
    NoAction,
}

impl ReferentialAction {
    /// Map a backend spelling to the canonical action.
    ///
    /// Accepts `information_schema` spellings (`SET NULL`), `sys.foreign_keys`
    /// descriptors (`SET_NULL`) and `pg_constraint` codes (`n`). Anything
    /// unrecognized maps to `NoAction`.
    pub fn from_backend(raw: &str) -> Self {
        let normalized = raw.trim().to_uppercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "CASCADE" | "C" => ReferentialAction::Cascade,
            "SET NULL" | "N" => ReferentialAction::SetNull,
            "SET DEFAULT" | "D" => ReferentialAction::SetDefault,
            "RESTRICT" | "R" => ReferentialAction::Restrict,
            _ => ReferentialAction::NoAction,
        }
    }

    /// SQL spelling for DDL.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Statement kinds a security policy applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyOperation {
    Select,
    Insert,
    Update,
    Delete,
    #[default]
    All,
}

impl PolicyOperation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            PolicyOperation::Select => "SELECT",
            PolicyOperation::Insert => "INSERT",
            PolicyOperation::Update => "UPDATE",
            PolicyOperation::Delete => "DELETE",
            PolicyOperation::All => "ALL",
        }
    }
}

/// Row-level security policy.
///
/// `using` and `with_check` are opaque SQL predicates supplied by the caller.
/// They are placed into DDL verbatim and never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub name: String,
    pub schema: String,
    pub table: String,
    pub operation: PolicyOperation,
    pub using: Option<String>,
    pub with_check: Option<String>,
    pub role: Option<String>,
}

/// View metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    pub schema: String,
    pub name: String,
    pub definition: Option<String>,
}

/// Function or stored procedure metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub schema: String,
    pub name: String,
    /// "FUNCTION" or "PROCEDURE".
    pub kind: String,
    pub return_type: Option<String>,
}

/// Everything reachable under one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    pub schemas: Vec<String>,
    pub tables: Vec<TableInfo>,
    pub views: Vec<ViewInfo>,
    pub functions: Vec<FunctionInfo>,
}
