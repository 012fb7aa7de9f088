//! REST filter grammar and its intermediate representation.
//!
//! A request's query parameters are parsed into a [`FilterQuery`]:
//!
//! ```text
//! select=id,name&order=created_at.desc&limit=10&age=gte.18&status=in.(new,open)
//! ```
//!
//! Reserved keys are `select`, `order`, `limit` and `offset`. Every other key
//! names a column and carries `<operator>.<value>`. A value without a known
//! operator prefix is compared with `eq` as a whole.

mod parser;

use std::fmt;

use serde::Serialize;

use crate::core::value::SqlValue;

pub use parser::{coerce, parse_filters, parse_query};

/// Comparison operators of the filter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    Is,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Like,
        Operator::ILike,
        Operator::In,
        Operator::Is,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::In => "in",
            Operator::Is => "is",
        }
    }

    /// Look up an operator by its grammar spelling.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == prefix)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(SqlValue),
    List(Vec<SqlValue>),
}

/// One `column <op> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: FilterValue::Single(value.into()),
        }
    }

    pub fn list(column: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            column: column.into(),
            operator: Operator::In,
            value: FilterValue::List(values),
        }
    }
}

/// Sort direction of an `order` entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One `order` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Parsed request: projection, AND-combined filters, ordering and paging.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterQuery {
    /// Selected columns; empty means `*`.
    pub select: Vec<String>,

    /// Predicates in the order they appeared in the request.
    pub filters: Vec<Filter>,

    pub order: Vec<OrderBy>,

    /// Requested row limit, before the configured ceiling is applied.
    pub limit: Option<usize>,

    pub offset: Option<usize>,
}

impl FilterQuery {
    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }
}
