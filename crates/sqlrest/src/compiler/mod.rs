//! Dialect-aware SQL compiler.
//!
//! Turns a [`FilterQuery`] (or a row plus key) into one parameterized
//! statement. Identifiers are always quoted through the dialect; values
//! only ever travel as parameters.

mod predicate;

use serde::Serialize;
use tracing::debug;

use crate::core::traits::{Dialect, DialectKind, PaginationStyle, ReturningStyle};
use crate::core::value::{Row, SqlValue};
use crate::error::{RestError, Result};
use crate::filter::{Filter, FilterQuery, OrderBy};

use predicate::{compile_key_match, compile_where, ParamList};

/// A statement ready to hand to [`Adapter::query`](crate::core::Adapter::query).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    fn new(parts: Vec<String>, params: ParamList<'_>) -> Self {
        Self {
            sql: parts.join(" "),
            params: params.into_values(),
        }
    }
}

/// Table reference, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parse `table` or `schema.table`.
    pub fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Self::qualified(schema, name)
            }
            _ => Self::new(path),
        }
    }

    /// The schema, or `default` when unqualified.
    pub fn schema_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default)
    }

    fn render(&self, dialect: &dyn Dialect) -> Result<String> {
        dialect.qualify(self.schema.as_deref(), &self.name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Compiles requests into SQL for one dialect.
///
/// # Example
///
/// ```rust,ignore
/// let compiler = QueryCompiler::new(adapter.dialect(), 1000);
/// let query = compiler.select(&TableRef::new("users"), &filter_query)?;
/// let result = adapter.query(&query.sql, &query.params).await?;
/// ```
pub struct QueryCompiler<'d> {
    dialect: &'d dyn Dialect,
    max_rows: usize,
}

impl<'d> QueryCompiler<'d> {
    /// `max_rows` caps every SELECT, whatever limit the request asks for.
    pub fn new(dialect: &'d dyn Dialect, max_rows: usize) -> Self {
        Self {
            dialect,
            max_rows: max_rows.max(1),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect
    }

    /// Rows a SELECT will fetch for a requested limit.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.max_rows).min(self.max_rows)
    }

    /// `SELECT cols FROM t [WHERE ..] [ORDER BY ..] <paging>`
    pub fn select(&self, table: &TableRef, query: &FilterQuery) -> Result<CompiledQuery> {
        let mut params = ParamList::new(self.dialect);
        let mut parts = vec![
            format!("SELECT {}", self.projection(&query.select)?),
            format!("FROM {}", table.render(self.dialect)?),
        ];

        if let Some(clause) = compile_where(self.dialect, &query.filters, &mut params)? {
            parts.push(clause);
        }

        if let Some(order) = self.order_by(&query.order)? {
            parts.push(order);
        } else if self.dialect.requires_order_for_offset() {
            // OFFSET ... FETCH is only valid after ORDER BY
            parts.push("ORDER BY (SELECT NULL)".to_string());
        }

        let limit = self.effective_limit(query.limit);
        let offset = query.offset.unwrap_or(0);
        parts.push(match self.dialect.pagination() {
            PaginationStyle::LimitOffset => format!("LIMIT {} OFFSET {}", limit, offset),
            PaginationStyle::OffsetFetch => {
                format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, limit)
            }
        });

        let compiled = CompiledQuery::new(parts, params);
        debug!("{}: {}", self.dialect.name(), compiled.sql);
        Ok(compiled)
    }

    /// `SELECT COUNT(*) AS total` over the same filters, without paging.
    pub fn count(&self, table: &TableRef, filters: &[Filter]) -> Result<CompiledQuery> {
        let mut params = ParamList::new(self.dialect);
        let mut parts = vec![
            "SELECT COUNT(*) AS total".to_string(),
            format!("FROM {}", table.render(self.dialect)?),
        ];
        if let Some(clause) = compile_where(self.dialect, filters, &mut params)? {
            parts.push(clause);
        }
        Ok(CompiledQuery::new(parts, params))
    }

    /// `SELECT MAX(col) AS max_value FROM t`
    pub fn max(&self, table: &TableRef, column: &str) -> Result<CompiledQuery> {
        let parts = vec![
            format!("SELECT MAX({}) AS max_value", self.dialect.quote_ident(column)?),
            format!("FROM {}", table.render(self.dialect)?),
        ];
        Ok(CompiledQuery::new(parts, ParamList::new(self.dialect)))
    }

    /// Single-row INSERT; placeholders follow the row's column order.
    pub fn insert(&self, table: &TableRef, row: &Row) -> Result<CompiledQuery> {
        let mut params = ParamList::new(self.dialect);
        let mut parts = vec![format!("INSERT INTO {}", table.render(self.dialect)?)];

        let columns = row
            .columns()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Result<Vec<_>>>()?;

        if !columns.is_empty() {
            parts.push(format!("({})", columns.join(", ")));
        }
        if self.dialect.returning() == ReturningStyle::OutputClause {
            parts.push("OUTPUT INSERTED.*".to_string());
        }

        if columns.is_empty() {
            parts.push(match self.dialect.kind() {
                DialectKind::MySql => "() VALUES ()".to_string(),
                _ => "DEFAULT VALUES".to_string(),
            });
        } else {
            let placeholders: Vec<String> = row.values().map(|v| params.push(v.clone())).collect();
            parts.push(format!("VALUES ({})", placeholders.join(", ")));
        }

        if self.dialect.returning() == ReturningStyle::Suffix {
            parts.push("RETURNING *".to_string());
        }
        Ok(CompiledQuery::new(parts, params))
    }

    /// Batch UPDATE. At least one filter is required.
    pub fn update(&self, table: &TableRef, values: &Row, filters: &[Filter]) -> Result<CompiledQuery> {
        require_filters("UPDATE", filters)?;

        let mut params = ParamList::new(self.dialect);
        let mut parts = vec![
            format!("UPDATE {}", table.render(self.dialect)?),
            self.set_clause(values, &mut params)?,
        ];
        if let Some(clause) = compile_where(self.dialect, filters, &mut params)? {
            parts.push(clause);
        }
        Ok(CompiledQuery::new(parts, params))
    }

    /// Batch DELETE. At least one filter is required.
    pub fn delete(&self, table: &TableRef, filters: &[Filter]) -> Result<CompiledQuery> {
        require_filters("DELETE", filters)?;

        let mut params = ParamList::new(self.dialect);
        let mut parts = vec![format!("DELETE FROM {}", table.render(self.dialect)?)];
        if let Some(clause) = compile_where(self.dialect, filters, &mut params)? {
            parts.push(clause);
        }
        Ok(CompiledQuery::new(parts, params))
    }

    /// SELECT one row by primary key.
    pub fn select_by_key(
        &self,
        table: &TableRef,
        key_columns: &[String],
        key_values: &[SqlValue],
    ) -> Result<CompiledQuery> {
        let mut params = ParamList::new(self.dialect);
        let parts = vec![
            "SELECT *".to_string(),
            format!("FROM {}", table.render(self.dialect)?),
            compile_key_match(self.dialect, key_columns, key_values, &mut params)?,
        ];
        Ok(CompiledQuery::new(parts, params))
    }

    /// UPDATE one row by primary key, returning it where the dialect can.
    pub fn update_by_key(
        &self,
        table: &TableRef,
        values: &Row,
        key_columns: &[String],
        key_values: &[SqlValue],
    ) -> Result<CompiledQuery> {
        let mut params = ParamList::new(self.dialect);
        let mut parts = vec![
            format!("UPDATE {}", table.render(self.dialect)?),
            self.set_clause(values, &mut params)?,
        ];
        if self.dialect.returning() == ReturningStyle::OutputClause {
            parts.push("OUTPUT INSERTED.*".to_string());
        }
        parts.push(compile_key_match(self.dialect, key_columns, key_values, &mut params)?);
        if self.dialect.returning() == ReturningStyle::Suffix {
            parts.push("RETURNING *".to_string());
        }
        Ok(CompiledQuery::new(parts, params))
    }

    /// DELETE one row by primary key, returning it where the dialect can.
    pub fn delete_by_key(
        &self,
        table: &TableRef,
        key_columns: &[String],
        key_values: &[SqlValue],
    ) -> Result<CompiledQuery> {
        let mut params = ParamList::new(self.dialect);
        let mut parts = vec![format!("DELETE FROM {}", table.render(self.dialect)?)];
        if self.dialect.returning() == ReturningStyle::OutputClause {
            parts.push("OUTPUT DELETED.*".to_string());
        }
        parts.push(compile_key_match(self.dialect, key_columns, key_values, &mut params)?);
        if self.dialect.returning() == ReturningStyle::Suffix {
            parts.push("RETURNING *".to_string());
        }
        Ok(CompiledQuery::new(parts, params))
    }

    fn projection(&self, columns: &[String]) -> Result<String> {
        if columns.is_empty() {
            return Ok("*".to_string());
        }
        let quoted = columns
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(quoted.join(", "))
    }

    fn order_by(&self, order: &[OrderBy]) -> Result<Option<String>> {
        if order.is_empty() {
            return Ok(None);
        }
        let items = order
            .iter()
            .map(|o| {
                Ok(format!(
                    "{} {}",
                    self.dialect.quote_ident(&o.column)?,
                    o.direction.as_sql()
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(format!("ORDER BY {}", items.join(", "))))
    }

    fn set_clause(&self, values: &Row, params: &mut ParamList<'_>) -> Result<String> {
        if values.is_empty() {
            return Err(RestError::validation("Update body has no columns to set"));
        }
        let assignments = values
            .iter()
            .map(|(column, value)| {
                Ok(format!(
                    "{} = {}",
                    self.dialect.quote_ident(column)?,
                    params.push(value.clone())
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("SET {}", assignments.join(", ")))
    }
}

fn require_filters(statement: &str, filters: &[Filter]) -> Result<()> {
    if filters.is_empty() {
        return Err(RestError::Validation(format!(
            "{} requires at least one filter",
            statement
        )));
    }
    Ok(())
}
