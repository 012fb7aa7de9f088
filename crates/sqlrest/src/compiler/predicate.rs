//! Parameter collection and WHERE-clause predicates.

use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::error::{RestError, Result};
use crate::filter::{Filter, FilterValue, Operator};

/// Collects bound values and hands out the matching placeholders.
///
/// The placeholder position is always the number of values collected so
/// far, so the two can never drift apart.
pub(crate) struct ParamList<'d> {
    dialect: &'d dyn Dialect,
    values: Vec<SqlValue>,
}

impl<'d> ParamList<'d> {
    pub(crate) fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Bind a value and return its placeholder.
    pub(crate) fn push(&mut self, value: SqlValue) -> String {
        let placeholder = self.dialect.param_placeholder(self.values.len());
        self.values.push(value);
        placeholder
    }

    pub(crate) fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// Compile one filter into a predicate, binding its values.
pub(crate) fn compile_filter(
    dialect: &dyn Dialect,
    filter: &Filter,
    params: &mut ParamList<'_>,
) -> Result<String> {
    let column = dialect.quote_ident(&filter.column)?;

    match (filter.operator, &filter.value) {
        (Operator::In, FilterValue::List(values)) => {
            if values.is_empty() {
                return Err(RestError::Validation(format!(
                    "in on '{}' needs at least one value",
                    filter.column
                )));
            }
            let placeholders: Vec<String> =
                values.iter().map(|v| params.push(v.clone())).collect();
            Ok(format!("{} IN ({})", column, placeholders.join(", ")))
        }
        (Operator::In, FilterValue::Single(value)) => {
            Ok(format!("{} IN ({})", column, params.push(value.clone())))
        }
        (Operator::Is, FilterValue::Single(value)) => is_predicate(dialect, &column, value),
        (operator, FilterValue::List(_)) => Err(RestError::Validation(format!(
            "{} on '{}' takes a single value",
            operator, filter.column
        ))),
        (Operator::ILike, FilterValue::Single(value)) if !dialect.supports_ilike() => Ok(format!(
            "LOWER({}) LIKE LOWER({})",
            column,
            params.push(value.clone())
        )),
        (operator, FilterValue::Single(value)) => Ok(format!(
            "{} {} {}",
            column,
            comparison(operator),
            params.push(value.clone())
        )),
    }
}

/// AND-join filters in order. Empty when there are no filters.
pub(crate) fn compile_where(
    dialect: &dyn Dialect,
    filters: &[Filter],
    params: &mut ParamList<'_>,
) -> Result<Option<String>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let predicates = filters
        .iter()
        .map(|f| compile_filter(dialect, f, params))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(format!("WHERE {}", predicates.join(" AND "))))
}

/// `col = p AND ...` over key columns.
pub(crate) fn compile_key_match(
    dialect: &dyn Dialect,
    key_columns: &[String],
    key_values: &[SqlValue],
    params: &mut ParamList<'_>,
) -> Result<String> {
    if key_columns.is_empty() {
        return Err(RestError::validation("No key columns given"));
    }
    if key_columns.len() != key_values.len() {
        return Err(RestError::Validation(format!(
            "Expected {} key value(s) for ({}), got {}",
            key_columns.len(),
            key_columns.join(", "),
            key_values.len()
        )));
    }

    let predicates = key_columns
        .iter()
        .zip(key_values)
        .map(|(column, value)| {
            Ok(format!(
                "{} = {}",
                dialect.quote_ident(column)?,
                params.push(value.clone())
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("WHERE {}", predicates.join(" AND ")))
}

fn comparison(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "=",
        Operator::Neq => "<>",
        Operator::Gt => ">",
        Operator::Gte => ">=",
        Operator::Lt => "<",
        Operator::Lte => "<=",
        Operator::Like => "LIKE",
        Operator::ILike => "ILIKE",
        // handled by the caller
        Operator::In => "IN",
        Operator::Is => "IS",
    }
}

fn is_predicate(dialect: &dyn Dialect, column: &str, value: &SqlValue) -> Result<String> {
    let sql = match (value, dialect.supports_is_boolean()) {
        (SqlValue::Null, _) => format!("{} IS NULL", column),
        (SqlValue::Bool(true), true) => format!("{} IS TRUE", column),
        (SqlValue::Bool(false), true) => format!("{} IS FALSE", column),
        (SqlValue::Bool(true), false) => format!("{} = 1", column),
        (SqlValue::Bool(false), false) => format!("{} = 0", column),
        (other, _) => {
            return Err(RestError::Validation(format!(
                "is expects null, true or false, got {}",
                other
            )))
        }
    };
    Ok(sql)
}
