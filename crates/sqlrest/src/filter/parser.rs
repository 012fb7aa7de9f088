//! Query-parameter parsing.

use tracing::debug;

use crate::core::value::SqlValue;
use crate::error::{RestError, Result};

use super::{Filter, FilterQuery, FilterValue, OrderBy, Operator, SortDirection};

/// Operator prefixes of the wider PostgREST grammar that are recognized but
/// not implemented. Using one is an error rather than an `eq` on the whole
/// value.
const UNIMPLEMENTED_OPERATORS: &[&str] = &[
    "not", "cs", "cd", "ov", "sl", "sr", "nxr", "nxl", "adj", "fts", "plfts", "phfts", "wfts",
    "match", "imatch", "isdistinct", "any", "all",
];

/// Coerce a raw parameter value: `null`, `true`/`false`, integers, finite
/// floats, otherwise text.
pub fn coerce(raw: &str) -> SqlValue {
    match raw {
        "null" => SqlValue::Null,
        "true" => SqlValue::Bool(true),
        "false" => SqlValue::Bool(false),
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                SqlValue::Int(i)
            } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
                SqlValue::Float(f)
            } else {
                SqlValue::Text(raw.to_string())
            }
        }
    }
}

/// Parse decoded query parameters into a [`FilterQuery`].
pub fn parse_query<I, K, V>(pairs: I) -> Result<FilterQuery>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut query = FilterQuery::default();

    for (key, value) in pairs {
        let (key, value) = (key.as_ref(), value.as_ref());
        match key {
            "select" => query.select = parse_select(value),
            "order" => query.order = parse_order(value)?,
            "limit" => query.limit = Some(parse_limit(value)?),
            "offset" => query.offset = Some(parse_count("offset", value)?),
            column => query.filters.push(parse_filter(column, value)?),
        }
    }

    Ok(query)
}

/// Parse only column filters, rejecting reserved keys.
pub fn parse_filters<I, K, V>(pairs: I) -> Result<Vec<Filter>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let query = parse_query(pairs)?;
    if !query.select.is_empty() || !query.order.is_empty() || query.limit.is_some() || query.offset.is_some()
    {
        return Err(RestError::validation(
            "select, order, limit and offset are not allowed here",
        ));
    }
    Ok(query.filters)
}

fn parse_select(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "*")
        .map(String::from)
        .collect()
}

fn parse_order(value: &str) -> Result<Vec<OrderBy>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (column, direction) = match item.rsplit_once('.') {
                Some((column, d)) if d.eq_ignore_ascii_case("asc") => (column, SortDirection::Asc),
                Some((column, d)) if d.eq_ignore_ascii_case("desc") => (column, SortDirection::Desc),
                Some((_, other)) if is_direction_like(other) => {
                    return Err(RestError::Validation(format!(
                        "Invalid order direction '{}' (expected asc or desc)",
                        other
                    )));
                }
                _ => (item, SortDirection::Asc),
            };
            if column.is_empty() {
                return Err(RestError::Validation(format!("Invalid order entry '{}'", item)));
            }
            Ok(OrderBy {
                column: column.to_string(),
                direction,
            })
        })
        .collect()
}

// A trailing segment that reads like a direction keyword rather than part of
// a dotted column name.
fn is_direction_like(segment: &str) -> bool {
    matches!(
        segment.to_lowercase().as_str(),
        "ascending" | "descending" | "nullsfirst" | "nullslast" | "up" | "down"
    )
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|_| {
        RestError::Validation(format!(
            "{} must be a non-negative integer, got '{}'",
            key, value
        ))
    })
}

fn parse_limit(value: &str) -> Result<usize> {
    match parse_count("limit", value)? {
        0 => Err(RestError::validation("limit must be at least 1")),
        n => Ok(n),
    }
}

fn parse_filter(column: &str, value: &str) -> Result<Filter> {
    if column.trim().is_empty() {
        return Err(RestError::validation("Filter with an empty column name"));
    }

    let Some((prefix, operand)) = value.split_once('.') else {
        return Ok(Filter::new(column, Operator::Eq, coerce(value)));
    };

    let Some(operator) = Operator::from_prefix(prefix) else {
        if UNIMPLEMENTED_OPERATORS.contains(&prefix) {
            return Err(RestError::UnsupportedOperator {
                operator: prefix.to_string(),
            });
        }
        if looks_like_operator(prefix) {
            debug!(
                "Filter {}: unknown operator prefix '{}', matching '{}' with eq",
                column, prefix, value
            );
        }
        return Ok(Filter::new(column, Operator::Eq, coerce(value)));
    };

    let value = match operator {
        Operator::In => FilterValue::List(parse_list(operand)),
        Operator::Is => FilterValue::Single(parse_is(operand)?),
        // patterns are text even when they look numeric
        Operator::Like | Operator::ILike => FilterValue::Single(SqlValue::Text(operand.to_string())),
        _ => FilterValue::Single(coerce(operand)),
    };

    Ok(Filter {
        column: column.to_string(),
        operator,
        value,
    })
}

// A short lowercase word, as opposed to the local part of an email address
// or the integer part of a decimal.
fn looks_like_operator(prefix: &str) -> bool {
    (1..=10).contains(&prefix.len()) && prefix.chars().all(|c| c.is_ascii_lowercase())
}

/// `1,2,3` or `(1,2,3)`. `()` and an empty operand give an empty list.
fn parse_list(operand: &str) -> Vec<SqlValue> {
    let inner = operand
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(operand);
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|item| coerce(item.trim())).collect()
}

fn parse_is(operand: &str) -> Result<SqlValue> {
    match coerce(operand) {
        v @ (SqlValue::Null | SqlValue::Bool(_)) => Ok(v),
        _ => Err(RestError::Validation(format!(
            "is expects null, true or false, got '{}'",
            operand
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<FilterQuery> {
        parse_query(pairs.iter().copied())
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce("null"), SqlValue::Null);
        assert_eq!(coerce("true"), SqlValue::Bool(true));
        assert_eq!(coerce("false"), SqlValue::Bool(false));
        assert_eq!(coerce("42"), SqlValue::Int(42));
        assert_eq!(coerce("-7"), SqlValue::Int(-7));
        assert_eq!(coerce("2.5"), SqlValue::Float(2.5));
        assert_eq!(coerce("NaN"), SqlValue::Text("NaN".into()));
        assert_eq!(coerce("inf"), SqlValue::Text("inf".into()));
        assert_eq!(coerce("Alice"), SqlValue::Text("Alice".into()));
        assert_eq!(coerce("True"), SqlValue::Text("True".into()));
        assert_eq!(coerce(""), SqlValue::Text(String::new()));
    }

    #[test]
    fn test_reserved_keys() {
        let query = parse(&[
            ("select", "id, name,,*"),
            ("order", "created_at.desc,name"),
            ("limit", "10"),
            ("offset", "20"),
        ])
        .unwrap();

        assert_eq!(query.select, vec!["id", "name"]);
        assert_eq!(
            query.order,
            vec![OrderBy::desc("created_at"), OrderBy::asc("name")]
        );
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(20));
        assert!(!query.has_filters());
    }

    #[test]
    fn test_every_operator() {
        let query = parse(&[
            ("a", "eq.1"),
            ("b", "neq.x"),
            ("c", "gt.1.5"),
            ("d", "gte.2"),
            ("e", "lt.3"),
            ("f", "lte.4"),
            ("g", "like.A%"),
            ("h", "ilike.%b%"),
            ("i", "in.1,2,3"),
            ("j", "is.null"),
        ])
        .unwrap();

        let ops: Vec<Operator> = query.filters.iter().map(|f| f.operator).collect();
        assert_eq!(ops, Operator::ALL.to_vec());
        assert_eq!(query.filters[2].value, FilterValue::Single(SqlValue::Float(1.5)));
        assert_eq!(
            query.filters[8].value,
            FilterValue::List(vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)])
        );
        assert_eq!(query.filters[9].value, FilterValue::Single(SqlValue::Null));
    }

    #[test]
    fn test_filters_keep_encounter_order() {
        let query = parse(&[("z", "eq.1"), ("a", "eq.2"), ("z", "lt.9")]).unwrap();
        let columns: Vec<&str> = query.filters.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(columns, vec!["z", "a", "z"]);
    }

    #[test]
    fn test_value_without_operator_is_eq() {
        let query = parse(&[("email", "john.doe@example.com"), ("age", "30")]).unwrap();
        assert_eq!(
            query.filters[0],
            Filter::new("email", Operator::Eq, "john.doe@example.com")
        );
        assert_eq!(query.filters[1], Filter::new("age", Operator::Eq, 30i64));
    }

    #[test]
    fn test_unimplemented_operator_is_rejected_by_name() {
        let err = parse(&[("tags", "cs.{a,b}")]).unwrap_err();
        match err {
            RestError::UnsupportedOperator { operator } => assert_eq!(operator, "cs"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(parse(&[("name", "not.eq.x")]).is_err());
    }

    #[test]
    fn test_like_pattern_stays_text() {
        let query = parse(&[("code", "like.123%"), ("zip", "like.02134")]).unwrap();
        assert_eq!(query.filters[1].value, FilterValue::Single(SqlValue::Text("02134".into())));
    }

    #[test]
    fn test_in_list_with_parentheses() {
        let query = parse(&[("status", "in.(new, open)")]).unwrap();
        assert_eq!(
            query.filters[0].value,
            FilterValue::List(vec![SqlValue::Text("new".into()), SqlValue::Text("open".into())])
        );
    }

    #[test]
    fn test_is_accepts_only_null_and_booleans() {
        assert!(parse(&[("active", "is.true")]).is_ok());
        assert!(parse(&[("active", "is.false")]).is_ok());
        assert!(matches!(
            parse(&[("active", "is.maybe")]),
            Err(RestError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_paging() {
        assert!(parse(&[("limit", "ten")]).is_err());
        assert!(parse(&[("limit", "0")]).is_err());
        assert!(parse(&[("offset", "-1")]).is_err());
        assert_eq!(parse(&[("offset", "0")]).unwrap().offset, Some(0));
    }

    #[test]
    fn test_order_with_dotted_column_and_bad_direction() {
        let query = parse(&[("order", "name.asc")]).unwrap();
        assert_eq!(query.order, vec![OrderBy::asc("name")]);
        assert!(parse(&[("order", "name.descending")]).is_err());
        assert!(parse(&[("order", ".desc")]).is_err());
    }

    #[test]
    fn test_order_direction_is_case_insensitive() {
        let query = parse(&[("order", "created_at.DESC,name.Asc")]).unwrap();
        assert_eq!(
            query.order,
            vec![OrderBy::desc("created_at"), OrderBy::asc("name")]
        );
        assert!(parse(&[("order", "name.DESCENDING")]).is_err());
    }

    #[test]
    fn test_empty_in_list_parses_to_no_values() {
        for operand in ["in.()", "in.", "in.( )"] {
            let query = parse(&[("tags", operand)]).unwrap();
            assert_eq!(query.filters[0].value, FilterValue::List(Vec::new()), "{operand}");
        }
    }

    #[test]
    fn test_unknown_prefix_falls_back_to_eq() {
        let query = parse(&[("age", "gtx.5")]).unwrap();
        assert_eq!(query.filters[0], Filter::new("age", Operator::Eq, "gtx.5"));
        assert!(looks_like_operator("gtx"));
        assert!(!looks_like_operator(""));
        assert!(!looks_like_operator("John_Doe"));
        assert!(!looks_like_operator("3"));
    }

    #[test]
    fn test_parse_filters_rejects_reserved_keys() {
        assert_eq!(parse_filters([("id", "eq.1")]).unwrap().len(), 1);
        assert!(parse_filters([("limit", "1")]).is_err());
    }
}
