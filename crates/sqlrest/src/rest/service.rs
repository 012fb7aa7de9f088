//! Resource handlers.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::compiler::{CompiledQuery, QueryCompiler, TableRef};
use crate::config::Config;
use crate::core::schema::{LogicalType, TableInfo};
use crate::core::traits::{transaction, Adapter, QueryResult, ReturningStyle};
use crate::core::value::{Row, SqlValue};
use crate::error::{RestError, Result};
use crate::filter::{parse_filters, parse_query, Filter, FilterQuery};

use super::{Method, RestRequest, RestResponse};

/// Serves resource requests against one adapter.
pub struct RestService {
    adapter: Arc<dyn Adapter>,
    default_schema: String,
    max_rows: usize,
    atomic_bulk_insert: bool,
}

impl RestService {
    pub fn new(adapter: Arc<dyn Adapter>, config: &Config) -> Self {
        Self {
            adapter,
            default_schema: config.default_schema().to_string(),
            max_rows: config.rest.max_rows,
            atomic_bulk_insert: config.rest.atomic_bulk_insert,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(self.adapter.dialect(), self.max_rows)
    }

    /// Route a request and render the outcome, errors included.
    pub async fn handle(&self, request: RestRequest) -> RestResponse {
        let method = request.method;
        let table = request.table.clone();

        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_backend() {
                    warn!("{} /{} failed: {}", method, table, e);
                } else {
                    debug!("{} /{} rejected: {}", method, table, e);
                }
                RestResponse::error(&e)
            }
        }
    }

    /// Route a request, returning errors unrendered.
    pub async fn dispatch(&self, request: RestRequest) -> Result<RestResponse> {
        let table = TableRef::parse(&request.table);
        let RestRequest {
            method,
            id,
            query,
            body,
            ..
        } = request;

        match (method, id) {
            (Method::Get, None) => {
                let query = parse_query(pairs(&query))?;
                Ok(RestResponse::ok(self.list(&table, &query).await?))
            }
            (Method::Get, Some(id)) => {
                let row = self.get_by_id(&table, &id).await?;
                Ok(RestResponse::ok(json!({ "data": row.to_json() })))
            }
            (Method::Post, None) => {
                let body = body.ok_or_else(|| RestError::validation("POST requires a body"))?;
                Ok(RestResponse::created(self.create(&table, &body).await?))
            }
            (Method::Patch, None) => {
                let body = body.ok_or_else(|| RestError::validation("PATCH requires a body"))?;
                let filters = parse_filters(pairs(&query))?;
                let count = self.update_where(&table, &filters, &body).await?;
                Ok(RestResponse::ok(json!({ "count": count })))
            }
            (Method::Put, Some(id)) => {
                let body = body.ok_or_else(|| RestError::validation("PUT requires a body"))?;
                let row = self.update_by_id(&table, &id, &body).await?;
                Ok(RestResponse::ok(json!({ "data": row.to_json() })))
            }
            (Method::Delete, None) => {
                let filters = parse_filters(pairs(&query))?;
                let count = self.delete_where(&table, &filters).await?;
                Ok(RestResponse::ok(json!({ "count": count })))
            }
            (Method::Delete, Some(id)) => {
                let row = self.delete_by_id(&table, &id).await?;
                Ok(RestResponse::ok(json!({ "data": row.to_json() })))
            }
            (Method::Post | Method::Patch, Some(_)) => Err(RestError::Validation(format!(
                "{} /{}/{{id}} is not a route; use /{}",
                method, table, table
            ))),
            (Method::Put, None) => Err(RestError::validation("PUT requires an id")),
        }
    }

    /// `GET /{table}`: page of rows plus the unpaged total.
    pub async fn list(&self, table: &TableRef, query: &FilterQuery) -> Result<JsonValue> {
        let compiler = self.compiler();
        let select = compiler.select(table, query)?;
        let count = compiler.count(table, &query.filters)?;

        let (rows, total) = tokio::try_join!(
            self.adapter.query(&select.sql, &select.params),
            self.adapter.query_one(&count.sql, &count.params),
        )?;

        let total = total
            .as_ref()
            .and_then(|row| row.get("total").or_else(|| row.values().next()))
            .and_then(as_count)
            .unwrap_or(rows.row_count);

        Ok(json!({
            "data": rows_json(&rows),
            "count": rows.rows.len(),
            "total": total,
        }))
    }

    /// `GET /{table}/{id}`
    pub async fn get_by_id(&self, table: &TableRef, id: &str) -> Result<Row> {
        let (columns, values) = self.resolve_key(table, id).await?;
        let query = self.compiler().select_by_key(table, &columns, &values)?;
        self.adapter
            .query_one(&query.sql, &query.params)
            .await?
            .ok_or_else(|| not_found(table, id))
    }

    /// `POST /{table}` with one object or an array of objects.
    pub async fn create(&self, table: &TableRef, body: &JsonValue) -> Result<JsonValue> {
        match body {
            JsonValue::Object(object) => {
                let row = Row::from_json_object(object);
                let query = self.compiler().insert(table, &row)?;
                let result = self.adapter.query(&query.sql, &query.params).await?;
                let data = self.inserted(result, row);
                Ok(json!({ "data": data.to_json() }))
            }
            JsonValue::Array(items) => {
                let rows = items
                    .iter()
                    .map(|item| match item {
                        JsonValue::Object(object) => Ok(Row::from_json_object(object)),
                        _ => Err(RestError::validation("Every element of a bulk insert must be an object")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                if rows.is_empty() {
                    return Err(RestError::validation("Bulk insert needs at least one row"));
                }

                let inserted = self.insert_many(table, rows).await?;
                Ok(json!({
                    "data": inserted.iter().map(Row::to_json).collect::<Vec<_>>(),
                    "count": inserted.len(),
                }))
            }
            _ => Err(RestError::validation("Request body must be an object or an array")),
        }
    }

    /// Insert rows one statement at a time.
    ///
    /// Without `atomic_bulk_insert`, rows before a failing one stay inserted
    /// and only the failing row's error is returned.
    async fn insert_many(&self, table: &TableRef, rows: Vec<Row>) -> Result<Vec<Row>> {
        let compiler = self.compiler();
        let queries = rows
            .iter()
            .map(|row| compiler.insert(table, row))
            .collect::<Result<Vec<CompiledQuery>>>()?;

        let results = if self.atomic_bulk_insert {
            transaction(self.adapter.as_ref(), move |tx| {
                Box::pin(async move {
                    let mut results = Vec::with_capacity(queries.len());
                    for query in &queries {
                        results.push(tx.query(&query.sql, &query.params).await?);
                    }
                    Ok(results)
                })
            })
            .await?
        } else {
            let mut results = Vec::with_capacity(queries.len());
            for query in &queries {
                results.push(self.adapter.query(&query.sql, &query.params).await?);
            }
            results
        };

        debug!("Inserted {} rows into {}", results.len(), table);
        Ok(results
            .into_iter()
            .zip(rows)
            .map(|(result, row)| self.inserted(result, row))
            .collect())
    }

    /// The row an INSERT returned, or the submitted row when the dialect
    /// cannot return one.
    fn inserted(&self, result: QueryResult, submitted: Row) -> Row {
        match self.adapter.dialect().returning() {
            ReturningStyle::Unsupported => submitted,
            _ => result.into_first().unwrap_or(submitted),
        }
    }

    /// `PATCH /{table}?filters`: returns the affected row count.
    pub async fn update_where(
        &self,
        table: &TableRef,
        filters: &[Filter],
        body: &JsonValue,
    ) -> Result<u64> {
        let values = body_row(body)?;
        let query = self.compiler().update(table, &values, filters)?;
        Ok(self.adapter.query(&query.sql, &query.params).await?.row_count)
    }

    /// `DELETE /{table}?filters`: returns the affected row count.
    pub async fn delete_where(&self, table: &TableRef, filters: &[Filter]) -> Result<u64> {
        let query = self.compiler().delete(table, filters)?;
        Ok(self.adapter.query(&query.sql, &query.params).await?.row_count)
    }

    /// `PUT /{table}/{id}`
    pub async fn update_by_id(&self, table: &TableRef, id: &str, body: &JsonValue) -> Result<Row> {
        let values = body_row(body)?;
        let (columns, keys) = self.resolve_key(table, id).await?;
        let compiler = self.compiler();
        let query = compiler.update_by_key(table, &values, &columns, &keys)?;
        let result = self.adapter.query(&query.sql, &query.params).await?;

        if self.adapter.dialect().returning() != ReturningStyle::Unsupported {
            return result.into_first().ok_or_else(|| not_found(table, id));
        }
        if result.row_count == 0 {
            return Err(not_found(table, id));
        }

        // the key may itself have been updated
        let keys: Vec<SqlValue> = columns
            .iter()
            .zip(keys)
            .map(|(column, old)| values.get(column).cloned().unwrap_or(old))
            .collect();
        let reselect = compiler.select_by_key(table, &columns, &keys)?;
        self.adapter
            .query_one(&reselect.sql, &reselect.params)
            .await?
            .ok_or_else(|| not_found(table, id))
    }

    /// `DELETE /{table}/{id}`: returns the deleted row.
    pub async fn delete_by_id(&self, table: &TableRef, id: &str) -> Result<Row> {
        let (columns, keys) = self.resolve_key(table, id).await?;
        let compiler = self.compiler();
        let query = compiler.delete_by_key(table, &columns, &keys)?;

        if self.adapter.dialect().returning() != ReturningStyle::Unsupported {
            let result = self.adapter.query(&query.sql, &query.params).await?;
            return result.into_first().ok_or_else(|| not_found(table, id));
        }

        let select = compiler.select_by_key(table, &columns, &keys)?;
        let row = self
            .adapter
            .query_one(&select.sql, &select.params)
            .await?
            .ok_or_else(|| not_found(table, id))?;
        self.adapter.query(&query.sql, &query.params).await?;
        Ok(row)
    }

    /// Look up the table's primary key and pair it with the id parts.
    async fn resolve_key(&self, table: &TableRef, id: &str) -> Result<(Vec<String>, Vec<SqlValue>)> {
        let schema = table.schema_or(&self.default_schema);
        let info = self
            .adapter
            .get_table(&table.name, schema)
            .await?
            .ok_or_else(|| RestError::NotFound(format!("Table {}.{}", schema, table.name)))?;

        if !info.has_pk() {
            return Err(RestError::MissingPrimaryKey(info.full_name()));
        }

        // a single-column key takes the id verbatim, commas included
        let parts: Vec<&str> = if info.primary_keys.len() > 1 {
            id.split(',').collect()
        } else {
            vec![id]
        };
        if parts.len() != info.primary_keys.len() {
            return Err(RestError::Validation(format!(
                "{} has a {}-column primary key ({}), got {} id part(s)",
                info.full_name(),
                info.primary_keys.len(),
                info.primary_keys.join(", "),
                parts.len()
            )));
        }

        let values = info
            .primary_keys
            .iter()
            .zip(parts)
            .map(|(column, raw)| key_value(&info, column, raw))
            .collect::<Result<Vec<_>>>()?;
        Ok((info.primary_keys.clone(), values))
    }
}

/// Type an id part by its key column.
fn key_value(table: &TableInfo, column: &str, raw: &str) -> Result<SqlValue> {
    let logical = table
        .column(column)
        .map(|c| c.logical_type)
        .unwrap_or(LogicalType::Unknown);

    let invalid = || {
        RestError::Validation(format!(
            "'{}' is not a valid {:?} value for {}",
            raw, logical, column
        ))
    };

    match logical {
        LogicalType::SmallInt | LogicalType::Integer | LogicalType::BigInt => {
            raw.parse::<i64>().map(SqlValue::Int).map_err(|_| invalid())
        }
        LogicalType::Uuid => Uuid::parse_str(raw).map(SqlValue::Uuid).map_err(|_| invalid()),
        LogicalType::Boolean => match raw {
            "true" | "1" => Ok(SqlValue::Bool(true)),
            "false" | "0" => Ok(SqlValue::Bool(false)),
            _ => Err(invalid()),
        },
        _ => Ok(SqlValue::Text(raw.to_string())),
    }
}

fn body_row(body: &JsonValue) -> Result<Row> {
    match body {
        JsonValue::Object(object) if !object.is_empty() => Ok(Row::from_json_object(object)),
        JsonValue::Object(_) => Err(RestError::validation("Request body has no columns")),
        _ => Err(RestError::validation("Request body must be an object")),
    }
}

fn pairs(query: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    query.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

fn rows_json(result: &QueryResult) -> Vec<JsonValue> {
    result.rows.iter().map(Row::to_json).collect()
}

fn as_count(value: &SqlValue) -> Option<u64> {
    match value {
        SqlValue::Int(n) => u64::try_from(*n).ok(),
        SqlValue::Decimal(d) => d.to_string().parse().ok(),
        SqlValue::Text(s) => s.parse().ok(),
        _ => None,
    }
}

fn not_found(table: &TableRef, id: &str) -> RestError {
    RestError::NotFound(format!("{}/{}", table, id))
}
