//! SQL Server catalog introspection.
//!
//! Columns come from `INFORMATION_SCHEMA`; keys and indexes from the `sys`
//! catalog views, one row per key column. Rows are folded by the shared
//! normalizer, so no string aggregation happens server side.

use futures::stream::{self, StreamExt, TryStreamExt};
use tiberius::Query;
use tracing::{debug, info};

use crate::core::schema::{ColumnInfo, FunctionInfo, SchemaInfo, TableInfo, ViewInfo};
use crate::drivers::common::normalize::{
    fold_foreign_keys, fold_indexes, fold_primary_key, ForeignKeyRow, IndexRow,
};
use crate::error::Result;

use super::connection::{checkout, MssqlPool};
use super::dialect::logical_type;

/// Tables introspected concurrently by [`load_schema`].
const TABLE_CONCURRENCY: usize = 4;

/// Run a catalog query bound to `binds` (as `@P1..`) on a fresh connection.
async fn fetch(
    pool: &MssqlPool,
    context: &str,
    sql: &str,
    binds: &[&str],
) -> Result<Vec<tiberius::Row>> {
    let mut conn = checkout(pool, context).await?;
    let mut query = Query::new(sql);
    for value in binds {
        query.bind(*value);
    }
    let rows = query.query(&mut *conn).await?.into_first_result().await?;
    Ok(rows)
}

fn text(row: &tiberius::Row, idx: usize) -> Result<String> {
    Ok(row.try_get::<&str, _>(idx)?.unwrap_or_default().to_string())
}

fn opt_text(row: &tiberius::Row, idx: usize) -> Result<Option<String>> {
    Ok(row.try_get::<&str, _>(idx)?.map(str::to_string))
}

fn int(row: &tiberius::Row, idx: usize) -> Result<Option<i32>> {
    Ok(row.try_get::<i32, _>(idx)?)
}

fn flag(row: &tiberius::Row, idx: usize) -> Result<bool> {
    Ok(row.try_get::<bool, _>(idx)?.unwrap_or(false))
}

/// Base tables in a schema, ordered by name.
pub async fn list_tables(pool: &MssqlPool, schema: &str) -> Result<Vec<String>> {
    let query = r#"
        SELECT TABLE_NAME
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_TYPE = 'BASE TABLE'
          AND TABLE_SCHEMA = @P1
        ORDER BY TABLE_NAME
    "#;

    let rows = fetch(pool, "list_tables", query, &[schema]).await?;
    rows.iter().map(|r| text(r, 0)).collect()
}

/// Full metadata for one table, or `None` if it has no columns (missing).
pub async fn load_table(pool: &MssqlPool, schema: &str, name: &str) -> Result<Option<TableInfo>> {
    let (columns, primary_keys, foreign_keys, indexes) = tokio::try_join!(
        load_columns(pool, schema, name),
        load_primary_key(pool, schema, name),
        load_foreign_keys(pool, schema, name),
        load_indexes(pool, schema, name),
    )?;

    if columns.is_empty() {
        return Ok(None);
    }

    let mut table = TableInfo::new(schema, name);
    table.columns = columns;
    table.primary_keys = fold_primary_key(primary_keys);
    table.foreign_keys = fold_foreign_keys(foreign_keys);
    table.indexes = fold_indexes(indexes);
    table.retain_known_primary_keys();

    debug!(
        "Loaded {}: {} columns, pk {:?}, {} foreign keys, {} indexes",
        table.full_name(),
        table.columns.len(),
        table.primary_keys,
        table.foreign_keys.len(),
        table.indexes.len()
    );
    Ok(Some(table))
}

async fn load_columns(pool: &MssqlPool, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    let query = r#"
        SELECT
            c.COLUMN_NAME,
            c.DATA_TYPE,
            CAST(CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS bit),
            c.COLUMN_DEFAULT,
            CAST(ISNULL(COLUMNPROPERTY(
                OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
                c.COLUMN_NAME, 'IsIdentity'), 0) AS bit),
            CAST(c.CHARACTER_MAXIMUM_LENGTH AS int),
            CAST(c.NUMERIC_PRECISION AS int),
            CAST(COALESCE(c.NUMERIC_SCALE, c.DATETIME_PRECISION) AS int)
        FROM INFORMATION_SCHEMA.COLUMNS c
        WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
        ORDER BY c.ORDINAL_POSITION
    "#;

    let rows = fetch(pool, "load_columns", query, &[schema, table]).await?;

    rows.iter()
        .map(|row| {
            let data_type = text(row, 1)?;
            let mut col = ColumnInfo::new(text(row, 0)?, &data_type, logical_type(&data_type));
            col.is_nullable = flag(row, 2)?;
            col.default_value = opt_text(row, 3)?;
            col.is_identity = flag(row, 4)?;
            col.max_length = int(row, 5)?;
            col.precision = int(row, 6)?;
            col.scale = int(row, 7)?;
            Ok(col)
        })
        .collect()
}

async fn load_primary_key(pool: &MssqlPool, schema: &str, table: &str) -> Result<Vec<(String, i32)>> {
    let query = r#"
        SELECT c.name, CAST(ic.key_ordinal AS int)
        FROM sys.indexes i
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        JOIN sys.tables t ON t.object_id = i.object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        WHERE i.is_primary_key = 1
          AND s.name = @P1
          AND t.name = @P2
    "#;

    let rows = fetch(pool, "load_primary_key", query, &[schema, table]).await?;
    rows.iter()
        .map(|row| Ok((text(row, 0)?, int(row, 1)?.unwrap_or(0))))
        .collect()
}

async fn load_foreign_keys(pool: &MssqlPool, schema: &str, table: &str) -> Result<Vec<ForeignKeyRow>> {
    let query = r#"
        SELECT
            fk.name,
            pc.name,
            CAST(fkc.constraint_column_id AS int),
            rs.name,
            rt.name,
            rc.name,
            fk.delete_referential_action_desc,
            fk.update_referential_action_desc
        FROM sys.foreign_keys fk
        JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
        JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
        JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
        JOIN sys.tables pt ON pt.object_id = fk.parent_object_id
        JOIN sys.schemas ps ON ps.schema_id = pt.schema_id
        JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id
        JOIN sys.schemas rs ON rs.schema_id = rt.schema_id
        WHERE ps.name = @P1 AND pt.name = @P2
    "#;

    let rows = fetch(pool, "load_foreign_keys", query, &[schema, table]).await?;
    rows.iter()
        .map(|row| {
            Ok(ForeignKeyRow {
                constraint_name: text(row, 0)?,
                column_name: text(row, 1)?,
                ordinal: int(row, 2)?.unwrap_or(0),
                referenced_schema: text(row, 3)?,
                referenced_table: text(row, 4)?,
                referenced_column: text(row, 5)?,
                delete_rule: text(row, 6)?,
                update_rule: text(row, 7)?,
            })
        })
        .collect()
}

async fn load_indexes(pool: &MssqlPool, schema: &str, table: &str) -> Result<Vec<IndexRow>> {
    // heaps (type 0) have no key; INCLUDE columns are not part of the key
    let query = r#"
        SELECT
            i.name,
            c.name,
            CAST(ic.key_ordinal AS int),
            i.is_unique,
            i.is_primary_key
        FROM sys.indexes i
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        JOIN sys.tables t ON t.object_id = i.object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        WHERE s.name = @P1
          AND t.name = @P2
          AND i.type > 0
          AND ic.is_included_column = 0
    "#;

    let rows = fetch(pool, "load_indexes", query, &[schema, table]).await?;
    rows.iter()
        .map(|row| {
            Ok(IndexRow {
                index_name: text(row, 0)?,
                column_name: text(row, 1)?,
                ordinal: int(row, 2)?.unwrap_or(0),
                is_unique: flag(row, 3)?,
                is_primary: flag(row, 4)?,
            })
        })
        .collect()
}

/// Everything reachable from `schema`.
pub async fn load_schema(pool: &MssqlPool, schema: &str) -> Result<SchemaInfo> {
    let names = list_tables(pool, schema).await?;

    let tables: Vec<Option<TableInfo>> = stream::iter(names)
        .map(|name| async move { load_table(pool, schema, &name).await })
        .buffered(TABLE_CONCURRENCY)
        .try_collect()
        .await?;

    let (schemas, views, functions) = tokio::try_join!(
        load_schema_names(pool),
        load_views(pool, schema),
        load_functions(pool, schema),
    )?;

    let info = SchemaInfo {
        schemas,
        tables: tables.into_iter().flatten().collect(),
        views,
        functions,
    };

    info!(
        "Introspected schema '{}': {} tables, {} views, {} functions",
        schema,
        info.tables.len(),
        info.views.len(),
        info.functions.len()
    );
    Ok(info)
}

async fn load_schema_names(pool: &MssqlPool) -> Result<Vec<String>> {
    // ids from 16384 up belong to fixed database roles
    let query = r#"
        SELECT name
        FROM sys.schemas
        WHERE schema_id < 16384
          AND name NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest')
        ORDER BY name
    "#;

    let rows = fetch(pool, "load_schema_names", query, &[]).await?;
    rows.iter().map(|r| text(r, 0)).collect()
}

async fn load_views(pool: &MssqlPool, schema: &str) -> Result<Vec<ViewInfo>> {
    // OBJECT_DEFINITION is not truncated the way VIEW_DEFINITION is
    let query = r#"
        SELECT v.name, OBJECT_DEFINITION(v.object_id)
        FROM sys.views v
        JOIN sys.schemas s ON s.schema_id = v.schema_id
        WHERE s.name = @P1
        ORDER BY v.name
    "#;

    let rows = fetch(pool, "load_views", query, &[schema]).await?;
    rows.iter()
        .map(|row| {
            Ok(ViewInfo {
                schema: schema.to_string(),
                name: text(row, 0)?,
                definition: opt_text(row, 1)?,
            })
        })
        .collect()
}

async fn load_functions(pool: &MssqlPool, schema: &str) -> Result<Vec<FunctionInfo>> {
    let query = r#"
        SELECT ROUTINE_NAME, ROUTINE_TYPE, DATA_TYPE
        FROM INFORMATION_SCHEMA.ROUTINES
        WHERE ROUTINE_SCHEMA = @P1
        ORDER BY ROUTINE_NAME
    "#;

    let rows = fetch(pool, "load_functions", query, &[schema]).await?;
    rows.iter()
        .map(|row| {
            Ok(FunctionInfo {
                schema: schema.to_string(),
                name: text(row, 0)?,
                kind: opt_text(row, 1)?.unwrap_or_else(|| "FUNCTION".to_string()),
                return_type: opt_text(row, 2)?,
            })
        })
        .collect()
}
