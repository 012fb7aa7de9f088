//! PostgreSQL catalog introspection.
//!
//! Columns, foreign keys, views and routines come from `information_schema`.
//! Primary keys and indexes come from `pg_catalog`, which exposes key
//! ordinals that `information_schema` does not.
//!
//! Every facet query runs on its own pooled connection, so the four facets
//! of a table are fetched concurrently.

use deadpool_postgres::{Object, Pool};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::core::schema::{ColumnInfo, FunctionInfo, SchemaInfo, TableInfo, ViewInfo};
use crate::drivers::common::normalize::{
    fold_foreign_keys, fold_indexes, fold_primary_key, ForeignKeyRow, IndexRow,
};
use crate::error::{RestError, Result};

use super::dialect::logical_type;

/// Tables introspected concurrently by [`load_schema`].
const TABLE_CONCURRENCY: usize = 4;

async fn client(pool: &Pool, context: &str) -> Result<Object> {
    pool.get()
        .await
        .map_err(|e| RestError::pool(e, format!("getting connection for {}", context)))
}

/// Base tables in a schema, ordered by name.
pub async fn list_tables(pool: &Pool, schema: &str) -> Result<Vec<String>> {
    let client = client(pool, "list_tables").await?;

    let query = r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_type = 'BASE TABLE'
          AND table_schema = $1
        ORDER BY table_name
    "#;

    let rows = client.query(query, &[&schema]).await?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// Full metadata for one table, or `None` if it has no columns (missing).
pub async fn load_table(pool: &Pool, schema: &str, name: &str) -> Result<Option<TableInfo>> {
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
        "Loaded {}: {} columns, {} foreign keys, {} indexes",
        table.full_name(),
        table.columns.len(),
        table.foreign_keys.len(),
        table.indexes.len()
    );
    Ok(Some(table))
}

async fn load_columns(pool: &Pool, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    let client = client(pool, "load_columns").await?;

    let query = r#"
        SELECT
            column_name::text,
            udt_name::text,
            is_nullable = 'YES',
            column_default::text,
            (is_identity = 'YES' OR COALESCE(column_default, '') LIKE 'nextval(%'),
            character_maximum_length::int4,
            numeric_precision::int4,
            numeric_scale::int4
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
    "#;

    let rows = client.query(query, &[&schema, &table]).await?;

    let columns = rows
        .iter()
        .map(|row| {
            let data_type: String = row.get(1);
            let mut col = ColumnInfo::new(row.get::<_, String>(0), &data_type, logical_type(&data_type));
            col.is_nullable = row.get(2);
            col.default_value = row.get(3);
            col.is_identity = row.get(4);
            col.max_length = row.get(5);
            col.precision = row.get(6);
            col.scale = row.get(7);
            col
        })
        .collect();

    Ok(columns)
}

async fn load_primary_key(pool: &Pool, schema: &str, table: &str) -> Result<Vec<(String, i32)>> {
    let client = client(pool, "load_primary_key").await?;

    let query = r#"
        SELECT a.attname::text, k.ord::int4
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE n.nspname = $1
          AND t.relname = $2
          AND c.contype = 'p'
    "#;

    let rows = client.query(query, &[&schema, &table]).await?;
    Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
}

/// Foreign-key columns of one table, paired with the referenced columns.
///
/// Read from pg_constraint by `conrelid`: constraint names are only unique
/// per table, so a name-based join through information_schema can pick up a
/// same-named constraint on a sibling table. Actions come back as
/// single-letter codes (`a`, `r`, `c`, `n`, `d`).
const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        c.conname::text,
        a.attname::text,
        k.ord::int4,
        rn.nspname::text,
        rt.relname::text,
        ra.attname::text,
        c.confdeltype::text,
        c.confupdtype::text
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
    CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, ref_attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
    JOIN pg_catalog.pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.ref_attnum
    WHERE c.contype = 'f'
      AND n.nspname = $1
      AND t.relname = $2
"#;

async fn load_foreign_keys(pool: &Pool, schema: &str, table: &str) -> Result<Vec<ForeignKeyRow>> {
    let client = client(pool, "load_foreign_keys").await?;

    let query = FOREIGN_KEYS_QUERY;

    let rows = client.query(query, &[&schema, &table]).await?;

    Ok(rows
        .iter()
        .map(|row| ForeignKeyRow {
            constraint_name: row.get(0),
            column_name: row.get(1),
            ordinal: row.get(2),
            referenced_schema: row.get(3),
            referenced_table: row.get(4),
            referenced_column: row.get(5),
            delete_rule: row.get(6),
            update_rule: row.get(7),
        })
        .collect())
}

async fn load_indexes(pool: &Pool, schema: &str, table: &str) -> Result<Vec<IndexRow>> {
    let client = client(pool, "load_indexes").await?;

    // expression columns (attnum 0) drop out of the join; INCLUDE columns
    // sit past indnkeyatts
    let query = r#"
        SELECT
            i.relname::text,
            a.attname::text,
            k.ord::int4,
            ix.indisunique,
            ix.indisprimary
        FROM pg_catalog.pg_index ix
        JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
        JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE n.nspname = $1
          AND t.relname = $2
          AND k.ord <= ix.indnkeyatts
    "#;

    let rows = client.query(query, &[&schema, &table]).await?;

    Ok(rows
        .iter()
        .map(|row| IndexRow {
            index_name: row.get(0),
            column_name: row.get(1),
            ordinal: row.get(2),
            is_unique: row.get(3),
            is_primary: row.get(4),
        })
        .collect())
}

/// Everything reachable from `schema`.
pub async fn load_schema(pool: &Pool, schema: &str) -> Result<SchemaInfo> {
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
        // tables dropped between listing and loading are skipped
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

async fn load_schema_names(pool: &Pool) -> Result<Vec<String>> {
    let client = client(pool, "load_schema_names").await?;

    let query = r#"
        SELECT schema_name::text
        FROM information_schema.schemata
        WHERE schema_name NOT LIKE 'pg\_%'
          AND schema_name <> 'information_schema'
        ORDER BY schema_name
    "#;

    let rows = client.query(query, &[]).await?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

async fn load_views(pool: &Pool, schema: &str) -> Result<Vec<ViewInfo>> {
    let client = client(pool, "load_views").await?;

    let query = r#"
        SELECT table_name::text, view_definition::text
        FROM information_schema.views
        WHERE table_schema = $1
        ORDER BY table_name
    "#;

    let rows = client.query(query, &[&schema]).await?;
    Ok(rows
        .iter()
        .map(|row| ViewInfo {
            schema: schema.to_string(),
            name: row.get(0),
            definition: row.get(1),
        })
        .collect())
}

async fn load_functions(pool: &Pool, schema: &str) -> Result<Vec<FunctionInfo>> {
    let client = client(pool, "load_functions").await?;

    let query = r#"
        SELECT routine_name::text, routine_type::text, data_type::text
        FROM information_schema.routines
        WHERE routine_schema = $1
        ORDER BY routine_name
    "#;

    let rows = client.query(query, &[&schema]).await?;
    Ok(rows
        .iter()
        .map(|row| FunctionInfo {
            schema: schema.to_string(),
            name: row.get(0),
            kind: row
                .get::<_, Option<String>>(1)
                .unwrap_or_else(|| "FUNCTION".to_string()),
            return_type: row.get(2),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_keys_scoped_to_owning_table() {
        let sql = FOREIGN_KEYS_QUERY;
        assert!(sql.contains("FROM pg_catalog.pg_constraint c"));
        assert!(sql.contains("t.oid = c.conrelid"));
        assert!(sql.contains("c.contype = 'f'"));
        // local and referenced columns come from one unnest, so they pair by position
        assert!(sql.contains("unnest(c.conkey, c.confkey) WITH ORDINALITY"));
        assert!(!sql.contains("information_schema"));
    }
}
