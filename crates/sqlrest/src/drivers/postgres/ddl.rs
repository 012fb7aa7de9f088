//! PostgreSQL DDL generation.

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::schema::{ColumnInfo, PolicyOperation, SecurityPolicy, TableInfo};
use crate::error::{RestError, Result};

/// Statements that create `table` with its keys and secondary indexes.
///
/// The first statement is the CREATE TABLE; the rest are CREATE INDEX.
pub fn create_table(table: &TableInfo) -> Result<Vec<String>> {
    if table.columns.is_empty() {
        return Err(RestError::Validation(format!(
            "Table {} has no columns",
            table.full_name()
        )));
    }

    let qualified = qualify_pg(&table.schema, &table.name)?;
    let mut defs = Vec::with_capacity(table.columns.len() + table.foreign_keys.len() + 1);

    for col in &table.columns {
        defs.push(column_def(col)?);
    }

    if table.has_pk() {
        defs.push(format!("PRIMARY KEY ({})", quote_list(&table.primary_keys)?));
    }

    for fk in &table.foreign_keys {
        defs.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_pg(&fk.name)?,
            quote_list(&fk.columns)?,
            qualify_pg(&fk.referenced_schema, &fk.referenced_table)?,
            quote_list(&fk.referenced_columns)?,
            fk.on_delete,
            fk.on_update
        ));
    }

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n    {}\n)",
        qualified,
        defs.join(",\n    ")
    )];

    for idx in table.indexes.iter().filter(|i| !i.is_primary) {
        statements.push(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if idx.is_unique { "UNIQUE " } else { "" },
            quote_pg(&idx.name)?,
            qualified,
            quote_list(&idx.columns)?
        ));
    }

    Ok(statements)
}

fn column_def(col: &ColumnInfo) -> Result<String> {
    let mut def = format!("{} {}", quote_pg(&col.name)?, column_type(col));
    if col.is_identity {
        def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    } else if let Some(default) = &col.default_value {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    if !col.is_nullable {
        def.push_str(" NOT NULL");
    }
    Ok(def)
}

fn column_type(col: &ColumnInfo) -> String {
    let base = col.data_type.to_lowercase();
    match base.as_str() {
        "varchar" | "character varying" | "bpchar" | "char" | "character" => match col.max_length {
            Some(len) if len > 0 => format!("{}({})", base, len),
            _ => base,
        },
        "numeric" | "decimal" => match (col.precision, col.scale) {
            (Some(p), Some(s)) if p > 0 => format!("{}({},{})", base, p, s),
            (Some(p), None) if p > 0 => format!("{}({})", base, p),
            _ => base,
        },
        _ => base,
    }
}

fn quote_list(names: &[String]) -> Result<String> {
    Ok(names
        .iter()
        .map(|n| quote_pg(n))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// `DROP TABLE IF EXISTS`.
pub fn drop_table(schema: &str, name: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", qualify_pg(schema, name)?))
}

/// Turn row-level security on for a table. Idempotent.
pub fn enable_row_security(schema: &str, table: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ENABLE ROW LEVEL SECURITY",
        qualify_pg(schema, table)?
    ))
}

/// Lookup used to skip CREATE POLICY when the policy already exists.
pub const POLICY_EXISTS: &str =
    "SELECT 1 FROM pg_catalog.pg_policies WHERE schemaname = $1 AND tablename = $2 AND policyname = $3";

/// `CREATE POLICY` with the caller's predicates placed verbatim.
pub fn create_policy(policy: &SecurityPolicy) -> Result<String> {
    match policy.operation {
        PolicyOperation::Select | PolicyOperation::Delete if policy.with_check.is_some() => {
            return Err(RestError::Validation(format!(
                "Policy {}: WITH CHECK is not allowed for {}",
                policy.name,
                policy.operation.as_sql()
            )));
        }
        PolicyOperation::Insert if policy.using.is_some() => {
            return Err(RestError::Validation(format!(
                "Policy {}: USING is not allowed for INSERT",
                policy.name
            )));
        }
        _ => {}
    }

    let mut sql = format!(
        "CREATE POLICY {} ON {} FOR {}",
        quote_pg(&policy.name)?,
        qualify_pg(&policy.schema, &policy.table)?,
        policy.operation.as_sql()
    );
    if let Some(role) = &policy.role {
        sql.push_str(&format!(" TO {}", quote_pg(role)?));
    }
    if let Some(using) = &policy.using {
        sql.push_str(&format!(" USING ({})", using));
    }
    if let Some(check) = &policy.with_check {
        sql.push_str(&format!(" WITH CHECK ({})", check));
    }
    Ok(sql)
}

/// `DROP POLICY IF EXISTS`.
pub fn drop_policy(schema: &str, table: &str, name: &str) -> Result<String> {
    Ok(format!(
        "DROP POLICY IF EXISTS {} ON {}",
        quote_pg(name)?,
        qualify_pg(schema, table)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ForeignKeyInfo, IndexInfo, LogicalType, ReferentialAction};

    fn orders_table() -> TableInfo {
        let mut table = TableInfo::new("public", "orders");
        let mut id = ColumnInfo::new("id", "int4", LogicalType::Integer);
        id.is_identity = true;
        id.is_nullable = false;
        let mut code = ColumnInfo::new("code", "varchar", LogicalType::Text);
        code.max_length = Some(20);
        code.default_value = Some("'new'::character varying".into());
        let mut total = ColumnInfo::new("total", "numeric", LogicalType::Decimal);
        total.precision = Some(12);
        total.scale = Some(2);
        let customer = ColumnInfo::new("customer_id", "int4", LogicalType::Integer);
        table.columns = vec![id, code, total, customer];
        table.primary_keys = vec!["id".into()];
        table.foreign_keys = vec![ForeignKeyInfo {
            name: "fk_orders_customer".into(),
            columns: vec!["customer_id".into()],
            referenced_schema: "public".into(),
            referenced_table: "customers".into(),
            referenced_columns: vec!["id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        }];
        table.indexes = vec![
            IndexInfo {
                name: "orders_pkey".into(),
                columns: vec!["id".into()],
                is_unique: true,
                is_primary: true,
            },
            IndexInfo {
                name: "ix_orders_code".into(),
                columns: vec!["code".into()],
                is_unique: true,
                is_primary: false,
            },
        ];
        table
    }

    #[test]
    fn test_create_table_statements() {
        let statements = create_table(&orders_table()).unwrap();
        assert_eq!(statements.len(), 2);

        let create = &statements[0];
        assert!(create.starts_with("CREATE TABLE \"public\".\"orders\" ("));
        assert!(create.contains("\"id\" int4 GENERATED BY DEFAULT AS IDENTITY NOT NULL"));
        assert!(create.contains("\"code\" varchar(20) DEFAULT 'new'::character varying"));
        assert!(create.contains("\"total\" numeric(12,2)"));
        assert!(create.contains("PRIMARY KEY (\"id\")"));
        assert!(create.contains(
            "CONSTRAINT \"fk_orders_customer\" FOREIGN KEY (\"customer_id\") REFERENCES \"public\".\"customers\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION"
        ));

        assert_eq!(
            statements[1],
            "CREATE UNIQUE INDEX \"ix_orders_code\" ON \"public\".\"orders\" (\"code\")"
        );
    }

    #[test]
    fn test_create_table_without_columns_fails() {
        assert!(create_table(&TableInfo::new("public", "empty")).is_err());
    }

    #[test]
    fn test_create_policy() {
        let policy = SecurityPolicy {
            name: "tenant_isolation".into(),
            schema: "public".into(),
            table: "orders".into(),
            operation: PolicyOperation::All,
            using: Some("tenant_id = current_setting('app.tenant')::int".into()),
            with_check: Some("tenant_id = current_setting('app.tenant')::int".into()),
            role: Some("app_user".into()),
        };
        assert_eq!(
            create_policy(&policy).unwrap(),
            "CREATE POLICY \"tenant_isolation\" ON \"public\".\"orders\" FOR ALL TO \"app_user\" \
             USING (tenant_id = current_setting('app.tenant')::int) \
             WITH CHECK (tenant_id = current_setting('app.tenant')::int)"
        );
    }

    #[test]
    fn test_create_policy_rejects_misplaced_clauses() {
        let mut policy = SecurityPolicy {
            name: "p".into(),
            schema: "public".into(),
            table: "t".into(),
            operation: PolicyOperation::Select,
            using: None,
            with_check: Some("true".into()),
            role: None,
        };
        assert!(create_policy(&policy).is_err());

        policy.operation = PolicyOperation::Insert;
        policy.using = Some("true".into());
        assert!(create_policy(&policy).is_err());
    }

    #[test]
    fn test_drop_statements() {
        assert_eq!(
            drop_table("public", "orders").unwrap(),
            "DROP TABLE IF EXISTS \"public\".\"orders\""
        );
        assert_eq!(
            drop_policy("public", "orders", "p1").unwrap(),
            "DROP POLICY IF EXISTS \"p1\" ON \"public\".\"orders\""
        );
        assert_eq!(
            enable_row_security("public", "orders").unwrap(),
            "ALTER TABLE \"public\".\"orders\" ENABLE ROW LEVEL SECURITY"
        );
    }
}
