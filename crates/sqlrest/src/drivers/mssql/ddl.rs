//! SQL Server DDL generation, including row-level security.
//!
//! SQL Server expresses row security as a security policy whose predicates
//! are schema-bound inline table-valued functions. A policy's predicate text
//! refers to row columns as `@column`; each such column becomes a parameter
//! of the generated function and is passed in by the policy.

use std::collections::HashSet;

use crate::core::identifier::{mssql_string_literal, qualify_mssql, quote_mssql};
use crate::core::schema::{
    ColumnInfo, PolicyOperation, ReferentialAction, SecurityPolicy, TableInfo,
};
use crate::error::{RestError, Result};

/// Statements that create `table` with its keys and secondary indexes.
pub fn create_table(table: &TableInfo) -> Result<Vec<String>> {
    if table.columns.is_empty() {
        return Err(RestError::Validation(format!(
            "Table {} has no columns",
            table.full_name()
        )));
    }

    let qualified = qualify_mssql(&table.schema, &table.name)?;
    let mut defs = Vec::with_capacity(table.columns.len() + table.foreign_keys.len() + 1);

    for col in &table.columns {
        defs.push(column_def(col)?);
    }

    if table.has_pk() {
        defs.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_mssql(&format!("PK_{}", table.name))?,
            quote_list(&table.primary_keys)?
        ));
    }

    for fk in &table.foreign_keys {
        defs.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_mssql(&fk.name)?,
            quote_list(&fk.columns)?,
            qualify_mssql(&fk.referenced_schema, &fk.referenced_table)?,
            quote_list(&fk.referenced_columns)?,
            referential_action(fk.on_delete),
            referential_action(fk.on_update)
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
            quote_mssql(&idx.name)?,
            qualified,
            quote_list(&idx.columns)?
        ));
    }

    Ok(statements)
}

// SQL Server has no RESTRICT; NO ACTION is the equivalent check.
fn referential_action(action: ReferentialAction) -> &'static str {
    match action {
        ReferentialAction::Restrict => ReferentialAction::NoAction.as_sql(),
        other => other.as_sql(),
    }
}

fn column_def(col: &ColumnInfo) -> Result<String> {
    let mut def = format!("{} {}", quote_mssql(&col.name)?, column_type(col));
    if col.is_identity {
        def.push_str(" IDENTITY(1,1)");
    } else if let Some(default) = &col.default_value {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    def.push_str(if col.is_nullable { " NULL" } else { " NOT NULL" });
    Ok(def)
}

/// Native type with its length, precision or fractional-second scale.
fn column_type(col: &ColumnInfo) -> String {
    let base = col.data_type.to_lowercase();
    match base.as_str() {
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
            match col.max_length {
                Some(-1) => format!("{}(max)", base),
                Some(len) if len > 0 => format!("{}({})", base, len),
                _ => format!("{}(255)", base),
            }
        }
        "decimal" | "numeric" => match (col.precision, col.scale) {
            (Some(p), s) if p > 0 => format!("{}({}, {})", base, p, s.unwrap_or(0)),
            _ => format!("{}(18, 0)", base),
        },
        "datetime2" | "time" | "datetimeoffset" => match col.scale {
            Some(s) if s > 0 => format!("{}({})", base, s),
            _ => base,
        },
        _ => base,
    }
}

fn quote_list(names: &[String]) -> Result<String> {
    Ok(names
        .iter()
        .map(|n| quote_mssql(n))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// `DROP TABLE IF EXISTS`.
pub fn drop_table(schema: &str, name: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", qualify_mssql(schema, name)?))
}

/// Lookup used to skip creation when the policy already exists.
/// Bound as `[name, schema]`.
pub const POLICY_EXISTS: &str =
    "SELECT 1 AS present FROM sys.security_policies WHERE name = @param0 AND schema_id = SCHEMA_ID(@param1)";

/// Name of the function backing a policy's filter predicate.
pub fn using_function_name(policy: &str) -> String {
    format!("{}_using_predicate", policy)
}

/// Name of the function backing a policy's block predicate.
pub fn check_function_name(policy: &str) -> String {
    format!("{}_check_predicate", policy)
}

/// Columns referenced as `@name` in a predicate, in order of first use.
///
/// Matching is case-insensitive. `@@` system functions, string literals and
/// bracketed identifiers are skipped; names that match no column are left
/// for SQL Server to resolve.
pub fn predicate_columns<'a>(predicate: &str, columns: &'a [ColumnInfo]) -> Vec<(String, &'a ColumnInfo)> {
    let chars: Vec<char> = predicate.chars().collect();
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\'' => i = skip_until(&chars, i, '\''),
            '[' => i = skip_until(&chars, i, ']'),
            '@' if chars.get(i + 1) == Some(&'@') => {
                i += 2;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
            }
            '@' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let token: String = chars[start..end].iter().collect();
                if let Some(col) = columns.iter().find(|c| c.name.eq_ignore_ascii_case(&token)) {
                    if seen.insert(token.to_lowercase()) {
                        found.push((token, col));
                    }
                }
                i = end.max(i + 1);
            }
            _ => i += 1,
        }
    }
    found
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn skip_until(chars: &[char], start: usize, close: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// A schema-bound predicate function and the column list the policy passes to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateFunction {
    pub qualified_name: String,
    pub create_sql: String,
    /// Quoted column arguments for the policy's predicate call.
    pub arguments: String,
}

fn predicate_function(
    schema: &str,
    name: &str,
    predicate: &str,
    role: Option<&str>,
    table: &TableInfo,
) -> Result<PredicateFunction> {
    let qualified_name = qualify_mssql(schema, name)?;
    let params = predicate_columns(predicate, &table.columns);

    let signature = params
        .iter()
        .map(|(token, col)| format!("@{} {}", token, column_type(col)))
        .collect::<Vec<_>>()
        .join(", ");
    let arguments = params
        .iter()
        .map(|(_, col)| quote_mssql(&col.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut condition = format!("({})", predicate);
    if let Some(role) = role {
        condition.push_str(&format!(" AND IS_MEMBER({}) = 1", mssql_string_literal(role)));
    }

    let create_sql = format!(
        "CREATE OR ALTER FUNCTION {}({})\nRETURNS TABLE\nWITH SCHEMABINDING\nAS\nRETURN SELECT 1 AS allowed WHERE {}",
        qualified_name, signature, condition
    );

    Ok(PredicateFunction {
        qualified_name,
        create_sql,
        arguments,
    })
}

/// Everything needed to install one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatements {
    /// `CREATE OR ALTER FUNCTION` statements, run first.
    pub functions: Vec<String>,
    /// The `CREATE SECURITY POLICY` statement.
    pub policy: String,
}

/// Translate a policy into predicate functions plus a security policy.
///
/// | operation | predicates                                 |
/// |-----------|--------------------------------------------|
/// | SELECT    | FILTER(using)                              |
/// | INSERT    | BLOCK(check) AFTER INSERT                  |
/// | UPDATE    | FILTER(using), BLOCK(check) AFTER UPDATE   |
/// | DELETE    | FILTER(using), BLOCK(using) BEFORE DELETE  |
/// | ALL       | FILTER(using), BLOCK(check)                |
///
/// `check` falls back to `using` when no WITH CHECK predicate is given.
pub fn create_policy(policy: &SecurityPolicy, table: &TableInfo) -> Result<PolicyStatements> {
    let using = policy.using.as_deref();
    let check = policy.with_check.as_deref().or(using);
    let role = policy.role.as_deref();

    let using_fn = |predicate: &str| {
        predicate_function(
            &policy.schema,
            &using_function_name(&policy.name),
            predicate,
            role,
            table,
        )
    };
    let check_fn = |predicate: &str| {
        predicate_function(
            &policy.schema,
            &check_function_name(&policy.name),
            predicate,
            role,
            table,
        )
    };

    // (filter, block, block qualifier)
    let (filter, block, qualifier) = match policy.operation {
        PolicyOperation::Select => (Some(using_fn(require(policy, using, "USING")?)?), None, ""),
        PolicyOperation::Insert => (
            None,
            Some(check_fn(require(policy, check, "WITH CHECK")?)?),
            " AFTER INSERT",
        ),
        PolicyOperation::Update => (
            using.map(using_fn).transpose()?,
            Some(check_fn(require(policy, check, "WITH CHECK")?)?),
            " AFTER UPDATE",
        ),
        PolicyOperation::Delete => {
            let f = using_fn(require(policy, using, "USING")?)?;
            (Some(f.clone()), Some(f), " BEFORE DELETE")
        }
        PolicyOperation::All => {
            if using.is_none() && check.is_none() {
                return Err(RestError::Validation(format!(
                    "Policy {} has no predicate",
                    policy.name
                )));
            }
            (
                using.map(using_fn).transpose()?,
                check.map(check_fn).transpose()?,
                "",
            )
        }
    };

    let target = qualify_mssql(&policy.schema, &policy.table)?;
    let mut functions = Vec::new();
    let mut clauses = Vec::new();

    if let Some(f) = &filter {
        functions.push(f.create_sql.clone());
        clauses.push(format!(
            "ADD FILTER PREDICATE {}({}) ON {}",
            f.qualified_name, f.arguments, target
        ));
    }
    if let Some(b) = &block {
        if !functions.contains(&b.create_sql) {
            functions.push(b.create_sql.clone());
        }
        clauses.push(format!(
            "ADD BLOCK PREDICATE {}({}) ON {}{}",
            b.qualified_name, b.arguments, target, qualifier
        ));
    }

    let policy_sql = format!(
        "CREATE SECURITY POLICY {}\n{}\nWITH (STATE = ON)",
        qualify_mssql(&policy.schema, &policy.name)?,
        clauses.join(",\n")
    );

    Ok(PolicyStatements {
        functions,
        policy: policy_sql,
    })
}

fn require<'a>(policy: &SecurityPolicy, predicate: Option<&'a str>, clause: &str) -> Result<&'a str> {
    predicate.ok_or_else(|| {
        RestError::Validation(format!(
            "Policy {}: {} requires a {} predicate",
            policy.name,
            policy.operation.as_sql(),
            clause
        ))
    })
}

/// Drop a policy and both of its predicate functions, in that order.
pub fn drop_policy(schema: &str, name: &str) -> Result<Vec<String>> {
    Ok(vec![
        format!("DROP SECURITY POLICY IF EXISTS {}", qualify_mssql(schema, name)?),
        format!(
            "DROP FUNCTION IF EXISTS {}",
            qualify_mssql(schema, &using_function_name(name))?
        ),
        format!(
            "DROP FUNCTION IF EXISTS {}",
            qualify_mssql(schema, &check_function_name(name))?
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ForeignKeyInfo, LogicalType};

    fn documents() -> TableInfo {
        let mut table = TableInfo::new("dbo", "documents");
        let mut id = ColumnInfo::new("id", "int", LogicalType::Integer);
        id.is_identity = true;
        id.is_nullable = false;
        let mut owner = ColumnInfo::new("OwnerId", "nvarchar", LogicalType::Text);
        owner.max_length = Some(64);
        let mut body = ColumnInfo::new("body", "nvarchar", LogicalType::Text);
        body.max_length = Some(-1);
        let mut price = ColumnInfo::new("price", "decimal", LogicalType::Decimal);
        price.precision = Some(10);
        price.scale = Some(2);
        table.columns = vec![id, owner, body, price];
        table.primary_keys = vec!["id".into()];
        table
    }

    fn policy(operation: PolicyOperation) -> SecurityPolicy {
        SecurityPolicy {
            name: "owner_only".into(),
            schema: "dbo".into(),
            table: "documents".into(),
            operation,
            using: Some("@ownerid = USER_NAME()".into()),
            with_check: None,
            role: None,
        }
    }

    #[test]
    fn test_create_table() {
        let mut table = documents();
        table.foreign_keys = vec![ForeignKeyInfo {
            name: "FK_documents_owner".into(),
            columns: vec!["OwnerId".into()],
            referenced_schema: "dbo".into(),
            referenced_table: "owners".into(),
            referenced_columns: vec!["name".into()],
            on_delete: ReferentialAction::Restrict,
            on_update: ReferentialAction::Cascade,
        }];

        let statements = create_table(&table).unwrap();
        assert_eq!(statements.len(), 1);
        let sql = &statements[0];
        assert!(sql.starts_with("CREATE TABLE [dbo].[documents] ("));
        assert!(sql.contains("[id] int IDENTITY(1,1) NOT NULL"));
        assert!(sql.contains("[OwnerId] nvarchar(64) NULL"));
        assert!(sql.contains("[body] nvarchar(max) NULL"));
        assert!(sql.contains("[price] decimal(10, 2) NULL"));
        assert!(sql.contains("CONSTRAINT [PK_documents] PRIMARY KEY ([id])"));
        assert!(sql.contains(
            "FOREIGN KEY ([OwnerId]) REFERENCES [dbo].[owners] ([name]) ON DELETE NO ACTION ON UPDATE CASCADE"
        ));
    }

    #[test]
    fn test_drop_table() {
        assert_eq!(
            drop_table("dbo", "documents").unwrap(),
            "DROP TABLE IF EXISTS [dbo].[documents]"
        );
    }

    #[test]
    fn test_predicate_columns() {
        let table = documents();
        let found = predicate_columns(
            "@OWNERID = USER_NAME() AND @@SPID > 0 AND '@body' <> [@price] AND @ownerid IS NOT NULL AND @unknown = 1",
            &table.columns,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "OWNERID");
        assert_eq!(found[0].1.name, "OwnerId");
    }

    #[test]
    fn test_select_policy_is_filter_only() {
        let statements = create_policy(&policy(PolicyOperation::Select), &documents()).unwrap();
        assert_eq!(statements.functions.len(), 1);
        assert_eq!(
            statements.functions[0],
            "CREATE OR ALTER FUNCTION [dbo].[owner_only_using_predicate](@ownerid nvarchar(64))\n\
             RETURNS TABLE\nWITH SCHEMABINDING\nAS\n\
             RETURN SELECT 1 AS allowed WHERE (@ownerid = USER_NAME())"
        );
        assert_eq!(
            statements.policy,
            "CREATE SECURITY POLICY [dbo].[owner_only]\n\
             ADD FILTER PREDICATE [dbo].[owner_only_using_predicate]([OwnerId]) ON [dbo].[documents]\n\
             WITH (STATE = ON)"
        );
    }

    #[test]
    fn test_insert_policy_blocks_after_insert() {
        let mut p = policy(PolicyOperation::Insert);
        p.with_check = p.using.take();
        p.role = Some("editors".into());
        let statements = create_policy(&p, &documents()).unwrap();
        assert_eq!(statements.functions.len(), 1);
        assert!(statements.functions[0].contains("[owner_only_check_predicate]"));
        assert!(statements.functions[0].ends_with("AND IS_MEMBER(N'editors') = 1"));
        assert!(statements.policy.contains(
            "ADD BLOCK PREDICATE [dbo].[owner_only_check_predicate]([OwnerId]) ON [dbo].[documents] AFTER INSERT"
        ));
        assert!(!statements.policy.contains("FILTER"));
    }

    #[test]
    fn test_update_policy_uses_both_predicates() {
        let mut p = policy(PolicyOperation::Update);
        p.with_check = Some("@ownerid IS NOT NULL".into());
        let statements = create_policy(&p, &documents()).unwrap();
        assert_eq!(statements.functions.len(), 2);
        assert!(statements.policy.contains("ADD FILTER PREDICATE [dbo].[owner_only_using_predicate]"));
        assert!(statements.policy.contains("[owner_only_check_predicate]([OwnerId]) ON [dbo].[documents] AFTER UPDATE"));
    }

    #[test]
    fn test_delete_policy_shares_using_function() {
        let statements = create_policy(&policy(PolicyOperation::Delete), &documents()).unwrap();
        assert_eq!(statements.functions.len(), 1);
        assert!(statements.policy.contains("ADD FILTER PREDICATE [dbo].[owner_only_using_predicate]"));
        assert!(statements.policy.contains(
            "ADD BLOCK PREDICATE [dbo].[owner_only_using_predicate]([OwnerId]) ON [dbo].[documents] BEFORE DELETE"
        ));
    }

    #[test]
    fn test_all_policy_without_check_reuses_using_text() {
        let statements = create_policy(&policy(PolicyOperation::All), &documents()).unwrap();
        assert_eq!(statements.functions.len(), 2);
        assert!(statements.policy.contains("ADD FILTER PREDICATE"));
        assert!(statements.policy.contains("ADD BLOCK PREDICATE [dbo].[owner_only_check_predicate]([OwnerId]) ON [dbo].[documents]\nWITH"));
    }

    #[test]
    fn test_policy_without_predicate_is_rejected() {
        let mut p = policy(PolicyOperation::All);
        p.using = None;
        assert!(matches!(
            create_policy(&p, &documents()),
            Err(RestError::Validation(_))
        ));

        let mut p = policy(PolicyOperation::Select);
        p.using = None;
        p.with_check = Some("1 = 1".into());
        assert!(create_policy(&p, &documents()).is_err());
    }

    #[test]
    fn test_drop_policy() {
        assert_eq!(
            drop_policy("dbo", "owner_only").unwrap(),
            vec![
                "DROP SECURITY POLICY IF EXISTS [dbo].[owner_only]",
                "DROP FUNCTION IF EXISTS [dbo].[owner_only_using_predicate]",
                "DROP FUNCTION IF EXISTS [dbo].[owner_only_check_predicate]",
            ]
        );
    }
}
