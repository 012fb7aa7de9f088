//! Folding of catalog rows into canonical metadata.
//!
//! Catalog queries return one row per column of a constraint or index.
//! These functions group those rows by name and order each group by the
//! catalog's ordinal column, so a constraint over N columns becomes exactly
//! one entry regardless of the order the rows arrived in.
//!
//! Both drivers produce the row types below from their own catalog views
//! and share the folding.

use std::collections::BTreeMap;

use crate::core::schema::{ForeignKeyInfo, IndexInfo, ReferentialAction};

/// One column of a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRow {
    pub constraint_name: String,
    pub column_name: String,
    /// 1-based position within the constraint.
    pub ordinal: i32,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
    /// Backend spelling of the ON DELETE action.
    pub delete_rule: String,
    /// Backend spelling of the ON UPDATE action.
    pub update_rule: String,
}

/// One key column of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub index_name: String,
    pub column_name: String,
    /// 1-based position within the index key.
    pub ordinal: i32,
    pub is_unique: bool,
    pub is_primary: bool,
}

/// Group foreign-key rows into one [`ForeignKeyInfo`] per constraint.
///
/// Output is ordered by constraint name.
pub fn fold_foreign_keys(rows: Vec<ForeignKeyRow>) -> Vec<ForeignKeyInfo> {
    let mut groups: BTreeMap<String, Vec<ForeignKeyRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(row.constraint_name.clone())
            .or_default()
            .push(row);
    }

    groups
        .into_iter()
        .filter_map(|(name, mut members)| {
            members.sort_by_key(|r| r.ordinal);
            let first = members.first()?.clone();
            Some(ForeignKeyInfo {
                name,
                columns: members.iter().map(|r| r.column_name.clone()).collect(),
                referenced_schema: first.referenced_schema,
                referenced_table: first.referenced_table,
                referenced_columns: members
                    .iter()
                    .map(|r| r.referenced_column.clone())
                    .collect(),
                on_delete: ReferentialAction::from_backend(&first.delete_rule),
                on_update: ReferentialAction::from_backend(&first.update_rule),
            })
        })
        .collect()
}

/// Group index rows into one [`IndexInfo`] per index.
///
/// Output is ordered by index name.
pub fn fold_indexes(rows: Vec<IndexRow>) -> Vec<IndexInfo> {
    let mut groups: BTreeMap<String, Vec<IndexRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.index_name.clone()).or_default().push(row);
    }

    groups
        .into_iter()
        .filter_map(|(name, mut members)| {
            members.sort_by_key(|r| r.ordinal);
            let first = members.first()?;
            let (is_unique, is_primary) = (first.is_unique, first.is_primary);
            Some(IndexInfo {
                name,
                columns: members.into_iter().map(|r| r.column_name).collect(),
                is_unique,
                is_primary,
            })
        })
        .collect()
}

/// Order primary-key columns by key position.
pub fn fold_primary_key(mut rows: Vec<(String, i32)>) -> Vec<String> {
    rows.sort_by_key(|(_, ordinal)| *ordinal);
    rows.into_iter().map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk_row(constraint: &str, column: &str, ordinal: i32, referenced: &str) -> ForeignKeyRow {
        ForeignKeyRow {
            constraint_name: constraint.to_string(),
            column_name: column.to_string(),
            ordinal,
            referenced_schema: "public".to_string(),
            referenced_table: "parents".to_string(),
            referenced_column: referenced.to_string(),
            delete_rule: "CASCADE".to_string(),
            update_rule: "NO ACTION".to_string(),
        }
    }

    #[test]
    fn test_three_rows_fold_into_one_fk_ordered_by_ordinal() {
        let rows = vec![
            fk_row("fk_parent", "c", 3, "z"),
            fk_row("fk_parent", "a", 1, "x"),
            fk_row("fk_parent", "b", 2, "y"),
        ];

        let fks = fold_foreign_keys(rows);
        assert_eq!(fks.len(), 1);
        let fk = &fks[0];
        assert_eq!(fk.name, "fk_parent");
        assert_eq!(fk.columns, vec!["a", "b", "c"]);
        assert_eq!(fk.referenced_columns, vec!["x", "y", "z"]);
        assert_eq!(fk.referenced_table, "parents");
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert_eq!(fk.on_update, ReferentialAction::NoAction);
    }

    #[test]
    fn test_interleaved_constraints_stay_separate() {
        let rows = vec![
            fk_row("fk_b", "b2", 2, "q"),
            fk_row("fk_a", "a1", 1, "p"),
            fk_row("fk_b", "b1", 1, "p"),
        ];

        let fks = fold_foreign_keys(rows);
        assert_eq!(fks.len(), 2);
        assert_eq!(fks[0].name, "fk_a");
        assert_eq!(fks[1].name, "fk_b");
        assert_eq!(fks[1].columns, vec!["b1", "b2"]);
        for fk in &fks {
            assert_eq!(fk.columns.len(), fk.referenced_columns.len());
        }
    }

    #[test]
    fn test_unknown_rule_maps_to_no_action() {
        let mut row = fk_row("fk", "a", 1, "x");
        row.delete_rule = "SOMETHING_ELSE".to_string();
        let fks = fold_foreign_keys(vec![row]);
        assert_eq!(fks[0].on_delete, ReferentialAction::NoAction);
    }

    #[test]
    fn test_catalog_action_codes() {
        let mut row = fk_row("fk_owner", "owner_id", 1, "id");
        row.delete_rule = "n".to_string();
        row.update_rule = "a".to_string();
        let fks = fold_foreign_keys(vec![row]);
        assert_eq!(fks[0].on_delete, ReferentialAction::SetNull);
        assert_eq!(fks[0].on_update, ReferentialAction::NoAction);
        assert_eq!(fks[0].columns, vec!["owner_id"]);
        assert_eq!(fks[0].referenced_columns, vec!["id"]);
    }

    #[test]
    fn test_fold_indexes() {
        let idx = |name: &str, col: &str, ordinal: i32, unique: bool| IndexRow {
            index_name: name.to_string(),
            column_name: col.to_string(),
            ordinal,
            is_unique: unique,
            is_primary: false,
        };
        let rows = vec![
            idx("ix_name", "last", 2, true),
            idx("ix_email", "email", 1, false),
            idx("ix_name", "first", 1, true),
        ];

        let indexes = fold_indexes(rows);
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "ix_email");
        assert_eq!(indexes[1].columns, vec!["first", "last"]);
        assert!(indexes[1].is_unique);
    }

    #[test]
    fn test_fold_primary_key() {
        let rows = vec![("tenant_id".to_string(), 2), ("id".to_string(), 1)];
        assert_eq!(fold_primary_key(rows), vec!["id", "tenant_id"]);
        assert!(fold_primary_key(Vec::new()).is_empty());
    }
}
