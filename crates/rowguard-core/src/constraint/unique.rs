//! PRIMARY KEY and UNIQUE constraints.

use std::collections::{BTreeSet, HashSet};

use crate::catalog::{ColumnId, QualifiedName, Table, TableMap};
use crate::error::{ConstraintError, Error};
use crate::index::{encode_key, IndexId};
use crate::storage::{Row, RowKey};
use crate::value::{render_values, Value};

use super::{
    column_list_sql, project, rebind_columns, resolve_table, CheckContext, ConstraintBehavior,
    ConstraintId, ConstraintType, IndexColumn, TableRef,
};

/// Uniqueness over a column list, backed by a unique index.
///
/// Keys containing NULL never conflict; a primary key rejects them instead.
#[derive(Debug, Clone)]
pub struct UniqueConstraint {
    id: ConstraintId,
    name: QualifiedName,
    table: TableRef,
    primary_key: bool,
    columns: Vec<IndexColumn>,
    index: Option<IndexId>,
    index_owner: bool,
}

impl UniqueConstraint {
    pub fn new(
        id: ConstraintId,
        name: QualifiedName,
        table: &Table,
        columns: Vec<IndexColumn>,
        primary_key: bool,
    ) -> Result<Self, Error> {
        if columns.is_empty() {
            return Err(Error::Definition(format!("constraint {name} has no columns")));
        }
        Ok(Self {
            id,
            name,
            table: TableRef::of(table),
            primary_key,
            columns,
            index: None,
            index_owner: false,
        })
    }

    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Key columns, in declaration order.
    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    /// Bind `index` as the backing index, owned or shared.
    pub(crate) fn attach_index(&mut self, index: IndexId, owner: bool) {
        self.index = Some(index);
        self.index_owner = owner;
    }

    fn key_of(&self, row: &Row) -> Vec<Value> {
        project(row, &self.columns)
    }

    fn violation(&self, key: &[Value]) -> Error {
        ConstraintError::UniqueViolation {
            constraint: self.name.name.clone(),
            table: self.table.name.to_string(),
            value: render_values(key),
        }
        .into()
    }

    fn null_violation(&self, key: &[Value]) -> Option<Error> {
        if !self.primary_key {
            return None;
        }
        let position = key.iter().position(Value::is_null)?;
        Some(
            ConstraintError::NotNullViolation {
                constraint: Some(self.name.name.clone()),
                table: self.table.name.to_string(),
                column: self.columns[position].name.clone(),
            }
            .into(),
        )
    }

    /// Another stored row with this key, ignoring the rows in `exclude`.
    fn conflicting_row(
        &self,
        ctx: &CheckContext<'_>,
        key: &[Value],
        exclude: &[RowKey],
    ) -> Result<Option<RowKey>, Error> {
        match self.index {
            Some(index) => Ok(ctx
                .indexes
                .lookup(index, key)?
                .into_iter()
                .find(|k| !exclude.contains(k))),
            None => Ok(ctx
                .find_row(self.table.id, |row| {
                    !exclude.contains(&row.key) && self.key_of(row) == key
                })?
                .map(|row| row.key)),
        }
    }
}

impl ConstraintBehavior for UniqueConstraint {
    fn constraint_type(&self) -> ConstraintType {
        if self.primary_key {
            ConstraintType::PrimaryKey
        } else {
            ConstraintType::Unique
        }
    }

    fn check_row(
        &self,
        ctx: &CheckContext<'_>,
        _table: &Table,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        let Some(new_row) = new_row else {
            return Ok(());
        };
        let key = self.key_of(new_row);
        if let Some(old_row) = old_row {
            if self.key_of(old_row) == key {
                return Ok(());
            }
        }
        if key.iter().any(Value::is_null) {
            return match self.null_violation(&key) {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }

        ctx.session.check_canceled()?;
        let mut exclude = vec![new_row.key];
        exclude.extend(old_row.map(|r| r.key));
        match self.conflicting_row(ctx, &key, &exclude)? {
            Some(_) => Err(self.violation(&key)),
            None => Ok(()),
        }
    }

    fn uses_index(&self, index: IndexId) -> bool {
        self.index == Some(index)
    }

    fn set_index_owner(&mut self, index: IndexId) -> Result<(), Error> {
        self.attach_index(index, true);
        Ok(())
    }

    fn referenced_columns(&self, table: &Table) -> BTreeSet<ColumnId> {
        if table.id == self.table.id {
            self.columns.iter().map(|c| c.id).collect()
        } else {
            BTreeSet::new()
        }
    }

    fn create_sql_without_indexes(&self) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}({})",
            self.table.name.to_sql(),
            self.name.to_sql(),
            self.constraint_type().sql_name(),
            column_list_sql(&self.columns)
        )
    }

    fn check_existing_data(&self, ctx: &CheckContext<'_>) -> Result<(), Error> {
        let mut seen = HashSet::new();
        ctx.for_each_row(self.table.id, |row| {
            let key = self.key_of(&row);
            if key.iter().any(Value::is_null) {
                return match self.null_violation(&key) {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            if !seen.insert(encode_key(&key)) {
                return Err(self.violation(&key));
            }
            Ok(())
        })
    }

    fn rebuild(&mut self, tables: &TableMap) -> Result<(), Error> {
        let table = resolve_table(&self.name, tables, self.table.id)?;
        let mut columns = self.columns.clone();
        rebind_columns(&self.name, table, &mut columns)?;
        self.columns = columns;
        self.table = TableRef::of(table);
        Ok(())
    }

    fn index(&self) -> Option<IndexId> {
        self.index
    }

    fn is_index_owner(&self) -> bool {
        self.index.is_some() && self.index_owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::index::IndexService;
    use crate::testing::Fixture;

    fn setup(primary_key: bool, indexed: bool) -> (Fixture, Table, UniqueConstraint) {
        let mut fx = Fixture::new();
        let table = fx.create_table(
            Table::new("PUBLIC", "USERS")
                .with_column(Column::new("ID", DataType::Int))
                .with_column(Column::new("EMAIL", DataType::Text)),
        );
        let column = if primary_key { "ID" } else { "EMAIL" };
        let mut unique = UniqueConstraint::new(
            ConstraintId(1),
            QualifiedName::new("PUBLIC", "UQ_USERS"),
            &table,
            IndexColumn::resolve_names(&table, &[column.to_string()]).unwrap(),
            primary_key,
        )
        .unwrap();
        if indexed {
            let index = fx
                .indexes
                .create_index("UQ_USERS_INDEX", table.id, &unique.column_ids(), true)
                .unwrap();
            unique.set_index_owner(index).unwrap();
        }
        (fx, table, unique)
    }

    fn indexes(unique: &UniqueConstraint) -> Vec<IndexId> {
        unique.index().into_iter().collect()
    }

    #[test]
    fn test_duplicate_key_rejected() {
        for indexed in [true, false] {
            let (fx, table, unique) = setup(false, indexed);
            fx.put(table.id, vec![1.into(), "a@example.com".into()], &indexes(&unique));

            let dup = Fixture::row(vec![2.into(), "a@example.com".into()]);
            let err = unique.check_row(&fx.ctx(), &table, None, Some(&dup)).unwrap_err();
            assert!(matches!(
                err.violation(),
                Some(ConstraintError::UniqueViolation { value, .. }) if value == "'a@example.com'"
            ));

            let fresh = Fixture::row(vec![2.into(), "b@example.com".into()]);
            unique.check_row(&fx.ctx(), &table, None, Some(&fresh)).unwrap();
        }
    }

    #[test]
    fn test_nulls_never_conflict() {
        let (fx, table, unique) = setup(false, true);
        fx.put(table.id, vec![1.into(), Value::Null], &indexes(&unique));
        let row = Fixture::row(vec![2.into(), Value::Null]);
        unique.check_row(&fx.ctx(), &table, None, Some(&row)).unwrap();
    }

    #[test]
    fn test_primary_key_rejects_null() {
        let (fx, table, pk) = setup(true, true);
        assert_eq!(pk.constraint_type(), ConstraintType::PrimaryKey);
        let row = Fixture::row(vec![Value::Null, "x".into()]);
        let err = pk.check_row(&fx.ctx(), &table, None, Some(&row)).unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(ConstraintError::NotNullViolation { column, .. }) if column == "ID"
        ));
    }

    #[test]
    fn test_update_keeping_key_is_skipped() {
        let (fx, table, unique) = setup(false, true);
        let stored = fx.put(table.id, vec![1.into(), "a@example.com".into()], &indexes(&unique));
        let mut updated = stored.clone();
        updated.values[0] = 10.into();
        unique
            .check_row(&fx.ctx(), &table, Some(&stored), Some(&updated))
            .unwrap();
        unique.check_row(&fx.ctx(), &table, Some(&stored), None).unwrap();
    }

    #[test]
    fn test_check_existing_data() {
        let (fx, table, unique) = setup(false, false);
        fx.put(table.id, vec![1.into(), "a".into()], &[]);
        fx.put(table.id, vec![2.into(), Value::Null], &[]);
        fx.put(table.id, vec![3.into(), Value::Null], &[]);
        unique.check_existing_data(&fx.ctx()).unwrap();
        unique.check_existing_data(&fx.ctx()).unwrap();

        fx.put(table.id, vec![4.into(), "a".into()], &[]);
        let err = unique.check_existing_data(&fx.ctx()).unwrap_err();
        assert!(err.is_violation());
    }

    #[test]
    fn test_sql_and_rebuild() {
        let (mut fx, table, mut unique) = setup(false, true);
        assert_eq!(
            unique.create_sql_without_indexes(),
            r#"ALTER TABLE "PUBLIC"."USERS" ADD CONSTRAINT "PUBLIC"."UQ_USERS" UNIQUE("EMAIL")"#
        );
        assert!(unique.is_index_owner());
        assert!(unique.is_before_action());

        fx.catalog.rename_column(table.id, "EMAIL", "MAIL").unwrap();
        unique.rebuild(fx.catalog.table_map()).unwrap();
        assert_eq!(unique.columns()[0].name, "MAIL");
        assert!(unique.create_sql_without_indexes().ends_with(r#"UNIQUE("MAIL")"#));
    }
}
