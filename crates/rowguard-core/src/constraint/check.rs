//! Row-level CHECK constraints.

use std::collections::BTreeSet;

use crate::catalog::{ColumnId, QualifiedName, Table, TableMap};
use crate::error::{ConstraintError, Error};
use crate::expr::{EvalInput, Expression, Truth};
use crate::index::IndexId;
use crate::storage::Row;

use super::{resolve_table, CheckContext, ConstraintBehavior, ConstraintId, ConstraintType, TableRef};

/// A predicate every row of the table must not falsify.
#[derive(Debug, Clone)]
pub struct CheckConstraint {
    id: ConstraintId,
    name: QualifiedName,
    table: TableRef,
    expression: Expression,
}

impl CheckConstraint {
    /// Create a check on `table`, binding the predicate's column references.
    pub fn new(
        id: ConstraintId,
        name: QualifiedName,
        table: &Table,
        mut expression: Expression,
    ) -> Result<Self, Error> {
        if expression.uses_domain_value() {
            return Err(Error::Definition(format!(
                "check constraint {name} cannot use VALUE"
            )));
        }
        expression.bind(table)?;
        Ok(Self {
            id,
            name,
            table: TableRef::of(table),
            expression,
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

    fn check(&self, ctx: &CheckContext<'_>, row: &Row) -> Result<(), Error> {
        let truth = ctx
            .evaluator
            .evaluate(ctx.session, &self.expression, EvalInput::Row(row))?;
        if truth == Truth::False {
            return Err(ConstraintError::CheckViolation {
                constraint: self.name.name.clone(),
                table: self.table.name.to_string(),
                expression: self.expression.to_sql(),
                value: row.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl ConstraintBehavior for CheckConstraint {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Check
    }

    fn check_row(
        &self,
        ctx: &CheckContext<'_>,
        _table: &Table,
        _old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        match new_row {
            Some(row) => self.check(ctx, row),
            None => Ok(()),
        }
    }

    fn uses_index(&self, _index: IndexId) -> bool {
        false
    }

    fn set_index_owner(&mut self, _index: IndexId) -> Result<(), Error> {
        Err(Error::Definition(format!(
            "check constraint {} has no backing index",
            self.name
        )))
    }

    fn referenced_columns(&self, table: &Table) -> BTreeSet<ColumnId> {
        if table.id == self.table.id {
            self.expression.columns()
        } else {
            BTreeSet::new()
        }
    }

    fn expression(&self) -> Option<&Expression> {
        Some(&self.expression)
    }

    fn create_sql_without_indexes(&self) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK({}) NOCHECK",
            self.table.name.to_sql(),
            self.name.to_sql(),
            self.expression.to_sql()
        )
    }

    fn check_existing_data(&self, ctx: &CheckContext<'_>) -> Result<(), Error> {
        ctx.for_each_row(self.table.id, |row| self.check(ctx, &row))
    }

    fn rebuild(&mut self, tables: &TableMap) -> Result<(), Error> {
        let table = resolve_table(&self.name, tables, self.table.id)?;
        let mut expression = self.expression.clone();
        expression
            .rebind(table)
            .map_err(|missing| Error::SchemaResolution {
                constraint: self.name.to_string(),
                reason: format!("column {} missing from {}", missing, table.name),
            })?;
        self.expression = expression;
        self.table = TableRef::of(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::value::Value;
    use crate::testing::Fixture;

    fn setup(predicate: &str) -> (Fixture, Table, CheckConstraint) {
        let mut fx = Fixture::new();
        let table = fx.create_table(
            Table::new("PUBLIC", "PRODUCTS")
                .with_column(Column::new("NAME", DataType::Text))
                .with_column(Column::new("PRICE", DataType::Float)),
        );
        let check = CheckConstraint::new(
            ConstraintId(3),
            QualifiedName::new("PUBLIC", "CK_PRICE"),
            &table,
            Expression::parse(predicate).unwrap(),
        )
        .unwrap();
        (fx, table, check)
    }

    #[test]
    fn test_false_rejects_unknown_passes() {
        let (fx, table, check) = setup("PRICE > 0");
        let ok = Fixture::row(vec!["pen".into(), 1.5.into()]);
        check.check_row(&fx.ctx(), &table, None, Some(&ok)).unwrap();

        let unknown = Fixture::row(vec!["pen".into(), Value::Null]);
        check.check_row(&fx.ctx(), &table, None, Some(&unknown)).unwrap();

        let bad = Fixture::row(vec!["pen".into(), (-1.0).into()]);
        let err = check.check_row(&fx.ctx(), &table, None, Some(&bad)).unwrap_err();
        match err.violation() {
            Some(ConstraintError::CheckViolation {
                constraint,
                expression,
                ..
            }) => {
                assert_eq!(constraint, "CK_PRICE");
                assert_eq!(expression, r#""PRICE" > 0"#);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Deletes are never checked.
        check.check_row(&fx.ctx(), &table, Some(&bad), None).unwrap();
    }

    #[test]
    fn test_unknown_column_and_value_rejected() {
        let mut fx = Fixture::new();
        let table = fx.create_table(Table::new("PUBLIC", "T").with_column(Column::new("A", DataType::Int)));
        let name = QualifiedName::new("PUBLIC", "CK");
        assert!(CheckConstraint::new(ConstraintId(1), name.clone(), &table, Expression::parse("B > 0").unwrap()).is_err());
        assert!(CheckConstraint::new(ConstraintId(1), name, &table, Expression::parse("VALUE > 0").unwrap()).is_err());
    }

    #[test]
    fn test_check_existing_data() {
        let (fx, table, check) = setup("PRICE >= 1");
        fx.put(table.id, vec!["a".into(), 2.0.into()], &[]);
        check.check_existing_data(&fx.ctx()).unwrap();
        fx.put(table.id, vec!["b".into(), 0.5.into()], &[]);
        assert!(check.check_existing_data(&fx.ctx()).unwrap_err().is_violation());
    }

    #[test]
    fn test_rebuild_follows_renamed_column() {
        let (mut fx, table, mut check) = setup("PRICE > 0");
        fx.catalog.rename_column(table.id, "PRICE", "COST").unwrap();
        check.rebuild(fx.catalog.table_map()).unwrap();
        assert_eq!(
            check.create_sql_without_indexes(),
            r#"ALTER TABLE "PUBLIC"."PRODUCTS" ADD CONSTRAINT "PUBLIC"."CK_PRICE" CHECK("COST" > 0) NOCHECK"#
        );
        assert!(check.set_index_owner(IndexId(1)).is_err());
        assert!(!check.uses_index(IndexId(1)));
    }
}
