//! Domain CHECK constraints.

use std::collections::BTreeSet;

use crate::catalog::{Column, ColumnId, Domain, QualifiedName, Table, TableMap};
use crate::error::{ConstraintError, Error};
use crate::expr::{EvalInput, Expression, Truth};
use crate::index::IndexId;
use crate::storage::Row;
use crate::value::Value;

use super::{CheckContext, ConstraintBehavior, ConstraintId, ConstraintType};

/// A predicate over `VALUE`, enforced on every column declared with the domain.
#[derive(Debug, Clone)]
pub struct DomainConstraint {
    id: ConstraintId,
    name: QualifiedName,
    domain: QualifiedName,
    expression: Expression,
}

impl DomainConstraint {
    pub fn new(
        id: ConstraintId,
        name: QualifiedName,
        domain: &Domain,
        expression: Expression,
    ) -> Result<Self, Error> {
        if expression.has_column_refs() {
            return Err(Error::Definition(format!(
                "domain constraint {name} may only refer to VALUE"
            )));
        }
        Ok(Self {
            id,
            name,
            domain: domain.name.clone(),
            expression,
        })
    }

    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn domain(&self) -> &QualifiedName {
        &self.domain
    }

    /// Columns of `table` declared with this domain, with their positions.
    pub fn columns_of<'t>(&self, table: &'t Table) -> Vec<(usize, &'t Column)> {
        if table.name.schema != self.domain.schema {
            return Vec::new();
        }
        table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.domain.as_deref() == Some(self.domain.name.as_str()))
            .collect()
    }

    fn check_value(
        &self,
        ctx: &CheckContext<'_>,
        table: &Table,
        value: &Value,
    ) -> Result<(), Error> {
        let truth = ctx
            .evaluator
            .evaluate(ctx.session, &self.expression, EvalInput::Value(value))?;
        if truth == Truth::False {
            return Err(ConstraintError::CheckViolation {
                constraint: self.name.name.clone(),
                table: table.name.to_string(),
                expression: self.expression.to_sql(),
                value: value.to_sql(),
            }
            .into());
        }
        Ok(())
    }
}

impl ConstraintBehavior for DomainConstraint {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Domain
    }

    fn check_row(
        &self,
        ctx: &CheckContext<'_>,
        table: &Table,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        let Some(new_row) = new_row else {
            return Ok(());
        };
        for (position, _) in self.columns_of(table) {
            let value = new_row.value(position);
            if old_row.is_some_and(|old| old.value(position) == value) {
                continue;
            }
            self.check_value(ctx, table, value)?;
        }
        Ok(())
    }

    fn uses_index(&self, _index: IndexId) -> bool {
        false
    }

    fn set_index_owner(&mut self, _index: IndexId) -> Result<(), Error> {
        Err(Error::Definition(format!(
            "domain constraint {} has no backing index",
            self.name
        )))
    }

    fn referenced_columns(&self, table: &Table) -> BTreeSet<ColumnId> {
        self.columns_of(table).into_iter().map(|(_, c)| c.id).collect()
    }

    fn expression(&self) -> Option<&Expression> {
        Some(&self.expression)
    }

    fn create_sql_without_indexes(&self) -> String {
        format!(
            "ALTER DOMAIN {} ADD CONSTRAINT {} CHECK({}) NOCHECK",
            self.domain.to_sql(),
            self.name.to_sql(),
            self.expression.to_sql()
        )
    }

    fn check_existing_data(&self, ctx: &CheckContext<'_>) -> Result<(), Error> {
        for table in ctx.catalog.tables() {
            let positions: Vec<usize> = self.columns_of(table).into_iter().map(|(p, _)| p).collect();
            if positions.is_empty() {
                continue;
            }
            ctx.for_each_row(table.id, |row| {
                positions
                    .iter()
                    .try_for_each(|p| self.check_value(ctx, table, row.value(*p)))
            })?;
        }
        Ok(())
    }

    /// Domains are never renamed and bind no columns, so there is nothing to refresh.
    fn rebuild(&mut self, _tables: &TableMap) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::testing::Fixture;

    fn setup() -> (Fixture, Table, DomainConstraint) {
        let mut fx = Fixture::new();
        let domain = Domain::new("PUBLIC", "QUANTITY", DataType::Int);
        fx.catalog.add_domain(domain.clone()).unwrap();
        let table = fx.create_table(
            Table::new("PUBLIC", "LINES")
                .with_column(Column::with_domain("ORDERED", &domain))
                .with_column(Column::new("NOTE", DataType::Text))
                .with_column(Column::with_domain("SHIPPED", &domain)),
        );
        let constraint = DomainConstraint::new(
            ConstraintId(4),
            QualifiedName::new("PUBLIC", "CK_QUANTITY"),
            &domain,
            Expression::parse("VALUE >= 0").unwrap(),
        )
        .unwrap();
        (fx, table, constraint)
    }

    #[test]
    fn test_every_domain_column_checked() {
        let (fx, table, constraint) = setup();
        assert_eq!(constraint.columns_of(&table).len(), 2);
        assert_eq!(constraint.referenced_columns(&table).len(), 2);

        let ok = Fixture::row(vec![1.into(), "x".into(), Value::Null]);
        constraint.check_row(&fx.ctx(), &table, None, Some(&ok)).unwrap();

        let bad = Fixture::row(vec![1.into(), "x".into(), (-2).into()]);
        let err = constraint.check_row(&fx.ctx(), &table, None, Some(&bad)).unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(ConstraintError::CheckViolation { value, .. }) if value == "-2"
        ));
    }

    #[test]
    fn test_unchanged_value_not_rechecked() {
        let (fx, table, constraint) = setup();
        let old = Fixture::row(vec![(-1).into(), "x".into(), 0.into()]);
        let new = Fixture::row(vec![(-1).into(), "y".into(), 0.into()]);
        constraint.check_row(&fx.ctx(), &table, Some(&old), Some(&new)).unwrap();
    }

    #[test]
    fn test_column_refs_rejected() {
        let domain = Domain::new("PUBLIC", "D", DataType::Int);
        let result = DomainConstraint::new(
            ConstraintId(1),
            QualifiedName::new("PUBLIC", "CK"),
            &domain,
            Expression::parse("A > 0").unwrap(),
        );
        assert!(matches!(result, Err(Error::Definition(_))));
    }

    #[test]
    fn test_check_existing_data_and_sql() {
        let (fx, table, constraint) = setup();
        fx.put(table.id, vec![3.into(), "a".into(), 1.into()], &[]);
        constraint.check_existing_data(&fx.ctx()).unwrap();
        fx.put(table.id, vec![3.into(), "b".into(), (-1).into()], &[]);
        assert!(constraint.check_existing_data(&fx.ctx()).unwrap_err().is_violation());

        assert_eq!(
            constraint.create_sql_without_indexes(),
            r#"ALTER DOMAIN "PUBLIC"."QUANTITY" ADD CONSTRAINT "PUBLIC"."CK_QUANTITY" CHECK(VALUE >= 0) NOCHECK"#
        );
    }
}
