//! Collaborators available to a constraint while it checks rows.

use crate::catalog::{ConstraintCatalog, Table, TableId};
use crate::config::EnforcementConfig;
use crate::error::Error;
use crate::expr::PredicateEvaluator;
use crate::index::IndexService;
use crate::session::Session;
use crate::storage::{Row, RowStore};

/// Read-only view of everything a check may consult.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub session: &'a Session,
    pub catalog: &'a ConstraintCatalog,
    pub indexes: &'a dyn IndexService,
    pub rows: &'a dyn RowStore,
    pub evaluator: &'a dyn PredicateEvaluator,
    pub config: &'a EnforcementConfig,
}

impl<'a> CheckContext<'a> {
    pub fn new(
        session: &'a Session,
        catalog: &'a ConstraintCatalog,
        indexes: &'a dyn IndexService,
        rows: &'a dyn RowStore,
        evaluator: &'a dyn PredicateEvaluator,
        config: &'a EnforcementConfig,
    ) -> Self {
        Self {
            session,
            catalog,
            indexes,
            rows,
            evaluator,
            config,
        }
    }

    /// Look up a table in the catalog.
    pub fn table(&self, id: TableId) -> Result<&'a Table, Error> {
        self.catalog
            .table(id)
            .ok_or_else(|| Error::not_found("table", id.to_string()))
    }

    /// Visit every stored row of `table`, polling the session between rows.
    pub fn for_each_row(
        &self,
        table: TableId,
        mut f: impl FnMut(Row) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for row in self.rows.scan(table)? {
            self.session.check_canceled()?;
            f(row?)?;
        }
        Ok(())
    }

    /// First row of `table` satisfying `pred`, by full scan.
    pub fn find_row(
        &self,
        table: TableId,
        mut pred: impl FnMut(&Row) -> bool,
    ) -> Result<Option<Row>, Error> {
        for row in self.rows.scan(table)? {
            self.session.check_canceled()?;
            let row = row?;
            if pred(&row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
