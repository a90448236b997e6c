//! Shared fixture for unit tests that need real storage.

use tempfile::TempDir;

use crate::catalog::{ConstraintCatalog, Table, TableId};
use crate::config::EnforcementConfig;
use crate::constraint::CheckContext;
use crate::expr::ExpressionEvaluator;
use crate::index::{IndexId, IndexService, SledIndexService};
use crate::session::Session;
use crate::storage::{Row, RowKey, RowStore, SledRowStore};
use crate::value::Value;

pub(crate) struct Fixture {
    _dir: TempDir,
    pub catalog: ConstraintCatalog,
    pub indexes: SledIndexService,
    pub rows: SledRowStore,
    pub evaluator: ExpressionEvaluator,
    pub config: EnforcementConfig,
    pub session: Session,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        Self {
            indexes: SledIndexService::open(&db).unwrap(),
            rows: SledRowStore::open(&db).unwrap(),
            _dir: dir,
            catalog: ConstraintCatalog::new(),
            evaluator: ExpressionEvaluator,
            config: EnforcementConfig::default(),
            session: Session::new(1),
        }
    }

    pub fn ctx(&self) -> CheckContext<'_> {
        CheckContext::new(
            &self.session,
            &self.catalog,
            &self.indexes,
            &self.rows,
            &self.evaluator,
            &self.config,
        )
    }

    pub fn create_table(&mut self, table: Table) -> Table {
        let id = self.catalog.add_table(table).unwrap();
        self.rows.create_table(id).unwrap();
        self.catalog.table(id).unwrap().clone()
    }

    /// Store a row and maintain the given indexes, skipping all checks.
    pub fn put(&self, table: TableId, values: Vec<Value>, indexes: &[IndexId]) -> Row {
        let row = Row::new(self.rows.next_key().unwrap(), values);
        self.rows.put(table, &row).unwrap();
        for index in indexes {
            let def = self.indexes.index(*index).unwrap();
            let positions = self.catalog.table(table).unwrap().positions_of(&def.columns).unwrap();
            self.indexes.insert(*index, &row.project(&positions), row.key).unwrap();
        }
        row
    }

    pub fn row(values: Vec<Value>) -> Row {
        Row::new(RowKey(u64::MAX), values)
    }
}
