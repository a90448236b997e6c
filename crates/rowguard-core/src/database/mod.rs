//! The database handle: storage, catalog and the DDL/DML executors.
//!
//! Row mutations follow a two-phase protocol under a single write latch:
//! every applicable constraint checks the row transition first, and only
//! when all of them pass is the row written and its indexes maintained.

mod ddl;
mod dml;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use sled::Db;
use tracing::info;

use crate::catalog::{CatalogStore, ConstraintCatalog};
use crate::config::EnforcementConfig;
use crate::constraint::CheckContext;
use crate::error::Error;
use crate::expr::ExpressionEvaluator;
use crate::index::SledIndexService;
use crate::session::Session;
use crate::storage::{SledRowStore, StorageConfig};

/// An open database enforcing constraints on every row mutation.
pub struct Database {
    db: Db,
    config: EnforcementConfig,
    catalog: RwLock<ConstraintCatalog>,
    catalog_store: CatalogStore,
    rows: SledRowStore,
    indexes: SledIndexService,
    evaluator: ExpressionEvaluator,
    /// Held across check and write of every mutation.
    write_latch: Mutex<()>,
    next_session: AtomicU64,
}

impl Database {
    /// Open or create a database, restoring the last saved catalog.
    pub fn open(storage: StorageConfig, config: EnforcementConfig) -> Result<Self, Error> {
        let db = storage.to_sled_config().open()?;
        let catalog_store = CatalogStore::open(&db)?;
        let catalog = match catalog_store.load_current()? {
            Some(snapshot) => ConstraintCatalog::from_snapshot(snapshot)?,
            None => ConstraintCatalog::new(),
        };
        let rows = SledRowStore::open(&db)?;
        let indexes = SledIndexService::open(&db)?;

        info!(
            path = %storage.path.display(),
            catalog_version = catalog_store.current_version(),
            tables = catalog.tables().count(),
            constraints = catalog.constraints().count(),
            "opened database"
        );

        Ok(Self {
            db,
            config,
            catalog: RwLock::new(catalog),
            catalog_store,
            rows,
            indexes,
            evaluator: ExpressionEvaluator::new(),
            write_latch: Mutex::new(()),
            next_session: AtomicU64::new(1),
        })
    }

    /// Open a throwaway database with default enforcement settings.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(StorageConfig::temporary(), EnforcementConfig::default())
    }

    /// Start a new session.
    pub fn session(&self) -> Session {
        Session::new(self.next_session.fetch_add(1, Ordering::SeqCst))
    }

    /// Shared view of the catalog.
    pub fn catalog(&self) -> RwLockReadGuard<'_, ConstraintCatalog> {
        self.catalog.read()
    }

    pub fn config(&self) -> &EnforcementConfig {
        &self.config
    }

    /// Current persisted catalog version.
    pub fn catalog_version(&self) -> u64 {
        self.catalog_store.current_version()
    }

    /// Flush rows, indexes and the catalog to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.rows.flush()?;
        self.indexes.flush()?;
        self.catalog_store.flush()?;
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn context<'a>(
        &'a self,
        session: &'a Session,
        catalog: &'a ConstraintCatalog,
    ) -> CheckContext<'a> {
        CheckContext::new(
            session,
            catalog,
            &self.indexes,
            &self.rows,
            &self.evaluator,
            &self.config,
        )
    }

    /// Persist `next` and install it as the live catalog. On a storage
    /// failure the live catalog is left untouched.
    fn commit_catalog(
        &self,
        live: &mut ConstraintCatalog,
        next: ConstraintCatalog,
    ) -> Result<u64, Error> {
        let version = self.catalog_store.save(next.snapshot())?;
        *live = next;
        Ok(version)
    }
}
