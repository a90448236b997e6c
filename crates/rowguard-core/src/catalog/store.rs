//! Versioned persistence of catalog snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use sled::{Db, Tree};

use super::CatalogSnapshot;
use crate::error::Error;

/// Tree name for catalog snapshots.
const SNAPSHOT_TREE: &str = "catalog:snapshots";

/// Tree name for catalog metadata.
const META_TREE: &str = "catalog:meta";

/// Key for current snapshot version in meta tree.
const CURRENT_VERSION_KEY: &[u8] = b"current_version";

fn decode_version(bytes: &[u8]) -> Option<u64> {
    let buf: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(buf))
}

/// Stores every applied catalog snapshot under an increasing version.
pub struct CatalogStore {
    snapshot_tree: Tree,
    meta_tree: Tree,
    /// Current snapshot version (cached).
    current_version: AtomicU64,
}

impl CatalogStore {
    /// Open or create a catalog store using the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let snapshot_tree = db.open_tree(SNAPSHOT_TREE)?;
        let meta_tree = db.open_tree(META_TREE)?;

        let current_version = match meta_tree.get(CURRENT_VERSION_KEY)? {
            Some(bytes) => decode_version(&bytes).ok_or_else(|| {
                Error::Deserialization("malformed catalog version".to_string())
            })?,
            None => 0,
        };

        Ok(Self {
            snapshot_tree,
            meta_tree,
            current_version: AtomicU64::new(current_version),
        })
    }

    /// Get the current snapshot version; 0 when nothing was saved yet.
    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }

    /// Get the snapshot at a specific version.
    pub fn snapshot_at_version(&self, version: u64) -> Result<Option<CatalogSnapshot>, Error> {
        match self.snapshot_tree.get(version.to_be_bytes())? {
            Some(bytes) => Ok(Some(CatalogSnapshot::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get the most recently saved snapshot.
    pub fn load_current(&self) -> Result<Option<CatalogSnapshot>, Error> {
        match self.current_version() {
            0 => Ok(None),
            version => self.snapshot_at_version(version),
        }
    }

    /// Save a snapshot as the next version and return that version.
    pub fn save(&self, mut snapshot: CatalogSnapshot) -> Result<u64, Error> {
        let new_version = self.current_version() + 1;
        snapshot.version = new_version;

        self.snapshot_tree
            .insert(new_version.to_be_bytes(), snapshot.to_bytes()?)?;
        self.meta_tree
            .insert(CURRENT_VERSION_KEY, &new_version.to_be_bytes())?;

        self.current_version.store(new_version, Ordering::SeqCst);
        tracing::debug!(version = new_version, "saved catalog snapshot");
        Ok(new_version)
    }

    /// List all saved versions.
    pub fn list_versions(&self) -> Result<Vec<u64>, Error> {
        let mut versions = Vec::new();
        for result in self.snapshot_tree.iter() {
            let (key, _) = result?;
            versions.extend(decode_version(&key));
        }
        versions.sort();
        Ok(versions)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.snapshot_tree.flush()?;
        self.meta_tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Domain, Table, TableId};

    fn sample_snapshot() -> CatalogSnapshot {
        let mut table = Table::new("PUBLIC", "CUSTOMERS")
            .with_column(Column::new("ID", DataType::Int).not_null())
            .with_column(Column::new("NAME", DataType::Text));
        table.id = TableId(1);
        CatalogSnapshot {
            version: 0,
            tables: vec![table],
            domains: vec![Domain::new("PUBLIC", "POSITIVE", DataType::Int)],
            constraints: Vec::new(),
            next_table_id: 2,
            next_constraint_id: 1,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = CatalogStore::open(&db).unwrap();

        assert_eq!(store.current_version(), 0);
        assert!(store.load_current().unwrap().is_none());

        let v1 = store.save(sample_snapshot()).unwrap();
        assert_eq!(v1, 1);

        let mut next = sample_snapshot();
        next.next_table_id = 3;
        let v2 = store.save(next).unwrap();
        assert_eq!(v2, 2);

        let current = store.load_current().unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.next_table_id, 3);
        assert_eq!(current.tables[0].name.name, "CUSTOMERS");

        let old = store.snapshot_at_version(1).unwrap().unwrap();
        assert_eq!(old.next_table_id, 2);
        assert_eq!(store.list_versions().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_version_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let store = CatalogStore::open(&db).unwrap();
            store.save(sample_snapshot()).unwrap();
            store.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let store = CatalogStore::open(&db).unwrap();
        assert_eq!(store.current_version(), 1);
        let loaded = store.load_current().unwrap().unwrap();
        assert_eq!(loaded.domains.len(), 1);
    }
}
