//! sled-backed index service.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Tree};
use tracing::debug;

use crate::catalog::{ColumnId, TableId};
use crate::error::Error;
use crate::storage::RowKey;
use crate::value::Value;

use super::key::{decode_row_keys, encode_key, encode_row_keys};
use super::{IndexDef, IndexId, IndexService};

/// Tree name prefix for index entries.
pub const INDEX_TREE_PREFIX: &str = "index:";

/// Tree holding index definitions.
const INDEX_META_TREE: &str = "index:meta";

/// Index service keeping one sled tree per index.
///
/// Entry key: [`encode_key`] of the key values.
/// Entry value: `[row_key_1:8][row_key_2:8]...` (packed row keys)
pub struct SledIndexService {
    db: Db,
    meta: Tree,
    defs: DashMap<IndexId, IndexDef>,
    trees: DashMap<IndexId, Tree>,
    next_id: AtomicU32,
}

impl SledIndexService {
    /// Open the service, loading persisted index definitions.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let meta = db.open_tree(INDEX_META_TREE)?;
        let defs = DashMap::new();
        let mut max_id = 0;
        for entry in meta.iter() {
            let (_, bytes) = entry?;
            let def = IndexDef::from_bytes(&bytes)?;
            max_id = max_id.max(def.id.0);
            defs.insert(def.id, def);
        }
        debug!(indexes = defs.len(), "loaded index definitions");

        Ok(Self {
            db: db.clone(),
            meta,
            defs,
            trees: DashMap::new(),
            next_id: AtomicU32::new(max_id + 1),
        })
    }

    fn tree_name(id: IndexId) -> String {
        format!("{}{}", INDEX_TREE_PREFIX, id.0)
    }

    pub(crate) fn tree(&self, id: IndexId) -> Result<Tree, Error> {
        if let Some(tree) = self.trees.get(&id) {
            return Ok(tree.clone());
        }
        if !self.defs.contains_key(&id) {
            return Err(Error::not_found("index", id.to_string()));
        }
        let tree = self.db.open_tree(Self::tree_name(id))?;
        self.trees.insert(id, tree.clone());
        Ok(tree)
    }

    /// Number of distinct keys stored in an index.
    pub fn key_count(&self, id: IndexId) -> Result<usize, Error> {
        Ok(self.tree(id)?.len())
    }

    /// Flush index trees and definitions to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.meta.flush()?;
        for entry in self.trees.iter() {
            entry.value().flush()?;
        }
        Ok(())
    }
}

/// Add `row` under an encoded key inside a transaction.
pub(crate) fn insert_entry(
    tx: &TransactionalTree,
    key: &[u8],
    row: RowKey,
) -> Result<(), ConflictableTransactionError<Error>> {
    let mut rows = match tx.get(key)? {
        Some(bytes) => decode_row_keys(&bytes),
        None => Vec::new(),
    };
    if !rows.contains(&row.0) {
        rows.push(row.0);
        tx.insert(key, encode_row_keys(&rows))?;
    }
    Ok(())
}

/// Remove `row` from an encoded key inside a transaction, dropping the key
/// once no row is left under it.
pub(crate) fn remove_entry(
    tx: &TransactionalTree,
    key: &[u8],
    row: RowKey,
) -> Result<(), ConflictableTransactionError<Error>> {
    if let Some(bytes) = tx.get(key)? {
        let mut rows = decode_row_keys(&bytes);
        rows.retain(|r| *r != row.0);
        if rows.is_empty() {
            tx.remove(key)?;
        } else {
            tx.insert(key, encode_row_keys(&rows))?;
        }
    }
    Ok(())
}

impl IndexService for SledIndexService {
    fn create_index(
        &self,
        name: &str,
        table: TableId,
        columns: &[ColumnId],
        unique: bool,
    ) -> Result<IndexId, Error> {
        if self.defs.iter().any(|d| d.table == table && d.name == name) {
            return Err(Error::already_exists("index", name));
        }
        let id = IndexId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let def = IndexDef {
            id,
            name: name.to_string(),
            table,
            columns: columns.to_vec(),
            unique,
        };
        self.meta.insert(id.0.to_be_bytes(), def.to_bytes()?)?;
        self.defs.insert(id, def);
        debug!(index = %id, name, table = %table, unique, "created index");
        Ok(id)
    }

    fn drop_index(&self, id: IndexId) -> Result<(), Error> {
        if self.defs.remove(&id).is_none() {
            return Err(Error::not_found("index", id.to_string()));
        }
        self.trees.remove(&id);
        self.meta.remove(id.0.to_be_bytes())?;
        self.db.drop_tree(Self::tree_name(id))?;
        debug!(index = %id, "dropped index");
        Ok(())
    }

    fn index(&self, id: IndexId) -> Option<IndexDef> {
        self.defs.get(&id).map(|d| d.clone())
    }

    fn indexes_for(&self, table: TableId) -> Vec<IndexDef> {
        let mut defs: Vec<IndexDef> = self
            .defs
            .iter()
            .filter(|d| d.table == table)
            .map(|d| d.clone())
            .collect();
        defs.sort_by_key(|d| d.id);
        defs
    }

    fn insert(&self, id: IndexId, key: &[Value], row: RowKey) -> Result<(), Error> {
        let tree = self.tree(id)?;
        let key = encode_key(key);
        let result: Result<(), TransactionError<Error>> =
            tree.transaction(|tx| insert_entry(tx, &key, row));
        Ok(result?)
    }

    fn remove(&self, id: IndexId, key: &[Value], row: RowKey) -> Result<(), Error> {
        let tree = self.tree(id)?;
        let key = encode_key(key);
        let result: Result<(), TransactionError<Error>> =
            tree.transaction(|tx| remove_entry(tx, &key, row));
        Ok(result?)
    }

    fn lookup(&self, id: IndexId, key: &[Value]) -> Result<Vec<RowKey>, Error> {
        let tree = self.tree(id)?;
        match tree.get(encode_key(key))? {
            Some(bytes) => Ok(decode_row_keys(&bytes).into_iter().map(RowKey).collect()),
            None => Ok(Vec::new()),
        }
    }
}
