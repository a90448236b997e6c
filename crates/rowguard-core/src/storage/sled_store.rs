//! sled-backed row store.

use dashmap::DashMap;
use sled::{Db, Tree};

use crate::catalog::TableId;
use crate::error::Error;

use super::{Row, RowIter, RowKey, RowStore};

/// Tree name prefix for table rows.
pub const ROW_TREE_PREFIX: &str = "rows:";

/// Row store keeping one sled tree per table.
///
/// Key format: `[row_key:8 BE]`
/// Value format: rkyv-encoded `Vec<Value>`
pub struct SledRowStore {
    db: Db,
    trees: DashMap<TableId, Tree>,
}

impl SledRowStore {
    /// Open a row store on the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            db: db.clone(),
            trees: DashMap::new(),
        })
    }

    fn tree_name(table: TableId) -> String {
        format!("{}{}", ROW_TREE_PREFIX, table.0)
    }

    /// Get (and cache) the tree for a table.
    pub(crate) fn tree(&self, table: TableId) -> Result<Tree, Error> {
        if let Some(tree) = self.trees.get(&table) {
            return Ok(tree.clone());
        }
        let tree = self.db.open_tree(Self::tree_name(table))?;
        self.trees.insert(table, tree.clone());
        Ok(tree)
    }

    /// Flush all row trees to disk.
    pub fn flush(&self) -> Result<(), Error> {
        for entry in self.trees.iter() {
            entry.value().flush()?;
        }
        Ok(())
    }
}

impl RowStore for SledRowStore {
    fn create_table(&self, table: TableId) -> Result<(), Error> {
        self.tree(table).map(|_| ())
    }

    fn drop_table(&self, table: TableId) -> Result<(), Error> {
        self.trees.remove(&table);
        self.db.drop_tree(Self::tree_name(table))?;
        Ok(())
    }

    fn next_key(&self) -> Result<RowKey, Error> {
        Ok(RowKey(self.db.generate_id()?))
    }

    fn get(&self, table: TableId, key: RowKey) -> Result<Option<Row>, Error> {
        match self.tree(table)?.get(key.to_bytes())? {
            Some(bytes) => Ok(Some(Row::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, table: TableId) -> Result<RowIter<'_>, Error> {
        let tree = self.tree(table)?;
        Ok(Box::new(tree.iter().map(|entry| {
            let (key, value) = entry?;
            Row::decode(RowKey::from_bytes(&key)?, &value)
        })))
    }

    fn put(&self, table: TableId, row: &Row) -> Result<(), Error> {
        self.tree(table)?
            .insert(row.key.to_bytes(), row.encode_values()?)?;
        Ok(())
    }

    fn delete(&self, table: TableId, key: RowKey) -> Result<bool, Error> {
        Ok(self.tree(table)?.remove(key.to_bytes())?.is_some())
    }

    fn count(&self, table: TableId) -> Result<usize, Error> {
        Ok(self.tree(table)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn store() -> SledRowStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledRowStore::open(&db).unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let store = store();
        let table = TableId(1);
        store.create_table(table).unwrap();

        let key = store.next_key().unwrap();
        let row = Row::new(key, vec![Value::Int(1), Value::from("alice")]);
        store.put(table, &row).unwrap();

        assert_eq!(store.get(table, key).unwrap(), Some(row));
        assert_eq!(store.count(table).unwrap(), 1);
        assert!(store.delete(table, key).unwrap());
        assert!(!store.delete(table, key).unwrap());
        assert_eq!(store.get(table, key).unwrap(), None);
    }

    #[test]
    fn test_scan_is_per_table() {
        let store = store();
        for i in 0..3 {
            let key = store.next_key().unwrap();
            store.put(TableId(1), &Row::new(key, vec![Value::Int(i)])).unwrap();
        }
        let key = store.next_key().unwrap();
        store.put(TableId(2), &Row::new(key, vec![Value::Int(99)])).unwrap();

        let rows: Vec<Row> = store
            .scan(TableId(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].values, vec![Value::Int(2)]);

        store.drop_table(TableId(1)).unwrap();
        assert_eq!(store.count(TableId(1)).unwrap(), 0);
        assert_eq!(store.count(TableId(2)).unwrap(), 1);
    }
}
