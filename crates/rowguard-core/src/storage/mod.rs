//! Row storage.
//!
//! The enforcement subsystem reads and writes rows only through [`RowStore`];
//! [`SledRowStore`] keeps one sled tree per table.

mod config;
mod row;
mod sled_store;

pub use config::StorageConfig;
pub use row::{Row, RowKey};
pub use sled_store::SledRowStore;

use crate::catalog::TableId;
use crate::error::Error;

/// Iterator over the rows of one table.
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row, Error>> + 'a>;

/// Row persistence used by the DML executor and by full-table checks.
pub trait RowStore: Send + Sync {
    /// Prepare storage for a new table.
    fn create_table(&self, table: TableId) -> Result<(), Error>;

    /// Remove a table and all its rows.
    fn drop_table(&self, table: TableId) -> Result<(), Error>;

    /// Allocate a fresh row key.
    fn next_key(&self) -> Result<RowKey, Error>;

    fn get(&self, table: TableId, key: RowKey) -> Result<Option<Row>, Error>;

    /// Iterate all rows of a table in key order.
    fn scan(&self, table: TableId) -> Result<RowIter<'_>, Error>;

    /// Insert or replace a row.
    fn put(&self, table: TableId, row: &Row) -> Result<(), Error>;

    /// Delete a row; returns whether it existed.
    fn delete(&self, table: TableId, key: RowKey) -> Result<bool, Error>;

    fn count(&self, table: TableId) -> Result<usize, Error>;
}
