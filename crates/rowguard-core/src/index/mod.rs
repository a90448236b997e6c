//! Index service.
//!
//! Unique and foreign key constraints bind to indexes through [`IndexService`]
//! for uniqueness and existence lookups. [`SledIndexService`] stores each index
//! in its own sled tree.

mod key;
mod sled_index;

pub use key::encode_key;
pub use sled_index::SledIndexService;
pub(crate) use sled_index::{insert_entry, remove_entry};

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::catalog::{ColumnId, TableId};
use crate::error::Error;
use crate::storage::RowKey;
use crate::value::Value;

/// Stable index identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct IndexDef {
    pub id: IndexId,
    pub name: String,
    pub table: TableId,
    /// Key columns, in key order.
    pub columns: Vec<ColumnId>,
    pub unique: bool,
}

impl IndexDef {
    /// Serialize the definition using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a definition using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Index maintenance and point lookups.
///
/// Unique indexes do not reject duplicates themselves; uniqueness is the
/// job of the constraint that owns the index.
pub trait IndexService: Send + Sync {
    /// Create an empty index and return its id.
    fn create_index(
        &self,
        name: &str,
        table: TableId,
        columns: &[ColumnId],
        unique: bool,
    ) -> Result<IndexId, Error>;

    /// Drop an index and its entries.
    fn drop_index(&self, id: IndexId) -> Result<(), Error>;

    fn index(&self, id: IndexId) -> Option<IndexDef>;

    /// All indexes on a table, ordered by id.
    fn indexes_for(&self, table: TableId) -> Vec<IndexDef>;

    /// Add a row under a key.
    fn insert(&self, id: IndexId, key: &[Value], row: RowKey) -> Result<(), Error>;

    /// Remove a row from under a key.
    fn remove(&self, id: IndexId, key: &[Value], row: RowKey) -> Result<(), Error>;

    /// Rows stored under exactly this key.
    fn lookup(&self, id: IndexId, key: &[Value]) -> Result<Vec<RowKey>, Error>;

    /// An index on exactly these columns, in this order.
    fn find(&self, table: TableId, columns: &[ColumnId], unique: bool) -> Option<IndexDef> {
        self.indexes_for(table)
            .into_iter()
            .find(|def| def.columns == columns && (!unique || def.unique))
    }
}
