//! Schema catalog: tables, domains, and the constraints attached to them.
//!
//! The catalog is an explicit value owned by the database and passed to
//! every operation that needs name lookup or rename propagation.

mod catalog;
mod def;
mod name;
mod set;
mod store;
mod table;
mod types;

pub use catalog::ConstraintCatalog;
pub use def::{CatalogSnapshot, ConstraintDef, ConstraintKind};
pub use name::{quote_ident, QualifiedName};
pub use set::ConstraintSet;
pub use store::CatalogStore;
pub use table::{Column, ColumnId, Domain, Table, TableId};
pub use types::DataType;

use std::collections::BTreeMap;

/// Tables by id.
pub type TableMap = BTreeMap<TableId, Table>;
