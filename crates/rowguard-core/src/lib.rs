//! rowguard - constraint enforcement for a relational storage engine.
//!
//! Check, primary key, unique, foreign key and domain constraints are
//! validated against every row mutation before it is written. Tables,
//! rows, indexes and the constraint catalog live in sled.

pub mod catalog;
pub mod config;
pub mod constraint;
pub mod database;
pub mod ddl;
pub mod error;
pub mod expr;
pub mod index;
pub mod session;
pub mod storage;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{
    CatalogSnapshot, CatalogStore, Column, ColumnId, ConstraintCatalog, ConstraintDef,
    ConstraintSet, DataType, Domain, QualifiedName, Table, TableId,
};
pub use config::{DropBehavior, EnforcementConfig};
pub use constraint::{
    CheckConstraint, CheckContext, Constraint, ConstraintBehavior, ConstraintId, ConstraintType,
    DomainConstraint, ForeignKeyOptions, MatchMode, ReferentialAction, ReferentialConstraint,
    UniqueConstraint,
};
pub use database::Database;
pub use ddl::{parse_constraint_sql, ConstraintRequest, ConstraintSpec, ConstraintTarget, ObjectName};
pub use error::{ConstraintError, Error, ReferentialViolationKind};
pub use expr::{Expression, ExpressionEvaluator, PredicateEvaluator, Truth};
pub use index::{IndexDef, IndexId, IndexService, SledIndexService};
pub use session::Session;
pub use storage::{Row, RowKey, RowStore, SledRowStore, StorageConfig};
pub use value::Value;
