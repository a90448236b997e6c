//! Constraints and their row-validation contract.
//!
//! A [`Constraint`] is one of four variants sharing the [`ConstraintBehavior`]
//! contract. Constraints refer to tables, columns, indexes, and other
//! constraints only by stable id; names are cached for DDL rendering and
//! refreshed by [`ConstraintBehavior::rebuild`].

mod check;
mod context;
mod domain;
mod referential;
mod unique;

pub use check::CheckConstraint;
pub use context::CheckContext;
pub use domain::DomainConstraint;
pub use referential::{ForeignKeyOptions, MatchMode, ReferentialAction, ReferentialConstraint};
pub use unique::UniqueConstraint;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::catalog::{quote_ident, ColumnId, QualifiedName, Table, TableId, TableMap};
use crate::error::Error;
use crate::expr::Expression;
use crate::index::IndexId;
use crate::storage::Row;
use crate::value::Value;

/// Stable constraint identifier, unique within the database.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
pub struct ConstraintId(pub u32);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Constraint classification.
///
/// Declaration order is the order in which constraints are applied to a row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
pub enum ConstraintType {
    Check,
    PrimaryKey,
    Unique,
    Referential,
    Domain,
}

impl ConstraintType {
    /// All types in application order.
    pub const ALL: [ConstraintType; 5] = [
        ConstraintType::Check,
        ConstraintType::PrimaryKey,
        ConstraintType::Unique,
        ConstraintType::Referential,
        ConstraintType::Domain,
    ];

    /// Name used in generated SQL.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ConstraintType::Check => "CHECK",
            ConstraintType::PrimaryKey => "PRIMARY KEY",
            ConstraintType::Unique => "UNIQUE",
            ConstraintType::Referential => "FOREIGN KEY",
            ConstraintType::Domain => "DOMAIN",
        }
    }

    /// Validated by evaluating a predicate.
    pub fn is_check_like(&self) -> bool {
        matches!(self, ConstraintType::Check | ConstraintType::Domain)
    }

    /// Validated through a unique index.
    pub fn is_uniqueness_like(&self) -> bool {
        matches!(self, ConstraintType::PrimaryKey | ConstraintType::Unique)
    }
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A constraint column bound by id, with its current name and row position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub id: ColumnId,
    pub name: String,
    pub position: usize,
}

impl IndexColumn {
    /// Resolve a column of `table` by id.
    pub fn by_id(table: &Table, id: ColumnId) -> Option<Self> {
        let column = table.column(id)?;
        Some(Self {
            id,
            name: column.name.clone(),
            position: table.position_of(id)?,
        })
    }

    /// Resolve a column list by name, rejecting unknown and repeated columns.
    pub fn resolve_names(table: &Table, names: &[String]) -> Result<Vec<Self>, Error> {
        if names.is_empty() {
            return Err(Error::Definition("empty column list".to_string()));
        }
        let mut columns: Vec<Self> = Vec::with_capacity(names.len());
        for name in names {
            let column = table.column_by_name(name).ok_or_else(|| {
                Error::Definition(format!("column {} not found in table {}", name, table.name))
            })?;
            if columns.iter().any(|c| c.id == column.id) {
                return Err(Error::Definition(format!("column {name} listed twice")));
            }
            columns.extend(Self::by_id(table, column.id));
        }
        Ok(columns)
    }

    /// Resolve a column list by id.
    pub fn resolve_ids(table: &Table, ids: &[ColumnId]) -> Option<Vec<Self>> {
        ids.iter().map(|id| Self::by_id(table, *id)).collect()
    }
}

/// Values of `columns` in `row`, in column-list order.
pub fn project(row: &Row, columns: &[IndexColumn]) -> Vec<Value> {
    columns.iter().map(|c| row.value(c.position).clone()).collect()
}

/// `"A", "B"`
pub(crate) fn column_list_sql(columns: &[IndexColumn]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A table reference by id with its cached name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub id: TableId,
    pub name: QualifiedName,
}

impl TableRef {
    pub fn of(table: &Table) -> Self {
        Self {
            id: table.id,
            name: table.name.clone(),
        }
    }
}

/// Look up a table during rebuild.
pub(crate) fn resolve_table<'t>(
    constraint: &QualifiedName,
    tables: &'t TableMap,
    id: TableId,
) -> Result<&'t Table, Error> {
    tables.get(&id).ok_or_else(|| Error::SchemaResolution {
        constraint: constraint.to_string(),
        reason: format!("table {id} no longer exists"),
    })
}

/// Refresh names and positions of `columns` from `table` during rebuild.
pub(crate) fn rebind_columns(
    constraint: &QualifiedName,
    table: &Table,
    columns: &mut [IndexColumn],
) -> Result<(), Error> {
    for column in columns.iter_mut() {
        let fresh = IndexColumn::by_id(table, column.id).ok_or_else(|| Error::SchemaResolution {
            constraint: constraint.to_string(),
            reason: format!("column {} ({}) missing from {}", column.name, column.id, table.name),
        })?;
        *column = fresh;
    }
    Ok(())
}

/// The contract every constraint variant implements.
pub trait ConstraintBehavior {
    /// Fixed classification of this constraint.
    fn constraint_type(&self) -> ConstraintType;

    /// Validate one row transition on `table`.
    ///
    /// Inserts pass only `new_row`, deletes only `old_row`, updates both.
    /// Reads indexes and rows through `ctx` but never writes.
    fn check_row(
        &self,
        ctx: &CheckContext<'_>,
        table: &Table,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error>;

    /// Whether correctness depends on `index`.
    fn uses_index(&self, index: IndexId) -> bool;

    /// Take exclusive ownership of `index` as the backing index.
    fn set_index_owner(&mut self, index: IndexId) -> Result<(), Error>;

    /// Columns of `table` this constraint depends on; empty if unrelated.
    fn referenced_columns(&self, table: &Table) -> BTreeSet<ColumnId>;

    /// The predicate, for check-like constraints.
    fn expression(&self) -> Option<&Expression> {
        None
    }

    /// DDL reproducing this constraint, without index DDL.
    fn create_sql_without_indexes(&self) -> String;

    /// Whether the check runs before the row is written. Deferred checking is
    /// not offered, so this holds for every variant.
    fn is_before_action(&self) -> bool {
        true
    }

    /// Validate all rows currently stored.
    fn check_existing_data(&self, ctx: &CheckContext<'_>) -> Result<(), Error>;

    /// Re-resolve cached table and column names by id after a rename.
    fn rebuild(&mut self, tables: &TableMap) -> Result<(), Error>;

    /// The backing index, if any.
    fn index(&self) -> Option<IndexId> {
        None
    }

    /// Whether this constraint owns its backing index.
    fn is_index_owner(&self) -> bool {
        false
    }

    /// The unique constraint a foreign key references.
    fn referenced_constraint(&self) -> Option<ConstraintId> {
        None
    }
}

/// A constraint of any variant.
#[derive(Debug, Clone)]
pub enum Constraint {
    Check(CheckConstraint),
    Unique(UniqueConstraint),
    Referential(ReferentialConstraint),
    Domain(DomainConstraint),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            Constraint::Check($c) => $body,
            Constraint::Unique($c) => $body,
            Constraint::Referential($c) => $body,
            Constraint::Domain($c) => $body,
        }
    };
}

impl Constraint {
    pub fn id(&self) -> ConstraintId {
        dispatch!(self, c => c.id())
    }

    pub fn name(&self) -> &QualifiedName {
        dispatch!(self, c => c.name())
    }

    /// Owning table; absent for domain constraints.
    pub fn table(&self) -> Option<TableId> {
        match self {
            Constraint::Check(c) => Some(c.table().id),
            Constraint::Unique(c) => Some(c.table().id),
            Constraint::Referential(c) => Some(c.table().id),
            Constraint::Domain(_) => None,
        }
    }

    /// The table whose rows this constraint reads keys from: the parent
    /// table of a foreign key, the own table of anything else.
    pub fn ref_table(&self) -> Option<TableId> {
        match self {
            Constraint::Referential(c) => Some(c.ref_table().id),
            other => other.table(),
        }
    }

    /// Tables whose constraint sets hold this constraint.
    pub fn member_tables(&self) -> Vec<TableId> {
        let mut tables: Vec<TableId> = self.table().into_iter().collect();
        if let Some(parent) = self.ref_table().filter(|t| Some(*t) != self.table()) {
            tables.push(parent);
        }
        tables
    }

    pub fn as_unique(&self) -> Option<&UniqueConstraint> {
        match self {
            Constraint::Unique(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_referential(&self) -> Option<&ReferentialConstraint> {
        match self {
            Constraint::Referential(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_domain(&self) -> Option<&DomainConstraint> {
        match self {
            Constraint::Domain(c) => Some(c),
            _ => None,
        }
    }

    fn sort_key(&self) -> (ConstraintType, ConstraintId) {
        (self.constraint_type(), self.id())
    }
}

impl ConstraintBehavior for Constraint {
    fn constraint_type(&self) -> ConstraintType {
        dispatch!(self, c => c.constraint_type())
    }

    fn check_row(
        &self,
        ctx: &CheckContext<'_>,
        table: &Table,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        dispatch!(self, c => c.check_row(ctx, table, old_row, new_row))
    }

    fn uses_index(&self, index: IndexId) -> bool {
        dispatch!(self, c => c.uses_index(index))
    }

    fn set_index_owner(&mut self, index: IndexId) -> Result<(), Error> {
        dispatch!(self, c => c.set_index_owner(index))
    }

    fn referenced_columns(&self, table: &Table) -> BTreeSet<ColumnId> {
        dispatch!(self, c => c.referenced_columns(table))
    }

    fn expression(&self) -> Option<&Expression> {
        dispatch!(self, c => c.expression())
    }

    fn create_sql_without_indexes(&self) -> String {
        dispatch!(self, c => c.create_sql_without_indexes())
    }

    fn is_before_action(&self) -> bool {
        dispatch!(self, c => c.is_before_action())
    }

    fn check_existing_data(&self, ctx: &CheckContext<'_>) -> Result<(), Error> {
        dispatch!(self, c => c.check_existing_data(ctx))
    }

    fn rebuild(&mut self, tables: &TableMap) -> Result<(), Error> {
        dispatch!(self, c => c.rebuild(tables))
    }

    fn index(&self) -> Option<IndexId> {
        dispatch!(self, c => c.index())
    }

    fn is_index_owner(&self) -> bool {
        dispatch!(self, c => c.is_index_owner())
    }

    fn referenced_constraint(&self) -> Option<ConstraintId> {
        dispatch!(self, c => c.referenced_constraint())
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Constraint {}

impl PartialOrd for Constraint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Application order: type first, then id.
impl Ord for Constraint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl From<CheckConstraint> for Constraint {
    fn from(c: CheckConstraint) -> Self {
        Constraint::Check(c)
    }
}

impl From<UniqueConstraint> for Constraint {
    fn from(c: UniqueConstraint) -> Self {
        Constraint::Unique(c)
    }
}

impl From<ReferentialConstraint> for Constraint {
    fn from(c: ReferentialConstraint) -> Self {
        Constraint::Referential(c)
    }
}

impl From<DomainConstraint> for Constraint {
    fn from(c: DomainConstraint) -> Self {
        Constraint::Domain(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};

    #[test]
    fn test_type_order_and_names() {
        let mut types = vec![
            ConstraintType::Domain,
            ConstraintType::Referential,
            ConstraintType::Check,
            ConstraintType::Unique,
            ConstraintType::PrimaryKey,
        ];
        types.sort();
        assert_eq!(types, ConstraintType::ALL.to_vec());

        assert_eq!(ConstraintType::PrimaryKey.sql_name(), "PRIMARY KEY");
        assert_eq!(ConstraintType::Referential.sql_name(), "FOREIGN KEY");
        assert_eq!(ConstraintType::Check.to_string(), "CHECK");
        assert!(ConstraintType::Domain.is_check_like());
        assert!(!ConstraintType::Unique.is_check_like());
        assert!(ConstraintType::PrimaryKey.is_uniqueness_like());
        assert!(!ConstraintType::Referential.is_uniqueness_like());
    }

    #[test]
    fn test_constraints_order_by_type_then_id() {
        let mut table = Table::new("PUBLIC", "T")
            .with_column(Column::new("A", DataType::Int))
            .with_column(Column::new("B", DataType::Int));
        table.id = TableId(1);

        let check = CheckConstraint::new(
            ConstraintId(9),
            QualifiedName::new("PUBLIC", "CK"),
            &table,
            Expression::parse("A > 0").unwrap(),
        )
        .unwrap();
        let unique = UniqueConstraint::new(
            ConstraintId(2),
            QualifiedName::new("PUBLIC", "UQ"),
            &table,
            IndexColumn::resolve_names(&table, &["B".to_string()]).unwrap(),
            false,
        )
        .unwrap();
        let pk = UniqueConstraint::new(
            ConstraintId(5),
            QualifiedName::new("PUBLIC", "PK"),
            &table,
            IndexColumn::resolve_names(&table, &["A".to_string()]).unwrap(),
            true,
        )
        .unwrap();

        let mut all: Vec<Constraint> = vec![unique.into(), pk.into(), check.into()];
        all.sort();
        let names: Vec<&str> = all.iter().map(|c| c.name().name.as_str()).collect();
        assert_eq!(names, vec!["CK", "PK", "UQ"]);
    }

    #[test]
    fn test_ref_table_and_member_tables() {
        let mut parent = Table::new("PUBLIC", "P").with_column(Column::new("ID", DataType::Int));
        parent.id = TableId(1);
        let mut child = Table::new("PUBLIC", "C")
            .with_column(Column::new("ID", DataType::Int))
            .with_column(Column::new("P_ID", DataType::Int));
        child.id = TableId(2);

        let pk = UniqueConstraint::new(
            ConstraintId(1),
            QualifiedName::new("PUBLIC", "PK_P"),
            &parent,
            IndexColumn::resolve_names(&parent, &["ID".to_string()]).unwrap(),
            true,
        )
        .unwrap();
        let fk = ReferentialConstraint::new(
            ConstraintId(2),
            QualifiedName::new("PUBLIC", "FK_C"),
            &child,
            IndexColumn::resolve_names(&child, &["P_ID".to_string()]).unwrap(),
            &parent,
            &pk,
            pk.columns().to_vec(),
            ForeignKeyOptions::default(),
        )
        .unwrap();

        let pk = Constraint::from(pk);
        let fk = Constraint::from(fk);
        assert_eq!(pk.ref_table(), Some(TableId(1)));
        assert_eq!(fk.table(), Some(TableId(2)));
        assert_eq!(fk.ref_table(), Some(TableId(1)));
        assert_eq!(pk.member_tables(), vec![TableId(1)]);
        assert_eq!(fk.member_tables(), vec![TableId(2), TableId(1)]);
    }

    #[test]
    fn test_resolve_names() {
        let table = Table::new("PUBLIC", "T")
            .with_column(Column::new("A", DataType::Int))
            .with_column(Column::new("B", DataType::Int));
        let cols = IndexColumn::resolve_names(&table, &["B".into(), "A".into()]).unwrap();
        assert_eq!(cols[0].position, 1);
        assert_eq!(column_list_sql(&cols), r#""B", "A""#);

        assert!(IndexColumn::resolve_names(&table, &[]).is_err());
        assert!(IndexColumn::resolve_names(&table, &["A".into(), "A".into()]).is_err());
        assert!(IndexColumn::resolve_names(&table, &["Z".into()]).is_err());
    }
}
