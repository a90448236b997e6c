//! Table and column definitions.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use super::{DataType, QualifiedName};

/// Stable table identifier. Survives renames.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
pub struct TableId(pub u32);

/// Stable column identifier, unique within its table. Survives renames.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
pub struct ColumnId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Column {
    /// Stable id, assigned when the column is added to a table.
    pub id: ColumnId,
    /// Column name (unique within the table).
    pub name: String,
    /// Declared type.
    pub data_type: DataType,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Domain this column is declared with, in the table's schema.
    pub domain: Option<String>,
}

impl Column {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: ColumnId(0),
            name: name.into(),
            data_type,
            nullable: true,
            domain: None,
        }
    }

    /// Create a column typed by a domain.
    pub fn with_domain(name: impl Into<String>, domain: &super::Domain) -> Self {
        Self {
            id: ColumnId(0),
            name: name.into(),
            data_type: domain.data_type,
            nullable: true,
            domain: Some(domain.name.name.clone()),
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Table {
    /// Stable id, assigned by the catalog.
    pub id: TableId,
    /// Schema and table name.
    pub name: QualifiedName,
    /// Columns in row order.
    pub columns: Vec<Column>,
    next_column_id: u32,
}

impl Table {
    /// Create an empty table definition.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TableId(0),
            name: QualifiedName::new(schema, name),
            columns: Vec::new(),
            next_column_id: 1,
        }
    }

    /// Add a column, assigning it the next column id.
    pub fn with_column(mut self, column: Column) -> Self {
        self.add_column(column);
        self
    }

    /// Add a column and return its id.
    pub fn add_column(&mut self, mut column: Column) -> ColumnId {
        let id = ColumnId(self.next_column_id);
        self.next_column_id += 1;
        column.id = id;
        self.columns.push(column);
        id
    }

    /// Get a column by id.
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Get a column by name.
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Row position of a column.
    pub fn position_of(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub(crate) fn column_mut(&mut self, id: ColumnId) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    /// Positions of the given columns; `None` if any is missing.
    pub fn positions_of(&self, ids: &[ColumnId]) -> Option<Vec<usize>> {
        ids.iter().map(|id| self.position_of(*id)).collect()
    }
}

/// A user-defined domain: a named data type that may carry check constraints.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Domain {
    pub name: QualifiedName,
    pub data_type: DataType,
}

impl Domain {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: QualifiedName::new(schema, name),
            data_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_ids_are_stable() {
        let mut table = Table::new("PUBLIC", "ORDERS")
            .with_column(Column::new("ID", DataType::Int).not_null())
            .with_column(Column::new("AMOUNT", DataType::Float));

        let note = table.add_column(Column::new("NOTE", DataType::Text));
        assert_eq!(note, ColumnId(3));

        table.columns.remove(0);
        let id = table.column_by_name("AMOUNT").unwrap().id;
        assert_eq!(id, ColumnId(2));
        assert_eq!(table.position_of(id), Some(0));
        assert_eq!(table.positions_of(&[note, id]), Some(vec![1, 0]));
        assert_eq!(table.positions_of(&[ColumnId(1)]), None);
    }

    #[test]
    fn test_domain_column() {
        let domain = Domain::new("PUBLIC", "POSITIVE_INT", DataType::Int);
        let column = Column::with_domain("QTY", &domain);
        assert_eq!(column.data_type, DataType::Int);
        assert_eq!(column.domain.as_deref(), Some("POSITIVE_INT"));
    }
}
