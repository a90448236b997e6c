//! Row mutations under the check-then-write protocol.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};
use tracing::debug;

use super::Database;
use crate::catalog::Table;
use crate::ddl::ObjectName;
use crate::error::{ConstraintError, Error};
use crate::index::{encode_key, insert_entry, remove_entry, IndexId, IndexService};
use crate::session::Session;
use crate::storage::{Row, RowKey, RowStore};
use crate::value::Value;

/// Check arity, nullability and types, converting values to column types.
fn normalize(table: &Table, values: Vec<Value>) -> Result<Vec<Value>, Error> {
    if values.len() != table.columns.len() {
        return Err(Error::Definition(format!(
            "table {} has {} columns but {} values were given",
            table.name,
            table.columns.len(),
            values.len()
        )));
    }
    table
        .columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            if value.is_null() {
                if !column.nullable {
                    return Err(ConstraintError::NotNullViolation {
                        constraint: None,
                        table: table.name.to_string(),
                        column: column.name.clone(),
                    }
                    .into());
                }
                return Ok(Value::Null);
            }
            value
                .coerce_to(column.data_type)
                .ok_or_else(|| Error::TypeMismatch {
                    column: column.name.clone(),
                    expected: column.data_type,
                    found: value.type_name().to_string(),
                })
        })
        .collect()
}

impl Database {
    /// Insert a row, returning its key.
    pub fn insert(
        &self,
        session: &Session,
        table: impl Into<ObjectName>,
        values: Vec<Value>,
    ) -> Result<RowKey, Error> {
        let _latch = self.write_latch.lock();
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        let row = Row::new(self.rows.next_key()?, normalize(table, values)?);

        catalog.check_row(&self.context(session, &catalog), table, None, Some(&row))?;
        session.check_canceled()?;

        self.write_row(table, row.key, None, Some(&row))?;
        debug!(table = %table.name, key = %row.key, "inserted row");
        Ok(row.key)
    }

    /// Update columns of a stored row by name.
    pub fn update(
        &self,
        session: &Session,
        table: impl Into<ObjectName>,
        key: RowKey,
        changes: &[(&str, Value)],
    ) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        let old = self
            .rows
            .get(table.id, key)?
            .ok_or_else(|| Error::not_found("row", format!("{} in {}", key, table.name)))?;

        let mut values = old.values.clone();
        for (name, value) in changes {
            let position = table
                .column_by_name(name)
                .and_then(|c| table.position_of(c.id))
                .ok_or_else(|| Error::not_found("column", format!("{}.{}", table.name, name)))?;
            values[position] = value.clone();
        }
        let new = Row::new(key, normalize(table, values)?);

        catalog.check_row(&self.context(session, &catalog), table, Some(&old), Some(&new))?;
        session.check_canceled()?;

        self.write_row(table, key, Some(&old), Some(&new))?;
        debug!(table = %table.name, key = %key, "updated row");
        Ok(())
    }

    /// Delete a stored row.
    pub fn delete(&self, session: &Session, table: impl Into<ObjectName>, key: RowKey) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        let old = self
            .rows
            .get(table.id, key)?
            .ok_or_else(|| Error::not_found("row", format!("{} in {}", key, table.name)))?;

        catalog.check_row(&self.context(session, &catalog), table, Some(&old), None)?;
        session.check_canceled()?;

        self.write_row(table, key, Some(&old), None)?;
        debug!(table = %table.name, key = %key, "deleted row");
        Ok(())
    }

    pub fn get(&self, table: impl Into<ObjectName>, key: RowKey) -> Result<Option<Row>, Error> {
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        self.rows.get(table.id, key)
    }

    /// All rows of a table in key order.
    pub fn scan(&self, table: impl Into<ObjectName>) -> Result<Vec<Row>, Error> {
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        self.rows.scan(table.id)?.collect()
    }

    pub fn count(&self, table: impl Into<ObjectName>) -> Result<usize, Error> {
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        self.rows.count(table.id)
    }

    /// Store the new row image (or remove the row) and move its index
    /// entries in one sled transaction over the row tree and every index
    /// whose key changed.
    fn write_row(
        &self,
        table: &Table,
        key: RowKey,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<(), Error> {
        let changes = self.index_changes(table, old, new)?;
        let value = new.map(Row::encode_values).transpose()?;
        let row_key = key.to_bytes();

        let mut trees: Vec<Tree> = Vec::with_capacity(changes.len() + 1);
        trees.push(self.rows.tree(table.id)?);
        for change in &changes {
            trees.push(self.indexes.tree(change.index)?);
        }

        let result: Result<(), TransactionError<Error>> = trees.as_slice().transaction(|views| {
            let (rows, entries) = views.split_first().ok_or_else(|| {
                ConflictableTransactionError::Abort(Error::Definition(
                    "row write without a row tree".into(),
                ))
            })?;
            match &value {
                Some(bytes) => rows.insert(&row_key[..], bytes.as_slice())?,
                None => rows.remove(&row_key[..])?,
            };
            for (change, tx) in changes.iter().zip(entries) {
                if let Some(old_key) = &change.old {
                    remove_entry(tx, old_key, key)?;
                }
                if let Some(new_key) = &change.new {
                    insert_entry(tx, new_key, key)?;
                }
            }
            Ok(())
        });
        Ok(result?)
    }

    /// Encoded index keys of the old and new row images, for every index
    /// of the table whose key differs between them.
    fn index_changes(
        &self,
        table: &Table,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<Vec<IndexChange>, Error> {
        let mut changes = Vec::new();
        for def in self.indexes.indexes_for(table.id) {
            let positions = table.positions_of(&def.columns).ok_or_else(|| {
                Error::Definition(format!("index {} names unknown columns", def.name))
            })?;
            let old_key = old.map(|r| r.project(&positions));
            let new_key = new.map(|r| r.project(&positions));
            if old_key == new_key {
                continue;
            }
            changes.push(IndexChange {
                index: def.id,
                old: old_key.map(|k| encode_key(&k)),
                new: new_key.map(|k| encode_key(&k)),
            });
        }
        Ok(changes)
    }
}

/// One index whose entry moves with a row write.
struct IndexChange {
    index: IndexId,
    old: Option<Vec<u8>>,
    new: Option<Vec<u8>>,
}
