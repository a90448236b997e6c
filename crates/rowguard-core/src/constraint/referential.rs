//! FOREIGN KEY constraints.

use std::collections::BTreeSet;
use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::catalog::{ColumnId, DataType, QualifiedName, Table, TableMap};
use crate::error::{ConstraintError, Error, ReferentialViolationKind};
use crate::index::IndexId;
use crate::storage::{Row, RowKey};
use crate::value::{render_values, Value};

use super::{
    column_list_sql, project, rebind_columns, resolve_table, CheckContext, ConstraintBehavior,
    ConstraintId, ConstraintType, IndexColumn, TableRef, UniqueConstraint,
};

/// How a composite foreign key with some NULL columns is treated.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Any NULL column exempts the row.
    #[default]
    Simple,
    /// Only an all-NULL key is exempt; a partial key is a violation.
    Full,
}

/// Declared action for deletes and updates of a referenced row.
///
/// Recorded for an external cascade orchestrator; enforcement itself only
/// distinguishes RESTRICT from the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Archive, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// Match mode and declared actions of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForeignKeyOptions {
    pub match_mode: MatchMode,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

enum KeyState {
    AllNull,
    Partial,
    Complete,
}

fn key_state(key: &[Value]) -> KeyState {
    let nulls = key.iter().filter(|v| v.is_null()).count();
    if nulls == 0 {
        KeyState::Complete
    } else if nulls == key.len() {
        KeyState::AllNull
    } else {
        KeyState::Partial
    }
}

/// Referential integrity between a referencing table and a unique constraint.
///
/// Local and referenced columns are kept in the referenced constraint's
/// column order, so `columns[i]` references `ref_columns[i]`.
#[derive(Debug, Clone)]
pub struct ReferentialConstraint {
    id: ConstraintId,
    name: QualifiedName,
    table: TableRef,
    columns: Vec<IndexColumn>,
    ref_table: TableRef,
    ref_columns: Vec<IndexColumn>,
    ref_constraint: ConstraintId,
    ref_index: Option<IndexId>,
    options: ForeignKeyOptions,
    index: Option<IndexId>,
    index_owner: bool,
}

impl ReferentialConstraint {
    /// Create a foreign key from `columns` of `table` to `ref_columns` of
    /// `ref_table`, which must be exactly the columns of `referenced`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ConstraintId,
        name: QualifiedName,
        table: &Table,
        columns: Vec<IndexColumn>,
        ref_table: &Table,
        referenced: &UniqueConstraint,
        ref_columns: Vec<IndexColumn>,
        options: ForeignKeyOptions,
    ) -> Result<Self, Error> {
        if referenced.table().id != ref_table.id {
            return Err(Error::Definition(format!(
                "constraint {} is not on table {}",
                referenced.name(),
                ref_table.name
            )));
        }
        if columns.len() != ref_columns.len() {
            return Err(Error::Definition(format!(
                "foreign key {name} has {} columns but references {}",
                columns.len(),
                ref_columns.len()
            )));
        }
        let referenced_ids: BTreeSet<ColumnId> = referenced.columns().iter().map(|c| c.id).collect();
        let declared_ids: BTreeSet<ColumnId> = ref_columns.iter().map(|c| c.id).collect();
        if referenced_ids != declared_ids || referenced.columns().len() != ref_columns.len() {
            return Err(Error::Definition(format!(
                "referenced columns of {name} do not match constraint {}",
                referenced.name()
            )));
        }

        // Reorder both lists into the referenced constraint's key order.
        let mut local = Vec::with_capacity(columns.len());
        let mut remote = Vec::with_capacity(columns.len());
        for target in referenced.columns() {
            let i = ref_columns
                .iter()
                .position(|c| c.id == target.id)
                .ok_or_else(|| Error::Definition(format!("column {} not referenced", target.name)))?;
            local.push(columns[i].clone());
            remote.push(ref_columns[i].clone());
        }

        for (l, r) in local.iter().zip(&remote) {
            let lt = column_type(table, l)?;
            let rt = column_type(ref_table, r)?;
            if !lt.is_compatible_with(rt) {
                return Err(Error::Definition(format!(
                    "foreign key {name}: column {} ({lt}) is not compatible with {} ({rt})",
                    l.name, r.name
                )));
            }
        }

        Ok(Self {
            id,
            name,
            table: TableRef::of(table),
            columns: local,
            ref_table: TableRef::of(ref_table),
            ref_columns: remote,
            ref_constraint: referenced.id(),
            ref_index: referenced.index(),
            options,
            index: None,
            index_owner: false,
        })
    }

    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    /// Referencing (owning) table.
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn ref_table(&self) -> &TableRef {
        &self.ref_table
    }

    /// Referencing columns, in referenced key order.
    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn ref_columns(&self) -> &[IndexColumn] {
        &self.ref_columns
    }

    pub fn options(&self) -> ForeignKeyOptions {
        self.options
    }

    pub fn match_mode(&self) -> MatchMode {
        self.options.match_mode
    }

    pub fn on_delete(&self) -> ReferentialAction {
        self.options.on_delete
    }

    pub fn on_update(&self) -> ReferentialAction {
        self.options.on_update
    }

    pub fn is_self_referencing(&self) -> bool {
        self.table.id == self.ref_table.id
    }

    /// Bind `index` over the local columns, owned or shared.
    pub(crate) fn attach_index(&mut self, index: IndexId, owner: bool) {
        self.index = Some(index);
        self.index_owner = owner;
    }

    fn violation(&self, table: &TableRef, kind: ReferentialViolationKind, key: &[Value]) -> Error {
        ConstraintError::ReferentialViolation {
            constraint: self.name.name.clone(),
            table: table.name.to_string(),
            kind,
            value: render_values(key),
        }
        .into()
    }

    /// Convert key values to the column types on the other side. `None`
    /// when some value cannot be represented there, so nothing can match.
    fn convert_key(
        ctx: &CheckContext<'_>,
        table: &TableRef,
        columns: &[IndexColumn],
        key: &[Value],
    ) -> Result<Option<Vec<Value>>, Error> {
        let table = ctx.table(table.id)?;
        let mut converted = Vec::with_capacity(key.len());
        for (column, value) in columns.iter().zip(key) {
            match value.coerce_to(column_type(table, column)?) {
                Some(v) => converted.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(converted))
    }

    /// Whether a parent row holds `key`. `exclude` is the stored image of
    /// the row being updated, which is about to be replaced.
    fn parent_exists(
        &self,
        ctx: &CheckContext<'_>,
        key: &[Value],
        exclude: Option<RowKey>,
    ) -> Result<bool, Error> {
        let Some(key) = Self::convert_key(ctx, &self.ref_table, &self.ref_columns, key)? else {
            return Ok(false);
        };
        match self.ref_index {
            Some(index) => Ok(ctx
                .indexes
                .lookup(index, &key)?
                .into_iter()
                .any(|k| Some(k) != exclude)),
            None => Ok(ctx
                .find_row(self.ref_table.id, |row| {
                    Some(row.key) != exclude && project(row, &self.ref_columns) == key
                })?
                .is_some()),
        }
    }

    fn has_referencing_row(
        &self,
        ctx: &CheckContext<'_>,
        key: &[Value],
        parent: RowKey,
    ) -> Result<bool, Error> {
        let Some(key) = Self::convert_key(ctx, &self.table, &self.columns, key)? else {
            return Ok(false);
        };
        let exclude = self.is_self_referencing().then_some(parent);
        match self.index {
            Some(index) => Ok(ctx
                .indexes
                .lookup(index, &key)?
                .into_iter()
                .any(|k| Some(k) != exclude)),
            None if ctx.config.allow_full_scan => Ok(ctx
                .find_row(self.table.id, |row| {
                    Some(row.key) != exclude && project(row, &self.columns) == key
                })?
                .is_some()),
            None => Err(Error::Definition(format!(
                "foreign key {} has no index on {} and full scans are disabled",
                self.name, self.table.name
            ))),
        }
    }

    /// Validate a row of the referencing table.
    fn check_referencing_row(
        &self,
        ctx: &CheckContext<'_>,
        row: &Row,
        exclude: Option<RowKey>,
    ) -> Result<(), Error> {
        let key = project(row, &self.columns);
        match key_state(&key) {
            KeyState::AllNull => return Ok(()),
            KeyState::Partial => {
                return match self.options.match_mode {
                    MatchMode::Simple => Ok(()),
                    MatchMode::Full => Err(self.violation(
                        &self.table,
                        ReferentialViolationKind::PartialNull,
                        &key,
                    )),
                }
            }
            KeyState::Complete => {}
        }
        if self.is_self_referencing() && project(row, &self.ref_columns) == key {
            return Ok(());
        }
        ctx.session.check_canceled()?;
        if self.parent_exists(ctx, &key, exclude)? {
            Ok(())
        } else {
            Err(self.violation(&self.table, ReferentialViolationKind::NoParent, &key))
        }
    }

    fn check_referencing(
        &self,
        ctx: &CheckContext<'_>,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        let Some(new_row) = new_row else {
            return Ok(());
        };
        let mut exclude = None;
        if let Some(old_row) = old_row {
            let own_key_moved = self.is_self_referencing()
                && project(old_row, &self.ref_columns) != project(new_row, &self.ref_columns);
            if !own_key_moved && project(old_row, &self.columns) == project(new_row, &self.columns) {
                return Ok(());
            }
            // The old image cannot be its own parent after the write.
            if self.is_self_referencing() {
                exclude = Some(old_row.key);
            }
        }
        self.check_referencing_row(ctx, new_row, exclude)
    }

    fn check_referenced(
        &self,
        ctx: &CheckContext<'_>,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        let Some(old_row) = old_row else {
            return Ok(());
        };
        let old_key = project(old_row, &self.ref_columns);
        if let Some(new_row) = new_row {
            if project(new_row, &self.ref_columns) == old_key {
                return Ok(());
            }
        }
        if old_key.iter().any(Value::is_null) {
            return Ok(());
        }
        let action = if new_row.is_some() {
            self.options.on_update
        } else {
            self.options.on_delete
        };
        if ctx.session.is_cascading() && action != ReferentialAction::Restrict {
            return Ok(());
        }
        ctx.session.check_canceled()?;
        if self.has_referencing_row(ctx, &old_key, old_row.key)? {
            Err(self.violation(
                &self.ref_table,
                ReferentialViolationKind::RowReferenced,
                &old_key,
            ))
        } else {
            Ok(())
        }
    }
}

fn column_type(table: &Table, column: &IndexColumn) -> Result<DataType, Error> {
    table
        .column(column.id)
        .map(|c| c.data_type)
        .ok_or_else(|| Error::not_found("column", format!("{}.{}", table.name, column.name)))
}

impl ConstraintBehavior for ReferentialConstraint {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Referential
    }

    fn check_row(
        &self,
        ctx: &CheckContext<'_>,
        table: &Table,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        if table.id == self.table.id {
            self.check_referencing(ctx, old_row, new_row)?;
        }
        if table.id == self.ref_table.id {
            self.check_referenced(ctx, old_row, new_row)?;
        }
        Ok(())
    }

    fn uses_index(&self, index: IndexId) -> bool {
        self.index == Some(index) || self.ref_index == Some(index)
    }

    fn set_index_owner(&mut self, index: IndexId) -> Result<(), Error> {
        self.attach_index(index, true);
        Ok(())
    }

    fn referenced_columns(&self, table: &Table) -> BTreeSet<ColumnId> {
        let mut ids = BTreeSet::new();
        if table.id == self.table.id {
            ids.extend(self.columns.iter().map(|c| c.id));
        }
        if table.id == self.ref_table.id {
            ids.extend(self.ref_columns.iter().map(|c| c.id));
        }
        ids
    }

    fn create_sql_without_indexes(&self) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY({}) REFERENCES {}({})",
            self.table.name.to_sql(),
            self.name.to_sql(),
            column_list_sql(&self.columns),
            self.ref_table.name.to_sql(),
            column_list_sql(&self.ref_columns)
        );
        if self.options.match_mode == MatchMode::Full {
            sql.push_str(" MATCH FULL");
        }
        if self.options.on_delete != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON DELETE {}", self.options.on_delete));
        }
        if self.options.on_update != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON UPDATE {}", self.options.on_update));
        }
        sql.push_str(" NOCHECK");
        sql
    }

    fn check_existing_data(&self, ctx: &CheckContext<'_>) -> Result<(), Error> {
        ctx.for_each_row(self.table.id, |row| self.check_referencing_row(ctx, &row, None))
    }

    fn rebuild(&mut self, tables: &TableMap) -> Result<(), Error> {
        let table = resolve_table(&self.name, tables, self.table.id)?;
        let ref_table = resolve_table(&self.name, tables, self.ref_table.id)?;
        let mut columns = self.columns.clone();
        let mut ref_columns = self.ref_columns.clone();
        rebind_columns(&self.name, table, &mut columns)?;
        rebind_columns(&self.name, ref_table, &mut ref_columns)?;
        self.table = TableRef::of(table);
        self.ref_table = TableRef::of(ref_table);
        self.columns = columns;
        self.ref_columns = ref_columns;
        Ok(())
    }

    fn index(&self) -> Option<IndexId> {
        self.index
    }

    fn is_index_owner(&self) -> bool {
        self.index.is_some() && self.index_owner
    }

    fn referenced_constraint(&self) -> Option<ConstraintId> {
        Some(self.ref_constraint)
    }
}
