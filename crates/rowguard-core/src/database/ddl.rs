//! Schema operations: tables, domains, indexes and constraints.

use tracing::{info, warn};

use super::Database;
use crate::catalog::{ColumnId, ConstraintCatalog, Domain, QualifiedName, Table, TableId};
use crate::config::DropBehavior;
use crate::constraint::{
    CheckConstraint, Constraint, ConstraintBehavior, ConstraintId, ConstraintType,
    DomainConstraint, ForeignKeyOptions, IndexColumn, ReferentialConstraint, UniqueConstraint,
};
use crate::ddl::{parse_constraint_sql, ConstraintRequest, ConstraintSpec, ConstraintTarget, ObjectName};
use crate::error::Error;
use crate::index::{IndexDef, IndexId, IndexService};
use crate::session::Session;
use crate::storage::RowStore;

impl Database {
    pub(crate) fn qualify(&self, name: &ObjectName) -> QualifiedName {
        QualifiedName::new(name.schema_or(&self.config.default_schema), name.name.clone())
    }

    pub(crate) fn resolve_table<'c>(
        &self,
        catalog: &'c ConstraintCatalog,
        name: &ObjectName,
    ) -> Result<&'c Table, Error> {
        let qualified = self.qualify(name);
        catalog
            .table_by_name(&qualified.schema, &qualified.name)
            .ok_or_else(|| Error::not_found("table", qualified.to_string()))
    }

    /// Create a table. Its name must be unique within its schema.
    pub fn create_table(&self, table: Table) -> Result<TableId, Error> {
        let _latch = self.write_latch.lock();
        let mut live = self.catalog.write();
        let mut catalog = live.clone();
        let id = catalog.add_table(table)?;
        self.commit_catalog(&mut live, catalog)?;
        self.rows.create_table(id)?;
        if let Some(table) = live.table(id) {
            info!(table = %table.name, id = %id, columns = table.columns.len(), "created table");
        }
        Ok(id)
    }

    pub fn create_domain(&self, domain: Domain) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let mut live = self.catalog.write();
        let mut catalog = live.clone();
        let name = domain.name.clone();
        catalog.add_domain(domain)?;
        self.commit_catalog(&mut live, catalog)?;
        info!(domain = %name, "created domain");
        Ok(())
    }

    /// Create and populate an index over `columns` of a table.
    pub fn create_index(
        &self,
        session: &Session,
        table: impl Into<ObjectName>,
        name: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<IndexId, Error> {
        let _latch = self.write_latch.lock();
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let ids: Vec<ColumnId> = IndexColumn::resolve_names(table, &names)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let index = self.build_index(session, table, name, &ids, unique)?;
        info!(index = name, table = %table.name, unique, "created index");
        Ok(index)
    }

    /// Drop an index no constraint depends on.
    pub fn drop_index(&self, table: impl Into<ObjectName>, name: &str) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        let def = self
            .indexes
            .indexes_for(table.id)
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::not_found("index", name))?;
        if let Some(holder) = catalog.constraints().find(|c| c.uses_index(def.id)) {
            return Err(Error::ConstraintInUse {
                constraint: holder.name().to_string(),
                referenced_by: format!("index {name}"),
            });
        }
        self.indexes.drop_index(def.id)?;
        info!(index = name, table = %table.name, "dropped index");
        Ok(())
    }

    /// Indexes on a table, ordered by id.
    pub fn indexes(&self, table: impl Into<ObjectName>) -> Result<Vec<IndexDef>, Error> {
        let catalog = self.catalog.read();
        let table = self.resolve_table(&catalog, &table.into())?;
        Ok(self.indexes.indexes_for(table.id))
    }

    /// Create an index and fill it from the rows already stored.
    fn build_index(
        &self,
        session: &Session,
        table: &Table,
        name: &str,
        columns: &[ColumnId],
        unique: bool,
    ) -> Result<IndexId, Error> {
        let positions = table
            .positions_of(columns)
            .ok_or_else(|| Error::Definition(format!("index {name} names unknown columns")))?;
        let index = self.indexes.create_index(name, table.id, columns, unique)?;
        let populate = || -> Result<(), Error> {
            for row in self.rows.scan(table.id)? {
                session.check_canceled()?;
                let row = row?;
                self.indexes.insert(index, &row.project(&positions), row.key)?;
            }
            Ok(())
        };
        if let Err(err) = populate() {
            self.indexes.drop_index(index)?;
            return Err(err);
        }
        Ok(index)
    }

    /// Reuse an index on exactly `columns` or build a new one. Returns the
    /// index and whether it was created; only created indexes are owned.
    fn backing_index(
        &self,
        session: &Session,
        table: &Table,
        name: &QualifiedName,
        columns: &[ColumnId],
        unique: bool,
    ) -> Result<(IndexId, bool), Error> {
        if let Some(def) = self.indexes.find(table.id, columns, unique) {
            return Ok((def.id, false));
        }
        let index_name = format!("{}_INDEX", name.name);
        let index = self.build_index(session, table, &index_name, columns, unique)?;
        Ok((index, true))
    }

    fn constraint_name(
        &self,
        request: &ConstraintRequest,
        target_schema: &str,
        id: ConstraintId,
    ) -> Result<QualifiedName, Error> {
        match &request.name {
            Some(name) => {
                let schema = name.schema_or(target_schema);
                if schema != target_schema {
                    return Err(Error::Definition(format!(
                        "constraint {} must be in schema {}",
                        name, target_schema
                    )));
                }
                Ok(QualifiedName::new(schema, name.name.clone()))
            }
            None => Ok(QualifiedName::new(target_schema, format!("CONSTRAINT_{}", id.0))),
        }
    }

    fn build_table_constraint(
        &self,
        catalog: &ConstraintCatalog,
        table: &Table,
        id: ConstraintId,
        name: QualifiedName,
        spec: ConstraintSpec,
    ) -> Result<Constraint, Error> {
        let constraint = match spec {
            ConstraintSpec::Check { expression } => {
                CheckConstraint::new(id, name, table, expression)?.into()
            }
            ConstraintSpec::PrimaryKey { columns } => {
                if let Some(existing) = catalog.primary_key(table.id) {
                    return Err(Error::Definition(format!(
                        "table {} already has primary key {}",
                        table.name,
                        existing.name()
                    )));
                }
                let columns = IndexColumn::resolve_names(table, &columns)?;
                UniqueConstraint::new(id, name, table, columns, true)?.into()
            }
            ConstraintSpec::Unique { columns } => {
                let columns = IndexColumn::resolve_names(table, &columns)?;
                UniqueConstraint::new(id, name, table, columns, false)?.into()
            }
            ConstraintSpec::ForeignKey {
                columns,
                ref_table,
                ref_columns,
                match_mode,
                on_delete,
                on_update,
            } => {
                let ref_table = ObjectName {
                    schema: ref_table.schema.or_else(|| Some(table.name.schema.clone())),
                    name: ref_table.name,
                };
                let parent = self.resolve_table(catalog, &ref_table)?;
                let referenced = match &ref_columns {
                    None => catalog.primary_key(parent.id).ok_or_else(|| {
                        Error::Definition(format!("table {} has no primary key", parent.name))
                    })?,
                    Some(names) => {
                        let ids: Vec<ColumnId> = IndexColumn::resolve_names(parent, names)?
                            .into_iter()
                            .map(|c| c.id)
                            .collect();
                        catalog.find_unique(parent.id, &ids).ok_or_else(|| {
                            Error::Definition(format!(
                                "no primary key or unique constraint on {}({})",
                                parent.name,
                                names.join(", ")
                            ))
                        })?
                    }
                };
                let ref_columns = match ref_columns {
                    Some(names) => IndexColumn::resolve_names(parent, &names)?,
                    None => referenced.columns().to_vec(),
                };
                let options = ForeignKeyOptions {
                    match_mode: match_mode.unwrap_or(self.config.default_match),
                    on_delete,
                    on_update,
                };
                ReferentialConstraint::new(
                    id,
                    name,
                    table,
                    IndexColumn::resolve_names(table, &columns)?,
                    parent,
                    referenced,
                    ref_columns,
                    options,
                )?
                .into()
            }
        };
        Ok(constraint)
    }

    /// Add a constraint.
    ///
    /// Unless the request says otherwise, rows already stored are validated
    /// first and the constraint is not installed if any violates it. Unique
    /// constraints and (when configured) foreign keys get a backing index,
    /// reusing an existing index on the same columns. A failed addition
    /// leaves the catalog exactly as it was.
    pub fn add_constraint(
        &self,
        session: &Session,
        request: ConstraintRequest,
    ) -> Result<ConstraintId, Error> {
        let _latch = self.write_latch.lock();
        let mut live = self.catalog.write();
        let mut catalog = live.clone();
        let id = catalog.allocate_constraint_id();

        let mut constraint = match &request.target {
            ConstraintTarget::Table(target) => {
                let table = self.resolve_table(&catalog, target)?;
                let name = self.constraint_name(&request, &table.name.schema, id)?;
                self.build_table_constraint(&catalog, table, id, name, request.spec.clone())?
            }
            ConstraintTarget::Domain(target) => {
                let domain_name = self.qualify(target);
                let domain = catalog
                    .domain(&domain_name)
                    .ok_or_else(|| Error::not_found("domain", domain_name.to_string()))?;
                let name = self.constraint_name(&request, &domain_name.schema, id)?;
                let ConstraintSpec::Check { expression } = request.spec.clone() else {
                    return Err(Error::Definition(format!(
                        "domain {domain_name} only accepts CHECK constraints"
                    )));
                };
                DomainConstraint::new(id, name, domain, expression)?.into()
            }
        };
        if catalog.constraint_by_name(constraint.name()).is_some() {
            return Err(Error::already_exists("constraint", constraint.name().to_string()));
        }

        if request.validate_existing {
            let ctx = self.context(session, &catalog);
            if let Err(err) = constraint.check_existing_data(&ctx) {
                warn!(constraint = %constraint.name(), error = %err, "rejected constraint on existing data");
                return Err(err);
            }
        }

        let created = self.attach_backing_index(session, &catalog, &mut constraint)?;
        let name = constraint.name().clone();
        let kind = constraint.constraint_type();
        let primary_key = constraint
            .as_unique()
            .filter(|u| u.is_primary_key())
            .map(|u| (u.table().id, u.column_ids()));

        let installed = catalog.add(constraint).and_then(|()| match primary_key {
            Some((table, columns)) => catalog.set_not_null(table, &columns),
            None => Ok(()),
        });
        let version = match installed.and_then(|()| self.commit_catalog(&mut live, catalog)) {
            Ok(version) => version,
            Err(err) => {
                if let Some(index) = created {
                    self.indexes.drop_index(index)?;
                }
                return Err(err);
            }
        };
        info!(constraint = %name, kind = %kind, version, "added constraint");
        Ok(id)
    }

    /// Bind the backing index; returns the index if one was created.
    fn attach_backing_index(
        &self,
        session: &Session,
        catalog: &ConstraintCatalog,
        constraint: &mut Constraint,
    ) -> Result<Option<IndexId>, Error> {
        match constraint {
            Constraint::Unique(unique) => {
                let table = self.table_by_id(catalog, unique.table().id)?;
                let (index, created) = self.backing_index(
                    session,
                    table,
                    unique.name(),
                    &unique.column_ids(),
                    true,
                )?;
                unique.attach_index(index, created);
                Ok(created.then_some(index))
            }
            Constraint::Referential(fk) if self.config.index_referencing_columns => {
                let table = self.table_by_id(catalog, fk.table().id)?;
                let columns: Vec<ColumnId> = fk.columns().iter().map(|c| c.id).collect();
                let (index, created) =
                    self.backing_index(session, table, fk.name(), &columns, false)?;
                fk.attach_index(index, created);
                Ok(created.then_some(index))
            }
            _ => Ok(None),
        }
    }

    fn table_by_id<'c>(&self, catalog: &'c ConstraintCatalog, id: TableId) -> Result<&'c Table, Error> {
        catalog
            .table(id)
            .ok_or_else(|| Error::not_found("table", id.to_string()))
    }

    /// Parse and apply one constraint DDL statement.
    pub fn execute_constraint_sql(&self, session: &Session, sql: &str) -> Result<ConstraintId, Error> {
        let request = parse_constraint_sql(sql)?;
        self.add_constraint(session, request)
    }

    /// Drop a constraint by name.
    ///
    /// Foreign keys still referencing it are refused under
    /// [`DropBehavior::Restrict`] and dropped first under
    /// [`DropBehavior::Cascade`].
    pub fn drop_constraint(&self, name: impl Into<ObjectName>) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let mut live = self.catalog.write();
        let mut catalog = live.clone();
        let name = self.qualify(&name.into());
        let id = catalog
            .constraint_by_name(&name)
            .map(Constraint::id)
            .ok_or_else(|| Error::not_found("constraint", name.to_string()))?;

        let referencers: Vec<ConstraintId> =
            catalog.referencers(id).into_iter().filter(|r| *r != id).collect();
        if let Some(first) = referencers.first() {
            if self.config.drop_behavior == DropBehavior::Restrict {
                return Err(Error::ConstraintInUse {
                    constraint: name.to_string(),
                    referenced_by: catalog
                        .constraint(*first)
                        .map(|c| c.name().to_string())
                        .unwrap_or_default(),
                });
            }
        }
        let mut released = Vec::new();
        for referencer in referencers {
            self.drop_one(&mut catalog, referencer, &mut released)?;
        }
        self.drop_one(&mut catalog, id, &mut released)?;
        self.commit_catalog(&mut live, catalog)?;
        for index in released {
            self.indexes.drop_index(index)?;
        }
        Ok(())
    }

    /// Remove one constraint and hand over its backing index. An owned
    /// index nobody else holds is pushed onto `released` for the caller to
    /// drop once the catalog change is committed.
    fn drop_one(
        &self,
        catalog: &mut ConstraintCatalog,
        id: ConstraintId,
        released: &mut Vec<IndexId>,
    ) -> Result<(), Error> {
        let constraint = catalog.remove(id)?;
        if let (Some(index), true) = (constraint.index(), constraint.is_index_owner()) {
            match catalog.index_holders(index).first() {
                Some(&heir) => {
                    if let Some(holder) = catalog.constraint_mut(heir) {
                        holder.set_index_owner(index)?;
                        info!(index = %index, constraint = %holder.name(), "transferred index ownership");
                    }
                }
                None => released.push(index),
            }
        }
        info!(constraint = %constraint.name(), kind = %constraint.constraint_type(), "dropped constraint");
        Ok(())
    }

    /// Drop a table with its rows, indexes and constraints.
    ///
    /// Foreign keys of other tables referencing it follow the configured
    /// drop behavior.
    pub fn drop_table(&self, table: impl Into<ObjectName>) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let mut live = self.catalog.write();
        let mut catalog = live.clone();
        let table = self.resolve_table(&catalog, &table.into())?.clone();

        let members = catalog.constraints_for(table.id);
        let external = members
            .iter()
            .find(|c| c.ref_table() == Some(table.id) && c.table() != Some(table.id));
        if let (Some(fk), DropBehavior::Restrict) = (external, self.config.drop_behavior) {
            return Err(Error::ConstraintInUse {
                constraint: table.name.to_string(),
                referenced_by: fk.name().to_string(),
            });
        }

        // Foreign keys first so referenced keys are free to go.
        let mut ids: Vec<(bool, ConstraintId)> = members
            .iter()
            .map(|c| (c.constraint_type() != ConstraintType::Referential, c.id()))
            .collect();
        ids.sort();
        let mut released = Vec::new();
        for (_, id) in ids {
            self.drop_one(&mut catalog, id, &mut released)?;
        }
        catalog.remove_table(table.id)?;
        self.commit_catalog(&mut live, catalog)?;

        for index in released {
            self.indexes.drop_index(index)?;
        }
        for def in self.indexes.indexes_for(table.id) {
            self.indexes.drop_index(def.id)?;
        }
        self.rows.drop_table(table.id)?;
        info!(table = %table.name, "dropped table");
        Ok(())
    }

    /// Rename a table; constraints follow by id without revalidation.
    pub fn rename_table(&self, table: impl Into<ObjectName>, new_name: &str) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let mut live = self.catalog.write();
        let mut catalog = live.clone();
        let table = self.resolve_table(&catalog, &table.into())?;
        let (id, old_name) = (table.id, table.name.clone());
        catalog.rename_table(id, new_name)?;
        self.commit_catalog(&mut live, catalog)?;
        info!(table = %old_name, new_name, "renamed table");
        Ok(())
    }

    /// Rename a column; constraints follow by id without revalidation.
    pub fn rename_column(
        &self,
        table: impl Into<ObjectName>,
        old: &str,
        new: &str,
    ) -> Result<(), Error> {
        let _latch = self.write_latch.lock();
        let mut live = self.catalog.write();
        let mut catalog = live.clone();
        let table = self.resolve_table(&catalog, &table.into())?;
        let (id, table_name) = (table.id, table.name.clone());
        catalog.rename_column(id, old, new)?;
        self.commit_catalog(&mut live, catalog)?;
        info!(table = %table_name, old, new, "renamed column");
        Ok(())
    }

    /// DDL re-creating every constraint, referenced keys before foreign keys.
    pub fn constraint_sql(&self) -> Vec<String> {
        let catalog = self.catalog.read();
        let mut constraints: Vec<&Constraint> = catalog.constraints().collect();
        constraints.sort_by_key(|c| (c.constraint_type() == ConstraintType::Referential, c.id()));
        constraints
            .into_iter()
            .map(|c| c.create_sql_without_indexes())
            .collect()
    }
}
