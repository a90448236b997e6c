//! Registry of tables, domains and constraints.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::{
    CatalogSnapshot, ConstraintDef, ConstraintKind, ConstraintSet, Domain, QualifiedName, Table,
    TableId, TableMap,
};
use crate::catalog::ColumnId;
use crate::constraint::{
    CheckConstraint, CheckContext, Constraint, ConstraintBehavior, ConstraintId,
    DomainConstraint, ForeignKeyOptions, IndexColumn, ReferentialConstraint, UniqueConstraint,
};
use crate::error::Error;
use crate::expr::Expression;
use crate::index::IndexId;
use crate::storage::Row;

/// The schema catalog as seen by constraint enforcement.
///
/// Constraints refer to each other and to tables by id only. The catalog
/// keeps the reverse index from a unique constraint to the foreign keys
/// that reference it, and one [`ConstraintSet`] per table.
#[derive(Debug, Clone)]
pub struct ConstraintCatalog {
    tables: TableMap,
    table_names: HashMap<QualifiedName, TableId>,
    domains: BTreeMap<QualifiedName, Domain>,
    constraints: BTreeMap<ConstraintId, Constraint>,
    names: HashMap<QualifiedName, ConstraintId>,
    sets: HashMap<TableId, ConstraintSet>,
    domain_constraints: HashMap<QualifiedName, BTreeSet<ConstraintId>>,
    referencers: HashMap<ConstraintId, BTreeSet<ConstraintId>>,
    next_table_id: u32,
    next_constraint_id: u32,
}

impl Default for ConstraintCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            tables: TableMap::new(),
            table_names: HashMap::new(),
            domains: BTreeMap::new(),
            constraints: BTreeMap::new(),
            names: HashMap::new(),
            sets: HashMap::new(),
            domain_constraints: HashMap::new(),
            referencers: HashMap::new(),
            next_table_id: 1,
            next_constraint_id: 1,
        }
    }

    // ---- tables -----------------------------------------------------------

    /// Register a table, assigning it the next table id.
    ///
    /// Columns declared with a domain take the domain's data type.
    pub fn add_table(&mut self, mut table: Table) -> Result<TableId, Error> {
        if self.table_names.contains_key(&table.name) {
            return Err(Error::already_exists("table", table.name.to_string()));
        }
        self.validate_columns(&mut table)?;

        let id = TableId(self.next_table_id);
        self.next_table_id += 1;
        table.id = id;
        self.insert_table(table);
        Ok(id)
    }

    fn insert_table(&mut self, table: Table) {
        let id = table.id;
        self.table_names.insert(table.name.clone(), id);
        self.sets.insert(id, ConstraintSet::new(id));
        self.tables.insert(id, table);
    }

    fn validate_columns(&self, table: &mut Table) -> Result<(), Error> {
        let mut seen = BTreeSet::new();
        for column in &mut table.columns {
            if !seen.insert(column.name.clone()) {
                return Err(Error::Definition(format!(
                    "duplicate column {} in table {}",
                    column.name, table.name
                )));
            }
            if let Some(domain) = &column.domain {
                let qualified = QualifiedName::new(table.name.schema.clone(), domain.clone());
                let domain = self
                    .domains
                    .get(&qualified)
                    .ok_or_else(|| Error::not_found("domain", qualified.to_string()))?;
                column.data_type = domain.data_type;
            }
        }
        Ok(())
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn table_by_name(&self, schema: &str, name: &str) -> Option<&Table> {
        let id = self.table_names.get(&QualifiedName::new(schema, name))?;
        self.tables.get(id)
    }

    /// All tables, ordered by id.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table_map(&self) -> &TableMap {
        &self.tables
    }

    /// Unregister a table. Every constraint in its set must be gone already.
    pub(crate) fn remove_table(&mut self, id: TableId) -> Result<Table, Error> {
        if let Some(first) = self.sets.get(&id).and_then(|set| set.ids().next()) {
            let constraint = self
                .constraints
                .get(&first)
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| first.to_string());
            return Err(Error::Definition(format!(
                "table {id} still has constraint {constraint}"
            )));
        }
        let table = self
            .tables
            .remove(&id)
            .ok_or_else(|| Error::not_found("table", id.to_string()))?;
        self.table_names.remove(&table.name);
        self.sets.remove(&id);
        Ok(table)
    }

    /// Mark columns NOT NULL.
    pub(crate) fn set_not_null(&mut self, table: TableId, columns: &[ColumnId]) -> Result<(), Error> {
        let entry = self
            .tables
            .get_mut(&table)
            .ok_or_else(|| Error::not_found("table", table.to_string()))?;
        for id in columns {
            let column = entry
                .column_mut(*id)
                .ok_or_else(|| Error::not_found("column", id.to_string()))?;
            column.nullable = false;
        }
        Ok(())
    }

    // ---- domains ----------------------------------------------------------

    pub fn add_domain(&mut self, domain: Domain) -> Result<(), Error> {
        if self.domains.contains_key(&domain.name) {
            return Err(Error::already_exists("domain", domain.name.to_string()));
        }
        self.domains.insert(domain.name.clone(), domain);
        Ok(())
    }

    pub fn domain(&self, name: &QualifiedName) -> Option<&Domain> {
        self.domains.get(name)
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    // ---- constraints ------------------------------------------------------

    /// Reserve the id for a constraint about to be built.
    pub fn allocate_constraint_id(&mut self) -> ConstraintId {
        let id = ConstraintId(self.next_constraint_id);
        self.next_constraint_id += 1;
        id
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(&id)
    }

    pub(crate) fn constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.constraints.get_mut(&id)
    }

    pub fn constraint_by_name(&self, name: &QualifiedName) -> Option<&Constraint> {
        let id = self.names.get(name)?;
        self.constraints.get(id)
    }

    /// All constraints, ordered by id.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    pub fn constraint_set(&self, table: TableId) -> Option<&ConstraintSet> {
        self.sets.get(&table)
    }

    /// Constraints in the table's set, in application order.
    pub fn constraints_for(&self, table: TableId) -> Vec<&Constraint> {
        self.sets
            .get(&table)
            .map(|set| set.ids().filter_map(|id| self.constraints.get(&id)).collect())
            .unwrap_or_default()
    }

    /// Everything checked for a row of `table`: its set plus the constraints
    /// of domains its columns are declared with, in application order.
    pub fn applicable(&self, table: &Table) -> Vec<&Constraint> {
        let mut applicable = self.constraints_for(table.id);
        let domains: BTreeSet<&str> = table
            .columns
            .iter()
            .filter_map(|c| c.domain.as_deref())
            .collect();
        for domain in domains {
            let name = QualifiedName::new(table.name.schema.clone(), domain);
            if let Some(ids) = self.domain_constraints.get(&name) {
                applicable.extend(ids.iter().filter_map(|id| self.constraints.get(id)));
            }
        }
        applicable.sort();
        applicable.dedup_by_key(|c| c.id());
        applicable
    }

    /// The table's primary key, if declared.
    pub fn primary_key(&self, table: TableId) -> Option<&UniqueConstraint> {
        self.constraints_for(table)
            .into_iter()
            .filter_map(Constraint::as_unique)
            .find(|u| u.is_primary_key() && u.table().id == table)
    }

    /// A primary key or unique constraint over exactly this column set.
    pub fn find_unique(&self, table: TableId, columns: &[ColumnId]) -> Option<&UniqueConstraint> {
        let wanted: BTreeSet<ColumnId> = columns.iter().copied().collect();
        self.constraints_for(table)
            .into_iter()
            .filter_map(Constraint::as_unique)
            .find(|u| {
                u.table().id == table
                    && u.columns().len() == columns.len()
                    && u.column_ids().into_iter().collect::<BTreeSet<_>>() == wanted
            })
    }

    /// Foreign keys referencing a unique constraint.
    pub fn referencers(&self, id: ConstraintId) -> Vec<ConstraintId> {
        self.referencers
            .get(&id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Install a validated constraint.
    pub fn add(&mut self, constraint: Constraint) -> Result<(), Error> {
        let id = constraint.id();
        if self.names.contains_key(constraint.name()) {
            return Err(Error::already_exists("constraint", constraint.name().to_string()));
        }
        if self.constraints.contains_key(&id) {
            return Err(Error::already_exists("constraint", id.to_string()));
        }
        for table in constraint.member_tables() {
            if !self.tables.contains_key(&table) {
                return Err(Error::not_found("table", table.to_string()));
            }
        }
        match &constraint {
            Constraint::Unique(u) if u.is_primary_key() => {
                if let Some(existing) = self.primary_key(u.table().id) {
                    return Err(Error::Definition(format!(
                        "table {} already has primary key {}",
                        u.table().name,
                        existing.name()
                    )));
                }
            }
            Constraint::Referential(r) => {
                let target = r.referenced_constraint().unwrap_or(id);
                if self.constraint(target).and_then(Constraint::as_unique).is_none() {
                    return Err(Error::not_found("unique constraint", target.to_string()));
                }
            }
            Constraint::Domain(d) if !self.domains.contains_key(d.domain()) => {
                return Err(Error::not_found("domain", d.domain().to_string()));
            }
            _ => {}
        }

        let kind = constraint.constraint_type();
        for table in constraint.member_tables() {
            self.sets
                .entry(table)
                .or_insert_with(|| ConstraintSet::new(table))
                .insert(kind, id);
        }
        if let Some(domain) = constraint.as_domain() {
            self.domain_constraints
                .entry(domain.domain().clone())
                .or_default()
                .insert(id);
        }
        if let Some(target) = constraint.referenced_constraint() {
            self.referencers.entry(target).or_default().insert(id);
        }
        self.names.insert(constraint.name().clone(), id);
        self.next_constraint_id = self.next_constraint_id.max(id.0 + 1);
        self.constraints.insert(id, constraint);
        Ok(())
    }

    /// Uninstall a constraint. Fails while foreign keys still reference it.
    pub fn remove(&mut self, id: ConstraintId) -> Result<Constraint, Error> {
        let constraint = self
            .constraints
            .get(&id)
            .ok_or_else(|| Error::not_found("constraint", id.to_string()))?;
        if let Some(first) = self.referencers(id).into_iter().find(|r| *r != id) {
            return Err(Error::ConstraintInUse {
                constraint: constraint.name().to_string(),
                referenced_by: self
                    .constraints
                    .get(&first)
                    .map(|c| c.name().to_string())
                    .unwrap_or_else(|| first.to_string()),
            });
        }

        let Some(constraint) = self.constraints.remove(&id) else {
            return Err(Error::not_found("constraint", id.to_string()));
        };
        for table in constraint.member_tables() {
            if let Some(set) = self.sets.get_mut(&table) {
                set.remove(id);
            }
        }
        if let Some(domain) = constraint.as_domain() {
            if let Some(ids) = self.domain_constraints.get_mut(domain.domain()) {
                ids.remove(&id);
            }
        }
        if let Some(target) = constraint.referenced_constraint() {
            if let Some(ids) = self.referencers.get_mut(&target) {
                ids.remove(&id);
            }
        }
        self.referencers.remove(&id);
        self.names.remove(constraint.name());
        Ok(constraint)
    }

    /// Whether a constraint other than `excluding` depends on `index`.
    pub fn index_in_use(&self, index: IndexId, excluding: Option<ConstraintId>) -> bool {
        self.constraints
            .values()
            .any(|c| Some(c.id()) != excluding && c.uses_index(index))
    }

    /// Constraints backed by `index`, ordered by id.
    pub fn index_holders(&self, index: IndexId) -> Vec<ConstraintId> {
        self.constraints
            .values()
            .filter(|c| c.index() == Some(index))
            .map(Constraint::id)
            .collect()
    }

    /// The constraint exclusively owning `index`.
    pub fn index_owner(&self, index: IndexId) -> Option<ConstraintId> {
        self.constraints
            .values()
            .find(|c| c.index() == Some(index) && c.is_index_owner())
            .map(Constraint::id)
    }

    // ---- schema evolution -------------------------------------------------

    /// Replace a table definition and rebuild every constraint bound to it.
    ///
    /// All or nothing: if any constraint no longer resolves, the catalog is
    /// left untouched.
    pub fn alter_table(&mut self, table: Table) -> Result<(), Error> {
        let id = table.id;
        let old = self
            .tables
            .get(&id)
            .ok_or_else(|| Error::not_found("table", id.to_string()))?;
        let old_name = old.name.clone();
        if table.name != old_name && self.table_names.contains_key(&table.name) {
            return Err(Error::already_exists("table", table.name.to_string()));
        }

        let mut tables = self.tables.clone();
        tables.insert(id, table.clone());

        let mut rebuilt = Vec::new();
        for constraint in self.constraints_for(id) {
            let mut constraint = constraint.clone();
            constraint.rebuild(&tables)?;
            rebuilt.push(constraint);
        }

        self.tables = tables;
        if table.name != old_name {
            self.table_names.remove(&old_name);
            self.table_names.insert(table.name.clone(), id);
        }
        for constraint in rebuilt {
            debug!(constraint = %constraint.name(), table = %table.name, "rebuilt constraint");
            self.constraints.insert(constraint.id(), constraint);
        }
        Ok(())
    }

    /// Rename a table within its schema.
    pub fn rename_table(&mut self, id: TableId, new_name: &str) -> Result<(), Error> {
        let mut table = self
            .table(id)
            .cloned()
            .ok_or_else(|| Error::not_found("table", id.to_string()))?;
        table.name.name = new_name.to_string();
        self.alter_table(table)
    }

    /// Rename a column of a table.
    pub fn rename_column(&mut self, id: TableId, old: &str, new: &str) -> Result<(), Error> {
        let mut table = self
            .table(id)
            .cloned()
            .ok_or_else(|| Error::not_found("table", id.to_string()))?;
        let column_id = table
            .column_by_name(old)
            .map(|c| c.id)
            .ok_or_else(|| Error::not_found("column", format!("{}.{}", table.name, old)))?;
        if old == new {
            return Ok(());
        }
        if table.column_by_name(new).is_some() {
            return Err(Error::already_exists("column", format!("{}.{}", table.name, new)));
        }
        if let Some(column) = table.column_mut(column_id) {
            column.name = new.to_string();
        }
        self.alter_table(table)
    }

    // ---- enforcement ------------------------------------------------------

    /// Run every applicable constraint against one row transition, stopping
    /// at the first failure.
    pub fn check_row(
        &self,
        ctx: &CheckContext<'_>,
        table: &Table,
        old_row: Option<&Row>,
        new_row: Option<&Row>,
    ) -> Result<(), Error> {
        for constraint in self.applicable(table) {
            debug!(
                constraint = %constraint.name(),
                kind = %constraint.constraint_type(),
                table = %table.name,
                "checking row"
            );
            constraint.check_row(ctx, table, old_row, new_row)?;
        }
        Ok(())
    }

    // ---- persistence ------------------------------------------------------

    /// Capture the catalog for persistence.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            version: 0,
            tables: self.tables.values().cloned().collect(),
            domains: self.domains.values().cloned().collect(),
            constraints: self.constraints.values().map(ConstraintDef::of).collect(),
            next_table_id: self.next_table_id,
            next_constraint_id: self.next_constraint_id,
        }
    }

    /// Rebuild a catalog from a snapshot.
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Result<Self, Error> {
        let mut catalog = Self::new();
        for domain in snapshot.domains {
            catalog.add_domain(domain)?;
        }
        for table in snapshot.tables {
            catalog.next_table_id = catalog.next_table_id.max(table.id.0 + 1);
            catalog.insert_table(table);
        }

        let mut defs = snapshot.constraints;
        defs.sort_by_key(|d| (d.restore_rank(), d.id));
        for def in defs {
            let constraint = catalog.restore(def)?;
            catalog.add(constraint)?;
        }

        catalog.next_table_id = catalog.next_table_id.max(snapshot.next_table_id);
        catalog.next_constraint_id = catalog.next_constraint_id.max(snapshot.next_constraint_id);
        Ok(catalog)
    }

    fn restore(&self, def: ConstraintDef) -> Result<Constraint, Error> {
        let ConstraintDef {
            id,
            name,
            table,
            kind,
        } = def;
        let unresolved = |reason: String| Error::SchemaResolution {
            constraint: name.to_string(),
            reason,
        };
        let owner = match table.and_then(|t| self.table(t)) {
            Some(table) => Some(table),
            None if matches!(kind, ConstraintKind::Domain { .. }) => None,
            None => return Err(unresolved("owning table missing".to_string())),
        };
        let resolve = |table: &Table, ids: &[ColumnId]| {
            IndexColumn::resolve_ids(table, ids)
                .ok_or_else(|| unresolved(format!("columns missing from {}", table.name)))
        };

        let constraint = match (kind, owner) {
            (ConstraintKind::Check { expression }, Some(table)) => {
                let expression = Expression::parse(&expression)?;
                CheckConstraint::new(id, name.clone(), table, expression)?.into()
            }
            (
                ConstraintKind::Unique {
                    primary_key,
                    columns,
                    index,
                    index_owner,
                },
                Some(table),
            ) => {
                let columns = resolve(table, &columns)?;
                let mut unique =
                    UniqueConstraint::new(id, name.clone(), table, columns, primary_key)?;
                if let Some(index) = index {
                    unique.attach_index(index, index_owner);
                }
                unique.into()
            }
            (
                ConstraintKind::Referential {
                    columns,
                    ref_table,
                    ref_columns,
                    ref_constraint,
                    match_mode,
                    on_delete,
                    on_update,
                    index,
                    index_owner,
                },
                Some(table),
            ) => {
                let parent = self
                    .table(ref_table)
                    .ok_or_else(|| unresolved(format!("referenced table {ref_table} missing")))?;
                let referenced = self
                    .constraint(ref_constraint)
                    .and_then(Constraint::as_unique)
                    .ok_or_else(|| {
                        unresolved(format!("referenced constraint {ref_constraint} missing"))
                    })?;
                let mut fk = ReferentialConstraint::new(
                    id,
                    name.clone(),
                    table,
                    resolve(table, &columns)?,
                    parent,
                    referenced,
                    resolve(parent, &ref_columns)?,
                    ForeignKeyOptions {
                        match_mode,
                        on_delete,
                        on_update,
                    },
                )?;
                if let Some(index) = index {
                    fk.attach_index(index, index_owner);
                }
                fk.into()
            }
            (ConstraintKind::Domain { domain, expression }, _) => {
                let domain = self
                    .domain(&domain)
                    .ok_or_else(|| unresolved(format!("domain {domain} missing")))?;
                let expression = Expression::parse(&expression)?;
                DomainConstraint::new(id, name.clone(), domain, expression)?.into()
            }
            (_, None) => return Err(unresolved("owning table missing".to_string())),
        };
        Ok(constraint)
    }
}
