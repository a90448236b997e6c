//! Persisted catalog form.

use rkyv::{Archive, Deserialize, Serialize};

use crate::constraint::{
    Constraint, ConstraintBehavior, ConstraintId, MatchMode, ReferentialAction,
};
use crate::error::Error;
use crate::index::IndexId;

use super::{ColumnId, Domain, QualifiedName, Table, TableId};

/// Variant-specific part of a persisted constraint.
///
/// Predicates are stored as canonical SQL text and re-parsed on load.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ConstraintKind {
    Check {
        expression: String,
    },
    Unique {
        primary_key: bool,
        columns: Vec<ColumnId>,
        index: Option<IndexId>,
        index_owner: bool,
    },
    Referential {
        columns: Vec<ColumnId>,
        ref_table: TableId,
        ref_columns: Vec<ColumnId>,
        ref_constraint: ConstraintId,
        match_mode: MatchMode,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
        index: Option<IndexId>,
        index_owner: bool,
    },
    Domain {
        domain: QualifiedName,
        expression: String,
    },
}

/// A persisted constraint.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ConstraintDef {
    pub id: ConstraintId,
    pub name: QualifiedName,
    /// Owning table; absent for domain constraints.
    pub table: Option<TableId>,
    pub kind: ConstraintKind,
}

impl ConstraintDef {
    /// Capture a live constraint.
    pub fn of(constraint: &Constraint) -> Self {
        let kind = match constraint {
            Constraint::Check(c) => ConstraintKind::Check {
                expression: c.expression().map(|e| e.to_sql()).unwrap_or_default(),
            },
            Constraint::Unique(c) => ConstraintKind::Unique {
                primary_key: c.is_primary_key(),
                columns: c.column_ids(),
                index: c.index(),
                index_owner: c.is_index_owner(),
            },
            Constraint::Referential(c) => ConstraintKind::Referential {
                columns: c.columns().iter().map(|col| col.id).collect(),
                ref_table: c.ref_table().id,
                ref_columns: c.ref_columns().iter().map(|col| col.id).collect(),
                ref_constraint: c.referenced_constraint().unwrap_or(c.id()),
                match_mode: c.match_mode(),
                on_delete: c.on_delete(),
                on_update: c.on_update(),
                index: c.index(),
                index_owner: c.is_index_owner(),
            },
            Constraint::Domain(c) => ConstraintKind::Domain {
                domain: c.domain().clone(),
                expression: c.expression().map(|e| e.to_sql()).unwrap_or_default(),
            },
        };
        Self {
            id: constraint.id(),
            name: constraint.name().clone(),
            table: constraint.table(),
            kind,
        }
    }

    /// Restore order: foreign keys after the constraints they reference.
    pub(crate) fn restore_rank(&self) -> u8 {
        match self.kind {
            ConstraintKind::Referential { .. } => 1,
            _ => 0,
        }
    }
}

/// Everything needed to rebuild a catalog.
#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Snapshot version (set by the store).
    pub version: u64,
    pub tables: Vec<Table>,
    pub domains: Vec<Domain>,
    pub constraints: Vec<ConstraintDef>,
    pub next_table_id: u32,
    pub next_constraint_id: u32,
}

impl CatalogSnapshot {
    /// Serialize the snapshot to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a snapshot from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
