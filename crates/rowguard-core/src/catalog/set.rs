//! Per-table constraint sets.

use crate::constraint::{ConstraintId, ConstraintType};

use super::TableId;

/// Constraints attached to one table, kept in application order.
///
/// A foreign key belongs to the sets of both the referencing and the
/// referenced table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSet {
    table: TableId,
    members: Vec<(ConstraintType, ConstraintId)>,
}

impl ConstraintSet {
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            members: Vec::new(),
        }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// Add a member; returns false if it was already present.
    pub fn insert(&mut self, kind: ConstraintType, id: ConstraintId) -> bool {
        match self.members.binary_search(&(kind, id)) {
            Ok(_) => false,
            Err(pos) => {
                self.members.insert(pos, (kind, id));
                true
            }
        }
    }

    /// Remove a member; returns whether it was present.
    pub fn remove(&mut self, id: ConstraintId) -> bool {
        let before = self.members.len();
        self.members.retain(|(_, member)| *member != id);
        self.members.len() != before
    }

    pub fn contains(&self, id: ConstraintId) -> bool {
        self.members.iter().any(|(_, member)| *member == id)
    }

    /// Member ids in application order.
    pub fn ids(&self) -> impl Iterator<Item = ConstraintId> + '_ {
        self.members.iter().map(|(_, id)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ConstraintType, ConstraintId)> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_stay_in_type_order() {
        let mut set = ConstraintSet::new(TableId(1));
        assert!(set.insert(ConstraintType::Referential, ConstraintId(1)));
        assert!(set.insert(ConstraintType::Check, ConstraintId(7)));
        assert!(set.insert(ConstraintType::PrimaryKey, ConstraintId(3)));
        assert!(set.insert(ConstraintType::Check, ConstraintId(2)));
        assert!(!set.insert(ConstraintType::Check, ConstraintId(2)));

        let ids: Vec<u32> = set.ids().map(|id| id.0).collect();
        assert_eq!(ids, vec![2, 7, 3, 1]);

        assert!(set.remove(ConstraintId(7)));
        assert!(!set.remove(ConstraintId(7)));
        assert!(!set.contains(ConstraintId(7)));
        assert_eq!(set.len(), 3);
    }
}
