//! Composable descriptor selectors.
//!
//! A [`Selector`] is a conjunction of predicates built from well-known
//! constructors plus arbitrary caller-supplied closures. Constraints compose
//! in any order; an empty selector matches every used descriptor.

use crate::descriptor::{DataType, Descriptor, PartType, NO_GROUP};
use crate::error::{Error, Result};

enum Constraint {
    Id(u32),
    GroupId(u32),
    DataType(DataType),
    LinkedId(u32),
    LinkedGroupId(u32),
    NoGroup,
    PartitionType(PartType),
    Predicate(Box<dyn Fn(&Descriptor) -> bool>),
}

/// A composable predicate over used descriptors.
///
/// ```
/// use sif::{DataType, Selector};
///
/// let sel = Selector::any().with_data_type(DataType::Signature).with_group_id(1);
/// ```
pub struct Selector {
    constraints: Vec<Constraint>,
}

impl Default for Selector {
    fn default() -> Self {
        Selector {
            constraints: Vec::new(),
        }
    }
}

impl Selector {
    /// The sentinel selector with no constraints: matches every used
    /// descriptor.
    pub fn any() -> Selector {
        Selector::default()
    }

    /// Match the descriptor with the given object ID.
    pub fn with_id(mut self, id: u32) -> Selector {
        self.constraints.push(Constraint::Id(id));
        self
    }

    /// Match descriptors belonging to the given object group.
    pub fn with_group_id(mut self, group_id: u32) -> Selector {
        self.constraints.push(Constraint::GroupId(group_id));
        self
    }

    /// Match descriptors of the given data type.
    pub fn with_data_type(mut self, data_type: DataType) -> Selector {
        self.constraints.push(Constraint::DataType(data_type));
        self
    }

    /// Match descriptors whose link references the given object.
    pub fn with_linked_id(mut self, id: u32) -> Selector {
        self.constraints.push(Constraint::LinkedId(id));
        self
    }

    /// Match descriptors whose link references the given group.
    pub fn with_linked_group_id(mut self, group_id: u32) -> Selector {
        self.constraints.push(Constraint::LinkedGroupId(group_id));
        self
    }

    /// Match descriptors that belong to no object group.
    pub fn with_no_group(mut self) -> Selector {
        self.constraints.push(Constraint::NoGroup);
        self
    }

    /// Match partition descriptors with the given partition type.
    pub fn with_partition_type(mut self, part_type: PartType) -> Selector {
        self.constraints.push(Constraint::PartitionType(part_type));
        self
    }

    /// Match descriptors satisfying an arbitrary predicate.
    pub fn with_predicate<F>(mut self, pred: F) -> Selector
    where
        F: Fn(&Descriptor) -> bool + 'static,
    {
        self.constraints.push(Constraint::Predicate(Box::new(pred)));
        self
    }

    /// Reject selectors built with out-of-domain IDs before any lookup runs.
    pub(crate) fn validate(&self) -> Result<()> {
        for c in &self.constraints {
            match *c {
                Constraint::Id(0) => return Err(Error::InvalidObjectId(0)),
                Constraint::GroupId(id) | Constraint::LinkedGroupId(id)
                    if id == 0 || id & NO_GROUP != 0 =>
                {
                    return Err(Error::InvalidGroupId(id))
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn matches(&self, d: &Descriptor) -> bool {
        self.constraints.iter().all(|c| match *c {
            Constraint::Id(id) => d.id() == id,
            Constraint::GroupId(group_id) => d.group_id() == Some(group_id),
            Constraint::DataType(data_type) => d.data_type() == data_type,
            Constraint::LinkedId(id) => d.linked_id() == Some((id, false)),
            Constraint::LinkedGroupId(group_id) => d.linked_id() == Some((group_id, true)),
            Constraint::NoGroup => d.group_id().is_none(),
            Constraint::PartitionType(part_type) => {
                matches!(d.partition_metadata(), Ok((_, pt, _)) if pt == part_type)
            }
            Constraint::Predicate(ref pred) => pred(d),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::descriptor::{encode_partition_extra, FsType, EXTRA_LEN, LINK_GROUP_BIT};

    fn descriptor(id: u32, group_id: u32, data_type: DataType) -> Descriptor {
        Descriptor {
            data_type,
            id,
            group_id,
            link: 0,
            file_off: 0,
            file_len: 0,
            store_len: 0,
            ctime: 0,
            mtime: 0,
            uid: 0,
            gid: 0,
            name: String::new(),
            extra: [0u8; EXTRA_LEN],
        }
    }

    #[test]
    fn empty_selector_matches_everything() {
        let d = descriptor(1, 1, DataType::Generic);
        assert!(Selector::any().matches(&d), "the sentinel matches all descriptors");
    }

    #[test]
    fn conjunctive_composition() {
        let d = descriptor(2, 1, DataType::Generic);
        assert!(Selector::any()
            .with_id(2)
            .with_group_id(1)
            .with_data_type(DataType::Generic)
            .matches(&d));
        assert!(!Selector::any()
            .with_id(2)
            .with_data_type(DataType::Partition)
            .matches(&d));
    }

    #[test]
    fn order_independent() {
        let d = descriptor(2, 1, DataType::Generic);
        let a = Selector::any().with_id(2).with_group_id(1);
        let b = Selector::any().with_group_id(1).with_id(2);
        assert_eq!(a.matches(&d), b.matches(&d));
    }

    #[test]
    fn linked_selectors_respect_group_bit() {
        let mut d = descriptor(5, 0, DataType::Signature);
        d.link = LINK_GROUP_BIT | 1;
        assert!(Selector::any().with_linked_group_id(1).matches(&d));
        assert!(!Selector::any().with_linked_id(1).matches(&d));
        d.link = 1;
        assert!(Selector::any().with_linked_id(1).matches(&d));
        assert!(!Selector::any().with_linked_group_id(1).matches(&d));
    }

    #[test]
    fn no_group_matches_high_bit_values() {
        let d = descriptor(1, NO_GROUP, DataType::Generic);
        assert!(Selector::any().with_no_group().matches(&d));
        let d = descriptor(1, 0, DataType::Generic);
        assert!(Selector::any().with_no_group().matches(&d));
        let d = descriptor(1, 1, DataType::Generic);
        assert!(!Selector::any().with_no_group().matches(&d));
    }

    #[test]
    fn partition_type_selector() {
        let mut d = descriptor(1, 1, DataType::Partition);
        d.extra = encode_partition_extra(FsType::Raw, PartType::PrimSys, Arch::I386);
        assert!(Selector::any().with_partition_type(PartType::PrimSys).matches(&d));
        assert!(!Selector::any().with_partition_type(PartType::Data).matches(&d));
        // Non-partition descriptors never match a partition-type constraint.
        let d = descriptor(1, 1, DataType::Generic);
        assert!(!Selector::any().with_partition_type(PartType::PrimSys).matches(&d));
    }

    #[test]
    fn user_predicates_compose() {
        let d = descriptor(4, 1, DataType::Generic);
        assert!(Selector::any()
            .with_predicate(|d| d.id() % 2 == 0)
            .with_group_id(1)
            .matches(&d));
    }

    #[test]
    fn zero_ids_rejected_at_validation() {
        match Selector::any().with_id(0).validate() {
            Err(Error::InvalidObjectId(0)) => {}
            other => panic!("expected InvalidObjectId, got {:?}", other),
        }
        match Selector::any().with_group_id(0).validate() {
            Err(Error::InvalidGroupId(0)) => {}
            other => panic!("expected InvalidGroupId, got {:?}", other),
        }
        match Selector::any().with_linked_group_id(NO_GROUP | 3).validate() {
            Err(Error::InvalidGroupId(_)) => {}
            other => panic!("expected InvalidGroupId, got {:?}", other),
        }
    }
}
