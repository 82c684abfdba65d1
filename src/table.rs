//! The in-memory mirror of the on-disk descriptor table.
//!
//! Slots are held in table order; a free slot is `None`. The table hands out
//! the lowest free slot on allocation and never shrinks. Object IDs are not
//! managed here: they come from the monotonic high-water mark persisted in
//! the header, so freed IDs are never reissued, even across a reload.

use crate::descriptor::{Descriptor, DESCRIPTOR_LEN};
use crate::error::{Error, Result};
use crate::select::Selector;

pub(crate) struct DescriptorTable {
    slots: Vec<Option<Descriptor>>,
}

impl DescriptorTable {
    pub(crate) fn new(capacity: usize) -> DescriptorTable {
        DescriptorTable {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Decode a table from its on-disk form: `capacity` consecutive slots.
    pub(crate) fn decode(buf: &[u8], capacity: usize) -> Result<DescriptorTable> {
        if buf.len() < capacity * DESCRIPTOR_LEN {
            return Err(Error::Format(format!(
                "descriptor table requires {} bytes, got {}",
                capacity * DESCRIPTOR_LEN,
                buf.len()
            )));
        }
        let slots = buf
            .chunks_exact(DESCRIPTOR_LEN)
            .take(capacity)
            .map(Descriptor::decode)
            .collect::<Result<_>>()?;
        Ok(DescriptorTable { slots })
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Index of the lowest free slot.
    pub(crate) fn allocate(&self) -> Result<usize> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::CapacityExceeded)
    }

    /// Free a slot, returning the descriptor that occupied it.
    pub(crate) fn free(&mut self, index: usize) -> Option<Descriptor> {
        self.slots[index].take()
    }

    pub(crate) fn insert(&mut self, index: usize, d: Descriptor) {
        debug_assert!(self.slots[index].is_none());
        self.slots[index] = Some(d);
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Descriptor> {
        self.slots[index].as_ref()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Descriptor> {
        self.slots[index].as_mut()
    }

    /// Used descriptors with their slot indices, in table order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &Descriptor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|d| (i, d)))
    }

    /// Used descriptors matching a selector, in table order.
    pub(crate) fn find<'a>(
        &'a self,
        selector: &'a Selector,
    ) -> impl Iterator<Item = (usize, &'a Descriptor)> {
        self.iter().filter(move |(_, d)| selector.matches(d))
    }

    /// The unique descriptor matching a selector.
    pub(crate) fn get_descriptor<'a>(
        &'a self,
        selector: &'a Selector,
    ) -> Result<(usize, &'a Descriptor)> {
        selector.validate()?;
        let mut matches = self.find(selector);
        let first = matches.next().ok_or(Error::ObjectNotFound)?;
        if matches.next().is_some() {
            return Err(Error::MultipleObjectsFound);
        }
        Ok(first)
    }

    /// All descriptors matching a selector, in table order.
    pub(crate) fn get_descriptors(&self, selector: &Selector) -> Result<Vec<Descriptor>> {
        selector.validate()?;
        Ok(self.find(selector).map(|(_, d)| d.clone()).collect())
    }

    /// Highest object ID among live descriptors. Only a lower bound on the
    /// ever-assigned maximum; used to cross-check the header's high-water
    /// mark, never to recover it.
    pub(crate) fn max_id(&self) -> u32 {
        self.iter().map(|(_, d)| d.id()).max().unwrap_or(0)
    }

    /// Sorted distinct group IDs among live descriptors.
    pub(crate) fn group_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.iter().filter_map(|(_, d)| d.group_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Encode one slot into its on-disk form; free slots encode as zeros.
    pub(crate) fn encode_slot(&self, index: usize) -> [u8; DESCRIPTOR_LEN] {
        match self.slots[index] {
            Some(ref d) => d.encode(),
            None => [0u8; DESCRIPTOR_LEN],
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.slots.len() * DESCRIPTOR_LEN);
        for i in 0..self.slots.len() {
            buf.extend_from_slice(&self.encode_slot(i));
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DataType, EXTRA_LEN};

    fn descriptor(id: u32, group_id: u32) -> Descriptor {
        Descriptor {
            data_type: DataType::Generic,
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
    fn allocate_lowest_free_slot() {
        let mut t = DescriptorTable::new(3);
        assert_eq!(t.allocate().unwrap(), 0);
        t.insert(0, descriptor(1, 1));
        t.insert(1, descriptor(2, 1));
        assert_eq!(t.allocate().unwrap(), 2);
        t.free(0);
        assert_eq!(t.allocate().unwrap(), 0, "freed slots are reused, lowest first");
    }

    #[test]
    fn capacity_exceeded() {
        let mut t = DescriptorTable::new(1);
        t.insert(0, descriptor(1, 1));
        match t.allocate() {
            Err(Error::CapacityExceeded) => {}
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }
    }

    #[test]
    fn unique_lookup() {
        let mut t = DescriptorTable::new(3);
        t.insert(0, descriptor(1, 1));
        t.insert(1, descriptor(2, 1));
        let selector = Selector::any().with_id(2);
        let (_, d) = t.get_descriptor(&selector).unwrap();
        assert_eq!(d.id(), 2);
        match t.get_descriptor(&Selector::any().with_group_id(1)) {
            Err(Error::MultipleObjectsFound) => {}
            other => panic!("expected MultipleObjectsFound, got {:?}", other),
        }
        match t.get_descriptor(&Selector::any().with_id(9)) {
            Err(Error::ObjectNotFound) => {}
            other => panic!("expected ObjectNotFound, got {:?}", other),
        }
    }

    #[test]
    fn table_order_preserved() {
        let mut t = DescriptorTable::new(4);
        t.insert(0, descriptor(3, 1));
        t.insert(2, descriptor(1, 1));
        let ids: Vec<u32> = t
            .get_descriptors(&Selector::any())
            .unwrap()
            .iter()
            .map(|d| d.id())
            .collect();
        assert_eq!(ids, vec![3, 1], "results come back in table order, not ID order");
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut t = DescriptorTable::new(3);
        t.insert(0, descriptor(1, 1));
        t.insert(2, descriptor(2, 1));
        let buf = t.encode();
        let dec = DescriptorTable::decode(&buf, 3).expect("decoding should have worked");
        assert_eq!(dec.live_count(), 2);
        assert!(dec.get(1).is_none(), "free slot should stay free");
        assert_eq!(dec.get(2).unwrap().id(), 2);
    }

    #[test]
    fn group_ids_sorted_distinct() {
        let mut t = DescriptorTable::new(4);
        t.insert(0, descriptor(1, 2));
        t.insert(1, descriptor(2, 1));
        t.insert(2, descriptor(3, 2));
        t.insert(3, descriptor(4, 0));
        assert_eq!(t.group_ids(), vec![1, 2]);
    }
}
