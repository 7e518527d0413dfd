//! Super-sequence / column arena (C6): the union of every position that
//! ever existed in the ancestral sequence or any descendant's insertion,
//! stored as a flat, append-only arena linked by `next` indices instead of
//! `std::list` nodes. Column identity (its arena index) never changes once
//! assigned, even as positions are spliced in between existing ones —
//! that's what lets every node's [`crate::sequence_view`] keep referring to
//! the same handle across the whole simulation.
//!
//! Ported from `original_source/src/SuperSequence.h`.

use crate::error::CapacityError;

const INVALID: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Column {
    /// The coordinate this column was created at (in whichever sequence
    /// introduced it); kept only for debugging/printing, not used for
    /// ordering — `next` is the sole source of order.
    position: u64,
    absolute_position: Option<u64>,
    is_observed: bool,
    next: usize,
}

/// A stable handle into the super-sequence's column arena.
pub type ColumnHandle = usize;

#[derive(Debug)]
pub struct SuperSequence {
    columns: Vec<Column>,
    head: usize,
    /// Handle for each of the root's original 1-indexed positions.
    position_to_handle: Vec<ColumnHandle>,
    next_site_counter: u64,
    msa_length: u64,
    capacity: usize,
}

impl SuperSequence {
    pub fn new(sequence_size: u64, capacity: usize) -> Result<Self, CapacityError> {
        let mut columns = Vec::with_capacity(capacity);
        let mut position_to_handle = vec![INVALID; (sequence_size + 1) as usize];
        if sequence_size as usize > capacity {
            return Err(CapacityError::ColumnArenaFull { capacity });
        }
        for i in 1..=sequence_size {
            let next = if i == sequence_size { INVALID } else { columns.len() + 1 };
            columns.push(Column { position: i, absolute_position: None, is_observed: false, next });
            position_to_handle[i as usize] = columns.len() - 1;
        }
        let head = if sequence_size == 0 { INVALID } else { 0 };
        Ok(Self { columns, head, position_to_handle, next_site_counter: sequence_size + 1, msa_length: 0, capacity })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn msa_length(&self) -> u64 {
        self.msa_length
    }

    pub fn handle_for_position(&self, position: u64) -> ColumnHandle {
        self.position_to_handle[position as usize]
    }

    /// Mark a column as present in the final alignment (it survived in at
    /// least one leaf). Idempotent.
    pub fn reference_position(&mut self, handle: ColumnHandle) {
        if !self.columns[handle].is_observed {
            self.columns[handle].is_observed = true;
            self.msa_length += 1;
        }
    }

    pub fn is_observed(&self, handle: ColumnHandle) -> bool {
        self.columns[handle].is_observed
    }

    /// Splice a freshly inserted column immediately after `after`,
    /// returning its stable handle.
    pub fn insert_after(&mut self, after: ColumnHandle, item_position: u64, is_to_save: bool) -> Result<ColumnHandle, CapacityError> {
        if self.columns.len() >= self.capacity {
            return Err(CapacityError::ColumnArenaFull { capacity: self.capacity });
        }
        if self.capacity > 0 && self.columns.len() + 1 >= self.capacity * 9 / 10 {
            log::warn!("super-sequence column arena at {}/{} slots", self.columns.len() + 1, self.capacity);
        }
        let next = self.columns[after].next;
        let handle = self.columns.len();
        self.columns.push(Column { position: item_position, absolute_position: None, is_observed: is_to_save, next });
        self.columns[after].next = handle;
        if is_to_save {
            self.msa_length += 1;
        }
        Ok(handle)
    }

    /// Next available "random" sequence position, used to tag columns
    /// created by insertions that haven't been assigned a root-relative
    /// coordinate (there isn't one — they didn't exist in the root).
    pub fn next_sequence_position(&mut self) -> u64 {
        let position = self.next_site_counter;
        self.next_site_counter += 1;
        position
    }

    /// Assign a dense, left-to-right `absolute_position` to every observed
    /// column; unobserved columns keep `None`. Must run once, after every
    /// branch has been simulated and every surviving position has been
    /// marked with [`Self::reference_position`].
    pub fn compact_observed_positions(&mut self) {
        let mut i = self.head;
        let mut next_absolute = 0u64;
        while i != INVALID {
            if self.columns[i].is_observed {
                self.columns[i].absolute_position = Some(next_absolute);
                next_absolute += 1;
            }
            i = self.columns[i].next;
        }
    }

    pub fn absolute_position(&self, handle: ColumnHandle) -> Option<u64> {
        self.columns[handle].absolute_position
    }

    /// Iterate column handles in super-sequence order (not simulation/
    /// creation order).
    pub fn iter_handles(&self) -> impl Iterator<Item = ColumnHandle> + '_ {
        let mut current = self.head;
        std::iter::from_fn(move || {
            if current == INVALID {
                return None;
            }
            let handle = current;
            current = self.columns[current].next;
            Some(handle)
        })
    }

    #[cfg(test)]
    fn debug_positions(&self) -> Vec<u64> {
        self.iter_handles().map(|h| self.columns[h].position).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_columns_are_in_order() {
        let seq = SuperSequence::new(5, 64).unwrap();
        assert_eq!(seq.debug_positions(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn insertion_preserves_order_and_identity() {
        let mut seq = SuperSequence::new(3, 64).unwrap();
        let h2 = seq.handle_for_position(2);
        let new_handle = seq.insert_after(h2, seq.next_sequence_position(), true).unwrap();
        assert_eq!(seq.debug_positions(), vec![1, 2, 4, 3]);
        assert!(seq.is_observed(new_handle));
        // h2's identity (its handle) never moves even though new entries
        // are spliced around it.
        assert_eq!(seq.handle_for_position(2), h2);
    }

    #[test]
    fn compaction_only_numbers_observed_columns() {
        let mut seq = SuperSequence::new(3, 64).unwrap();
        seq.reference_position(seq.handle_for_position(1));
        seq.reference_position(seq.handle_for_position(3));
        seq.compact_observed_positions();
        assert_eq!(seq.absolute_position(seq.handle_for_position(1)), Some(0));
        assert_eq!(seq.absolute_position(seq.handle_for_position(2)), None);
        assert_eq!(seq.absolute_position(seq.handle_for_position(3)), Some(1));
        assert_eq!(seq.msa_length(), 2);
    }

    #[test]
    fn capacity_exhaustion_is_reported() {
        let mut seq = SuperSequence::new(1, 1).unwrap();
        let h = seq.handle_for_position(1);
        assert_eq!(seq.insert_after(h, 2, false), Err(CapacityError::ColumnArenaFull { capacity: 1 }));
    }
}
