//! Sequence view (C7): a node's actual sequence, expressed as an ordered
//! list of handles into the shared [`SuperSequence`] column arena rather
//! than as owned characters. Built by replaying a node's block list
//! against its parent's view: original-sequence runs reuse the parent's
//! column handles directly, insertion runs mint brand new columns.

use crate::block_tree::BlockList;
use crate::error::CapacityError;
use crate::supersequence::{ColumnHandle, SuperSequence};

#[derive(Debug, Clone, Default)]
pub struct SequenceView {
    columns: Vec<ColumnHandle>,
}

impl SequenceView {
    /// The root's view: every original position, in order, with no
    /// replaying needed since the root has no parent.
    pub fn root(super_sequence: &SuperSequence, sequence_size: u64) -> Self {
        let columns = (1..=sequence_size).map(|p| super_sequence.handle_for_position(p)).collect();
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnHandle] {
        &self.columns
    }

    /// Replay `blocklist` (this node's own block tree contents, built by
    /// applying this node's events to a tree seeded with the parent's
    /// sequence length) against `parent`'s view, minting new super-sequence
    /// columns for every inserted position.
    pub fn from_blocklist(
        parent: &SequenceView,
        blocklist: &BlockList,
        super_sequence: &mut SuperSequence,
    ) -> Result<Self, CapacityError> {
        let mut columns = Vec::new();
        let mut last_handle: Option<ColumnHandle> = None;

        for &(key, length, insertion) in blocklist {
            for offset in 0..length {
                let handle = parent.columns[(key + offset) as usize];
                columns.push(handle);
                last_handle = Some(handle);
            }
            for _ in 0..insertion {
                let position = super_sequence.next_sequence_position();
                let handle = match last_handle {
                    Some(after) => super_sequence.insert_after(after, position, false)?,
                    None => {
                        // An insertion before any original position exists
                        // (key == 0, no preceding original run): anchor off
                        // the parent's first column so ordering is still
                        // well-defined relative to the rest of the sequence.
                        let anchor = parent.columns.first().copied().expect("parent view is non-empty");
                        super_sequence.insert_after(anchor, position, false)?
                    }
                };
                columns.push(handle);
                last_handle = Some(handle);
            }
        }

        Ok(Self { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_view_matches_sequence_size() {
        let seq = SuperSequence::new(5, 64).unwrap();
        let view = SequenceView::root(&seq, 5);
        assert_eq!(view.len(), 5);
    }

    #[test]
    fn replaying_a_pure_passthrough_blocklist_keeps_the_same_handles() {
        let seq = SuperSequence::new(4, 64).unwrap();
        let mut ss = seq;
        let root = SequenceView::root(&ss, 4);
        let blocklist = vec![(0, 4, 0)];
        let child = SequenceView::from_blocklist(&root, &blocklist, &mut ss).unwrap();
        assert_eq!(child.columns(), root.columns());
    }

    #[test]
    fn replaying_an_insertion_mints_new_columns() {
        let mut ss = SuperSequence::new(3, 64).unwrap();
        let root = SequenceView::root(&ss, 3);
        // one original position, then a 2-long insertion run
        let blocklist = vec![(0, 3, 2)];
        let child = SequenceView::from_blocklist(&root, &blocklist, &mut ss).unwrap();
        assert_eq!(child.len(), 5);
        assert!(!root.columns().contains(&child.columns()[4]));
    }
}
