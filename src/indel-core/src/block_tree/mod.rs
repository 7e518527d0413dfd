//! Arena-indexed AVL tree keyed by parent-sequence coordinate, tracking
//! blocks of `(length, insertion)` and augmented with a subtree-length
//! cache so a position in the *current* sequence resolves to its owning
//! block in `O(log n)`.
//!
//! Ported from `avl_array_with_rates` (a Sailfish-project fork of Marco
//! Paland's `avl_array`): parallel arrays instead of a node struct, an
//! `INVALID` sentinel instead of null pointers, and a `subtree_length`
//! augmentation alongside the usual AVL balance factor. Positional lookup
//! (`locate`) and in-order successor/predecessor (`next_block`/
//! `previous_block`) are reimplemented here as the textbook order-statistic
//! tree walk rather than ported verbatim, since the reference's own
//! comments flag its `get_block_index` as buggy on the left-subtree branch.

mod block;

pub use block::Block;

use rand::Rng;

use crate::error::{CapacityError, Error, InvariantViolation, RangeError};
use crate::event::{Event, EventKind};
use crate::sampler::CategoryPathSampler;

const INVALID: usize = usize::MAX;

/// `(key, length, insertion)` triples in key order — the public, tree-free
/// view of a tree's contents, consumed by the sequence view (C7).
pub type BlockList = Vec<(u64, u64, u64)>;

#[derive(Debug)]
pub struct BlockTree {
    key: Vec<u64>,
    value: Vec<Block>,
    subtree_length: Vec<i64>,
    balance: Vec<i8>,
    left: Vec<usize>,
    right: Vec<usize>,
    parent: Vec<usize>,
    root: usize,
    capacity: usize,
    /// The owning node's parent's flat per-position rate-category array,
    /// set by [`Self::init_with_rates`] and read by
    /// [`Self::split_block_with_categories`] to look up the categories
    /// flanking a split point. `key` is always a coordinate in this array,
    /// by construction (a block's key never changes meaning once created).
    parent_rates: Option<Vec<usize>>,
}

impl BlockTree {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            key: Vec::with_capacity(capacity),
            value: Vec::with_capacity(capacity),
            subtree_length: Vec::with_capacity(capacity),
            balance: Vec::with_capacity(capacity),
            left: Vec::with_capacity(capacity),
            right: Vec::with_capacity(capacity),
            parent: Vec::with_capacity(capacity),
            root: INVALID,
            capacity,
            parent_rates: None,
        }
    }

    /// Reset to an empty tree and seed it with a single anchor block
    /// spanning `[0, sequence_length)`.
    pub fn init(&mut self, sequence_length: u64) -> Result<(), CapacityError> {
        self.init_with_rates(sequence_length, None)
    }

    /// Like [`Self::init`], additionally seeding the parent's flat
    /// per-position rate-category array (C4 operation 1's `parent_rates?`),
    /// consulted by [`Self::split_block_with_categories`] for the whole
    /// branch this tree is about to simulate.
    pub fn init_with_rates(&mut self, sequence_length: u64, parent_rates: Option<Vec<usize>>) -> Result<(), CapacityError> {
        self.key.clear();
        self.value.clear();
        self.subtree_length.clear();
        self.balance.clear();
        self.left.clear();
        self.right.clear();
        self.parent.clear();
        self.root = INVALID;
        self.parent_rates = parent_rates;
        self.insert(0, Block::new(sequence_length, 0), sequence_length as i64)
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub fn total_length(&self) -> u64 {
        if self.root == INVALID {
            0
        } else {
            self.subtree_length[self.root].max(0) as u64
        }
    }

    fn node_own_length(&self, node: usize) -> u64 {
        self.value[node].total_length()
    }

    /// Insert a new key, or overwrite the value at an existing key.
    /// `added_length` is added to every subtree-length cache on the path
    /// from the root to the (possibly new) node.
    pub fn insert(&mut self, key: u64, value: Block, added_length: i64) -> Result<(), CapacityError> {
        if self.root == INVALID {
            self.push_node(key, value, added_length, INVALID)?;
            self.root = self.key.len() - 1;
            return Ok(());
        }

        let mut i = self.root;
        loop {
            self.subtree_length[i] += added_length;
            if key < self.key[i] {
                if self.left[i] == INVALID {
                    let new_idx = self.push_node(key, value, added_length, i)?;
                    self.left[i] = new_idx;
                    self.insert_balance(i, 1);
                    return Ok(());
                }
                i = self.left[i];
            } else if key == self.key[i] {
                self.value[i] = value;
                return Ok(());
            } else {
                if self.right[i] == INVALID {
                    let new_idx = self.push_node(key, value, added_length, i)?;
                    self.right[i] = new_idx;
                    self.insert_balance(i, -1);
                    return Ok(());
                }
                i = self.right[i];
            }
        }
    }

    fn push_node(&mut self, key: u64, value: Block, length: i64, parent: usize) -> Result<usize, CapacityError> {
        if self.key.len() >= self.capacity {
            return Err(CapacityError::ArenaFull { capacity: self.capacity });
        }
        if self.capacity > 0 && self.key.len() + 1 >= self.capacity * 9 / 10 {
            log::warn!("block tree arena at {}/{} slots", self.key.len() + 1, self.capacity);
        }
        self.key.push(key);
        self.value.push(value);
        self.subtree_length.push(length);
        self.balance.push(0);
        self.left.push(INVALID);
        self.right.push(INVALID);
        self.parent.push(parent);
        Ok(self.key.len() - 1)
    }

    /// Resolve a position in the tree's current coordinate space to the
    /// block that owns it, and the position's offset within that block.
    pub fn locate(&self, position: u64) -> Result<(usize, u64), RangeError> {
        if self.root == INVALID || position >= self.total_length() {
            return Err(RangeError::PositionOutOfRange { position, length: self.total_length() });
        }
        let mut i = self.root;
        let mut pos = position;
        loop {
            let left = self.left[i];
            let left_len = if left == INVALID { 0 } else { self.subtree_length[left].max(0) as u64 };
            if pos < left_len {
                i = left;
                continue;
            }
            pos -= left_len;
            let node_len = self.node_own_length(i);
            if pos < node_len {
                return Ok((i, pos));
            }
            pos -= node_len;
            i = self.right[i];
        }
    }

    /// Resolve the rightmost block and the offset one past its last
    /// position — where an insertion event at `position == total_length`
    /// (append-at-tail, spec.md §8 "Insertion at position = current length
    /// appends to the tail") lands.
    fn locate_last(&self) -> Option<(usize, u64)> {
        if self.root == INVALID {
            return None;
        }
        let mut i = self.root;
        while self.right[i] != INVALID {
            i = self.right[i];
        }
        Some((i, self.node_own_length(i)))
    }

    /// Dispatch a single [`Event`] (C4 operation 7): locate the block it
    /// falls in and hand off to [`Self::split_block`] or
    /// [`Self::remove_block`]. Insertion positions are 0-based prefix
    /// counts in `[0, total_length]` (`total_length` itself means "append
    /// at the tail"); deletion positions are 1-based, matching the
    /// conventions the indel simulator (C5) produces them in.
    pub fn handle_event(&mut self, event: &Event) -> Result<(), Error> {
        match event.kind {
            EventKind::Insertion => {
                let total = self.total_length();
                let (node, offset) = if event.position >= total {
                    self.locate_last().ok_or(RangeError::PositionOutOfRange { position: event.position, length: total })?
                } else {
                    self.locate(event.position)?
                };
                self.split_block(node, offset, event.length)?;
            }
            EventKind::Deletion => {
                let (node, offset) = self.locate(event.position - 1)?;
                self.remove_block(node, offset, event.length)?;
            }
        }
        Ok(())
    }

    /// Like [`Self::handle_event`], but for insertions draws and stores the
    /// new positions' rate categories via `sampler`, bridged against
    /// `parent_rates` (see [`Self::init_with_rates`]) or the block's own
    /// existing insertion categories. Deletion rate-category trimming (§4.4
    /// operation 6's bookkeeping clause) happens unconditionally inside
    /// [`Self::remove_block`], so deletions dispatch the same either way.
    pub fn handle_event_with_categories<R: Rng>(
        &mut self,
        event: &Event,
        sampler: &CategoryPathSampler,
        rng: &mut R,
    ) -> Result<(), Error> {
        match event.kind {
            EventKind::Insertion => {
                let total = self.total_length();
                let (node, offset) = if event.position >= total {
                    self.locate_last().ok_or(RangeError::PositionOutOfRange { position: event.position, length: total })?
                } else {
                    self.locate(event.position)?
                };
                self.split_block_with_categories(node, offset, event.length, sampler, rng)?;
            }
            EventKind::Deletion => {
                let (node, offset) = self.locate(event.position - 1)?;
                self.remove_block(node, offset, event.length)?;
            }
        }
        Ok(())
    }

    pub fn key_of(&self, node: usize) -> u64 {
        self.key[node]
    }

    pub fn block_of(&self, node: usize) -> &Block {
        &self.value[node]
    }

    pub fn block_of_mut(&mut self, node: usize) -> &mut Block {
        &mut self.value[node]
    }

    pub fn find(&self, key: u64) -> Option<usize> {
        let mut i = self.root;
        while i != INVALID {
            if key < self.key[i] {
                i = self.left[i];
            } else if key == self.key[i] {
                return Some(i);
            } else {
                i = self.right[i];
            }
        }
        None
    }

    pub fn next_block(&self, node: usize) -> Option<usize> {
        let mut i = node;
        if self.right[i] != INVALID {
            i = self.right[i];
            while self.left[i] != INVALID {
                i = self.left[i];
            }
            return Some(i);
        }
        let mut child = node;
        let mut parent = self.parent[node];
        while parent != INVALID && self.right[parent] == child {
            child = parent;
            parent = self.parent[parent];
        }
        (parent != INVALID).then_some(parent)
    }

    pub fn previous_block(&self, node: usize) -> Option<usize> {
        let mut i = node;
        if self.left[i] != INVALID {
            i = self.left[i];
            while self.right[i] != INVALID {
                i = self.right[i];
            }
            return Some(i);
        }
        let mut child = node;
        let mut parent = self.parent[node];
        while parent != INVALID && self.left[parent] == child {
            child = parent;
            parent = self.parent[parent];
        }
        (parent != INVALID).then_some(parent)
    }

    /// All blocks in key order.
    pub fn blocklist(&self) -> BlockList {
        let mut out = Vec::with_capacity(self.len());
        if self.root == INVALID {
            return out;
        }
        let mut i = self.root;
        while self.left[i] != INVALID {
            i = self.left[i];
        }
        loop {
            out.push((self.key[i], self.value[i].length, self.value[i].insertion));
            match self.next_block(i) {
                Some(next) => i = next,
                None => break,
            }
        }
        out
    }

    /// Like [`Self::blocklist`], yielding each block's full contents
    /// (including any tracked rate categories) instead of just the bare
    /// `(key, length, insertion)` triple, for reconstructing a node's flat
    /// per-position category array.
    pub fn blocklist_with_blocks(&self) -> Vec<(u64, Block)> {
        let mut out = Vec::with_capacity(self.len());
        if self.root == INVALID {
            return out;
        }
        let mut i = self.root;
        while self.left[i] != INVALID {
            i = self.left[i];
        }
        loop {
            out.push((self.key[i], self.value[i].clone()));
            match self.next_block(i) {
                Some(next) => i = next,
                None => break,
            }
        }
        out
    }

    /// Split the block at `node` to carve out room for an insertion of
    /// `event_size` positions at offset `pos` (relative to the block).
    pub fn split_block(&mut self, node: usize, pos: u64, event_size: u64) -> Result<(), CapacityError> {
        let block = self.value[node].clone();
        let key = self.key[node];
        let original_size = block.total_length() as i64;
        let pos = pos + 1;

        if pos >= block.length {
            let mut updated = block;
            updated.insertion += event_size;
            let new_size = updated.total_length() as i64;
            self.insert(key, updated, new_size - original_size)
        } else {
            let potential = Block { length: block.length - pos, insertion: block.insertion, rate_categories: None };
            let updated = Block { length: pos, insertion: event_size, rate_categories: None };
            let new_size = updated.total_length() as i64;
            let potential_size = potential.total_length() as i64;
            self.insert(key, updated, new_size - original_size)?;
            self.insert(key + pos, potential, potential_size)
        }
    }

    /// Like [`Self::split_block`], additionally drawing the new positions'
    /// rate categories: a left-bridge within an already-inserted run, or a
    /// bridge between the two `parent_rates` flanks when the event falls in
    /// the inherited part (C4 operation 5's rate-category clause).
    pub fn split_block_with_categories<R: Rng>(
        &mut self,
        node: usize,
        pos: u64,
        event_size: u64,
        sampler: &CategoryPathSampler,
        rng: &mut R,
    ) -> Result<(), CapacityError> {
        let block = self.value[node].clone();
        let key = self.key[node];
        let original_size = block.total_length() as i64;
        let pos = pos + 1;

        if pos >= block.length {
            let mut updated = block;
            let insert_offset = (pos - updated.length) as usize;
            updated.handle_insertion(insert_offset, event_size, sampler, rng);
            updated.insertion += event_size;
            let new_size = updated.total_length() as i64;
            self.insert(key, updated, new_size - original_size)
        } else {
            let parent_rates = self.parent_rates.as_ref().expect("category-aware split requires init_with_rates");
            let left_flank = parent_rates[(key + pos - 1) as usize];
            let right_flank = parent_rates[(key + pos) as usize];
            let drawn = sampler.bridge(left_flank, right_flank, event_size, rng);
            let mut rates = vec![usize::MAX];
            rates.extend(drawn);

            let updated = Block { length: pos, insertion: event_size, rate_categories: Some(rates) };
            let potential = Block { length: block.length - pos, insertion: block.insertion, rate_categories: block.rate_categories.clone() };
            let new_size = updated.total_length() as i64;
            let potential_size = potential.total_length() as i64;
            self.insert(key, updated, new_size - original_size)?;
            self.insert(key + pos, potential, potential_size)
        }
    }

    // Six deletion sub-cases, lettered to match the reference implementation.
    // `length`/`insertion` are the affected block's fields *before* removal.

    /// Deletion covers a prefix of the original part, stopping inside it.
    ///  xxxxxxxxxxx
    /// [------OP------|---AP---]
    fn remove_case_a(&mut self, node: usize, event_size: u64, block: &Block) -> Result<(), CapacityError> {
        let (length, insertion) = (block.length, block.insertion);
        let event_key = self.key[node];
        let new_block = Block { length: length - event_size, insertion, rate_categories: block.rate_categories.clone() };
        if event_key == 0 {
            self.insert(0, Block::new(1, 0), 1 - (length + insertion) as i64)?;
        } else {
            self.erase(event_key, (length + insertion) as i64);
        }
        self.insert(event_key + event_size, new_block, (length + insertion) as i64 - event_size as i64)
    }

    /// Deletion covers the block exactly.
    ///  xxxxxxxxxxxxxx xxxxxxxx
    /// [------OP------|---AP---]
    fn remove_case_b(&mut self, node: usize, block: &Block) -> Result<(), CapacityError> {
        let event_key = self.key[node];
        if event_key == 0 {
            self.insert(0, Block::new(1, 0), 1 - block.total_length() as i64)
        } else {
            self.erase(event_key, block.total_length() as i64);
            Ok(())
        }
    }

    /// Deletion covers the whole original part plus part of the insertion.
    ///  xxxxxxxxxxxxxx xxxx
    /// [------OP------|---AP---]
    fn remove_case_c(&mut self, node: usize, event_size: u64, block: &Block) -> Result<(), CapacityError> {
        let (length, insertion) = (block.length, block.insertion);
        let event_key = self.key[node];
        let insertion_leftover = (length + insertion) - event_size;
        let removed_from_insertion = insertion - insertion_leftover;
        let leftover_rates = |rates: &[usize]| rates[1 + removed_from_insertion as usize..].to_vec();

        if event_key == 0 {
            let mut first_block = Block::new(1, insertion_leftover);
            if let Some(rates) = &block.rate_categories {
                let mut new_rates = vec![usize::MAX];
                new_rates.extend(leftover_rates(rates));
                first_block.rate_categories = Some(new_rates);
            }
            let diff = first_block.total_length() as i64 - (length + insertion) as i64;
            self.insert(0, first_block, diff)
        } else {
            let previous = self.previous_block(node).expect("non-anchor block always has a predecessor");
            let previous_key = self.key[previous];
            let previous_block = self.value[previous].clone();
            let mut updated = Block {
                length: previous_block.length,
                insertion: previous_block.insertion + insertion_leftover,
                rate_categories: previous_block.rate_categories.clone(),
            };
            if insertion_leftover > 0 {
                if let Some(rates) = &block.rate_categories {
                    updated.rate_categories.get_or_insert_with(|| vec![usize::MAX]).extend(leftover_rates(rates));
                }
            }
            self.erase(event_key, (length + insertion) as i64);
            self.insert(previous_key, updated, insertion_leftover as i64)
        }
    }

    /// Deletion is entirely interior to the original part.
    ///     xxxxxxxx
    /// [------OP------|---AP---]
    fn remove_case_d(&mut self, node: usize, position: u64, event_size: u64, block: &Block) -> Result<(), CapacityError> {
        let (length, insertion) = (block.length, block.insertion);
        let event_key = self.key[node];
        let first_block = Block::new(position, 0);
        let diff = first_block.total_length() as i64 - (length + insertion) as i64;
        self.insert(event_key, first_block, diff)?;
        let new_block = Block { length: length - (position + event_size), insertion, rate_categories: block.rate_categories.clone() };
        let new_size = new_block.total_length() as i64;
        self.insert(event_key + position + event_size, new_block, new_size)
    }

    /// Deletion ends exactly at the original/insertion boundary.
    ///        xxxxxxxx
    /// [------OP------|---AP---]
    fn remove_case_e(&mut self, node: usize, position: u64, block: &Block) -> Result<(), CapacityError> {
        let (length, insertion) = (block.length, block.insertion);
        let event_key = self.key[node];
        let first_block = Block { length: position, insertion, rate_categories: block.rate_categories.clone() };
        let diff = first_block.total_length() as i64 - (length + insertion) as i64;
        self.insert(event_key, first_block, diff)
    }

    /// Deletion starts in the original part and consumes part of the
    /// insertion.
    ///            xxxx xxxx
    /// [------OP------|---AP---]
    fn remove_case_f(&mut self, node: usize, position: u64, event_size: u64, block: &Block) -> Result<(), CapacityError> {
        let (length, insertion) = (block.length, block.insertion);
        let event_key = self.key[node];
        let position = position.min(length);
        let removed_from_insertion = event_size - (length - position);
        let mut first_block = Block::new(position, (length + insertion) - (position + event_size));
        if let Some(rates) = &block.rate_categories {
            let mut new_rates = vec![usize::MAX];
            new_rates.extend(rates[1 + removed_from_insertion as usize..].iter().copied());
            first_block.rate_categories = Some(new_rates);
        }
        let diff = first_block.total_length() as i64 - (length + insertion) as i64;
        self.insert(event_key, first_block, diff)
    }

    /// Apply a deletion of `event_size` positions starting at block-relative
    /// `position`, recursing into the next block if the deletion spans past
    /// this one.
    pub fn remove_block(&mut self, node: usize, position: u64, event_size: u64) -> Result<(), CapacityError> {
        let block = self.value[node].clone();
        let length = block.length;
        let insertion = block.insertion;
        let original_size = length + insertion;

        if position + event_size <= original_size {
            if position == 0 {
                if event_size == original_size {
                    self.remove_case_b(node, &block)
                } else if event_size < length {
                    self.remove_case_a(node, event_size, &block)
                } else {
                    self.remove_case_c(node, event_size, &block)
                }
            } else if position + event_size < length {
                self.remove_case_d(node, position, event_size, &block)
            } else if position + event_size == length {
                self.remove_case_e(node, position, &block)
            } else {
                self.remove_case_f(node, position, event_size, &block)
            }
        } else {
            let next = self.next_block(node);
            let consumed_here = original_size - position;
            self.remove_block(node, position, consumed_here)?;
            if let Some(next_node) = next {
                self.remove_block(next_node, 0, event_size - consumed_here)?;
            }
            Ok(())
        }
    }

    /// Remove the node at `key`, propagating `added_length` (always
    /// negative, the size of the removed block) up the path to the root.
    /// No-op if `key` doesn't exist.
    pub fn erase(&mut self, key: u64, added_length: i64) -> bool {
        let Some(node) = self.find(key) else { return false };
        self.erase_node(node, added_length)
    }

    fn erase_node(&mut self, node: usize, added_length: i64) -> bool {
        let left = self.left[node];
        let right = self.right[node];

        self.subtree_length[node] -= added_length;
        let mut predecessor = self.parent[node];
        while predecessor != INVALID {
            self.subtree_length[predecessor] -= added_length;
            predecessor = self.parent[predecessor];
        }

        if left == INVALID && right == INVALID {
            let parent = self.parent[node];
            if parent != INVALID {
                if self.left[parent] == node {
                    self.left[parent] = INVALID;
                    self.delete_balance(parent, -1);
                } else {
                    self.right[parent] = INVALID;
                    self.delete_balance(parent, 1);
                }
            } else {
                self.root = INVALID;
            }
        } else if left == INVALID {
            let parent = self.parent[node];
            if parent != INVALID {
                if self.left[parent] == node { self.left[parent] = right } else { self.right[parent] = right }
            } else {
                self.root = right;
            }
            self.parent[right] = parent;
            self.delete_balance(right, 0);
        } else if right == INVALID {
            let parent = self.parent[node];
            if parent != INVALID {
                if self.left[parent] == node { self.left[parent] = left } else { self.right[parent] = left }
            } else {
                self.root = left;
            }
            self.parent[left] = parent;
            self.delete_balance(left, 0);
        } else {
            let mut successor = right;
            if self.left[successor] == INVALID {
                let parent = self.parent[node];
                self.left[successor] = left;
                self.balance[successor] = self.balance[node];
                self.subtree_length[successor] = self.subtree_length[node];
                self.parent[successor] = parent;
                self.parent[left] = successor;
                if node == self.root { self.root = successor } else if self.left[parent] == node { self.left[parent] = successor } else { self.right[parent] = successor }
                self.delete_balance(successor, 1);
            } else {
                while self.left[successor] != INVALID {
                    successor = self.left[successor];
                }
                let successor_only = self.node_own_length(successor) as i64;
                let mut walk = self.parent[successor];
                while walk != node {
                    self.subtree_length[walk] -= successor_only;
                    walk = self.parent[walk];
                }

                let parent = self.parent[node];
                let successor_parent = self.parent[successor];
                let successor_right = self.right[successor];

                if self.left[successor_parent] == successor { self.left[successor_parent] = successor_right } else { self.right[successor_parent] = successor_right }
                self.parent[successor_right] = successor_parent;
                self.parent[successor] = parent;
                self.parent[right] = successor;
                self.parent[left] = successor;
                self.left[successor] = left;
                self.right[successor] = right;
                self.balance[successor] = self.balance[node];
                let right_len = self.subtree_length[right];
                let left_len = self.subtree_length[left];
                self.subtree_length[successor] = right_len + left_len + successor_only;

                if node == self.root { self.root = successor } else if self.left[parent] == node { self.left[parent] = successor } else { self.right[parent] = successor }
                self.delete_balance(successor_parent, -1);
            }
        }

        let last = self.key.len() - 1;
        if node != last {
            self.relocate_last_node_to(node, last);
        }
        self.key.pop();
        self.value.pop();
        self.subtree_length.pop();
        self.balance.pop();
        self.left.pop();
        self.right.pop();
        self.parent.pop();
        true
    }

    /// Array-backed removal leaves a hole at `node`; move the node
    /// currently stored at the last slot into that hole and fix up every
    /// reference to it.
    fn relocate_last_node_to(&mut self, node: usize, last: usize) {
        let parent = if self.root == last {
            self.root = node;
            INVALID
        } else {
            let p = self.parent[last];
            if self.left[p] == last { self.left[p] = node } else { self.right[p] = node }
            p
        };
        if self.left[last] != INVALID {
            self.parent[self.left[last]] = node;
        }
        if self.right[last] != INVALID {
            self.parent[self.right[last]] = node;
        }
        self.key[node] = self.key[last];
        self.value[node] = self.value[last].clone();
        self.balance[node] = self.balance[last];
        self.left[node] = self.left[last];
        self.right[node] = self.right[last];
        self.subtree_length[node] = self.subtree_length[last];
        self.parent[node] = parent;
    }

    fn insert_balance(&mut self, mut node: usize, mut balance: i8) {
        while node != INVALID {
            self.balance[node] += balance;
            let current = self.balance[node];
            if current == 0 {
                return;
            } else if current == 2 {
                if self.balance[self.left[node]] == 1 {
                    self.rotate_right(node);
                } else {
                    self.rotate_left_right(node);
                }
                return;
            } else if current == -2 {
                if self.balance[self.right[node]] == -1 {
                    self.rotate_left(node);
                } else {
                    self.rotate_right_left(node);
                }
                return;
            }
            let parent = self.parent[node];
            if parent != INVALID {
                balance = if self.left[parent] == node { 1 } else { -1 };
            }
            node = parent;
        }
    }

    fn delete_balance(&mut self, mut node: usize, mut balance: i8) {
        while node != INVALID {
            self.balance[node] += balance;
            let current = self.balance[node];
            if current == -2 {
                if self.balance[self.right[node]] <= 0 {
                    node = self.rotate_left(node);
                    if self.balance[node] == 1 {
                        return;
                    }
                } else {
                    node = self.rotate_right_left(node);
                }
            } else if current == 2 {
                if self.balance[self.left[node]] >= 0 {
                    node = self.rotate_right(node);
                    if self.balance[node] == -1 {
                        return;
                    }
                } else {
                    node = self.rotate_left_right(node);
                }
            } else if current != 0 {
                return;
            }

            if node != INVALID {
                let parent = self.parent[node];
                if parent != INVALID {
                    balance = if self.left[parent] == node { -1 } else { 1 };
                }
                node = parent;
            }
        }
    }

    fn subtree_len_or_zero(&self, node: usize) -> i64 {
        if node == INVALID { 0 } else { self.subtree_length[node] }
    }

    fn rotate_left(&mut self, node: usize) -> usize {
        let right = self.right[node];
        let right_left = self.left[right];
        let parent = self.parent[node];

        let sum_left = self.subtree_len_or_zero(self.left[node]);
        let sum_right_left = self.subtree_len_or_zero(right_left);
        let sum_right_right = self.subtree_len_or_zero(self.right[right]);

        self.parent[right] = parent;
        self.parent[node] = right;
        if right_left != INVALID {
            self.parent[right_left] = node;
        }
        self.left[right] = node;
        self.right[node] = right_left;

        if node == self.root { self.root = right } else if self.right[parent] == node { self.right[parent] = right } else { self.left[parent] = right }

        self.balance[right] += 1;
        self.balance[node] = -self.balance[right];

        let node_only = self.node_own_length(node) as i64;
        let right_only = self.node_own_length(right) as i64;
        self.subtree_length[node] = sum_left + sum_right_left + node_only;
        self.subtree_length[right] = self.subtree_length[node] + sum_right_right + right_only;
        right
    }

    fn rotate_right(&mut self, node: usize) -> usize {
        let left = self.left[node];
        let left_right = self.right[left];
        let parent = self.parent[node];

        let sum_right = self.subtree_len_or_zero(self.right[node]);
        let sum_left_left = self.subtree_len_or_zero(self.left[left]);
        let sum_left_right = self.subtree_len_or_zero(left_right);

        self.parent[left] = parent;
        self.parent[node] = left;
        if left_right != INVALID {
            self.parent[left_right] = node;
        }
        self.right[left] = node;
        self.left[node] = left_right;

        if node == self.root { self.root = left } else if self.left[parent] == node { self.left[parent] = left } else { self.right[parent] = left }

        self.balance[left] -= 1;
        self.balance[node] = -self.balance[left];

        let node_only = self.node_own_length(node) as i64;
        let left_only = self.node_own_length(left) as i64;
        self.subtree_length[node] = sum_right + sum_left_right + node_only;
        self.subtree_length[left] = self.subtree_length[node] + sum_left_left + left_only;
        left
    }

    fn rotate_left_right(&mut self, node: usize) -> usize {
        let left = self.left[node];
        let left_right = self.right[left];
        let left_right_right = self.right[left_right];
        let left_right_left = self.left[left_right];
        let parent = self.parent[node];

        let sum_right = self.subtree_len_or_zero(self.right[node]);
        let sum_left_left = self.subtree_len_or_zero(self.left[left]);
        let sum_left_right_right = self.subtree_len_or_zero(left_right_right);
        let sum_left_right_left = self.subtree_len_or_zero(left_right_left);

        self.parent[left_right] = parent;
        self.parent[left] = left_right;
        self.parent[node] = left_right;
        if left_right_right != INVALID {
            self.parent[left_right_right] = node;
        }
        if left_right_left != INVALID {
            self.parent[left_right_left] = left;
        }
        self.left[node] = left_right_right;
        self.right[left] = left_right_left;
        self.left[left_right] = left;
        self.right[left_right] = node;

        if node == self.root { self.root = left_right } else if self.left[parent] == node { self.left[parent] = left_right } else { self.right[parent] = left_right }

        match self.balance[left_right] {
            0 => { self.balance[node] = 0; self.balance[left] = 0; }
            -1 => { self.balance[node] = 0; self.balance[left] = 1; }
            _ => { self.balance[node] = -1; self.balance[left] = 0; }
        }
        self.balance[left_right] = 0;

        let node_only = self.node_own_length(node) as i64;
        let left_only = self.node_own_length(left) as i64;
        let left_right_only = self.node_own_length(left_right) as i64;
        self.subtree_length[node] = sum_right + sum_left_right_right + node_only;
        self.subtree_length[left] = sum_left_right_left + sum_left_left + left_only;
        self.subtree_length[left_right] = self.subtree_length[node] + self.subtree_length[left] + left_right_only;
        left_right
    }

    fn rotate_right_left(&mut self, node: usize) -> usize {
        let right = self.right[node];
        let right_left = self.left[right];
        let right_left_left = self.left[right_left];
        let right_left_right = self.right[right_left];
        let parent = self.parent[node];

        let sum_left = self.subtree_len_or_zero(self.left[node]);
        let sum_right_right = self.subtree_len_or_zero(self.right[right]);
        let sum_right_left_left = self.subtree_len_or_zero(right_left_left);
        let sum_right_left_right = self.subtree_len_or_zero(right_left_right);

        self.parent[right_left] = parent;
        self.parent[right] = right_left;
        self.parent[node] = right_left;
        if right_left_left != INVALID {
            self.parent[right_left_left] = node;
        }
        if right_left_right != INVALID {
            self.parent[right_left_right] = right;
        }
        self.right[node] = right_left_left;
        self.left[right] = right_left_right;
        self.right[right_left] = right;
        self.left[right_left] = node;

        if node == self.root { self.root = right_left } else if self.right[parent] == node { self.right[parent] = right_left } else { self.left[parent] = right_left }

        match self.balance[right_left] {
            0 => { self.balance[node] = 0; self.balance[right] = 0; }
            1 => { self.balance[node] = 0; self.balance[right] = -1; }
            _ => { self.balance[node] = 1; self.balance[right] = 0; }
        }
        self.balance[right_left] = 0;

        let node_only = self.node_own_length(node) as i64;
        let right_only = self.node_own_length(right) as i64;
        let right_left_only = self.node_own_length(right_left) as i64;
        self.subtree_length[node] = sum_left + sum_right_left_left + node_only;
        self.subtree_length[right] = sum_right_left_right + sum_right_right + right_only;
        self.subtree_length[right_left] = self.subtree_length[node] + self.subtree_length[right] + right_left_only;
        right_left
    }

    /// Recompute every subtree-length and balance factor from scratch and
    /// compare against the cached values. Only ever called from tests and
    /// from `debug_assert!`-gated call sites.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.root == INVALID {
            return Ok(());
        }
        if let Some(anchor) = self.find(0) {
            if self.value[anchor].total_length() < 1 {
                return Err(InvariantViolation::AnchorBelowMinimum { length: self.value[anchor].total_length() });
            }
        }
        self.validate_node(self.root)?;
        Ok(())
    }

    fn validate_node(&self, node: usize) -> Result<i64, InvariantViolation> {
        let left = self.left[node];
        let right = self.right[node];
        let left_len = if left == INVALID { 0 } else { self.validate_node(left)? };
        let right_len = if right == INVALID { 0 } else { self.validate_node(right)? };
        let expected = left_len + right_len + self.node_own_length(node) as i64;
        if expected != self.subtree_length[node] {
            return Err(InvariantViolation::SubtreeLengthMismatch {
                key: self.key[node],
                cached: self.subtree_length[node] as u64,
                actual: expected as u64,
            });
        }
        let balance = self.balance[node];
        if !(-1..=1).contains(&balance) {
            return Err(InvariantViolation::BalanceOutOfRange { key: self.key[node], balance });
        }
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(test)] use pretty_assertions::assert_eq;

    #[test]
    fn init_seeds_single_anchor_block() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(10).unwrap();
        assert_eq!(tree.total_length(), 10);
        assert_eq!(tree.blocklist(), vec![(0, 10, 0)]);
        tree.validate().unwrap();
    }

    #[test]
    fn insertion_in_the_middle_splits_the_block() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(10).unwrap();
        let (node, relative) = tree.locate(4).unwrap();
        tree.split_block(node, relative, 3).unwrap();
        assert_eq!(tree.total_length(), 13);
        tree.validate().unwrap();
    }

    #[test]
    fn insertion_at_the_end_extends_last_block() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(5).unwrap();
        let (node, relative) = tree.locate(4).unwrap();
        tree.split_block(node, relative, 2).unwrap();
        assert_eq!(tree.total_length(), 7);
        let blocks = tree.blocklist();
        assert_eq!(blocks.last().unwrap().2, 2);
        tree.validate().unwrap();
    }

    #[test]
    fn non_spanning_deletion_shrinks_single_block() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(10).unwrap();
        let (node, relative) = tree.locate(2).unwrap();
        tree.remove_block(node, relative, 3).unwrap();
        assert_eq!(tree.total_length(), 7);
        tree.validate().unwrap();
    }

    #[test]
    fn full_prefix_deletion_leaves_stub_anchor() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(5).unwrap();
        let (node, relative) = tree.locate(0).unwrap();
        tree.remove_block(node, relative, 5).unwrap();
        assert_eq!(tree.total_length(), 1);
        let blocks = tree.blocklist();
        assert_eq!(blocks, vec![(0, 1, 0)]);
        tree.validate().unwrap();
    }

    #[test]
    fn insert_then_delete_spanning_original_and_insertion() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(6).unwrap();
        let (node, relative) = tree.locate(2).unwrap();
        tree.split_block(node, relative, 4).unwrap();
        assert_eq!(tree.total_length(), 10);
        let (node, relative) = tree.locate(2).unwrap();
        tree.remove_block(node, relative, 6).unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.total_length(), 4);
    }

    #[test]
    fn deletion_spanning_multiple_blocks_recurses() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(4).unwrap();
        let (node, relative) = tree.locate(1).unwrap();
        tree.split_block(node, relative, 2).unwrap();
        assert_eq!(tree.total_length(), 6);
        let (node, relative) = tree.locate(0).unwrap();
        tree.remove_block(node, relative, 6).unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.total_length(), 1);
    }

    #[test]
    fn many_random_insertions_keep_tree_balanced_and_consistent() {
        use rand::SeedableRng;
        use rand::Rng;
        use rand_chacha::ChaCha8Rng;

        let mut tree = BlockTree::with_capacity(4096);
        tree.init(1).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        for _ in 0..500 {
            let total = tree.total_length();
            let pos = rng.gen_range(0..total);
            let (node, relative) = tree.locate(pos).unwrap();
            tree.split_block(node, relative, rng.gen_range(1..4)).unwrap();
        }
        tree.validate().unwrap();
    }

    #[test]
    fn locate_out_of_range_is_rejected() {
        let mut tree = BlockTree::with_capacity(8);
        tree.init(4).unwrap();
        assert_eq!(tree.locate(4), Err(RangeError::PositionOutOfRange { position: 4, length: 4 }));
    }

    #[test]
    fn handle_event_dispatches_insertion_and_deletion() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(10).unwrap();
        tree.handle_event(&Event::insertion(4, 3)).unwrap();
        assert_eq!(tree.total_length(), 13);
        tree.handle_event(&Event::deletion(5, 2)).unwrap();
        assert_eq!(tree.total_length(), 11);
        tree.validate().unwrap();
    }

    #[test]
    fn handle_event_insertion_at_tail_appends() {
        let mut tree = BlockTree::with_capacity(64);
        tree.init(5).unwrap();
        tree.handle_event(&Event::insertion(5, 2)).unwrap();
        assert_eq!(tree.total_length(), 7);
        let blocks = tree.blocklist();
        assert_eq!(blocks.last().unwrap().2, 2);
        tree.validate().unwrap();
    }

    #[test]
    fn category_aware_interior_split_bridges_parent_flanks() {
        use crate::sampler::CategoryPathSampler;
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let sampler = CategoryPathSampler::new(vec![0.5, 0.5], 0.9).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let parent_rates = vec![0, 0, 1, 1, 0];

        let mut tree = BlockTree::with_capacity(64);
        tree.init_with_rates(5, Some(parent_rates)).unwrap();
        let (node, relative) = tree.locate(2).unwrap();
        tree.split_block_with_categories(node, relative, 3, &sampler, &mut rng).unwrap();
        assert_eq!(tree.total_length(), 8);
        tree.validate().unwrap();

        let blocks = tree.blocklist_with_blocks();
        let inserted = blocks.iter().find(|(_, b)| b.insertion == 3).expect("split produced an insertion block");
        let rates = inserted.1.rate_categories.as_ref().unwrap();
        assert_eq!(rates.len(), 4); // sentinel + 3 drawn categories
    }

    #[test]
    fn category_aware_append_extends_existing_insertion_rates() {
        use crate::sampler::CategoryPathSampler;
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let sampler = CategoryPathSampler::new(vec![0.5, 0.5], 0.9).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let parent_rates = vec![0, 1, 0];

        let mut tree = BlockTree::with_capacity(64);
        tree.init_with_rates(3, Some(parent_rates)).unwrap();
        let (node, relative) = tree.locate(1).unwrap();
        tree.split_block_with_categories(node, relative, 2, &sampler, &mut rng).unwrap();
        let (node, relative) = tree.locate(3).unwrap(); // append into the tail of the insertion just made
        tree.split_block_with_categories(node, relative, 1, &sampler, &mut rng).unwrap();
        tree.validate().unwrap();

        let blocks = tree.blocklist_with_blocks();
        let inserted = blocks.iter().find(|(_, b)| b.insertion == 3).expect("second split grew the same insertion run");
        assert_eq!(inserted.1.rate_categories.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn deletion_spanning_into_insertion_trims_rate_categories() {
        use crate::sampler::CategoryPathSampler;
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let sampler = CategoryPathSampler::new(vec![0.5, 0.5], 0.9).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let parent_rates = vec![0, 1, 0, 1];

        let mut tree = BlockTree::with_capacity(64);
        tree.init_with_rates(4, Some(parent_rates)).unwrap();
        let (node, relative) = tree.locate(1).unwrap();
        tree.split_block_with_categories(node, relative, 4, &sampler, &mut rng).unwrap();
        assert_eq!(tree.total_length(), 8);

        // delete starting inside the original part and running into the insertion
        let (node, relative) = tree.locate(1).unwrap();
        tree.remove_block(node, relative, 3).unwrap();
        tree.validate().unwrap();

        let blocks = tree.blocklist_with_blocks();
        let (_, remaining) = blocks.iter().find(|(_, b)| b.insertion > 0).expect("insertion survives the deletion");
        // block had 2 original + 4 inserted = 6 positions; deleting 3 starting
        // at offset 1 removes 1 original + 2 inserted, leaving insertion = 2.
        assert_eq!(remaining.insertion, 2);
        assert_eq!(remaining.rate_categories.as_ref().unwrap().len(), 3); // sentinel + 2
    }

    #[test]
    fn arena_full_is_reported() {
        let mut tree = BlockTree::with_capacity(1);
        tree.init(2).unwrap();
        // Interior split of the sole block needs a second key; the arena
        // only has room for the one slot `init` already used.
        let (node, relative) = tree.locate(0).unwrap();
        assert_eq!(tree.split_block(node, relative, 1), Err(CapacityError::ArenaFull { capacity: 1 }));
    }
}
