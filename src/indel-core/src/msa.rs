//! MSA assembler (C8): turns every leaf's [`SequenceView`] plus the shared,
//! compacted [`SuperSequence`] into a run-length gap/non-gap encoding of
//! the final alignment, and can expand that encoding into FASTA text given
//! a source of characters.
//!
//! Run-length ported from `original_source/src/MSA.h::fillMSA`: positive
//! entries are non-gap runs, negative entries are gap runs; a row made of
//! one contiguous non-gap span emits a single positive entry with no
//! spurious leading/trailing zero, and an entirely-gap row emits one
//! negative entry equal to `-msa_length`.

use model::NodeId;

use crate::error::InvariantViolation;
use crate::sequence_view::SequenceView;
use crate::supersequence::SuperSequence;

#[derive(Debug, Clone)]
pub struct MsaRow {
    pub node: NodeId,
    /// Positive: a run of that many aligned (non-gap) columns. Negative:
    /// a run of that many gap columns.
    pub runs: Vec<i64>,
}

impl MsaRow {
    pub fn row_length(&self) -> u64 {
        self.runs.iter().map(|r| r.unsigned_abs()).sum()
    }

    fn build(node: NodeId, view: &SequenceView, super_sequence: &SuperSequence, msa_length: u64) -> Self {
        let columns = view.columns();
        let mut runs = Vec::new();
        let mut j = 0usize;
        let mut current_is_gap: Option<bool> = None;
        let mut current_len: i64 = 0;

        for pos in 0..msa_length {
            let present = j < columns.len() && super_sequence.absolute_position(columns[j]) == Some(pos);
            if present {
                j += 1;
            }
            let is_gap = !present;
            match current_is_gap {
                Some(prev) if prev == is_gap => current_len += 1,
                _ => {
                    if let Some(prev) = current_is_gap {
                        runs.push(if prev { -current_len } else { current_len });
                    }
                    current_is_gap = Some(is_gap);
                    current_len = 1;
                }
            }
        }
        if let Some(prev) = current_is_gap {
            runs.push(if prev { -current_len } else { current_len });
        }
        if runs.is_empty() && msa_length > 0 {
            runs.push(-(msa_length as i64));
        }
        Self { node, runs }
    }
}

#[derive(Debug, Clone)]
pub struct Msa {
    pub length: u64,
    pub rows: Vec<MsaRow>,
}

impl Msa {
    /// Mark every column actually present in each leaf's view as observed,
    /// compact absolute positions, then build one run-length row per leaf.
    pub fn assemble(
        leaves: &[(NodeId, SequenceView)],
        super_sequence: &mut SuperSequence,
    ) -> Self {
        for (_, view) in leaves {
            for &handle in view.columns() {
                super_sequence.reference_position(handle);
            }
        }
        super_sequence.compact_observed_positions();
        let length = super_sequence.msa_length();

        let rows = leaves
            .iter()
            .map(|(node, view)| MsaRow::build(*node, view, super_sequence, length))
            .collect();

        Self { length, rows }
    }

    pub fn validate(&self) -> Result<(), InvariantViolation> {
        for row in &self.rows {
            let row_length = row.row_length();
            if row_length != self.length {
                return Err(InvariantViolation::MsaRowLengthMismatch { row_length, msa_length: self.length });
            }
        }
        Ok(())
    }

    /// Expand the run-length encoding into FASTA text. `character_source`
    /// supplies the next non-gap character for `node`'s sequence, called
    /// exactly once per non-gap column in left-to-right order.
    pub fn to_fasta_string(
        &self,
        name_of: impl Fn(NodeId) -> String,
        mut character_source: impl FnMut(NodeId, usize) -> char,
    ) -> String {
        let mut out = String::new();
        for row in &self.rows {
            out.push('>');
            out.push_str(&name_of(row.node));
            out.push('\n');
            let mut seq_index = 0usize;
            for &run in &row.runs {
                if run >= 0 {
                    for _ in 0..run {
                        out.push(character_source(row.node, seq_index));
                        seq_index += 1;
                    }
                } else {
                    for _ in 0..(-run) {
                        out.push('-');
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(test)] use pretty_assertions::assert_eq;

    #[test]
    fn identical_sequences_produce_a_single_non_gap_run() {
        let mut ss = SuperSequence::new(4, 64).unwrap();
        let view_a = SequenceView::root(&ss, 4);
        let view_b = view_a.clone();
        let msa = Msa::assemble(&[(1, view_a), (2, view_b)], &mut ss);
        assert_eq!(msa.length, 4);
        for row in &msa.rows {
            assert_eq!(row.runs, vec![4]);
        }
        msa.validate().unwrap();
    }

    #[test]
    fn a_leaf_missing_every_position_is_all_gaps() {
        let mut ss = SuperSequence::new(3, 64).unwrap();
        let view_present = SequenceView::root(&ss, 3);
        let empty_view = SequenceView::default();
        let msa = Msa::assemble(&[(1, view_present), (2, empty_view)], &mut ss);
        assert_eq!(msa.rows[1].runs, vec![-3]);
        msa.validate().unwrap();
    }

    #[test]
    fn fasta_output_has_one_record_per_row() {
        let mut ss = SuperSequence::new(2, 64).unwrap();
        let view = SequenceView::root(&ss, 2);
        let msa = Msa::assemble(&[(0, view)], &mut ss);
        let fasta = msa.to_fasta_string(|n| format!("seq{n}"), |_, i| if i == 0 { 'A' } else { 'C' });
        assert_eq!(fasta, ">seq0\nAC\n");
    }
}
