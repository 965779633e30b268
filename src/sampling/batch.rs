//! Memory-bounded batch splitting
//!
//! A window's batch is split into consecutive groups of at most
//! `max_batch_size` samples, each group is run on its own, and the outputs are
//! concatenated back in the original order. Splitting never changes results for
//! operations that treat samples independently.

use std::ops::Range;

use log::debug;

use crate::error::{CascadeError, Result};

/// A value holding one entry per sample that can be cut into row ranges and
/// stitched back together.
pub trait Batched: Sized {
    /// Copy out the samples in `range`.
    fn slice_rows(&self, range: Range<usize>) -> Self;

    /// Concatenate parts in order.
    fn concat_rows(parts: Vec<Self>) -> Self;
}

impl<T: Clone> Batched for Vec<T> {
    fn slice_rows(&self, range: Range<usize>) -> Self {
        self[range].to_vec()
    }

    fn concat_rows(parts: Vec<Self>) -> Self {
        parts.into_iter().flatten().collect()
    }
}

/// Absent conditioning stays absent in every group.
impl<B: Batched> Batched for Option<B> {
    fn slice_rows(&self, range: Range<usize>) -> Self {
        self.as_ref().map(|b| b.slice_rows(range))
    }

    fn concat_rows(parts: Vec<Self>) -> Self {
        let present: Vec<B> = parts.into_iter().flatten().collect();
        if present.is_empty() {
            None
        } else {
            Some(B::concat_rows(present))
        }
    }
}

/// Row ranges of consecutive groups of at most `max_batch_size` samples.
///
/// The last group may be smaller. An empty batch yields no groups.
pub fn group_ranges(n_samples: usize, max_batch_size: usize) -> Result<Vec<Range<usize>>> {
    if max_batch_size == 0 {
        return Err(CascadeError::InvalidConfig {
            reason: "max_batch_size must be positive".to_string(),
        });
    }

    let ranges: Vec<Range<usize>> = (0..n_samples)
        .step_by(max_batch_size)
        .map(|start| start..(start + max_batch_size).min(n_samples))
        .collect();

    debug!(
        "Split {} samples into {} group(s) of at most {}",
        n_samples,
        ranges.len(),
        max_batch_size
    );

    Ok(ranges)
}

/// Split a batch into groups following `ranges`.
pub fn split_batch<B: Batched>(batch: &B, ranges: &[Range<usize>]) -> Vec<B> {
    ranges.iter().map(|r| batch.slice_rows(r.clone())).collect()
}

/// Concatenate per-group outputs back in original order.
pub fn merge_batches<B: Batched>(parts: Vec<B>) -> B {
    B::concat_rows(parts)
}

/// Run `op` over each group of `batch` one at a time and merge the outputs.
pub fn map_in_groups<B, O, F>(
    batch: &B,
    n_samples: usize,
    max_batch_size: usize,
    mut op: F,
) -> Result<O>
where
    B: Batched,
    O: Batched,
    F: FnMut(Range<usize>, B) -> Result<O>,
{
    let ranges = group_ranges(n_samples, max_batch_size)?;
    let mut outputs = Vec::with_capacity(ranges.len());
    for (range, group) in ranges.iter().cloned().zip(split_batch(batch, &ranges)) {
        outputs.push(op(range, group)?);
    }
    Ok(merge_batches(outputs))
}
