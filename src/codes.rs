//! Discrete code sequences, per-level code tables and conditioning labels

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Result};
use crate::sampling::batch::Batched;

/// One discrete token from a level's vocabulary.
pub type Code = u32;

/// Codes for a batch of samples at one level.
///
/// Every row has the same length. Rows only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBatch {
    rows: Vec<Vec<Code>>,
}

impl CodeBatch {
    /// `n_samples` empty rows.
    pub fn empty(n_samples: usize) -> Self {
        Self {
            rows: vec![Vec::new(); n_samples],
        }
    }

    /// Build from rows, rejecting ragged input.
    pub fn from_rows(rows: Vec<Vec<Code>>) -> Result<Self> {
        if let Some(first) = rows.first() {
            let len = first.len();
            if let Some(bad) = rows.iter().position(|r| r.len() != len) {
                return Err(CascadeError::ShapeMismatch {
                    reason: format!(
                        "row {} has {} codes, row 0 has {}",
                        bad,
                        rows[bad].len(),
                        len
                    ),
                });
            }
        }
        Ok(Self { rows })
    }

    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    /// Tokens per sample.
    pub fn len(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows(&self) -> &[Vec<Code>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[Code]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Tokens `[start, end)` of every row, clipped to what exists.
    pub fn window(&self, start: usize, end: usize) -> CodeBatch {
        let len = self.len();
        let start = start.min(len);
        let end = end.clamp(start, len);
        Self {
            rows: self.rows.iter().map(|r| r[start..end].to_vec()).collect(),
        }
    }

    /// The last `n` tokens of every row.
    pub fn tail(&self, n: usize) -> CodeBatch {
        let len = self.len();
        self.window(len.saturating_sub(n), len)
    }

    /// Append `other` position-wise to every row.
    pub fn append(&mut self, other: &CodeBatch) -> Result<()> {
        if other.n_samples() != self.n_samples() {
            return Err(CascadeError::ShapeMismatch {
                reason: format!(
                    "cannot append {} rows to {} rows",
                    other.n_samples(),
                    self.n_samples()
                ),
            });
        }
        for (row, extra) in self.rows.iter_mut().zip(&other.rows) {
            row.extend_from_slice(extra);
        }
        Ok(())
    }
}

impl Batched for CodeBatch {
    fn slice_rows(&self, range: Range<usize>) -> Self {
        Self {
            rows: self.rows[range].to_vec(),
        }
    }

    fn concat_rows(parts: Vec<Self>) -> Self {
        Self {
            rows: parts.into_iter().flat_map(|p| p.rows).collect(),
        }
    }
}

/// Time-aligned codes from the next-coarser level, absent on the top level.
pub type CrossLevelConditioning = Option<CodeBatch>;

/// The in-memory code table: one growing `CodeBatch` per level.
///
/// Level 0 is the finest, the last level is the top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeTable {
    levels: Vec<CodeBatch>,
}

impl CodeTable {
    /// Empty sequences for every level.
    pub fn empty(n_levels: usize, n_samples: usize) -> Self {
        Self {
            levels: vec![CodeBatch::empty(n_samples); n_levels],
        }
    }

    /// Wrap existing per-level codes. All levels must hold the same samples.
    pub fn from_levels(levels: Vec<CodeBatch>) -> Result<Self> {
        if let Some(first) = levels.first() {
            let n = first.n_samples();
            if let Some(bad) = levels.iter().position(|l| l.n_samples() != n) {
                return Err(CascadeError::ShapeMismatch {
                    reason: format!(
                        "level {} has {} samples, level 0 has {}",
                        bad,
                        levels[bad].n_samples(),
                        n
                    ),
                });
            }
        }
        Ok(Self { levels })
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn n_samples(&self) -> usize {
        self.levels.first().map_or(0, CodeBatch::n_samples)
    }

    pub fn level(&self, level: usize) -> Result<&CodeBatch> {
        let levels = self.levels.len();
        self.levels
            .get(level)
            .ok_or(CascadeError::LevelOutOfRange { level, levels })
    }

    pub fn level_mut(&mut self, level: usize) -> Result<&mut CodeBatch> {
        let levels = self.levels.len();
        self.levels
            .get_mut(level)
            .ok_or(CascadeError::LevelOutOfRange { level, levels })
    }

    /// Codes of `level` and every coarser level, finest first.
    pub fn from_level(&self, level: usize) -> Result<&[CodeBatch]> {
        if level >= self.levels.len() {
            return Err(CascadeError::LevelOutOfRange {
                level,
                levels: self.levels.len(),
            });
        }
        Ok(&self.levels[level..])
    }

    pub fn levels(&self) -> &[CodeBatch] {
        &self.levels
    }

    /// Code lengths per level, finest first.
    pub fn lengths(&self) -> Vec<usize> {
        self.levels.iter().map(CodeBatch::len).collect()
    }
}

/// Run metadata one sample is conditioned on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub artist: String,
    pub genre: String,
    pub lyrics: String,
    /// Full song length in raw samples.
    pub total_length: usize,
    /// Offset of this sample into the song, in raw samples.
    #[serde(default)]
    pub offset: usize,
}

impl SampleMetadata {
    /// Repeat `metas` cyclically until there are exactly `n_samples` entries.
    pub fn fill_batch(metas: &[SampleMetadata], n_samples: usize) -> Result<Vec<SampleMetadata>> {
        if metas.is_empty() {
            return Err(CascadeError::InvalidConfig {
                reason: "at least one sample metadata entry is required".to_string(),
            });
        }
        Ok(metas.iter().cycle().take(n_samples).cloned().collect())
    }
}

/// Per-level conditioning labels for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelBatch {
    /// One label vector per sample; layout is owned by the level's labeller.
    pub rows: Vec<Vec<i64>>,
    /// Metadata each row was derived from.
    pub info: Vec<SampleMetadata>,
}

impl LabelBatch {
    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }
}

impl Batched for LabelBatch {
    fn slice_rows(&self, range: Range<usize>) -> Self {
        Self {
            rows: self.rows[range.clone()].to_vec(),
            info: self.info.get(range).map(<[_]>::to_vec).unwrap_or_default(),
        }
    }

    fn concat_rows(parts: Vec<Self>) -> Self {
        let mut merged = LabelBatch::default();
        for part in parts {
            merged.rows.extend(part.rows);
            merged.info.extend(part.info);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch(rows: &[&[Code]]) -> CodeBatch {
        CodeBatch::from_rows(rows.iter().map(|r| r.to_vec()).collect()).unwrap()
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = CodeBatch::from_rows(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }

    #[test]
    fn test_window_clips_to_available_tokens() {
        let codes = batch(&[&[1, 2, 3, 4], &[5, 6, 7, 8]]);
        assert_eq!(codes.window(2, 10), batch(&[&[3, 4], &[7, 8]]));
        assert_eq!(codes.window(6, 10).len(), 0);
        assert_eq!(codes.window(6, 10).n_samples(), 2);
        assert_eq!(codes.tail(1), batch(&[&[4], &[8]]));
    }

    #[test]
    fn test_append_grows_every_row() {
        let mut codes = CodeBatch::empty(2);
        codes.append(&batch(&[&[1], &[2]])).unwrap();
        codes.append(&batch(&[&[3], &[4]])).unwrap();
        assert_eq!(codes, batch(&[&[1, 3], &[2, 4]]));

        assert!(codes.append(&batch(&[&[9]])).is_err());
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn test_table_from_level() {
        let table = CodeTable::empty(3, 2);
        assert_eq!(table.from_level(1).unwrap().len(), 2);
        assert!(table.from_level(3).is_err());
        assert!(table.level(5).is_err());
    }

    #[test]
    fn test_fill_batch_cycles_metadata() {
        let meta = |artist: &str| SampleMetadata {
            artist: artist.to_string(),
            genre: "jazz".to_string(),
            lyrics: String::new(),
            total_length: 100,
            offset: 0,
        };
        let filled = SampleMetadata::fill_batch(&[meta("a"), meta("b")], 5).unwrap();
        let artists: Vec<&str> = filled.iter().map(|m| m.artist.as_str()).collect();
        assert_eq!(artists, vec!["a", "b", "a", "b", "a"]);
        assert!(SampleMetadata::fill_batch(&[], 2).is_err());
    }
}
