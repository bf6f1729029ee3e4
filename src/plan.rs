//! Chunk size planning.

use crate::error::{Result, SplitError};

/// Rows per part: `ceil(data_rows / num_parts)`.
///
/// `num_parts` must be non-zero.
pub const fn chunk_size(data_rows: u64, num_parts: u64) -> u64 {
    data_rows.div_ceil(num_parts)
}

/// How the data rows are distributed over parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    /// Rows after the header.
    pub data_rows: u64,
    /// Parts requested by the caller.
    pub num_parts: usize,
    /// Rows written to every part but possibly the last.
    pub chunk_size: u64,
}

impl SplitPlan {
    /// Plan a split of `data_rows` rows into `num_parts` parts.
    ///
    /// # Errors
    ///
    /// `SplitError::NoDataRows` when there is nothing to split, and
    /// `SplitError::InvalidConfig` when `num_parts` is zero.
    pub fn new(data_rows: u64, num_parts: usize) -> Result<Self> {
        if num_parts == 0 {
            return Err(SplitError::InvalidConfig(
                "number of parts must be a positive integer".to_string(),
            ));
        }
        if data_rows == 0 {
            return Err(SplitError::NoDataRows);
        }

        Ok(Self {
            data_rows,
            num_parts,
            chunk_size: chunk_size(data_rows, num_parts as u64),
        })
    }

    /// Parts that will hold at least one row if every counted line turns out to
    /// be a record. Never more than `num_parts`.
    pub fn expected_parts(&self) -> usize {
        self.data_rows.div_ceil(self.chunk_size) as usize
    }
}
