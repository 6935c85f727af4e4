//! Batch window planning.
//!
//! Partitions a batch job's logical scope into sequential windows no larger
//! than the per-call ceiling. Windows are produced one at a time so a job
//! covering tens of thousands of records never materializes more than one
//! window of data. A failed window never blocks the next one; the planner
//! only tracks position, the orchestrator aggregates outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("window ceiling must be positive")]
    ZeroCeiling,
}

/// One contiguous slice of a batch scope, at most `size` records starting at
/// `offset` within the ordered source sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub index: u64,
    pub offset: u64,
    pub size: u64,
}

impl Window {
    /// Exclusive upper bound of this window within the scope.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Lazily yields non-overlapping windows covering `[0, total)`.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    total: u64,
    ceiling: u64,
    next_offset: u64,
    next_index: u64,
}

impl BatchPlanner {
    pub fn new(total: u64, ceiling: u64) -> Result<Self, PlanError> {
        if ceiling == 0 {
            return Err(PlanError::ZeroCeiling);
        }
        Ok(Self {
            total,
            ceiling,
            next_offset: 0,
            next_index: 0,
        })
    }

    /// Resume planning from a persisted cursor position. `offset` is the
    /// first uncovered position, i.e. the end of the last drained window.
    pub fn resume(total: u64, ceiling: u64, offset: u64) -> Result<Self, PlanError> {
        if ceiling == 0 {
            return Err(PlanError::ZeroCeiling);
        }
        let clamped = offset.min(total);
        Ok(Self {
            total,
            ceiling,
            next_offset: clamped,
            next_index: clamped.div_ceil(ceiling),
        })
    }

    /// Total number of windows the full scope plans to.
    pub fn window_count(&self) -> u64 {
        self.total.div_ceil(self.ceiling)
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.next_offset
    }
}

impl Iterator for BatchPlanner {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next_offset >= self.total {
            return None;
        }
        let size = self.ceiling.min(self.total - self.next_offset);
        let window = Window {
            index: self.next_index,
            offset: self.next_offset,
            size,
        };
        self.next_offset += size;
        self.next_index += 1;
        Some(window)
    }
}
