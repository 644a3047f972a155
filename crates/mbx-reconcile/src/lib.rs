//! mbx-reconcile
//!
//! Turns one workspace's complete upstream account list into cache writes:
//! normalize, drop duplicate keys (last seen wins), upsert in bounded
//! chunks. Nothing is ever deleted here.

use std::fmt;

use serde::{Deserialize, Serialize};

mod engine;
pub mod normalize;

pub use engine::{dedup_latest, Reconciler};
pub use normalize::RejectReason;

pub const DEFAULT_CHUNK_SIZE: usize = 250;
pub const MAX_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidChunkSize(pub usize);

impl fmt::Display for InvalidChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk size {} out of range 1..={}",
            self.0, MAX_CHUNK_SIZE
        )
    }
}

impl std::error::Error for InvalidChunkSize {}

/// Outcome of reconciling one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub fetched: usize,
    pub rejected: usize,
    pub duplicates_dropped: usize,
    pub upserted: usize,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub rows_failed: usize,
    /// Cached rows of this workspace not seen by the current job.
    pub absent_retained: usize,
}

impl ReconcileReport {
    /// Something was to be written and nothing was.
    pub fn all_chunks_failed(&self) -> bool {
        self.chunks_total > 0 && self.chunks_failed == self.chunks_total
    }
}
