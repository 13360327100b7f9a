//! Error types for voxstream

use thiserror::Error;

use crate::voxel::coord::ChunkCoord;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationFailure),

    #[error("Structural violation: {0}")]
    Structure(#[from] StructuralViolation),

    #[error("Streaming error: {0}")]
    Streaming(String),
}

/// Failure while turning a pending chunk into geometry.
///
/// Never fatal: the node goes back to `Pending` and is retried on a later tick.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("non-finite density at sample {index} of chunk {coord}")]
    MalformedDensity { coord: ChunkCoord, index: usize },

    #[error("extraction of chunk {0} was cancelled")]
    Cancelled(ChunkCoord),

    #[error("voxel field panicked while sampling chunk {coord}: {message}")]
    Panicked { coord: ChunkCoord, message: String },
}

/// The render device refused a buffer, or the GPU budget is exhausted.
///
/// The chunk stays resident on the CPU and the upload is retried next frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to allocate {bytes} bytes of GPU memory: {reason}")]
pub struct AllocationFailure {
    pub bytes: usize,
    pub reason: String,
}

/// An index mutation that would break the octree's shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralViolation {
    #[error("chunk {0} is not in the index")]
    Missing(ChunkCoord),

    #[error("cannot insert {0} as a root: its parent {1} exists")]
    ParentPresent(ChunkCoord, ChunkCoord),

    #[error("cannot remove {0}: it is a child of split node {1}")]
    ChildOfSplit(ChunkCoord, ChunkCoord),

    #[error("cannot split {0}: lod 0 chunks have no children")]
    FinestLod(ChunkCoord),

    #[error("cannot split {coord} in state {state}")]
    SplitState { coord: ChunkCoord, state: &'static str },

    #[error("cannot merge {coord} in state {state}")]
    MergeState { coord: ChunkCoord, state: &'static str },

    #[error("cannot merge {parent}: child {child} is {state}")]
    MergeChild {
        parent: ChunkCoord,
        child: ChunkCoord,
        state: &'static str,
    },

    #[error("index corrupted: {0}")]
    Corrupt(String),
}

/// Report a structural violation raised inside a tick.
///
/// Fatal in debug builds, logged and ignored in release builds.
pub fn report_violation(violation: &StructuralViolation) {
    log::error!("Structural violation: {}", violation);
    debug_assert!(false, "structural violation: {violation}");
}
