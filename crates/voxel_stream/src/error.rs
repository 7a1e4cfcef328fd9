//! Error taxonomy for grid and block operations.
//!
//! Cache I/O failures are deliberately *not* part of the public operation
//! signatures that run inside parallel build passes; those degrade to
//! "not cached" and are logged at the task boundary. The errors here cover
//! the cases a caller must handle explicitly.

use crate::cache::CacheError;

/// Errors surfaced by [`VoxelGrid`](crate::grid::VoxelGrid) and
/// [`VoxelBlock`](crate::block::VoxelBlock) operations.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
  /// Invalid construction parameters (zero dimensions, unordered LOD
  /// distances, ...). No partial state is created.
  #[error("invalid grid configuration: {0}")]
  Config(String),

  /// A flattened index fell outside the valid arena range.
  #[error("index {index} outside [0, {len})")]
  OutOfBounds {
    /// The offending flattened index.
    index: usize,
    /// Arena length the index was checked against.
    len: usize,
  },

  /// An operation that requires allocated geometry ran on an unallocated
  /// block (e.g. partial regeneration before any level-0 mesh exists).
  #[error("block has no allocated level-0 mesh")]
  Unallocated,

  /// A cache operation failed in a context where it cannot degrade
  /// (e.g. opening the cache folder for a paged build).
  #[error(transparent)]
  Cache(#[from] CacheError),
}
