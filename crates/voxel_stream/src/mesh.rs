//! Geometry containers: shared triangle buffers, LOD selectors, and the
//! closed set of node kinds a block can hold.

use std::path::PathBuf;

use glam::DVec3;
use smallvec::SmallVec;

use crate::config::LOD_TIER_COUNT;

/// Shared triangle buffer set that cells append into.
///
/// Positions, normals, and colors are parallel arrays; indices are triangle
/// lists referencing them.
#[derive(Clone, Debug, Default)]
pub struct MeshBuffers {
  /// Vertex positions in world space.
  pub positions: Vec<[f32; 3]>,

  /// Per-vertex unit normals.
  pub normals: Vec<[f32; 3]>,

  /// Per-vertex RGB colors.
  pub colors: Vec<[f32; 3]>,

  /// Triangle indices (3 indices per triangle).
  pub indices: Vec<u32>,
}

impl MeshBuffers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Clear all buffers, preserving capacity.
  pub fn clear(&mut self) {
    self.positions.clear();
    self.normals.clear();
    self.colors.clear();
    self.indices.clear();
  }

  /// Returns true if no geometry is present.
  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }

  /// Number of vertices.
  pub fn vertex_count(&self) -> usize {
    self.positions.len()
  }

  /// Number of triangles.
  pub fn triangle_count(&self) -> usize {
    self.indices.len() / 3
  }

  /// Append another buffer set, rebasing its indices onto this one.
  pub fn append(&mut self, other: &MeshBuffers) {
    let base = self.positions.len() as u32;
    self.positions.extend_from_slice(&other.positions);
    self.normals.extend_from_slice(&other.normals);
    self.colors.extend_from_slice(&other.colors);
    self.indices.extend(other.indices.iter().map(|i| i + base));
  }
}

/// One tier of an in-memory LOD selector.
#[derive(Clone, Debug)]
pub struct LodTier {
  /// `[near, far)` viewer distance range this tier is selected for.
  pub range: (f64, f64),

  /// Combined geometry for the whole block at this tier's resolution.
  pub mesh: MeshBuffers,
}

/// In-memory LOD selector holding the combined mesh of every tier.
#[derive(Clone, Debug, Default)]
pub struct LodMesh {
  /// Tiers ordered fine to coarse.
  pub tiers: SmallVec<[LodTier; LOD_TIER_COUNT]>,
}

impl LodMesh {
  /// Tier geometry by index, if present.
  pub fn tier(&self, index: usize) -> Option<&LodTier> {
    self.tiers.get(index)
  }

  /// True when every tier is empty (a block with no drawable primitives).
  pub fn is_empty(&self) -> bool {
    self.tiers.iter().all(|t| t.mesh.is_empty())
  }

  /// Total triangle count across all tiers.
  pub fn triangle_count(&self) -> usize {
    self.tiers.iter().map(|t| t.mesh.triangle_count()).sum()
  }
}

/// One tier of a paged LOD node: a file reference plus its range.
#[derive(Clone, Debug, PartialEq)]
pub struct PagedTier {
  /// File name relative to the paged node's database path.
  pub file_name: String,

  /// `[near, far)` viewer distance range.
  pub range: (f64, f64),
}

/// Deferred-load LOD node referencing per-tier mesh files on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct PagedLod {
  /// Directory the tier files live in.
  pub database_path: PathBuf,

  /// World-space center used for range tests at render time.
  pub center: DVec3,

  /// Bounding radius around `center`.
  pub radius: f64,

  /// Tiers that were written successfully; a failed tier write is simply
  /// absent here.
  pub tiers: SmallVec<[PagedTier; LOD_TIER_COUNT]>,
}

/// The closed set of node kinds a block's volume container can hold.
#[derive(Clone, Debug)]
pub enum BlockNode {
  /// Four-tier combined geometry generated in memory.
  Combined(LodMesh),

  /// Paged references to per-tier mesh files, loaded on demand.
  Paged(PagedLod),

  /// A subtree deserialized from a whole-block cache file.
  Cached {
    /// Cache file the subtree came from.
    path: PathBuf,
    /// The deserialized geometry.
    lod: LodMesh,
  },
}

impl BlockNode {
  /// In-memory LOD geometry, when this node carries any.
  pub fn lod(&self) -> Option<&LodMesh> {
    match self {
      BlockNode::Combined(lod) => Some(lod),
      BlockNode::Cached { lod, .. } => Some(lod),
      BlockNode::Paged(_) => None,
    }
  }

  /// Mutable in-memory LOD geometry, when this node carries any.
  pub fn lod_mut(&mut self) -> Option<&mut LodMesh> {
    match self {
      BlockNode::Combined(lod) => Some(lod),
      BlockNode::Cached { lod, .. } => Some(lod),
      BlockNode::Paged(_) => None,
    }
  }
}
