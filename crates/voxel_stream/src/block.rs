//! Fixed-size spatial partition owning a cell arena and multi-resolution
//! geometry for its region.
//!
//! A block is constructed empty by the grid, becomes non-empty when the
//! volume source reports content overlapping its box, and becomes allocated
//! once LOD geometry has been generated or loaded from cache. Deallocation
//! releases the cells and geometry but preserves the spatial parameters so
//! the block can be re-allocated while streaming.

use glam::{DVec3, UVec3};
use smallvec::SmallVec;
use tracing::{debug, error};

use crate::bounds::Aabb;
use crate::cache::MeshCache;
use crate::cell::VoxelCell;
use crate::config::{LodParams, LOD_TIER_COUNT};
use crate::error::GridError;
use crate::mesh::{BlockNode, LodMesh, LodTier, MeshBuffers, PagedLod, PagedTier};
use crate::source::VolumeSource;

/// One block of the grid's block arena.
#[derive(Debug)]
pub struct VoxelBlock {
  world_dimensions: DVec3,
  offset: DVec3,
  cell_dimensions: DVec3,
  /// Cells per axis: `1 + floor(block / cell)`. The extra cell on the high
  /// side guarantees boundary coverage when the block size is not an exact
  /// multiple of the cell size.
  cell_counts: UVec3,
  is_allocated: bool,
  is_dirty: bool,
  is_empty: bool,
  cells: Vec<VoxelCell>,
  volume: Option<BlockNode>,
}

impl Default for VoxelBlock {
  fn default() -> Self {
    Self {
      world_dimensions: DVec3::ZERO,
      offset: DVec3::ZERO,
      cell_dimensions: DVec3::ZERO,
      cell_counts: UVec3::ZERO,
      is_allocated: false,
      is_dirty: false,
      is_empty: true,
      cells: Vec::new(),
      volume: None,
    }
  }
}

impl VoxelBlock {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the spatial parameters and reset the aggregate container.
  ///
  /// Must be called once per lifecycle; re-initializing an allocated block
  /// without [`deallocate`](Self::deallocate) first is unsupported.
  pub fn init(&mut self, world_dimensions: DVec3, offset: DVec3, cell_dimensions: DVec3) {
    debug_assert!(cell_dimensions.min_element() > 0.0);

    self.world_dimensions = world_dimensions;
    self.offset = offset;
    self.cell_dimensions = cell_dimensions;
    self.cell_counts = (world_dimensions / cell_dimensions).floor().as_uvec3() + UVec3::ONE;
    self.volume = None;
  }

  // -----------------------------------------------------------------------
  // Lifecycle flags and accessors
  // -----------------------------------------------------------------------

  pub fn is_allocated(&self) -> bool {
    self.is_allocated
  }

  pub fn is_dirty(&self) -> bool {
    self.is_dirty
  }

  pub fn set_dirty(&mut self, dirty: bool) {
    self.is_dirty = dirty;
  }

  pub fn is_empty(&self) -> bool {
    self.is_empty
  }

  pub fn set_empty(&mut self, empty: bool) {
    self.is_empty = empty;
  }

  /// World-space origin of this block.
  pub fn offset(&self) -> DVec3 {
    self.offset
  }

  /// World-space extent of this block.
  pub fn world_dimensions(&self) -> DVec3 {
    self.world_dimensions
  }

  pub fn cell_dimensions(&self) -> DVec3 {
    self.cell_dimensions
  }

  /// Cells per axis.
  pub fn cell_counts(&self) -> UVec3 {
    self.cell_counts
  }

  /// Total cell count of the arena.
  pub fn num_cells(&self) -> usize {
    (self.cell_counts.x as usize) * (self.cell_counts.y as usize) * (self.cell_counts.z as usize)
  }

  /// World-space box covered by this block.
  pub fn aabb(&self) -> Aabb {
    Aabb::new(self.offset, self.offset + self.world_dimensions)
  }

  /// The geometry node currently attached, if any.
  pub fn node(&self) -> Option<&BlockNode> {
    self.volume.as_ref()
  }

  // -----------------------------------------------------------------------
  // Allocation
  // -----------------------------------------------------------------------

  /// Build combined meshes for all four LOD tiers from the volume source.
  ///
  /// Every cell whose sub-box has no intersecting content contributes zero
  /// geometry, so fully empty regions cost nothing beyond the query. The
  /// block ends up allocated even when no tier produced triangles.
  pub fn allocate_lod_mesh(&mut self, source: &dyn VolumeSource, lod: &LodParams) {
    self.cells = (0..self.num_cells()).map(|_| VoxelCell::new()).collect();

    let mut tiers: SmallVec<[LodTier; LOD_TIER_COUNT]> = SmallVec::new();
    tiers.push(LodTier {
      range: lod.range(0),
      mesh: self.build_retained_tier(source, lod.resolution(0)),
    });
    for tier in 1..LOD_TIER_COUNT {
      tiers.push(LodTier {
        range: lod.range(tier),
        mesh: self.build_combined_tier(source, lod.resolution(tier)),
      });
    }

    self.volume = Some(BlockNode::Combined(LodMesh { tiers }));
    self.is_allocated = true;
    self.is_dirty = false;
  }

  /// Build all four tiers, writing each to its own cache file, and attach a
  /// paged node referencing them.
  ///
  /// A tier whose write fails is reported and omitted from the paged node;
  /// the remaining tiers are still written.
  pub fn write_paged_lod(
    &mut self,
    source: &dyn VolumeSource,
    index: usize,
    cache: &MeshCache,
    lod: &LodParams,
  ) {
    self.cells = (0..self.num_cells()).map(|_| VoxelCell::new()).collect();

    let mut tiers: SmallVec<[PagedTier; LOD_TIER_COUNT]> = SmallVec::new();
    for tier in 0..LOD_TIER_COUNT {
      let mesh = self.build_combined_tier(source, lod.resolution(tier));
      match Self::save_cached_tier(cache, &mesh, lod.range(tier), index, tier) {
        Some(file_name) => tiers.push(PagedTier {
          file_name,
          range: lod.range(tier),
        }),
        None => error!(index, tier, "error writing paged lod tier"),
      }
    }

    self.volume = Some(BlockNode::Paged(PagedLod {
      database_path: cache.folder().to_owned(),
      center: self.offset + self.world_dimensions * 0.5,
      radius: 2.0 * self.world_dimensions.length(),
      tiers,
    }));
    self.is_allocated = true;
    self.is_dirty = false;

    self.save_cached_model(cache, index);
  }

  /// Adopt a node restored from the whole-grid database.
  pub(crate) fn adopt_node(&mut self, node: BlockNode) {
    self.volume = Some(node);
    self.is_allocated = true;
    self.is_empty = false;
  }

  /// Release all geometry and the cell arena, keeping spatial parameters.
  ///
  /// Safe to call on an already-deallocated block.
  pub fn deallocate(&mut self) {
    self.volume = None;
    for cell in &mut self.cells {
      cell.deallocate();
    }
    self.cells.clear();
    self.is_allocated = false;
  }

  /// Rebuild only the cells overlapping `dirty` at the given resolution and
  /// re-assemble the tier-0 combined mesh from the retained cell meshes.
  ///
  /// Requires a previously allocated in-memory tier 0; paged or unallocated
  /// blocks report an error and are left untouched.
  pub fn regenerate_aabb(
    &mut self,
    source: &dyn VolumeSource,
    dirty: &Aabb,
    resolution: UVec3,
  ) -> Result<(), GridError> {
    let has_tier0 = self
      .volume
      .as_ref()
      .and_then(BlockNode::lod)
      .is_some_and(|lod| !lod.tiers.is_empty());
    if !has_tier0 || self.cells.is_empty() {
      error!("block has no allocated level-0 mesh, cannot regenerate");
      return Err(GridError::Unallocated);
    }

    let (start, end) = self.overlapped_cells(dirty);
    let counts = self.cell_counts;
    let offset = self.offset;
    let cell_dims = self.cell_dimensions;

    for z in start.z..end.z {
      for y in start.y..end.y {
        for x in start.x..end.x {
          let min = offset
            + DVec3::new(
              x as f64 * cell_dims.x,
              y as f64 * cell_dims.y,
              z as f64 * cell_dims.z,
            );
          let cell_aabb = Aabb::new(min, min + cell_dims);
          let idx = ((z * counts.y + y) * counts.x + x) as usize;

          match source.sample_region(&cell_aabb, resolution) {
            Some(region) => self.cells[idx].create_mesh(&region),
            None => self.cells[idx].deallocate(),
          }
        }
      }
    }

    let mut combined = MeshBuffers::new();
    for cell in &self.cells {
      if let Some(mesh) = cell.mesh() {
        combined.append(mesh);
      }
    }
    if let Some(lod) = self.volume.as_mut().and_then(BlockNode::lod_mut) {
      if let Some(tier0) = lod.tiers.first_mut() {
        tier0.mesh = combined;
      }
    }

    self.is_dirty = false;
    Ok(())
  }

  // -----------------------------------------------------------------------
  // Cache operations
  // -----------------------------------------------------------------------

  /// True if a whole-block cache file exists for the index.
  pub fn has_cached_model(cache: &MeshCache, index: usize) -> bool {
    cache.has_block(index)
  }

  /// Attach geometry from the whole-block cache file, if present and valid.
  ///
  /// Read failures are reported and treated as "not cached".
  pub fn load_cached_model(&mut self, cache: &MeshCache, index: usize) -> bool {
    if !cache.has_block(index) {
      return false;
    }
    match cache.load_block(index) {
      Ok(node) => {
        debug!(index, "read block from model cache");
        self.volume = Some(node);
        self.is_allocated = true;
        true
      }
      Err(e) => {
        error!(index, error = %e, "error reading cached node");
        false
      }
    }
  }

  /// Write the attached node to the whole-block cache file.
  ///
  /// Returns false (after reporting) when nothing is attached or the write
  /// fails; the build that produced the node is unaffected.
  pub fn save_cached_model(&self, cache: &MeshCache, index: usize) -> bool {
    let Some(node) = &self.volume else {
      return false;
    };
    match cache.save_block(index, node) {
      Ok(()) => {
        debug!(index, "wrote block to model cache");
        true
      }
      Err(e) => {
        error!(index, error = %e, "error writing block to disk");
        false
      }
    }
  }

  /// Write one tier's mesh to its own cache file.
  ///
  /// Returns the relative file name, or `None` after reporting a failure.
  pub fn save_cached_tier(
    cache: &MeshCache,
    mesh: &MeshBuffers,
    range: (f64, f64),
    index: usize,
    tier: usize,
  ) -> Option<String> {
    match cache.save_tier(index, tier, range, mesh) {
      Ok(name) => {
        debug!(index, tier, "wrote lod tier to model cache");
        Some(name)
      }
      Err(e) => {
        error!(index, tier, error = %e, "error writing lod tier to disk");
        None
      }
    }
  }

  // -----------------------------------------------------------------------
  // Cell lookups
  // -----------------------------------------------------------------------

  /// Cell by lattice coordinates.
  ///
  /// The flattened index is strictly range-checked against the cell arena;
  /// out-of-range coordinates or an unallocated arena yield `None`.
  pub fn cell_from_index(&self, x: i32, y: i32, z: i32) -> Option<&VoxelCell> {
    let counts = self.cell_counts;
    let flat = (z as i64 * counts.y as i64 * counts.x as i64)
      + (y as i64 * counts.x as i64)
      + x as i64;
    if flat < 0 || flat >= self.num_cells() as i64 {
      return None;
    }
    self.cells.get(flat as usize)
  }

  /// Cell containing a world-space position.
  ///
  /// Each axis is range-checked independently, so positions left of the
  /// block origin cannot alias into a neighboring row.
  pub fn cell_from_pos(&self, pos: DVec3) -> Option<&VoxelCell> {
    let local = (pos - self.offset) / self.cell_dimensions;
    let (ix, iy, iz) = (
      local.x.floor() as i64,
      local.y.floor() as i64,
      local.z.floor() as i64,
    );

    let counts = self.cell_counts;
    if ix < 0 || iy < 0 || iz < 0 {
      return None;
    }
    if ix >= counts.x as i64 || iy >= counts.y as i64 || iz >= counts.z as i64 {
      return None;
    }

    let flat = ((iz * counts.y as i64 + iy) * counts.x as i64 + ix) as usize;
    self.cells.get(flat)
  }

  // -----------------------------------------------------------------------
  // Tier construction
  // -----------------------------------------------------------------------

  /// Build tier-0 geometry, retaining each cell's mesh for later partial
  /// regeneration, and return the concatenated result.
  fn build_retained_tier(&mut self, source: &dyn VolumeSource, resolution: UVec3) -> MeshBuffers {
    let counts = self.cell_counts;
    let offset = self.offset;
    let cell_dims = self.cell_dimensions;

    for z in 0..counts.z {
      for y in 0..counts.y {
        for x in 0..counts.x {
          let min = offset
            + DVec3::new(
              x as f64 * cell_dims.x,
              y as f64 * cell_dims.y,
              z as f64 * cell_dims.z,
            );
          let cell_aabb = Aabb::new(min, min + cell_dims);
          if let Some(region) = source.sample_region(&cell_aabb, resolution) {
            let idx = ((z * counts.y + y) * counts.x + x) as usize;
            self.cells[idx].create_mesh(&region);
          }
        }
      }
    }

    let mut combined = MeshBuffers::new();
    for cell in &self.cells {
      if let Some(mesh) = cell.mesh() {
        combined.append(mesh);
      }
    }
    combined
  }

  /// Build one tier's combined geometry without retaining per-cell meshes.
  fn build_combined_tier(&self, source: &dyn VolumeSource, resolution: UVec3) -> MeshBuffers {
    let counts = self.cell_counts;
    let mut out = MeshBuffers::new();

    for z in 0..counts.z {
      for y in 0..counts.y {
        for x in 0..counts.x {
          let min = self.offset
            + DVec3::new(
              x as f64 * self.cell_dimensions.x,
              y as f64 * self.cell_dimensions.y,
              z as f64 * self.cell_dimensions.z,
            );
          let cell_aabb = Aabb::new(min, min + self.cell_dimensions);
          if let Some(region) = source.sample_region(&cell_aabb, resolution) {
            let idx = ((z * counts.y + y) * counts.x + x) as usize;
            self.cells[idx].add_geometry(&region, &mut out);
          }
        }
      }
    }
    out
  }

  /// Cell index range `[start, end)` overlapping a world-space box,
  /// clamped to the arena.
  fn overlapped_cells(&self, aabb: &Aabb) -> (UVec3, UVec3) {
    let counts = self.cell_counts.as_dvec3();
    let lo = ((aabb.min - self.offset) / self.cell_dimensions)
      .floor()
      .clamp(DVec3::ZERO, counts);
    let hi = ((aabb.max - self.offset) / self.cell_dimensions)
      .ceil()
      .clamp(DVec3::ZERO, counts);
    (lo.as_uvec3(), hi.as_uvec3())
  }
}

#[cfg(test)]
#[path = "block_test.rs"]
mod block_test;
