//! Top-level grid: world partitioning, view-driven streaming, parallel
//! block construction, and visibility persistence.
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! │ Partition  ├──►│ Visibility   ├──►│ Build/Cache ├──►│ Scene root │
//! │ (blocks)   │   │ (per block)  │   │ (parallel)  │   │ (attach)   │
//! └────────────┘   └──────────────┘   └─────────────┘   └────────────┘
//! ```
//!
//! Blocks are processed in parallel with rayon; each worker mutates only
//! its own block slot and its own cache file. The scene root is never
//! touched from workers — attach requests flow through a channel and are
//! applied single-threaded (sorted by index) after the parallel pass, so
//! results are identical for any worker count.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{DVec3, UVec3};
use rayon::prelude::*;
use tracing::{debug, error, info};
use web_time::Instant;

use crate::block::VoxelBlock;
use crate::bounds::Aabb;
use crate::cache::MeshCache;
use crate::config::{GridConfig, LodParams};
use crate::error::GridError;
use crate::mesh::BlockNode;
use crate::source::VolumeSource;

/// Aggregate output container: the ordered set of block indices whose
/// geometry is currently part of the scene.
///
/// The rendering collaborator walks these indices and pulls each block's
/// node from the grid; the container itself never holds geometry.
#[derive(Clone, Debug, Default)]
pub struct SceneRoot {
  attached: Vec<usize>,
}

impl SceneRoot {
  /// Attach a block index. Attaching twice is a no-op.
  pub fn attach(&mut self, index: usize) {
    if let Err(pos) = self.attached.binary_search(&index) {
      self.attached.insert(pos, index);
    }
  }

  /// Detach a block index; returns whether it was attached.
  pub fn detach(&mut self, index: usize) -> bool {
    match self.attached.binary_search(&index) {
      Ok(pos) => {
        self.attached.remove(pos);
        true
      }
      Err(_) => false,
    }
  }

  /// True if the block index is attached.
  pub fn contains(&self, index: usize) -> bool {
    self.attached.binary_search(&index).is_ok()
  }

  /// Attached block indices in ascending order.
  pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
    self.attached.iter().copied()
  }

  pub fn len(&self) -> usize {
    self.attached.len()
  }

  pub fn is_empty(&self) -> bool {
    self.attached.is_empty()
  }

  pub fn clear(&mut self) {
    self.attached.clear();
  }
}

/// Statistics from one grid build pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildStats {
  /// Total blocks visited.
  pub blocks_total: usize,
  /// Blocks whose box intersected source content.
  pub blocks_with_content: usize,
  /// Blocks satisfied from the mesh cache.
  pub cache_hits: usize,
  /// Blocks whose meshes were generated this pass.
  pub meshes_built: usize,
  /// Wall-clock time of the pass in microseconds.
  pub elapsed_us: u64,
}

/// Sparse volumetric LOD streaming grid.
///
/// Owns a contiguous arena of [`VoxelBlock`]s covering the world volume;
/// block `(x, y, z)` lives at flattened index
/// `z * blocks_y * blocks_x + y * blocks_x + x` (x fastest-varying).
pub struct VoxelGrid {
  config: GridConfig,
  lod: LodParams,
  grid_offset: DVec3,
  world_dimensions: DVec3,
  block_dimensions: DVec3,
  cell_dimensions: DVec3,
  blocks_x: usize,
  blocks_y: usize,
  blocks_z: usize,
  num_blocks: usize,
  blocks: Vec<VoxelBlock>,
  /// Per-block emptiness flags; `true` means the block has no content and
  /// can be skipped entirely.
  block_visibility: Vec<bool>,
  /// World box of blocks kept resident by the last build/update.
  allocated_bounds: Aabb,
  root: SceneRoot,
  cache: Option<MeshCache>,
}

impl VoxelGrid {
  /// Partition `world_dimensions` from `grid_offset` into blocks.
  ///
  /// Block counts are floor-divided: any remainder extent beyond the last
  /// full block is excluded, not padded. Construction validates dimensions
  /// and the LOD distance ordering, so every constructed grid is usable.
  pub fn new(
    grid_offset: DVec3,
    world_dimensions: DVec3,
    block_dimensions: DVec3,
    cell_dimensions: DVec3,
    config: GridConfig,
  ) -> Result<Self, GridError> {
    if world_dimensions.min_element() < 0.0 {
      return Err(GridError::Config(
        "world dimensions must be non-negative".into(),
      ));
    }
    if block_dimensions.min_element() <= 0.0 {
      return Err(GridError::Config("block dimensions must be positive".into()));
    }
    if cell_dimensions.min_element() <= 0.0 {
      return Err(GridError::Config("cell dimensions must be positive".into()));
    }
    config.validate().map_err(GridError::Config)?;

    let blocks_x = (world_dimensions.x / block_dimensions.x).floor() as usize;
    let blocks_y = (world_dimensions.y / block_dimensions.y).floor() as usize;
    let blocks_z = (world_dimensions.z / block_dimensions.z).floor() as usize;
    let num_blocks = blocks_x * blocks_y * blocks_z;

    let lod = LodParams::derive(&config);

    Ok(Self {
      config,
      lod,
      grid_offset,
      world_dimensions,
      block_dimensions,
      cell_dimensions,
      blocks_x,
      blocks_y,
      blocks_z,
      num_blocks,
      blocks: (0..num_blocks).map(|_| VoxelBlock::new()).collect(),
      block_visibility: Vec::new(),
      allocated_bounds: Aabb::new(grid_offset, grid_offset),
      root: SceneRoot::default(),
      cache: None,
    })
  }

  // -----------------------------------------------------------------------
  // Geometry helpers
  // -----------------------------------------------------------------------

  /// World box that should be resident for a viewer at `pos`: the viewer's
  /// view-distance cube clamped into the grid volume.
  pub fn compute_world_bounds(&self, pos: DVec3) -> Aabb {
    let lo = self.grid_offset;
    let hi = self.grid_offset + self.world_dimensions;
    let r = DVec3::splat(self.config.view_distance);
    Aabb::from_center_half_extents(pos, r).clamp(lo, hi)
  }

  /// World-space center of block `(x, y, z)`.
  pub fn center_of_block(&self, x: usize, y: usize, z: usize) -> DVec3 {
    self.grid_offset
      + self.block_dimensions * (DVec3::new(x as f64, y as f64, z as f64) + DVec3::splat(0.5))
  }

  fn flatten(&self, x: usize, y: usize, z: usize) -> usize {
    (z * self.blocks_y + y) * self.blocks_x + x
  }

  /// Block index range `[start, end)` overlapping a world-space box,
  /// clamped to the partition.
  fn overlapped_blocks(&self, aabb: &Aabb) -> ((usize, usize, usize), (usize, usize, usize)) {
    let counts = DVec3::new(
      self.blocks_x as f64,
      self.blocks_y as f64,
      self.blocks_z as f64,
    );
    let lo = ((aabb.min - self.grid_offset) / self.block_dimensions)
      .floor()
      .clamp(DVec3::ZERO, counts);
    let hi = ((aabb.max - self.grid_offset) / self.block_dimensions)
      .ceil()
      .clamp(DVec3::ZERO, counts);
    (
      (lo.x as usize, lo.y as usize, lo.z as usize),
      (hi.x as usize, hi.y as usize, hi.z as usize),
    )
  }

  // -----------------------------------------------------------------------
  // Cache folder
  // -----------------------------------------------------------------------

  /// Establish the deterministic cache folder for a source without
  /// building anything.
  ///
  /// The builds do this themselves; call it directly when restoring from
  /// the whole-grid database or reading visibility before a build.
  pub fn open_cache(&mut self, source: &dyn VolumeSource) -> Result<(), GridError> {
    let cache = MeshCache::open(
      &self.config.cache_root,
      source.resource_name(),
      (self.blocks_x, self.blocks_y, self.blocks_z),
    )?;
    self.cache = Some(cache);
    Ok(())
  }

  // -----------------------------------------------------------------------
  // Full build
  // -----------------------------------------------------------------------

  /// Synchronous full build: initialize every block in parallel, mesh or
  /// cache-load the visible ones, pre-cache the rest.
  ///
  /// Blocks whose center lies inside the residency bounds are attached to
  /// the scene root; content-bearing blocks outside are built, cached for
  /// later streaming, and immediately released. A cache that cannot be
  /// opened degrades to an uncached build.
  pub fn create_from_source(
    &mut self,
    viewer_pos: DVec3,
    source: &dyn VolumeSource,
  ) -> Result<BuildStats, GridError> {
    let start = Instant::now();
    self.allocated_bounds = self.compute_world_bounds(viewer_pos);

    info!(num_blocks = self.num_blocks, "creating voxel grid");

    self.cache = match MeshCache::open(
      &self.config.cache_root,
      source.resource_name(),
      (self.blocks_x, self.blocks_y, self.blocks_z),
    ) {
      Ok(cache) => Some(cache),
      Err(e) => {
        error!(error = %e, "could not open mesh cache, building uncached");
        None
      }
    };

    let grid_offset = self.grid_offset;
    let block_dims = self.block_dimensions;
    let cell_dims = self.cell_dimensions;
    let counts = (self.blocks_x, self.blocks_y, self.blocks_z);
    let bounds = self.allocated_bounds;
    let lod = self.lod.clone();
    let cache = self.cache.as_ref();
    let num_blocks = self.num_blocks;

    let progress = AtomicUsize::new(0);
    let with_content = AtomicUsize::new(0);
    let cache_hits = AtomicUsize::new(0);
    let meshes_built = AtomicUsize::new(0);

    let (tx, rx) = crossbeam_channel::unbounded::<usize>();

    self
      .blocks
      .par_iter_mut()
      .enumerate()
      .for_each_with(tx, |tx, (index, block)| {
        let (x, y, z) = unflatten_index(index, counts);
        let origin = grid_offset + block_dims * DVec3::new(x as f64, y as f64, z as f64);
        block.init(block_dims, origin, cell_dims);

        let bb = Aabb::new(origin, origin + block_dims);
        if source.intersects(&bb) {
          with_content.fetch_add(1, Ordering::Relaxed);
          block.set_empty(false);

          let center = origin + block_dims * 0.5;
          if bounds.contains_point(center) {
            if cache.is_some_and(|c| block.load_cached_model(c, index)) {
              cache_hits.fetch_add(1, Ordering::Relaxed);
            } else {
              block.allocate_lod_mesh(source, &lod);
              meshes_built.fetch_add(1, Ordering::Relaxed);
              if let Some(c) = cache {
                block.save_cached_model(c, index);
              }
            }
            let _ = tx.send(index);
          } else if let Some(c) = cache {
            // Not in view: pre-build and cache for later streaming, then
            // release the memory.
            if !VoxelBlock::has_cached_model(c, index) {
              debug!(index, "caching block for later use");
              block.allocate_lod_mesh(source, &lod);
              meshes_built.fetch_add(1, Ordering::Relaxed);
              block.save_cached_model(c, index);
              block.deallocate();
            }
          }
        }

        let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(remaining = num_blocks - done, "voxel block processed");
      });

    let mut attach: Vec<usize> = rx.try_iter().collect();
    attach.sort_unstable();
    for index in attach {
      self.root.attach(index);
    }

    info!("done creating voxel grid");

    Ok(BuildStats {
      blocks_total: num_blocks,
      blocks_with_content: with_content.into_inner(),
      cache_hits: cache_hits.into_inner(),
      meshes_built: meshes_built.into_inner(),
      elapsed_us: start.elapsed().as_micros() as u64,
    })
  }

  // -----------------------------------------------------------------------
  // Paged build
  // -----------------------------------------------------------------------

  /// Paged build: every content-bearing block gets a deferred-load node
  /// backed by per-tier mesh files.
  ///
  /// Loads the persisted visibility bitmap when present, otherwise
  /// generates and persists it. Unlike [`create_from_source`], the cache
  /// folder is required — the entire point of a paged grid is its files.
  pub fn create_paged(
    &mut self,
    viewer_pos: DVec3,
    source: &dyn VolumeSource,
  ) -> Result<BuildStats, GridError> {
    let start = Instant::now();
    self.allocated_bounds = self.compute_world_bounds(viewer_pos);

    info!(num_blocks = self.num_blocks, "creating paged voxel grid");

    let cache = MeshCache::open(
      &self.config.cache_root,
      source.resource_name(),
      (self.blocks_x, self.blocks_y, self.blocks_z),
    )?;

    match cache.read_visibility(self.num_blocks) {
      Ok(flags) => {
        debug!("loaded block visibility cache");
        self.block_visibility = flags;
      }
      Err(e) => {
        debug!(error = %e, "no usable visibility cache, regenerating");
        self.generate_visibility(source);
        if let Err(e) = cache.write_visibility(&self.block_visibility) {
          error!(error = %e, "error writing visibility information");
        }
      }
    }

    let grid_offset = self.grid_offset;
    let block_dims = self.block_dimensions;
    let cell_dims = self.cell_dimensions;
    let counts = (self.blocks_x, self.blocks_y, self.blocks_z);
    let lod = self.lod.clone();
    let num_blocks = self.num_blocks;
    let visibility = &self.block_visibility;
    let cache_ref = &cache;

    let progress = AtomicUsize::new(0);
    let with_content = AtomicUsize::new(0);
    let cache_hits = AtomicUsize::new(0);
    let meshes_built = AtomicUsize::new(0);

    let (tx, rx) = crossbeam_channel::unbounded::<usize>();

    self
      .blocks
      .par_iter_mut()
      .enumerate()
      .for_each_with(tx, |tx, (index, block)| {
        let (x, y, z) = unflatten_index(index, counts);
        let origin = grid_offset + block_dims * DVec3::new(x as f64, y as f64, z as f64);
        block.init(block_dims, origin, cell_dims);

        if !visibility[index] {
          with_content.fetch_add(1, Ordering::Relaxed);
          if block.load_cached_model(cache_ref, index) {
            cache_hits.fetch_add(1, Ordering::Relaxed);
          } else {
            block.write_paged_lod(source, index, cache_ref, &lod);
            meshes_built.fetch_add(1, Ordering::Relaxed);
          }
          block.set_empty(false);
          let _ = tx.send(index);
        }

        let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(remaining = num_blocks - done, "voxel block processed");
      });

    let mut attach: Vec<usize> = rx.try_iter().collect();
    attach.sort_unstable();
    for index in attach {
      self.root.attach(index);
    }

    self.cache = Some(cache);

    info!("done creating paged voxel grid");

    Ok(BuildStats {
      blocks_total: num_blocks,
      blocks_with_content: with_content.into_inner(),
      cache_hits: cache_hits.into_inner(),
      meshes_built: meshes_built.into_inner(),
      elapsed_us: start.elapsed().as_micros() as u64,
    })
  }

  // -----------------------------------------------------------------------
  // Visibility
  // -----------------------------------------------------------------------

  /// Compute the per-block emptiness bitmap by querying the source over
  /// every block's box.
  ///
  /// Each block's query is read-only and independent, so the result is
  /// byte-identical for any parallel decomposition.
  pub fn generate_visibility(&mut self, source: &dyn VolumeSource) {
    info!("generating visibility");

    let grid_offset = self.grid_offset;
    let block_dims = self.block_dimensions;
    let counts = (self.blocks_x, self.blocks_y, self.blocks_z);
    let num_blocks = self.num_blocks;
    let progress = AtomicUsize::new(0);

    self.block_visibility = (0..num_blocks)
      .into_par_iter()
      .map(|index| {
        let (x, y, z) = unflatten_index(index, counts);
        let origin = grid_offset + block_dims * DVec3::new(x as f64, y as f64, z as f64);
        let bb = Aabb::new(origin, origin + block_dims);
        let empty = !source.intersects(&bb);

        let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(remaining = num_blocks - done, "visibility sample");
        empty
      })
      .collect();

    info!("done generating visibility");
  }

  /// Load the visibility bitmap from the established cache folder.
  pub fn read_block_visibility(&mut self) -> bool {
    let Some(cache) = &self.cache else {
      return false;
    };
    match cache.read_visibility(self.num_blocks) {
      Ok(flags) => {
        self.block_visibility = flags;
        true
      }
      Err(e) => {
        error!(error = %e, "error reading visibility data");
        false
      }
    }
  }

  /// Persist the visibility bitmap to the established cache folder.
  pub fn write_block_visibility(&self) -> bool {
    let Some(cache) = &self.cache else {
      return false;
    };
    match cache.write_visibility(&self.block_visibility) {
      Ok(()) => true,
      Err(e) => {
        error!(error = %e, "error writing visibility data");
        false
      }
    }
  }

  // -----------------------------------------------------------------------
  // Invalidation and streaming
  // -----------------------------------------------------------------------

  /// Invalidate every block overlapping `dirty`.
  ///
  /// Allocated blocks are rebuilt outright (coarse-grained invalidation);
  /// unallocated blocks are flagged dirty for regeneration when they next
  /// stream in.
  pub fn mark_dirty_aabb(&mut self, dirty: &Aabb, source: &dyn VolumeSource) {
    let (start, end) = self.overlapped_blocks(dirty);
    let lod = self.lod.clone();

    for z in start.2..end.2 {
      for y in start.1..end.1 {
        for x in start.0..end.0 {
          let index = self.flatten(x, y, z);
          let block = &mut self.blocks[index];
          if block.is_allocated() {
            block.deallocate();
            block.allocate_lod_mesh(source, &lod);
          } else {
            block.set_dirty(true);
          }
        }
      }
    }
  }

  /// Stream blocks in and out as the viewer moves.
  ///
  /// Walks the union of the previous and new residency bounds: blocks
  /// entering the new bounds are loaded from cache (or rebuilt when dirty
  /// or uncached) and attached; blocks leaving are deallocated and
  /// detached. Updates the residency bounds at the end.
  pub fn update(&mut self, viewer_pos: DVec3, source: &dyn VolumeSource) {
    let new_bounds = self.compute_world_bounds(viewer_pos);
    let old_bounds = self.allocated_bounds;
    let combined = old_bounds.union(&new_bounds);
    let (start, end) = self.overlapped_blocks(&combined);
    let lod = self.lod.clone();
    let cache = self.cache.clone();

    for z in start.2..end.2 {
      for y in start.1..end.1 {
        for x in start.0..end.0 {
          let index = self.flatten(x, y, z);
          let center = self.center_of_block(x, y, z);
          let in_new = new_bounds.contains_point(center);
          let in_old = old_bounds.contains_point(center);
          let block = &mut self.blocks[index];

          if in_new {
            if !block.is_empty() && !block.is_allocated() {
              let loaded = !block.is_dirty()
                && cache.as_ref().is_some_and(|c| block.load_cached_model(c, index));
              if !loaded {
                block.allocate_lod_mesh(source, &lod);
                if let Some(c) = &cache {
                  block.save_cached_model(c, index);
                }
              }
              self.root.attach(index);
            }
          } else if in_old && block.is_allocated() {
            block.deallocate();
            self.root.detach(index);
          }
        }
      }
    }

    self.allocated_bounds = new_bounds;
  }

  // -----------------------------------------------------------------------
  // Whole-grid database
  // -----------------------------------------------------------------------

  /// Persist every attached block node into one database file in the
  /// cache folder.
  pub fn save_database(&self) -> bool {
    let Some(cache) = &self.cache else {
      error!("no cache folder established, cannot write voxel database");
      return false;
    };

    let entries: Vec<(usize, &BlockNode)> = self
      .root
      .iter()
      .filter_map(|index| self.blocks[index].node().map(|node| (index, node)))
      .collect();

    match cache.save_database(&entries) {
      Ok(()) => {
        info!(blocks = entries.len(), "wrote master voxel database");
        true
      }
      Err(e) => {
        error!(error = %e, "error writing voxel database");
        false
      }
    }
  }

  /// Restore block nodes from the database file and attach them.
  pub fn load_database(&mut self) -> bool {
    let Some(cache) = &self.cache else {
      error!("no cache folder established, cannot read voxel database");
      return false;
    };

    let entries = match cache.load_database() {
      Ok(entries) => entries,
      Err(e) => {
        error!(error = %e, "error reading voxel database");
        return false;
      }
    };

    let count = entries.len();
    for (index, node) in entries {
      if index >= self.num_blocks {
        error!(index, "voxel database entry outside block range");
        continue;
      }
      self.blocks[index].adopt_node(node);
      self.root.attach(index);
    }

    info!(blocks = count, "read master voxel database");
    true
  }

  // -----------------------------------------------------------------------
  // Lookups and accessors
  // -----------------------------------------------------------------------

  /// Block by lattice coordinates; the flattened index is strictly
  /// range-checked against `[0, num_blocks)`.
  pub fn block_from_index(&self, x: i32, y: i32, z: i32) -> Option<&VoxelBlock> {
    let flat = (z as i64 * self.blocks_y as i64 * self.blocks_x as i64)
      + (y as i64 * self.blocks_x as i64)
      + x as i64;
    if flat < 0 || flat >= self.num_blocks as i64 {
      error!(x, y, z, "block index out of bounds");
      return None;
    }
    Some(&self.blocks[flat as usize])
  }

  /// Block by flattened index.
  pub fn block_at(&self, index: usize) -> Option<&VoxelBlock> {
    if index >= self.num_blocks {
      error!(index, "block index out of bounds");
      return None;
    }
    Some(&self.blocks[index])
  }

  /// Block containing a world-space position.
  ///
  /// Each axis is range-checked independently, so positions outside the
  /// grid on one axis cannot alias into a neighboring slab — and the first
  /// block resolves like any other.
  pub fn block_from_pos(&self, pos: DVec3) -> Option<&VoxelBlock> {
    let local = (pos - self.grid_offset) / self.block_dimensions;
    let (ix, iy, iz) = (
      local.x.floor() as i64,
      local.y.floor() as i64,
      local.z.floor() as i64,
    );

    if ix < 0 || iy < 0 || iz < 0 {
      return None;
    }
    if ix >= self.blocks_x as i64 || iy >= self.blocks_y as i64 || iz >= self.blocks_z as i64 {
      return None;
    }

    let flat = ((iz * self.blocks_y as i64 + iy) * self.blocks_x as i64 + ix) as usize;
    Some(&self.blocks[flat])
  }

  pub fn config(&self) -> &GridConfig {
    &self.config
  }

  pub fn lod_params(&self) -> &LodParams {
    &self.lod
  }

  pub fn grid_offset(&self) -> DVec3 {
    self.grid_offset
  }

  pub fn world_dimensions(&self) -> DVec3 {
    self.world_dimensions
  }

  pub fn block_dimensions(&self) -> DVec3 {
    self.block_dimensions
  }

  pub fn cell_dimensions(&self) -> DVec3 {
    self.cell_dimensions
  }

  /// Block counts per axis.
  pub fn block_counts(&self) -> (usize, usize, usize) {
    (self.blocks_x, self.blocks_y, self.blocks_z)
  }

  pub fn num_blocks(&self) -> usize {
    self.num_blocks
  }

  /// The block arena in flattened order.
  pub fn blocks(&self) -> &[VoxelBlock] {
    &self.blocks
  }

  /// The emptiness bitmap, if visibility has been generated or loaded.
  pub fn block_visibility(&self) -> &[bool] {
    &self.block_visibility
  }

  /// World box of blocks kept resident by the last build/update.
  pub fn allocated_bounds(&self) -> Aabb {
    self.allocated_bounds
  }

  /// The aggregate scene root.
  pub fn root(&self) -> &SceneRoot {
    &self.root
  }

  /// The cache folder established by the last build, if any.
  pub fn cache_folder(&self) -> Option<&Path> {
    self.cache.as_ref().map(MeshCache::folder)
  }

  /// The configured full-detail sampling resolution.
  pub fn texture_resolution(&self) -> UVec3 {
    self.config.texture_resolution
  }
}

/// Split a flattened block index into `(x, y, z)` lattice coordinates.
fn unflatten_index(index: usize, counts: (usize, usize, usize)) -> (usize, usize, usize) {
  let (bx, by, _) = counts;
  let x = index % bx;
  let y = (index / bx) % by;
  let z = index / (bx * by);
  (x, y, z)
}

#[cfg(test)]
#[path = "grid_test.rs"]
mod grid_test;
