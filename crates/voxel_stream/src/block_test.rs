use glam::{DVec3, UVec3};
use tempfile::TempDir;

use super::*;
use crate::config::GridConfig;
use crate::samplers::{BoxSource, EmptySource};

/// Small tier resolutions keep these tests fast: 4 -> 3 -> 2 -> 2.
fn lod() -> LodParams {
  let config = GridConfig::default().with_texture_resolution(UVec3::splat(4));
  LodParams::derive(&config)
}

/// A 10^3 block at the origin with 5^3 cells (3 cells per axis with the
/// high-side padding cell).
fn block() -> VoxelBlock {
  let mut block = VoxelBlock::new();
  block.init(DVec3::splat(10.0), DVec3::ZERO, DVec3::splat(5.0));
  block
}

/// A solid box filling the middle of the block.
fn content() -> BoxSource {
  BoxSource::new(DVec3::splat(5.0), DVec3::splat(3.0))
}

fn cache() -> (TempDir, MeshCache) {
  let dir = TempDir::new().expect("create temp dir");
  let cache = MeshCache::open(dir.path(), "block-test", (1, 1, 1)).expect("open cache");
  (dir, cache)
}

// =============================================================================
// Init and cell arena
// =============================================================================

#[test]
fn test_init_cell_counts_include_high_side_padding() {
  let block = block();
  assert_eq!(block.cell_counts(), UVec3::splat(3), "floor(10/5) + 1");
  assert_eq!(block.num_cells(), 27);

  // Non-even division still gets exactly one padding cell.
  let mut uneven = VoxelBlock::new();
  uneven.init(DVec3::splat(10.0), DVec3::ZERO, DVec3::splat(3.0));
  assert_eq!(uneven.cell_counts(), UVec3::splat(4), "floor(10/3) + 1");
}

#[test]
fn test_fresh_block_state() {
  let block = block();
  assert!(!block.is_allocated());
  assert!(!block.is_dirty());
  assert!(block.is_empty());
  assert!(block.node().is_none());
  assert_eq!(block.offset(), DVec3::ZERO);
  assert_eq!(block.world_dimensions(), DVec3::splat(10.0));
}

// =============================================================================
// Allocation
// =============================================================================

/// A source with no content anywhere still yields an allocated block, just
/// with zero geometry in every tier.
#[test]
fn test_allocate_with_empty_source_yields_zero_geometry() {
  let mut block = block();
  block.allocate_lod_mesh(&EmptySource, &lod());

  assert!(block.is_allocated());
  let node = block.node().expect("node attached after allocate");
  let lod_mesh = node.lod().expect("combined node has in-memory lod");
  assert_eq!(lod_mesh.tiers.len(), 4);
  assert!(lod_mesh.is_empty(), "no tier should contain geometry");
}

#[test]
fn test_allocate_with_content_produces_all_tiers() {
  let mut block = block();
  let params = lod();
  block.allocate_lod_mesh(&content(), &params);

  assert!(block.is_allocated());
  let lod_mesh = block.node().and_then(BlockNode::lod).expect("lod mesh");
  assert_eq!(lod_mesh.tiers.len(), 4);
  for (tier, entry) in lod_mesh.tiers.iter().enumerate() {
    assert_eq!(entry.range, params.range(tier));
    assert!(
      !entry.mesh.is_empty(),
      "tier {tier} should have geometry for a solid box"
    );
  }
}

#[test]
fn test_allocate_clears_dirty_flag() {
  let mut block = block();
  block.set_dirty(true);
  block.allocate_lod_mesh(&content(), &lod());
  assert!(!block.is_dirty());
}

// =============================================================================
// Deallocation
// =============================================================================

#[test]
fn test_deallocate_twice_is_idempotent() {
  let mut block = block();
  block.allocate_lod_mesh(&content(), &lod());
  assert!(block.is_allocated());

  block.deallocate();
  assert!(!block.is_allocated());
  assert!(block.node().is_none());
  assert!(block.cell_from_index(0, 0, 0).is_none(), "cell arena freed");

  // Second call must be a no-op, not a crash.
  block.deallocate();
  assert!(!block.is_allocated());
  assert!(block.node().is_none());
}

#[test]
fn test_deallocate_preserves_spatial_parameters() {
  let mut block = VoxelBlock::new();
  block.init(DVec3::splat(10.0), DVec3::new(20.0, 0.0, 0.0), DVec3::splat(5.0));
  block.allocate_lod_mesh(&EmptySource, &lod());
  block.deallocate();

  assert_eq!(block.offset(), DVec3::new(20.0, 0.0, 0.0));
  assert_eq!(block.world_dimensions(), DVec3::splat(10.0));
  assert_eq!(block.cell_counts(), UVec3::splat(3));
}

// =============================================================================
// Partial regeneration
// =============================================================================

#[test]
fn test_regenerate_without_allocation_reports_error() {
  let mut block = block();
  let dirty = Aabb::new(DVec3::ZERO, DVec3::splat(5.0));

  let result = block.regenerate_aabb(&content(), &dirty, UVec3::splat(4));
  assert!(matches!(result, Err(GridError::Unallocated)));
  assert!(!block.is_allocated(), "failed regenerate changes nothing");
}

#[test]
fn test_regenerate_rebuilds_overlapping_cells() {
  let mut block = block();
  // Allocate against an empty source: tier 0 exists but holds nothing.
  block.allocate_lod_mesh(&EmptySource, &lod());
  let before = block
    .node()
    .and_then(BlockNode::lod)
    .map(|l| l.tiers[0].mesh.triangle_count())
    .expect("tier 0 present");
  assert_eq!(before, 0);

  // Content appeared in the block's region; regenerate the whole box.
  let dirty = Aabb::new(DVec3::ZERO, DVec3::splat(10.0));
  block
    .regenerate_aabb(&content(), &dirty, UVec3::splat(4))
    .expect("regenerate succeeds on allocated block");

  let after = block
    .node()
    .and_then(BlockNode::lod)
    .map(|l| l.tiers[0].mesh.triangle_count())
    .expect("tier 0 present");
  assert!(after > 0, "tier 0 should pick up the new content");
  assert!(!block.is_dirty());
}

#[test]
fn test_regenerate_touches_only_dirty_cells() {
  let mut block = block();
  let params = lod();
  block.allocate_lod_mesh(&content(), &params);
  let full = block
    .node()
    .and_then(BlockNode::lod)
    .map(|l| l.tiers[0].mesh.triangle_count())
    .expect("tier 0");

  // Regenerating a region against the same source must be a fixpoint.
  let dirty = Aabb::new(DVec3::ZERO, DVec3::splat(5.0));
  block
    .regenerate_aabb(&content(), &dirty, params.resolution(0))
    .expect("regenerate");

  let after = block
    .node()
    .and_then(BlockNode::lod)
    .map(|l| l.tiers[0].mesh.triangle_count())
    .expect("tier 0");
  assert_eq!(full, after);
}

// =============================================================================
// Cell lookups
// =============================================================================

#[test]
fn test_cell_from_index_matches_flat_layout() {
  let mut block = block();
  block.allocate_lod_mesh(&content(), &lod());

  // (1, 2, 0) flattens to 2*3 + 1 = 7 in a 3x3x3 arena.
  let by_coord = block.cell_from_index(1, 2, 0).expect("valid coords");
  let counts = block.cell_counts();
  let flat = (2 * counts.x + 1) as i32;
  let by_flat = block
    .cell_from_index(flat % 3, (flat / 3) % 3, flat / 9)
    .expect("same cell");
  assert!(std::ptr::eq(by_coord, by_flat));
}

#[test]
fn test_cell_from_index_out_of_bounds() {
  let mut block = block();
  block.allocate_lod_mesh(&content(), &lod());

  assert!(block.cell_from_index(-1, 0, 0).is_none());
  assert!(block.cell_from_index(0, 0, 3).is_none(), "flat index past end");
}

/// The first cell must resolve by position; a lookup left of the block
/// origin must not.
#[test]
fn test_cell_from_pos_resolves_first_cell() {
  let mut block = block();
  block.allocate_lod_mesh(&content(), &lod());

  let first = block.cell_from_pos(DVec3::splat(0.1)).expect("first cell");
  let by_index = block.cell_from_index(0, 0, 0).expect("index 0");
  assert!(std::ptr::eq(first, by_index));

  assert!(block.cell_from_pos(DVec3::splat(-0.1)).is_none());
}

#[test]
fn test_cell_from_pos_reaches_padding_cell() {
  let mut block = block();
  block.allocate_lod_mesh(&content(), &lod());

  // 3 cells of size 5 cover [0, 15); position 12 lands in the padding cell.
  let padded = block.cell_from_pos(DVec3::new(12.0, 1.0, 1.0)).expect("padding cell");
  let by_index = block.cell_from_index(2, 0, 0).expect("index (2,0,0)");
  assert!(std::ptr::eq(padded, by_index));

  assert!(block.cell_from_pos(DVec3::new(16.0, 1.0, 1.0)).is_none());
}

// =============================================================================
// Caching
// =============================================================================

#[test]
fn test_cached_model_roundtrip() {
  let (_dir, cache) = cache();
  let mut original = block();
  original.allocate_lod_mesh(&content(), &lod());
  let built = original
    .node()
    .and_then(BlockNode::lod)
    .map(LodMesh::triangle_count)
    .expect("geometry");

  assert!(!VoxelBlock::has_cached_model(&cache, 0));
  assert!(original.save_cached_model(&cache, 0));
  assert!(VoxelBlock::has_cached_model(&cache, 0));

  let mut restored = block();
  assert!(restored.load_cached_model(&cache, 0));
  assert!(restored.is_allocated());
  let node = restored.node().expect("node attached");
  assert!(
    matches!(node, BlockNode::Cached { .. }),
    "loaded geometry is a cached subtree"
  );
  assert_eq!(node.lod().map(LodMesh::triangle_count), Some(built));
}

#[test]
fn test_load_cached_model_missing_returns_false() {
  let (_dir, cache) = cache();
  let mut block = block();
  assert!(!block.load_cached_model(&cache, 42));
  assert!(!block.is_allocated());
}

#[test]
fn test_save_without_node_returns_false() {
  let (_dir, cache) = cache();
  let block = block();
  assert!(!block.save_cached_model(&cache, 0));
  assert!(!VoxelBlock::has_cached_model(&cache, 0));
}

#[test]
fn test_save_cached_tier_returns_exact_file_name() {
  let (_dir, cache) = cache();
  let mesh = MeshBuffers::new();

  let name = VoxelBlock::save_cached_tier(&cache, &mesh, (0.0, 100.0), 3, 1);
  assert_eq!(name.as_deref(), Some("VoxelGrid_cache00000003_lod001.vxm"));
  assert!(cache.folder().join(name.expect("name")).exists());
}

// =============================================================================
// Paged LOD
// =============================================================================

#[test]
fn test_write_paged_lod_writes_tier_files() {
  let (_dir, cache) = cache();
  let mut block = block();
  let params = lod();
  block.write_paged_lod(&content(), 3, &cache, &params);

  assert!(block.is_allocated());
  let node = block.node().expect("node attached");
  let BlockNode::Paged(paged) = node else {
    panic!("paged build should attach a paged node");
  };

  assert_eq!(paged.tiers.len(), 4);
  assert_eq!(paged.database_path, cache.folder());
  assert_eq!(paged.center, DVec3::splat(5.0));
  for (tier, entry) in paged.tiers.iter().enumerate() {
    assert_eq!(entry.file_name, MeshCache::tier_file_name(3, tier));
    assert_eq!(entry.range, params.range(tier));
    assert!(cache.folder().join(&entry.file_name).exists());
  }

  // The whole-block file is written as well.
  assert!(VoxelBlock::has_cached_model(&cache, 3));
}

#[test]
fn test_paged_tier_files_load_back() {
  let (_dir, cache) = cache();
  let mut block = block();
  let params = lod();
  block.write_paged_lod(&content(), 0, &cache, &params);

  let ((near, far), mesh) = cache.load_tier(0, 0).expect("tier 0 readable");
  assert_eq!((near, far), params.range(0));
  assert!(!mesh.is_empty());
}
