use std::fs;

use glam::DVec3;
use smallvec::SmallVec;
use tempfile::TempDir;

use super::*;
use crate::mesh::{BlockNode, LodMesh, LodTier, MeshBuffers, PagedLod, PagedTier};

fn open_cache() -> (TempDir, MeshCache) {
  let dir = TempDir::new().expect("create temp dir");
  let cache = MeshCache::open(dir.path(), "test", (2, 3, 4)).expect("open cache");
  (dir, cache)
}

fn small_mesh() -> MeshBuffers {
  MeshBuffers {
    positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    normals: vec![[0.0, 0.0, 1.0]; 3],
    colors: vec![[0.5, 0.5, 0.5]; 3],
    indices: vec![0, 1, 2],
  }
}

fn assert_mesh_eq(a: &MeshBuffers, b: &MeshBuffers) {
  assert_eq!(a.positions, b.positions);
  assert_eq!(a.normals, b.normals);
  assert_eq!(a.colors, b.colors);
  assert_eq!(a.indices, b.indices);
}

fn combined_node() -> BlockNode {
  let mut lod = LodMesh::default();
  lod.tiers.push(LodTier {
    range: (0.0, 100.0),
    mesh: small_mesh(),
  });
  lod.tiers.push(LodTier {
    range: (100.0, 300.0),
    mesh: MeshBuffers::new(),
  });
  BlockNode::Combined(lod)
}

// =============================================================================
// Folder and file naming
// =============================================================================

/// Same source + same partition must resolve to the same folder, with the
/// block counts delimited so distinct partitions cannot collide.
#[test]
fn test_folder_name_delimits_counts() {
  let (_dir, cache) = open_cache();
  let name = cache
    .folder()
    .file_name()
    .and_then(|n| n.to_str())
    .expect("folder name");
  assert_eq!(name, "test_2_3_4");
  assert!(cache.folder().is_dir(), "open should create the folder");
}

#[test]
fn test_file_name_formats() {
  assert_eq!(
    MeshCache::paged_file_name(3),
    "VoxelGrid_cache00000003_paged.vxm"
  );
  assert_eq!(
    MeshCache::tier_file_name(3, 1),
    "VoxelGrid_cache00000003_lod001.vxm"
  );
  assert_eq!(
    MeshCache::tier_file_name(12345678, 12),
    "VoxelGrid_cache12345678_lod012.vxm"
  );
}

#[test]
fn test_save_tier_creates_named_file() {
  let (_dir, cache) = open_cache();
  let mesh = small_mesh();

  let name = cache
    .save_tier(3, 1, (0.0, 100.0), &mesh)
    .expect("tier write");
  assert_eq!(name, "VoxelGrid_cache00000003_lod001.vxm");
  assert!(cache.folder().join(&name).exists());

  let (range, restored) = cache.load_tier(3, 1).expect("tier read");
  assert_eq!(range, (0.0, 100.0));
  assert_mesh_eq(&mesh, &restored);
}

// =============================================================================
// Visibility bitmap
// =============================================================================

#[test]
fn test_visibility_roundtrip() {
  let (_dir, cache) = open_cache();
  let flags = vec![true, false, true, true, false, false, true];

  cache.write_visibility(&flags).expect("write visibility");
  let restored = cache.read_visibility(flags.len()).expect("read visibility");
  assert_eq!(flags, restored);
}

#[test]
fn test_visibility_roundtrip_empty() {
  let (_dir, cache) = open_cache();
  cache.write_visibility(&[]).expect("write visibility");
  let restored = cache.read_visibility(0).expect("read visibility");
  assert!(restored.is_empty());
}

#[test]
fn test_visibility_layout_matches_format() {
  let (_dir, cache) = open_cache();
  cache.write_visibility(&[true, false]).expect("write");

  let bytes = fs::read(cache.folder().join(VISIBILITY_FILE_NAME)).expect("read raw");
  assert_eq!(bytes[0], b'!', "start marker");
  assert_eq!(
    i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
    99834,
    "magic number"
  );
  assert_eq!(
    i32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
    2,
    "block count"
  );
  assert_eq!(&bytes[9..], &[1, 0]);
}

#[test]
fn test_visibility_rejects_bad_marker() {
  let (_dir, cache) = open_cache();
  fs::write(cache.folder().join(VISIBILITY_FILE_NAME), b"garbage data here").expect("write");

  let result = cache.read_visibility(4);
  assert!(
    matches!(result, Err(CacheError::BadMagic { .. })),
    "expected BadMagic, got {result:?}"
  );
}

#[test]
fn test_visibility_missing_file_is_error() {
  let (_dir, cache) = open_cache();
  assert!(matches!(
    cache.read_visibility(4),
    Err(CacheError::Io { .. })
  ));
}

/// A stored count that disagrees with the grid is reported but tolerated:
/// flags are padded with "has content" so affected blocks get rebuilt.
#[test]
fn test_visibility_count_mismatch_pads_with_content() {
  let (_dir, cache) = open_cache();
  cache
    .write_visibility(&[true, true, true, true])
    .expect("write");

  let restored = cache.read_visibility(6).expect("read");
  assert_eq!(restored.len(), 6);
  assert_eq!(&restored[..4], &[true, true, true, true]);
  assert_eq!(&restored[4..], &[false, false]);
}

// =============================================================================
// Block nodes
// =============================================================================

#[test]
fn test_block_node_roundtrip_combined() {
  let (_dir, cache) = open_cache();
  let node = combined_node();

  assert!(!cache.has_block(5));
  cache.save_block(5, &node).expect("save block");
  assert!(cache.has_block(5));

  let restored = cache.load_block(5).expect("load block");
  let BlockNode::Cached { path, lod } = restored else {
    panic!("combined payload should load as a cached subtree");
  };
  assert_eq!(path, cache.paged_path(5));
  assert_eq!(lod.tiers.len(), 2);
  assert_eq!(lod.tiers[0].range, (0.0, 100.0));
  assert_mesh_eq(&lod.tiers[0].mesh, &small_mesh());
  assert!(lod.tiers[1].mesh.is_empty());
}

#[test]
fn test_block_node_roundtrip_paged() {
  let (_dir, cache) = open_cache();
  let mut tiers = SmallVec::new();
  tiers.push(PagedTier {
    file_name: MeshCache::tier_file_name(5, 0),
    range: (0.0, 100.0),
  });
  tiers.push(PagedTier {
    file_name: MeshCache::tier_file_name(5, 1),
    range: (100.0, 300.0),
  });
  let paged = PagedLod {
    database_path: cache.folder().to_owned(),
    center: DVec3::new(5.0, 5.0, 5.0),
    radius: 34.6,
    tiers,
  };

  cache
    .save_block(5, &BlockNode::Paged(paged.clone()))
    .expect("save block");

  let restored = cache.load_block(5).expect("load block");
  let BlockNode::Paged(restored) = restored else {
    panic!("paged payload should load as a paged node");
  };
  assert_eq!(restored, paged);
}

#[test]
fn test_load_missing_block_is_error() {
  let (_dir, cache) = open_cache();
  assert!(matches!(cache.load_block(9), Err(CacheError::Io { .. })));
}

#[test]
fn test_truncated_block_file_is_error() {
  let (_dir, cache) = open_cache();
  cache.save_block(5, &combined_node()).expect("save block");

  let path = cache.paged_path(5);
  let mut bytes = fs::read(&path).expect("read raw");
  bytes.truncate(bytes.len() / 2);
  fs::write(&path, bytes).expect("rewrite");

  let result = cache.load_block(5);
  assert!(
    matches!(result, Err(CacheError::Truncated { .. })),
    "expected Truncated, got {result:?}"
  );
}

#[test]
fn test_corrupt_magic_is_error() {
  let (_dir, cache) = open_cache();
  fs::write(cache.paged_path(5), b"NOPE\x01\x01rest").expect("write");
  assert!(matches!(
    cache.load_block(5),
    Err(CacheError::BadMagic { .. })
  ));
}

// =============================================================================
// Whole-grid database
// =============================================================================

#[test]
fn test_database_roundtrip() {
  let (_dir, cache) = open_cache();
  let node_a = combined_node();
  let node_b = combined_node();

  cache
    .save_database(&[(0, &node_a), (7, &node_b)])
    .expect("save database");
  assert!(cache.database_path().exists());

  let entries = cache.load_database().expect("load database");
  assert_eq!(entries.len(), 2);
  assert_eq!(entries[0].0, 0);
  assert_eq!(entries[1].0, 7);

  let BlockNode::Cached { lod, .. } = &entries[1].1 else {
    panic!("database entries restore as cached subtrees");
  };
  assert_eq!(lod.tiers.len(), 2);
}

#[test]
fn test_empty_database_roundtrip() {
  let (_dir, cache) = open_cache();
  cache.save_database(&[]).expect("save database");
  assert!(cache.load_database().expect("load database").is_empty());
}
