//! Smallest addressable volume unit within a block.
//!
//! A cell turns a sampled [`VolumeRegion`] into triangles. The extraction
//! scheme is deliberately simple — one quad per solid lattice voxel face
//! whose neighbor is empty or outside the region — and is the replaceable
//! part of the system: blocks only rely on the append/retain/deallocate
//! contract, not on how the triangles are produced.

use glam::DVec3;

use crate::mesh::MeshBuffers;
use crate::source::VolumeRegion;

/// Face directions as (neighbor offset, unit normal, corner table).
///
/// Corners are voxel-local (0/1 per axis), wound counter-clockwise when
/// viewed from outside.
const FACES: [([i32; 3], [f32; 3], [[f32; 3]; 4]); 6] = [
  // +X
  (
    [1, 0, 0],
    [1.0, 0.0, 0.0],
    [
      [1.0, 0.0, 0.0],
      [1.0, 1.0, 0.0],
      [1.0, 1.0, 1.0],
      [1.0, 0.0, 1.0],
    ],
  ),
  // -X
  (
    [-1, 0, 0],
    [-1.0, 0.0, 0.0],
    [
      [0.0, 0.0, 0.0],
      [0.0, 0.0, 1.0],
      [0.0, 1.0, 1.0],
      [0.0, 1.0, 0.0],
    ],
  ),
  // +Y
  (
    [0, 1, 0],
    [0.0, 1.0, 0.0],
    [
      [0.0, 1.0, 0.0],
      [0.0, 1.0, 1.0],
      [1.0, 1.0, 1.0],
      [1.0, 1.0, 0.0],
    ],
  ),
  // -Y
  (
    [0, -1, 0],
    [0.0, -1.0, 0.0],
    [
      [0.0, 0.0, 0.0],
      [1.0, 0.0, 0.0],
      [1.0, 0.0, 1.0],
      [0.0, 0.0, 1.0],
    ],
  ),
  // +Z
  (
    [0, 0, 1],
    [0.0, 0.0, 1.0],
    [
      [0.0, 0.0, 1.0],
      [1.0, 0.0, 1.0],
      [1.0, 1.0, 1.0],
      [0.0, 1.0, 1.0],
    ],
  ),
  // -Z
  (
    [0, 0, -1],
    [0.0, 0.0, -1.0],
    [
      [0.0, 0.0, 0.0],
      [0.0, 1.0, 0.0],
      [1.0, 1.0, 0.0],
      [1.0, 0.0, 0.0],
    ],
  ),
];

/// Surface color for extracted faces.
const FACE_COLOR: [f32; 3] = [0.8, 0.8, 0.8];

/// One cell of a block's cell arena.
///
/// Cells retain their own level-0 geometry so that a dirty-region pass can
/// rebuild just the affected cells and re-concatenate the tier; coarser
/// tiers are appended straight into shared buffers without retention.
#[derive(Clone, Debug, Default)]
pub struct VoxelCell {
  allocated: bool,
  mesh: Option<MeshBuffers>,
}

impl VoxelCell {
  pub fn new() -> Self {
    Self::default()
  }

  /// True once [`create_mesh`](Self::create_mesh) has run.
  pub fn is_allocated(&self) -> bool {
    self.allocated
  }

  /// The retained level-0 geometry, if any.
  pub fn mesh(&self) -> Option<&MeshBuffers> {
    self.mesh.as_ref()
  }

  /// Build and retain geometry for this cell's sub-region.
  ///
  /// Replaces any previously retained mesh.
  pub fn create_mesh(&mut self, region: &VolumeRegion) {
    let mut mesh = MeshBuffers::new();
    extract_faces(region, &mut mesh);
    self.mesh = Some(mesh);
    self.allocated = true;
  }

  /// Append this cell's geometry into shared buffers without retaining it.
  pub fn add_geometry(&self, region: &VolumeRegion, out: &mut MeshBuffers) {
    extract_faces(region, out);
  }

  /// Release retained geometry. Safe to call repeatedly.
  pub fn deallocate(&mut self) {
    self.mesh = None;
    self.allocated = false;
  }
}

/// Emit one quad per solid voxel face with an empty (or out-of-region)
/// neighbor.
fn extract_faces(region: &VolumeRegion, out: &mut MeshBuffers) {
  let res = region.resolution();
  let origin = region.aabb().min;
  let step = region.voxel_size();

  for z in 0..res.z {
    for y in 0..res.y {
      for x in 0..res.x {
        if !region.is_solid(x, y, z) {
          continue;
        }
        for (offset, normal, corners) in &FACES {
          if solid_neighbor(region, x as i32 + offset[0], y as i32 + offset[1], z as i32 + offset[2])
          {
            continue;
          }
          push_face(out, origin, step, [x, y, z], normal, corners);
        }
      }
    }
  }
}

/// Neighbor solidity; anything outside the region counts as empty.
fn solid_neighbor(region: &VolumeRegion, x: i32, y: i32, z: i32) -> bool {
  let res = region.resolution();
  if x < 0 || y < 0 || z < 0 {
    return false;
  }
  let (x, y, z) = (x as u32, y as u32, z as u32);
  if x >= res.x || y >= res.y || z >= res.z {
    return false;
  }
  region.is_solid(x, y, z)
}

fn push_face(
  out: &mut MeshBuffers,
  origin: DVec3,
  step: DVec3,
  voxel: [u32; 3],
  normal: &[f32; 3],
  corners: &[[f32; 3]; 4],
) {
  let base = out.positions.len() as u32;
  let voxel_min = origin
    + DVec3::new(
      voxel[0] as f64 * step.x,
      voxel[1] as f64 * step.y,
      voxel[2] as f64 * step.z,
    );

  for corner in corners {
    let p = voxel_min
      + DVec3::new(
        corner[0] as f64 * step.x,
        corner[1] as f64 * step.y,
        corner[2] as f64 * step.z,
      );
    out.positions.push([p.x as f32, p.y as f32, p.z as f32]);
    out.normals.push(*normal);
    out.colors.push(FACE_COLOR);
  }

  out
    .indices
    .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}
