//! Volume source collaborator contract.
//!
//! The grid and its blocks never generate or edit volumetric data; they ask
//! a [`VolumeSource`] two questions: "does any content intersect this box?"
//! and "give me the content overlapping this box, sampled on an N-per-axis
//! lattice". Sources must be safe to query concurrently from the parallel
//! build passes.

use glam::{DVec3, UVec3};

use crate::bounds::Aabb;

/// Thread-safe supplier of volumetric density data addressable by AABB.
pub trait VolumeSource: Send + Sync {
  /// Stable identity used to key the on-disk cache folder.
  ///
  /// Two sources with the same name and the same block partition share a
  /// cache folder, so the name must change whenever the content does.
  fn resource_name(&self) -> &str;

  /// True if any solid content intersects the given world-space AABB.
  fn intersects(&self, aabb: &Aabb) -> bool;

  /// Sample the content overlapping `aabb` on a `resolution` lattice.
  ///
  /// Returns `None` when no solid content intersects the box — the explicit
  /// empty result that lets callers skip meshing entirely.
  ///
  /// Samples are taken at voxel centers: sample `(x, y, z)` corresponds to
  /// world position `aabb.min + (coord + 0.5) * aabb.size() / resolution`.
  fn sample_region(&self, aabb: &Aabb, resolution: UVec3) -> Option<VolumeRegion>;
}

/// Blanket impl for boxed trait objects.
impl VolumeSource for Box<dyn VolumeSource> {
  fn resource_name(&self) -> &str {
    (**self).resource_name()
  }

  fn intersects(&self, aabb: &Aabb) -> bool {
    (**self).intersects(aabb)
  }

  fn sample_region(&self, aabb: &Aabb, resolution: UVec3) -> Option<VolumeRegion> {
    (**self).sample_region(aabb, resolution)
  }
}

/// A grid-sampled chunk of volumetric content covering one AABB.
///
/// Density convention follows signed-distance style sampling:
/// negative = inside/solid, positive = outside/air.
#[derive(Clone, Debug)]
pub struct VolumeRegion {
  aabb: Aabb,
  resolution: UVec3,
  /// Row-major density samples, x fastest-varying:
  /// `index = (z * ry + y) * rx + x`.
  samples: Vec<f32>,
}

impl VolumeRegion {
  /// Wrap a sample lattice.
  ///
  /// # Panics
  /// Panics if `samples.len()` does not match the resolution product.
  pub fn new(aabb: Aabb, resolution: UVec3, samples: Vec<f32>) -> Self {
    let expected = (resolution.x * resolution.y * resolution.z) as usize;
    assert_eq!(
      samples.len(),
      expected,
      "sample count must match resolution product"
    );
    Self {
      aabb,
      resolution,
      samples,
    }
  }

  /// World-space box this region covers.
  #[inline]
  pub fn aabb(&self) -> &Aabb {
    &self.aabb
  }

  /// Lattice resolution per axis.
  #[inline]
  pub fn resolution(&self) -> UVec3 {
    self.resolution
  }

  /// World-space size of one lattice voxel.
  #[inline]
  pub fn voxel_size(&self) -> DVec3 {
    self.aabb.size() / self.resolution.as_dvec3()
  }

  /// Density sample at lattice coordinates. Coordinates must be in range.
  #[inline]
  pub fn sample(&self, x: u32, y: u32, z: u32) -> f32 {
    debug_assert!(x < self.resolution.x && y < self.resolution.y && z < self.resolution.z);
    let idx = ((z * self.resolution.y + y) * self.resolution.x + x) as usize;
    self.samples[idx]
  }

  /// True if the lattice voxel at the given coordinates is solid.
  #[inline]
  pub fn is_solid(&self, x: u32, y: u32, z: u32) -> bool {
    self.sample(x, y, z) < 0.0
  }

  /// True if any lattice voxel is solid.
  pub fn any_solid(&self) -> bool {
    self.samples.iter().any(|&d| d < 0.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn region_1x1x2(samples: Vec<f32>) -> VolumeRegion {
    let aabb = Aabb::new(DVec3::ZERO, DVec3::new(1.0, 1.0, 2.0));
    VolumeRegion::new(aabb, UVec3::new(1, 1, 2), samples)
  }

  #[test]
  fn test_sample_indexing_x_fastest() {
    let aabb = Aabb::new(DVec3::ZERO, DVec3::splat(2.0));
    let res = UVec3::new(2, 2, 2);
    // x fastest: (0,0,0) (1,0,0) (0,1,0) (1,1,0) (0,0,1) ...
    let samples = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
    let region = VolumeRegion::new(aabb, res, samples);

    assert_eq!(region.sample(1, 0, 0), 1.0);
    assert_eq!(region.sample(0, 1, 0), 2.0);
    assert_eq!(region.sample(0, 0, 1), 4.0);
    assert_eq!(region.sample(1, 1, 1), 7.0);
  }

  #[test]
  fn test_solid_is_negative_density() {
    let region = region_1x1x2(vec![-0.5, 0.5]);
    assert!(region.is_solid(0, 0, 0));
    assert!(!region.is_solid(0, 0, 1));
    assert!(region.any_solid());
  }

  #[test]
  fn test_voxel_size() {
    let region = region_1x1x2(vec![0.0, 0.0]);
    assert_eq!(region.voxel_size(), DVec3::new(1.0, 1.0, 1.0));
  }

  #[test]
  #[should_panic(expected = "sample count must match")]
  fn test_mismatched_sample_count_panics() {
    region_1x1x2(vec![0.0; 3]);
  }
}
