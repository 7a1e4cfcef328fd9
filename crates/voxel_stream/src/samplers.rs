//! Simple analytic volume sources for testing and debugging.
//!
//! These sources implement deterministic mathematical densities that are
//! easy to verify. Use them to exercise grid construction and caching
//! without a real volumetric database.

use glam::{DVec3, UVec3};

use crate::bounds::Aabb;
use crate::source::{VolumeRegion, VolumeSource};

/// Evaluate an SDF at every voxel center of a lattice over `aabb`.
///
/// Returns `None` when no sample is solid, the explicit empty result
/// required by [`VolumeSource::sample_region`].
fn sample_sdf_region<F>(aabb: &Aabb, resolution: UVec3, sdf: F) -> Option<VolumeRegion>
where
  F: Fn(DVec3) -> f64,
{
  let step = aabb.size() / resolution.as_dvec3();
  let count = (resolution.x * resolution.y * resolution.z) as usize;
  let mut samples = Vec::with_capacity(count);
  let mut any_solid = false;

  for z in 0..resolution.z {
    for y in 0..resolution.y {
      for x in 0..resolution.x {
        let center = aabb.min
          + DVec3::new(
            (x as f64 + 0.5) * step.x,
            (y as f64 + 0.5) * step.y,
            (z as f64 + 0.5) * step.z,
          );
        let d = sdf(center);
        any_solid |= d < 0.0;
        samples.push(d as f32);
      }
    }
  }

  any_solid.then(|| VolumeRegion::new(*aabb, resolution, samples))
}

/// Sphere volume source.
///
/// Solid inside a sphere of `radius` around `center`. Simple test case with
/// radial symmetry.
#[derive(Clone)]
pub struct SphereSource {
  /// Center of the sphere in world coordinates.
  pub center: DVec3,
  /// Radius of the sphere.
  pub radius: f64,
  name: String,
}

impl SphereSource {
  pub fn new(center: DVec3, radius: f64) -> Self {
    Self {
      center,
      radius,
      name: "sphere".to_owned(),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  fn sdf(&self, p: DVec3) -> f64 {
    (p - self.center).length() - self.radius
  }
}

impl VolumeSource for SphereSource {
  fn resource_name(&self) -> &str {
    &self.name
  }

  fn intersects(&self, aabb: &Aabb) -> bool {
    // Distance from the sphere center to the closest point of the box.
    let closest = self.center.clamp(aabb.min, aabb.max);
    (closest - self.center).length() <= self.radius
  }

  fn sample_region(&self, aabb: &Aabb, resolution: UVec3) -> Option<VolumeRegion> {
    sample_sdf_region(aabb, resolution, |p| self.sdf(p))
  }
}

/// Axis-aligned solid box source.
#[derive(Clone)]
pub struct BoxSource {
  /// Center of the box.
  pub center: DVec3,
  /// Half-extents (half-size in each dimension).
  pub half_extents: DVec3,
  name: String,
}

impl BoxSource {
  pub fn new(center: DVec3, half_extents: DVec3) -> Self {
    Self {
      center,
      half_extents,
      name: "box".to_owned(),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  fn solid_aabb(&self) -> Aabb {
    Aabb::from_center_half_extents(self.center, self.half_extents)
  }

  fn sdf(&self, p: DVec3) -> f64 {
    let q = (p - self.center).abs() - self.half_extents;
    let outside = q.max(DVec3::ZERO).length();
    let inside = q.max_element().min(0.0);
    outside + inside
  }
}

impl VolumeSource for BoxSource {
  fn resource_name(&self) -> &str {
    &self.name
  }

  fn intersects(&self, aabb: &Aabb) -> bool {
    self.solid_aabb().overlaps(aabb)
  }

  fn sample_region(&self, aabb: &Aabb, resolution: UVec3) -> Option<VolumeRegion> {
    sample_sdf_region(aabb, resolution, |p| self.sdf(p))
  }
}

/// Half-space source: solid everywhere below `height` on the z axis.
///
/// Good baseline "ground" test.
#[derive(Clone)]
pub struct HalfSpaceSource {
  /// Height of the ground surface.
  pub height: f64,
  name: String,
}

impl HalfSpaceSource {
  pub fn new(height: f64) -> Self {
    Self {
      height,
      name: "halfspace".to_owned(),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }
}

impl VolumeSource for HalfSpaceSource {
  fn resource_name(&self) -> &str {
    &self.name
  }

  fn intersects(&self, aabb: &Aabb) -> bool {
    aabb.min.z < self.height
  }

  fn sample_region(&self, aabb: &Aabb, resolution: UVec3) -> Option<VolumeRegion> {
    sample_sdf_region(aabb, resolution, |p| p.z - self.height)
  }
}

/// Source with no content anywhere.
#[derive(Clone, Default)]
pub struct EmptySource;

impl VolumeSource for EmptySource {
  fn resource_name(&self) -> &str {
    "empty"
  }

  fn intersects(&self, _aabb: &Aabb) -> bool {
    false
  }

  fn sample_region(&self, _aabb: &Aabb, _resolution: UVec3) -> Option<VolumeRegion> {
    None
  }
}
