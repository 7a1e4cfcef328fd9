//! Grid configuration and derived LOD parameters.

use std::path::PathBuf;

use glam::UVec3;

/// Number of discrete LOD tiers every block carries.
pub const LOD_TIER_COUNT: usize = 4;

/// Scale factor applied to the sampling resolution between adjacent tiers.
const TIER_RESOLUTION_SCALE: f64 = 0.75;

/// Configuration for a [`VoxelGrid`](crate::grid::VoxelGrid).
///
/// The cache root is an explicit value threaded in here rather than a
/// process-wide context lookup, so two grids can cache into different
/// locations within one process.
#[derive(Clone, Debug)]
pub struct GridConfig {
  /// Maximum distance at which block geometry is kept resident.
  pub view_distance: f64,

  /// Upper bound of the tier-0 (full detail) distance range.
  pub dist0: f64,

  /// Upper bound of the tier-1 distance range.
  pub dist1: f64,

  /// Upper bound of the tier-2 distance range.
  pub dist2: f64,

  /// Sampling resolution of the full-detail tier, per axis.
  pub texture_resolution: UVec3,

  /// Base directory under which per-source cache folders are created.
  pub cache_root: PathBuf,
}

impl Default for GridConfig {
  fn default() -> Self {
    Self {
      view_distance: 1000.0,
      dist0: 100.0,
      dist1: 300.0,
      dist2: 550.0,
      texture_resolution: UVec3::splat(32),
      cache_root: PathBuf::from("Volumes/cache"),
    }
  }
}

impl GridConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_view_distance(mut self, view_distance: f64) -> Self {
    self.view_distance = view_distance;
    self
  }

  pub fn with_lod_distances(mut self, dist0: f64, dist1: f64, dist2: f64) -> Self {
    self.dist0 = dist0;
    self.dist1 = dist1;
    self.dist2 = dist2;
    self
  }

  pub fn with_texture_resolution(mut self, resolution: UVec3) -> Self {
    self.texture_resolution = resolution;
    self
  }

  pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.cache_root = root.into();
    self
  }

  /// Validates distance ordering and resolution.
  ///
  /// Returns a human-readable description of the first problem found.
  pub fn validate(&self) -> Result<(), String> {
    if self.texture_resolution.min_element() == 0 {
      return Err("texture resolution must be non-zero on every axis".into());
    }
    if !(self.dist0 > 0.0 && self.dist0 < self.dist1 && self.dist1 < self.dist2) {
      return Err("LOD distances must satisfy 0 < dist0 < dist1 < dist2".into());
    }
    if self.dist2 >= self.view_distance {
      return Err("view distance must exceed the last LOD distance".into());
    }
    Ok(())
  }
}

/// Derived per-tier sampling resolutions and selection distance ranges.
///
/// Tier 0 samples at the configured texture resolution; each coarser tier
/// samples at 0.75x the previous one (floored), with tier 3 biased up by
/// one sample so it never collapses to zero.
#[derive(Clone, Debug)]
pub struct LodParams {
  resolutions: [UVec3; LOD_TIER_COUNT],
  ranges: [(f64, f64); LOD_TIER_COUNT],
}

impl LodParams {
  /// Derive tier parameters from a validated config.
  pub fn derive(config: &GridConfig) -> Self {
    let res0 = config.texture_resolution;
    let res1 = scale_resolution(res0);
    let res2 = scale_resolution(res1);
    let res3 = scale_resolution(res2) + UVec3::ONE;

    Self {
      resolutions: [res0, res1, res2, res3],
      ranges: [
        (0.0, config.dist0),
        (config.dist0, config.dist1),
        (config.dist1, config.dist2),
        (config.dist2, config.view_distance),
      ],
    }
  }

  /// Sampling resolution of the given tier.
  #[inline]
  pub fn resolution(&self, tier: usize) -> UVec3 {
    self.resolutions[tier]
  }

  /// `[near, far)` selection range of the given tier.
  #[inline]
  pub fn range(&self, tier: usize) -> (f64, f64) {
    self.ranges[tier]
  }
}

fn scale_resolution(res: UVec3) -> UVec3 {
  (res.as_dvec3() * TIER_RESOLUTION_SCALE).floor().as_uvec3()
}
