//! voxel_stream - sparse volumetric LOD streaming
//!
//! A 3D grid of fixed-size spatial blocks, each subdivided into cells, that
//! lazily builds, caches, and meshes volumetric data for real-time
//! rendering at viewer-distance-dependent level of detail.
//!
//! # Features
//!
//! - **Sparse construction**: empty regions are detected through the volume
//!   source and cost nothing beyond the query
//! - **Four LOD tiers** per block, each sampled 0.75x coarser than the
//!   previous, selected by viewer distance ranges
//! - **Disk caching**: deterministic per-block/per-tier mesh files plus a
//!   persisted block-visibility bitmap
//! - **Parallel builds**: blocks are independent and processed with rayon;
//!   results are identical for any worker count
//!
//! # Example
//!
//! ```no_run
//! use glam::DVec3;
//! use voxel_stream::{GridConfig, SphereSource, VoxelGrid};
//!
//! let source = SphereSource::new(DVec3::new(50.0, 50.0, 25.0), 20.0);
//!
//! let mut grid = VoxelGrid::new(
//!     DVec3::ZERO,                  // grid offset
//!     DVec3::new(100.0, 100.0, 50.0), // world dimensions
//!     DVec3::splat(10.0),           // block dimensions
//!     DVec3::splat(2.5),            // cell dimensions
//!     GridConfig::default(),
//! )
//! .expect("valid grid parameters");
//!
//! let stats = grid.create_from_source(DVec3::new(50.0, 50.0, 25.0), &source)?;
//! println!("built {} meshes, {} cache hits", stats.meshes_built, stats.cache_hits);
//!
//! // Render collaborator: walk the attached blocks.
//! for index in grid.root().iter() {
//!     let _node = grid.block_at(index).and_then(|b| b.node());
//! }
//! # Ok::<(), voxel_stream::GridError>(())
//! ```

pub mod bounds;
pub mod config;
pub mod error;

// Re-export commonly used items
pub use bounds::Aabb;
pub use config::{GridConfig, LodParams, LOD_TIER_COUNT};
pub use error::GridError;

// Volume source collaborator contract
pub mod source;
pub use source::{VolumeRegion, VolumeSource};

// Analytic sources for tests and demos
pub mod samplers;
pub use samplers::{BoxSource, EmptySource, HalfSpaceSource, SphereSource};

// Geometry containers
pub mod mesh;
pub use mesh::{BlockNode, LodMesh, LodTier, MeshBuffers, PagedLod, PagedTier};

// Cell-level mesh extraction
pub mod cell;
pub use cell::VoxelCell;

// Disk cache for meshes and the visibility bitmap
pub mod cache;
pub use cache::{CacheError, MeshCache};

// Block: fixed-size partition with 4-tier LOD geometry
pub mod block;
pub use block::VoxelBlock;

// Grid: partitioning, streaming, parallel construction
pub mod grid;
pub use grid::{BuildStats, SceneRoot, VoxelGrid};
