//! File-backed cache for serialized block meshes and the visibility bitmap.
//!
//! All files live in one folder derived deterministically from the volume
//! source identity and the block partition, so the same source with the
//! same partition always resolves to the same cache:
//!
//! ```text
//! <cache_root>/<resource>_<bx>_<by>_<bz>/
//!     VisibilityCache.dat                    per-block emptiness bitmap
//!     VoxelGrid_cache<index:8>_paged.vxm     whole-block node
//!     VoxelGrid_cache<index:8>_lod<tier:3>.vxm  single-tier mesh
//!     VoxelGridDatabase.vxm                  whole-grid database
//! ```
//!
//! ## Visibility bitmap layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | Start marker `'!'` (0x21) |
//! | 1 | 4 | Magic number `99834` (`i32`, little-endian) |
//! | 5 | 4 | Block count (`i32`, little-endian) |
//! | 9 | N | One byte (0/1) per block, arena order |
//!
//! ## Mesh file layout (VXMB)
//!
//! Magic `VXMB`, format version (`u8`), payload kind (`u8`), then the
//! kind-specific payload with little-endian integers and floats. Corrupt or
//! truncated files fail parsing and are treated by callers as not cached.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::mesh::{BlockNode, LodMesh, LodTier, MeshBuffers, PagedLod, PagedTier};

/// File name of the per-block visibility bitmap.
pub const VISIBILITY_FILE_NAME: &str = "VisibilityCache.dat";

/// File name of the whole-grid database.
pub const DATABASE_FILE_NAME: &str = "VoxelGridDatabase.vxm";

const VISIBILITY_MARKER: u8 = b'!';
const VISIBILITY_MAGIC: i32 = 99834;

/// Magic bytes identifying VXMB mesh files.
const MESH_MAGIC: [u8; 4] = *b"VXMB";

/// Current mesh format version.
const MESH_FORMAT_VERSION: u8 = 1;

const KIND_BLOCK: u8 = 1;
const KIND_TIER: u8 = 2;
const KIND_DATABASE: u8 = 3;

const NODE_COMBINED: u8 = 1;
const NODE_PAGED: u8 = 2;

/// Errors that can occur reading or writing cache files.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// Underlying filesystem failure, with the offending path.
  #[error("cache i/o error at {path}: {source}")]
  Io {
    /// Path the operation was acting on.
    path: PathBuf,
    /// The filesystem error.
    #[source]
    source: std::io::Error,
  },

  /// The file does not start with the expected marker/magic bytes.
  #[error("invalid magic bytes in {path}")]
  BadMagic {
    /// The offending file.
    path: PathBuf,
  },

  /// The format version is not supported by this build.
  #[error("unsupported cache format version: {0}")]
  UnsupportedVersion(u8),

  /// The payload kind does not match what the caller asked for.
  #[error("unexpected payload kind: expected {expected}, got {actual}")]
  UnexpectedKind {
    /// Kind the caller expected.
    expected: u8,
    /// Kind found in the file.
    actual: u8,
  },

  /// The data ended before the declared content.
  #[error("cache data truncated: expected {expected} bytes, got {actual}")]
  Truncated {
    /// Minimum expected byte count.
    expected: usize,
    /// Actual byte count available.
    actual: usize,
  },

  /// Structurally invalid content (bad node tag, invalid UTF-8, ...).
  #[error("malformed cache data: {0}")]
  Malformed(String),
}

fn io_err(path: &Path, source: std::io::Error) -> CacheError {
  CacheError::Io {
    path: path.to_owned(),
    source,
  }
}

/// Handle to one grid's cache folder.
#[derive(Clone, Debug)]
pub struct MeshCache {
  folder: PathBuf,
}

impl MeshCache {
  /// Open (creating if necessary) the cache folder for a source identity
  /// and block partition.
  pub fn open(
    root: &Path,
    resource: &str,
    counts: (usize, usize, usize),
  ) -> Result<Self, CacheError> {
    let folder = root.join(format!("{}_{}_{}_{}", resource, counts.0, counts.1, counts.2));
    fs::create_dir_all(&folder).map_err(|e| io_err(&folder, e))?;
    Ok(Self { folder })
  }

  /// The resolved cache folder.
  pub fn folder(&self) -> &Path {
    &self.folder
  }

  /// Whole-block cache file name for a block index.
  pub fn paged_file_name(index: usize) -> String {
    format!("VoxelGrid_cache{index:08}_paged.vxm")
  }

  /// Single-tier cache file name for a block index and LOD tier.
  pub fn tier_file_name(index: usize, tier: usize) -> String {
    format!("VoxelGrid_cache{index:08}_lod{tier:03}.vxm")
  }

  /// Full path of a block's whole-block cache file.
  pub fn paged_path(&self, index: usize) -> PathBuf {
    self.folder.join(Self::paged_file_name(index))
  }

  /// Full path of a block's single-tier cache file.
  pub fn tier_path(&self, index: usize, tier: usize) -> PathBuf {
    self.folder.join(Self::tier_file_name(index, tier))
  }

  /// True if a whole-block cache file exists for the index.
  pub fn has_block(&self, index: usize) -> bool {
    self.paged_path(index).exists()
  }

  // ---------------------------------------------------------------------
  // Block nodes
  // ---------------------------------------------------------------------

  /// Serialize a block node to its whole-block cache file.
  pub fn save_block(&self, index: usize, node: &BlockNode) -> Result<(), CacheError> {
    let mut buf = file_header(KIND_BLOCK);
    write_node(&mut buf, node);
    let path = self.paged_path(index);
    fs::write(&path, buf).map_err(|e| io_err(&path, e))
  }

  /// Deserialize a block node from its whole-block cache file.
  pub fn load_block(&self, index: usize) -> Result<BlockNode, CacheError> {
    let path = self.paged_path(index);
    let data = fs::read(&path).map_err(|e| io_err(&path, e))?;
    let mut r = ByteReader::new(&data);
    expect_header(&mut r, KIND_BLOCK, &path)?;
    read_node(&mut r, &path)
  }

  // ---------------------------------------------------------------------
  // Single tiers
  // ---------------------------------------------------------------------

  /// Write one tier's mesh to its own file; returns the relative file name.
  pub fn save_tier(
    &self,
    index: usize,
    tier: usize,
    range: (f64, f64),
    mesh: &MeshBuffers,
  ) -> Result<String, CacheError> {
    let mut buf = file_header(KIND_TIER);
    buf.extend_from_slice(&range.0.to_le_bytes());
    buf.extend_from_slice(&range.1.to_le_bytes());
    write_mesh(&mut buf, mesh);

    let name = Self::tier_file_name(index, tier);
    let path = self.folder.join(&name);
    fs::write(&path, buf).map_err(|e| io_err(&path, e))?;
    Ok(name)
  }

  /// Read one tier's mesh and selection range back from disk.
  pub fn load_tier(
    &self,
    index: usize,
    tier: usize,
  ) -> Result<((f64, f64), MeshBuffers), CacheError> {
    let path = self.tier_path(index, tier);
    let data = fs::read(&path).map_err(|e| io_err(&path, e))?;
    let mut r = ByteReader::new(&data);
    expect_header(&mut r, KIND_TIER, &path)?;
    let near = r.read_f64()?;
    let far = r.read_f64()?;
    let mesh = read_mesh(&mut r)?;
    Ok(((near, far), mesh))
  }

  // ---------------------------------------------------------------------
  // Visibility bitmap
  // ---------------------------------------------------------------------

  /// Persist the per-block emptiness flags.
  pub fn write_visibility(&self, flags: &[bool]) -> Result<(), CacheError> {
    let mut buf = Vec::with_capacity(9 + flags.len());
    buf.push(VISIBILITY_MARKER);
    buf.extend_from_slice(&VISIBILITY_MAGIC.to_le_bytes());
    buf.extend_from_slice(&(flags.len() as i32).to_le_bytes());
    buf.extend(flags.iter().map(|&b| b as u8));

    let path = self.folder.join(VISIBILITY_FILE_NAME);
    fs::write(&path, buf).map_err(|e| io_err(&path, e))
  }

  /// Read the per-block emptiness flags, validating marker and magic.
  ///
  /// A stored count that differs from `expected` is reported but not fatal:
  /// the flags read are truncated or padded (with "has content") to the
  /// expected length. Structurally invalid files return an error so the
  /// caller regenerates visibility.
  pub fn read_visibility(&self, expected: usize) -> Result<Vec<bool>, CacheError> {
    let path = self.folder.join(VISIBILITY_FILE_NAME);
    let data = fs::read(&path).map_err(|e| io_err(&path, e))?;
    let mut r = ByteReader::new(&data);

    if r.read_u8()? != VISIBILITY_MARKER {
      return Err(CacheError::BadMagic { path });
    }
    if r.read_i32()? != VISIBILITY_MAGIC {
      return Err(CacheError::BadMagic { path });
    }

    let stored = r.read_i32()?;
    if stored < 0 {
      return Err(CacheError::Malformed(format!(
        "negative block count {stored}"
      )));
    }
    let stored = stored as usize;
    if stored != expected {
      error!(
        stored,
        expected, "unexpected number of blocks in visibility file"
      );
    }

    let bytes = r.read_bytes(stored)?;
    let mut flags: Vec<bool> = bytes.iter().map(|&b| b != 0).collect();
    flags.resize(expected, false);
    Ok(flags)
  }

  // ---------------------------------------------------------------------
  // Whole-grid database
  // ---------------------------------------------------------------------

  /// Full path of the whole-grid database file.
  pub fn database_path(&self) -> PathBuf {
    self.folder.join(DATABASE_FILE_NAME)
  }

  /// Persist every resident block node into a single database file.
  pub fn save_database(&self, entries: &[(usize, &BlockNode)]) -> Result<(), CacheError> {
    let mut buf = file_header(KIND_DATABASE);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (index, node) in entries {
      buf.extend_from_slice(&(*index as u32).to_le_bytes());
      write_node(&mut buf, node);
    }

    let path = self.database_path();
    fs::write(&path, buf).map_err(|e| io_err(&path, e))
  }

  /// Load every block node stored in the database file.
  pub fn load_database(&self) -> Result<Vec<(usize, BlockNode)>, CacheError> {
    let path = self.database_path();
    let data = fs::read(&path).map_err(|e| io_err(&path, e))?;
    let mut r = ByteReader::new(&data);
    expect_header(&mut r, KIND_DATABASE, &path)?;

    let count = r.read_u32()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
      let index = r.read_u32()? as usize;
      let node = read_node(&mut r, &path)?;
      entries.push((index, node));
    }
    Ok(entries)
  }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn file_header(kind: u8) -> Vec<u8> {
  let mut buf = Vec::new();
  buf.extend_from_slice(&MESH_MAGIC);
  buf.push(MESH_FORMAT_VERSION);
  buf.push(kind);
  buf
}

fn expect_header(r: &mut ByteReader<'_>, kind: u8, path: &Path) -> Result<(), CacheError> {
  if r.read_bytes(4)? != MESH_MAGIC {
    return Err(CacheError::BadMagic {
      path: path.to_owned(),
    });
  }
  let version = r.read_u8()?;
  if version != MESH_FORMAT_VERSION {
    return Err(CacheError::UnsupportedVersion(version));
  }
  let actual = r.read_u8()?;
  if actual != kind {
    return Err(CacheError::UnexpectedKind {
      expected: kind,
      actual,
    });
  }
  Ok(())
}

fn write_node(buf: &mut Vec<u8>, node: &BlockNode) {
  match node {
    // Cached subtrees round-trip as combined geometry.
    BlockNode::Combined(lod) | BlockNode::Cached { lod, .. } => {
      buf.push(NODE_COMBINED);
      write_lod(buf, lod);
    }
    BlockNode::Paged(paged) => {
      buf.push(NODE_PAGED);
      write_paged(buf, paged);
    }
  }
}

fn read_node(r: &mut ByteReader<'_>, path: &Path) -> Result<BlockNode, CacheError> {
  match r.read_u8()? {
    NODE_COMBINED => Ok(BlockNode::Cached {
      path: path.to_owned(),
      lod: read_lod(r)?,
    }),
    NODE_PAGED => Ok(BlockNode::Paged(read_paged(r)?)),
    tag => Err(CacheError::Malformed(format!("unknown node tag {tag}"))),
  }
}

fn write_lod(buf: &mut Vec<u8>, lod: &LodMesh) {
  buf.push(lod.tiers.len() as u8);
  for tier in &lod.tiers {
    buf.extend_from_slice(&tier.range.0.to_le_bytes());
    buf.extend_from_slice(&tier.range.1.to_le_bytes());
    write_mesh(buf, &tier.mesh);
  }
}

fn read_lod(r: &mut ByteReader<'_>) -> Result<LodMesh, CacheError> {
  let count = r.read_u8()? as usize;
  let mut lod = LodMesh::default();
  for _ in 0..count {
    let near = r.read_f64()?;
    let far = r.read_f64()?;
    let mesh = read_mesh(r)?;
    lod.tiers.push(LodTier {
      range: (near, far),
      mesh,
    });
  }
  Ok(lod)
}

fn write_paged(buf: &mut Vec<u8>, paged: &PagedLod) {
  write_string(buf, &paged.database_path.to_string_lossy());
  buf.extend_from_slice(&paged.center.x.to_le_bytes());
  buf.extend_from_slice(&paged.center.y.to_le_bytes());
  buf.extend_from_slice(&paged.center.z.to_le_bytes());
  buf.extend_from_slice(&paged.radius.to_le_bytes());
  buf.push(paged.tiers.len() as u8);
  for tier in &paged.tiers {
    write_string(buf, &tier.file_name);
    buf.extend_from_slice(&tier.range.0.to_le_bytes());
    buf.extend_from_slice(&tier.range.1.to_le_bytes());
  }
}

fn read_paged(r: &mut ByteReader<'_>) -> Result<PagedLod, CacheError> {
  let database_path = PathBuf::from(read_string(r)?);
  let center = glam::DVec3::new(r.read_f64()?, r.read_f64()?, r.read_f64()?);
  let radius = r.read_f64()?;
  let count = r.read_u8()? as usize;

  let mut tiers = smallvec::SmallVec::new();
  for _ in 0..count {
    let file_name = read_string(r)?;
    let near = r.read_f64()?;
    let far = r.read_f64()?;
    tiers.push(PagedTier {
      file_name,
      range: (near, far),
    });
  }

  Ok(PagedLod {
    database_path,
    center,
    radius,
    tiers,
  })
}

fn write_mesh(buf: &mut Vec<u8>, mesh: &MeshBuffers) {
  buf.extend_from_slice(&(mesh.positions.len() as u32).to_le_bytes());
  buf.extend_from_slice(&(mesh.indices.len() as u32).to_le_bytes());
  for arr in [&mesh.positions, &mesh.normals, &mesh.colors] {
    for v in arr {
      buf.extend_from_slice(&v[0].to_le_bytes());
      buf.extend_from_slice(&v[1].to_le_bytes());
      buf.extend_from_slice(&v[2].to_le_bytes());
    }
  }
  for i in &mesh.indices {
    buf.extend_from_slice(&i.to_le_bytes());
  }
}

fn read_mesh(r: &mut ByteReader<'_>) -> Result<MeshBuffers, CacheError> {
  let vertex_count = r.read_u32()? as usize;
  let index_count = r.read_u32()? as usize;

  // Reject counts the remaining data cannot possibly hold.
  let needed = vertex_count
    .checked_mul(36)
    .and_then(|v| v.checked_add(index_count.checked_mul(4)?))
    .ok_or_else(|| CacheError::Malformed("mesh counts overflow".into()))?;
  if needed > r.remaining() {
    return Err(CacheError::Truncated {
      expected: r.pos() + needed,
      actual: r.len(),
    });
  }

  let mut mesh = MeshBuffers::new();
  for target in [&mut mesh.positions, &mut mesh.normals, &mut mesh.colors] {
    target.reserve(vertex_count);
    for _ in 0..vertex_count {
      target.push([r.read_f32()?, r.read_f32()?, r.read_f32()?]);
    }
  }
  mesh.indices.reserve(index_count);
  for _ in 0..index_count {
    mesh.indices.push(r.read_u32()?);
  }
  Ok(mesh)
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
  buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
  buf.extend_from_slice(s.as_bytes());
}

fn read_string(r: &mut ByteReader<'_>) -> Result<String, CacheError> {
  let len = r.read_u16()? as usize;
  let bytes = r.read_bytes(len)?;
  String::from_utf8(bytes.to_vec())
    .map_err(|_| CacheError::Malformed("invalid utf-8 in string field".into()))
}

/// Bounds-checked little-endian reader over a byte slice.
struct ByteReader<'a> {
  data: &'a [u8],
  pos: usize,
}

impl<'a> ByteReader<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self { data, pos: 0 }
  }

  fn len(&self) -> usize {
    self.data.len()
  }

  fn pos(&self) -> usize {
    self.pos
  }

  fn remaining(&self) -> usize {
    self.data.len() - self.pos
  }

  fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CacheError> {
    if self.remaining() < n {
      return Err(CacheError::Truncated {
        expected: self.pos + n,
        actual: self.data.len(),
      });
    }
    let out = &self.data[self.pos..self.pos + n];
    self.pos += n;
    Ok(out)
  }

  fn read_u8(&mut self) -> Result<u8, CacheError> {
    Ok(self.read_bytes(1)?[0])
  }

  fn read_u16(&mut self) -> Result<u16, CacheError> {
    let b = self.read_bytes(2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
  }

  fn read_u32(&mut self) -> Result<u32, CacheError> {
    let b = self.read_bytes(4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
  }

  fn read_i32(&mut self) -> Result<i32, CacheError> {
    let b = self.read_bytes(4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
  }

  fn read_f32(&mut self) -> Result<f32, CacheError> {
    let b = self.read_bytes(4)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
  }

  fn read_f64(&mut self) -> Result<f64, CacheError> {
    let b = self.read_bytes(8)?;
    Ok(f64::from_le_bytes([
      b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
  }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
