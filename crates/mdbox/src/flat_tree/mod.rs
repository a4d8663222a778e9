//! FlatTree - columnar snapshot of a tree's topology.
//!
//! # Layout
//!
//! Every node gets a flat index. A grid's children always occupy a
//! contiguous index range that comes after the grid itself, so the arrays
//! can be rebuilt root to leaves in one pass.
//!
//! ```text
//! ┌──────┬─────────┬────┬────────────┬─────────────────────────────────┐
//! │ MDBX │ version │ nd │ node_count │ columns, node_count entries each │
//! └──────┴─────────┴────┴────────────┴─────────────────────────────────┘
//!
//!   box_id          u64
//!   box_type        u8          0 none, 1 leaf, 2 grid
//!   depth           u32
//!   extents         f64 x nd x 2   (min, max) per dimension
//!   signal          f64
//!   error_squared   f64
//!   event_index     u64 x 2     (offset, count) in event records
//!   children_range  i64 x 2     (first, last); -1 for leaves
//! ```
//!
//! All values are little-endian. Event payloads are not part of the
//! snapshot; `event_index` points into the backing store the tree was saved
//! to.
//!
//! # Module Structure
//!
//! - [`save`]: `EventTree::save` - flatten and write payloads
//! - [`load`]: `EventTree::load` - validate and rebuild

pub mod load;
pub mod save;

use std::io::{ErrorKind, Read, Seek, Write};

use binrw::{binrw, BinRead, BinWrite};

use crate::error::{BoxError, Result};
use crate::extents::Extents;
use crate::storage::FileRegion;

/// Current on-disk format version.
pub const FLAT_TREE_VERSION: u32 = 1;

/// `children_range` entry for nodes without children.
pub const NO_CHILDREN: i64 = -1;

/// Kind of node stored at a flat index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BoxType {
  None = 0,
  Leaf = 1,
  Grid = 2,
}

impl TryFrom<u8> for BoxType {
  type Error = BoxError;

  fn try_from(value: u8) -> Result<Self> {
    match value {
      0 => Ok(BoxType::None),
      1 => Ok(BoxType::Leaf),
      2 => Ok(BoxType::Grid),
      other => Err(BoxError::corrupt(format!("unknown box type {other}"))),
    }
  }
}

/// Parallel per-node arrays describing a whole tree.
#[binrw]
#[brw(little, magic = b"MDBX")]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatTree {
  /// Must be [`FLAT_TREE_VERSION`].
  #[br(assert(version == FLAT_TREE_VERSION, "unsupported flat tree version {}", version))]
  pub version: u32,

  /// Dimensionality of every node.
  #[br(assert(nd >= 1, "flat tree has zero dimensions"))]
  pub nd: u32,

  #[bw(calc(box_id.len() as u64))]
  node_count: u64,

  #[br(count = node_count)]
  pub box_id: Vec<u64>,

  #[br(count = node_count)]
  pub box_type: Vec<u8>,

  #[br(count = node_count)]
  pub depth: Vec<u32>,

  #[br(count = (node_count as usize).saturating_mul(nd as usize * 2))]
  pub extents: Vec<f64>,

  #[br(count = node_count)]
  pub signal: Vec<f64>,

  #[br(count = node_count)]
  pub error_squared: Vec<f64>,

  #[br(count = (node_count as usize).saturating_mul(2))]
  pub event_index: Vec<u64>,

  #[br(count = (node_count as usize).saturating_mul(2))]
  pub children_range: Vec<i64>,
}

impl FlatTree {
  /// Empty snapshot for `nd` dimensions.
  pub fn new(nd: usize) -> Self {
    Self {
      version: FLAT_TREE_VERSION,
      nd: nd as u32,
      ..Default::default()
    }
  }

  #[inline]
  pub fn node_count(&self) -> usize {
    self.box_id.len()
  }

  #[inline]
  pub fn nd(&self) -> usize {
    self.nd as usize
  }

  /// Check that every column has the length `node_count` implies.
  pub fn check_lengths(&self) -> Result<()> {
    let n = self.node_count();
    let columns = [
      ("box_type", self.box_type.len(), n),
      ("depth", self.depth.len(), n),
      ("extents", self.extents.len(), n * self.nd() * 2),
      ("signal", self.signal.len(), n),
      ("error_squared", self.error_squared.len(), n),
      ("event_index", self.event_index.len(), n * 2),
      ("children_range", self.children_range.len(), n * 2),
    ];
    for (name, found, expected) in columns {
      if found != expected {
        return Err(BoxError::corrupt(format!(
          "column {name} has {found} entries, expected {expected}"
        )));
      }
    }
    Ok(())
  }

  /// Decode the box type of node `index`.
  pub fn box_type_of(&self, index: usize) -> Result<BoxType> {
    BoxType::try_from(self.box_type[index])
      .map_err(|_| BoxError::corrupt(format!("node {index} has unknown box type {}", self.box_type[index])))
  }

  /// Extents of node `index`.
  pub fn extents_of(&self, index: usize) -> Result<Extents> {
    let nd = self.nd();
    let row = &self.extents[index * nd * 2..(index + 1) * nd * 2];
    let min: Vec<f64> = row.iter().step_by(2).copied().collect();
    let max: Vec<f64> = row.iter().skip(1).step_by(2).copied().collect();
    Extents::new(&min, &max).map_err(|err| BoxError::corrupt(format!("node {index}: {err}")))
  }

  /// Event data region of node `index`.
  #[inline]
  pub fn event_region(&self, index: usize) -> FileRegion {
    FileRegion::new(self.event_index[index * 2], self.event_index[index * 2 + 1])
  }

  /// Raw `(first, last)` child range of node `index`.
  #[inline]
  pub fn children_range_of(&self, index: usize) -> (i64, i64) {
    (self.children_range[index * 2], self.children_range[index * 2 + 1])
  }

  /// Append one node. Extents are written as `(min, max)` per dimension.
  pub(crate) fn push(
    &mut self,
    box_id: u64,
    box_type: BoxType,
    depth: u32,
    extents: &Extents,
    totals: (f64, f64),
    region: FileRegion,
    children: (i64, i64),
  ) {
    self.box_id.push(box_id);
    self.box_type.push(box_type as u8);
    self.depth.push(depth);
    for (lo, hi) in extents.min().iter().zip(extents.max()) {
      self.extents.push(*lo);
      self.extents.push(*hi);
    }
    self.signal.push(totals.0);
    self.error_squared.push(totals.1);
    self.event_index.push(region.offset);
    self.event_index.push(region.count);
    self.children_range.push(children.0);
    self.children_range.push(children.1);
  }

  /// Serialize to `writer`.
  pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
    self.write(writer).map_err(|err| BoxError::IoWrite {
      region: FileRegion::default(),
      kind: io_kind(&err),
    })
  }

  /// Deserialize from `reader`.
  ///
  /// Structural problems (bad magic, version, truncation) are reported as
  /// [`BoxError::CorruptTree`]; other I/O failures as [`BoxError::IoRead`].
  pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
    let flat = Self::read(reader).map_err(|err| match io_kind(&err) {
      ErrorKind::InvalidData | ErrorKind::UnexpectedEof => BoxError::corrupt(err.to_string()),
      kind => BoxError::IoRead {
        region: FileRegion::default(),
        kind,
      },
    })?;
    flat.check_lengths()?;
    Ok(flat)
  }
}

fn io_kind(err: &binrw::Error) -> ErrorKind {
  match err {
    binrw::Error::Io(io) => io.kind(),
    _ => ErrorKind::InvalidData,
  }
}
