//! Free-space bookkeeping for the event file.
//!
//! Regions released by boxes that moved or shrank are remembered here and
//! handed out again first-fit. Adjacent free regions are coalesced, and a free
//! region touching the end of the file shrinks the file instead.

use std::collections::BTreeMap;

use super::FileRegion;

/// Free regions plus the current end of the used file, in record units.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreeSpaceMap {
  /// offset -> count
  free: BTreeMap<u64, u64>,
  end: u64,
}

impl FreeSpaceMap {
  /// Empty file.
  pub fn new() -> Self {
    Self::default()
  }

  /// File whose used part ends at `end`, with no known holes.
  pub fn with_end(end: u64) -> Self {
    Self {
      free: BTreeMap::new(),
      end,
    }
  }

  /// End of the used part of the file.
  pub fn end(&self) -> u64 {
    self.end
  }

  /// Total free records inside the used part.
  pub fn free_count(&self) -> u64 {
    self.free.values().sum()
  }

  /// Number of separate free regions.
  pub fn hole_count(&self) -> usize {
    self.free.len()
  }

  /// Reserve `count` records, reusing a hole when one is large enough.
  pub fn allocate(&mut self, count: u64) -> FileRegion {
    if count == 0 {
      return FileRegion::new(self.end, 0);
    }
    let hole = self
      .free
      .iter()
      .find(|(_, len)| **len >= count)
      .map(|(offset, len)| (*offset, *len));
    match hole {
      Some((offset, len)) => {
        self.free.remove(&offset);
        if len > count {
          self.free.insert(offset + count, len - count);
        }
        FileRegion::new(offset, count)
      }
      None => {
        let region = FileRegion::new(self.end, count);
        self.end += count;
        region
      }
    }
  }

  /// Return a region to the free pool.
  pub fn release(&mut self, region: FileRegion) {
    if region.count == 0 {
      return;
    }
    let mut offset = region.offset;
    let mut count = region.count;

    // Merge with the preceding hole.
    if let Some((&prev, &prev_len)) = self.free.range(..offset).next_back() {
      if prev + prev_len == offset {
        self.free.remove(&prev);
        offset = prev;
        count += prev_len;
      }
    }
    // Merge with the following hole.
    if let Some(&next_len) = self.free.get(&(offset + count)) {
      self.free.remove(&(offset + count));
      count += next_len;
    }

    if offset + count >= self.end {
      self.end = offset;
    } else {
      self.free.insert(offset, count);
    }
  }

  /// Resize a region in place when possible.
  ///
  /// A region that still fits keeps its offset and gives back its tail;
  /// otherwise it is released and a new region is allocated.
  pub fn reallocate(&mut self, region: FileRegion, count: u64) -> FileRegion {
    if count <= region.count {
      self.release(FileRegion::new(region.offset + count, region.count - count));
      FileRegion::new(region.offset, count)
    } else {
      self.release(region);
      self.allocate(count)
    }
  }

  /// Mark a region as used, for rebuilding the map from a loaded layout.
  ///
  /// Regions must be marked in any order before any allocation; the gaps
  /// between them become holes.
  pub fn mark_used(&mut self, regions: impl IntoIterator<Item = FileRegion>) {
    let mut used: Vec<FileRegion> = regions.into_iter().filter(|r| r.count > 0).collect();
    used.sort_by_key(|r| r.offset);
    self.free.clear();
    let mut cursor = 0;
    for region in used {
      if region.offset > cursor {
        self.free.insert(cursor, region.offset - cursor);
      }
      cursor = cursor.max(region.end());
    }
    self.end = cursor;
  }
}
