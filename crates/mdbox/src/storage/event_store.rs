//! EventStore - the paging layer between boxes and a [`StorageBackend`].
//!
//! # Record layout
//!
//! Each event is one fixed-size little-endian record:
//!
//! ```text
//! ┌──────────┬───────────────┬────────────┬─────┬──────────────┐
//! │ signal   │ error_squared │ coords[0]  │ ... │ coords[nd-1] │
//! │ f64      │ f64           │ f64        │     │ f64          │
//! └──────────┴───────────────┴────────────┴─────┴──────────────┘
//! ```
//!
//! A box's events occupy one contiguous run of records, described by a
//! [`FileRegion`] `(offset, count)` in record units.

use std::io::{Cursor, ErrorKind};
use std::sync::{Arc, Mutex};

use binrw::{binrw, BinRead, BinWrite};

use super::{FileRegion, FreeSpaceMap, StorageBackend};
use crate::error::{BoxError, Result};
use crate::event::Event;

/// Number of non-coordinate fields at the start of each record.
pub const RECORD_HEADER_FIELDS: usize = 2;

#[binrw]
#[brw(little)]
#[br(import(nd: usize))]
struct EventRecord {
  signal: f64,
  error_squared: f64,
  #[br(count = nd)]
  coords: Vec<f64>,
}

/// Event-level view of a backing store, shared by all boxes of one tree.
pub struct EventStore {
  backend: Arc<dyn StorageBackend>,
  nd: usize,
  space: Mutex<FreeSpaceMap>,
}

impl EventStore {
  /// Store over an empty backend.
  pub fn new(backend: Arc<dyn StorageBackend>, nd: usize) -> Self {
    Self::with_space(backend, nd, FreeSpaceMap::new())
  }

  /// Store over a backend whose layout is already known.
  pub fn with_space(backend: Arc<dyn StorageBackend>, nd: usize, space: FreeSpaceMap) -> Self {
    Self {
      backend,
      nd,
      space: Mutex::new(space),
    }
  }

  #[inline]
  pub fn nd(&self) -> usize {
    self.nd
  }

  /// Bytes per event record.
  #[inline]
  pub fn record_size(&self) -> u64 {
    ((RECORD_HEADER_FIELDS + self.nd) * std::mem::size_of::<f64>()) as u64
  }

  pub fn backend(&self) -> &Arc<dyn StorageBackend> {
    &self.backend
  }

  /// Snapshot of the free-space map.
  pub fn space(&self) -> FreeSpaceMap {
    self.space.lock().unwrap().clone()
  }

  pub fn allocate(&self, count: u64) -> FileRegion {
    self.space.lock().unwrap().allocate(count)
  }

  pub fn release(&self, region: FileRegion) {
    self.space.lock().unwrap().release(region)
  }

  pub fn reallocate(&self, region: FileRegion, count: u64) -> FileRegion {
    self.space.lock().unwrap().reallocate(region, count)
  }

  /// Byte offset and byte length of `region`, or `None` on overflow.
  fn byte_span(&self, region: FileRegion) -> Option<(u64, usize)> {
    let offset = region.offset.checked_mul(self.record_size())?;
    let len = region.count.checked_mul(self.record_size())?;
    offset.checked_add(len)?;
    Some((offset, usize::try_from(len).ok()?))
  }

  /// Whether a region lies entirely within the backend's current size.
  pub fn contains_region(&self, region: FileRegion) -> Result<bool> {
    let len = self.backend.len().map_err(|e| BoxError::IoRead {
      region,
      kind: e.kind(),
    })?;
    Ok(
      self
        .byte_span(region)
        .is_some_and(|(offset, bytes)| offset + bytes as u64 <= len),
    )
  }

  /// Write `events` into `region`. `region.count` must equal `events.len()`.
  pub fn write_events(&self, region: FileRegion, events: &[Event]) -> Result<()> {
    debug_assert_eq!(region.count, events.len() as u64);
    let write_error = |kind| BoxError::IoWrite { region, kind };
    let (offset, bytes) = self
      .byte_span(region)
      .ok_or_else(|| write_error(ErrorKind::InvalidInput))?;

    let mut cursor = Cursor::new(Vec::with_capacity(bytes));
    for event in events {
      if event.nd() != self.nd {
        return Err(BoxError::DimensionMismatch {
          expected: self.nd,
          found: event.nd(),
        });
      }
      EventRecord {
        signal: event.signal(),
        error_squared: event.error_squared(),
        coords: event.coords().to_vec(),
      }
      .write(&mut cursor)
      .map_err(|_| write_error(ErrorKind::InvalidData))?;
    }

    self
      .backend
      .write_at(offset, cursor.get_ref())
      .map_err(|e| write_error(e.kind()))?;
    tracing::trace!(offset = region.offset, count = region.count, "wrote events");
    Ok(())
  }

  /// Read the events stored in `region`.
  ///
  /// Nothing is returned unless every record was read and decoded.
  pub fn read_events(&self, region: FileRegion) -> Result<Vec<Event>> {
    let read_error = |kind| BoxError::IoRead { region, kind };

    let (offset, len) = self
      .byte_span(region)
      .ok_or_else(|| read_error(ErrorKind::InvalidInput))?;

    let mut bytes = vec![0u8; len];
    self
      .backend
      .read_at(offset, &mut bytes)
      .map_err(|e| read_error(e.kind()))?;

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut events = Vec::with_capacity(region.count as usize);
    for _ in 0..region.count {
      let record = EventRecord::read_args(&mut cursor, (self.nd,))
        .map_err(|_| read_error(ErrorKind::InvalidData))?;
      events.push(Event::new(
        &record.coords,
        record.signal,
        record.error_squared,
      ));
    }
    tracing::trace!(offset = region.offset, count = region.count, "read events");
    Ok(events)
  }

  pub fn flush(&self) -> Result<()> {
    let end = self.space.lock().unwrap().end();
    self.backend.flush().map_err(|e| BoxError::IoWrite {
      region: FileRegion::new(0, end),
      kind: e.kind(),
    })
  }
}
