//! EventBox - leaf container of events.
//!
//! A box is either `Resident` (its event list is in memory) or `OnDisk` (its
//! events live in a [`FileRegion`] of the backing store). The only operation
//! that may block on I/O is [`EventBox::get_events`], which pages an `OnDisk`
//! box back in.
//!
//! Events added to an `OnDisk` box are held in a pending list and merged on
//! the next page-in, so insertion never touches the disk.

use std::borrow::Cow;

use super::{BoxController, BoxId};
use crate::error::{BoxError, Result};
use crate::event::Event;
use crate::extents::Extents;
use crate::storage::{EventStore, FileRegion};

/// Where a box's events currently are.
#[derive(Clone, Debug, PartialEq)]
pub enum EventData {
  /// The full event list is in memory.
  Resident(Vec<Event>),
  /// The events are in the box's file region; `pending` holds events added
  /// since the write-out.
  OnDisk { pending: Vec<Event> },
}

/// Leaf box.
#[derive(Debug)]
pub struct EventBox {
  id: BoxId,
  depth: u32,
  extents: Extents,
  data: EventData,
  /// Region reserved for this box's events. Always set while `OnDisk`.
  region: Option<FileRegion>,
  /// Resident events differ from the copy in `region`.
  dirty: bool,
  signal: f64,
  error_squared: f64,
}

impl EventBox {
  /// Create an empty, resident box.
  pub fn new(id: BoxId, depth: u32, extents: Extents) -> Self {
    Self {
      id,
      depth,
      extents,
      data: EventData::Resident(Vec::new()),
      region: None,
      dirty: false,
      signal: 0.0,
      error_squared: 0.0,
    }
  }

  /// Create a box whose events are already on disk.
  pub(crate) fn on_disk(
    id: BoxId,
    depth: u32,
    extents: Extents,
    region: FileRegion,
    signal: f64,
    error_squared: f64,
  ) -> Self {
    Self {
      id,
      depth,
      extents,
      data: EventData::OnDisk {
        pending: Vec::new(),
      },
      region: Some(region),
      dirty: false,
      signal,
      error_squared,
    }
  }

  #[inline]
  pub fn id(&self) -> BoxId {
    self.id
  }

  #[inline]
  pub fn depth(&self) -> u32 {
    self.depth
  }

  #[inline]
  pub fn extents(&self) -> &Extents {
    &self.extents
  }

  /// Total signal of all events, resident or not.
  #[inline]
  pub fn signal(&self) -> f64 {
    self.signal
  }

  /// Total squared error of all events, resident or not.
  #[inline]
  pub fn error_squared(&self) -> f64 {
    self.error_squared
  }

  /// Region reserved in the backing store, if any.
  #[inline]
  pub fn region(&self) -> Option<FileRegion> {
    self.region
  }

  pub fn data(&self) -> &EventData {
    &self.data
  }

  /// Number of events, including any not in memory.
  pub fn event_count(&self) -> u64 {
    match &self.data {
      EventData::Resident(events) => events.len() as u64,
      EventData::OnDisk { pending } => {
        self.region.map_or(0, |r| r.count) + pending.len() as u64
      }
    }
  }

  #[inline]
  pub fn is_resident(&self) -> bool {
    matches!(self.data, EventData::Resident(_))
  }

  #[inline]
  pub fn is_on_disk(&self) -> bool {
    !self.is_resident()
  }

  /// Whether the in-memory state differs from the backing store.
  pub fn is_dirty(&self) -> bool {
    match &self.data {
      EventData::Resident(_) => self.dirty,
      EventData::OnDisk { pending } => !pending.is_empty(),
    }
  }

  /// Append an event and update the cached totals.
  ///
  /// Fails with [`BoxError::OutOfRange`] if the event lies outside the box.
  pub fn add_event(&mut self, event: Event) -> Result<()> {
    if event.nd() != self.extents.nd() {
      return Err(BoxError::DimensionMismatch {
        expected: self.extents.nd(),
        found: event.nd(),
      });
    }
    if !self.extents.contains_point(event.coords()) {
      return Err(BoxError::OutOfRange {
        coords: event.coords().to_vec(),
        extents: self.extents.to_string(),
      });
    }
    self.push(event);
    Ok(())
  }

  /// Append an event already known to lie inside the box.
  pub(crate) fn push(&mut self, event: Event) {
    debug_assert!(self.extents.contains_point(event.coords()));
    self.signal += event.signal();
    self.error_squared += event.error_squared();
    match &mut self.data {
      EventData::Resident(events) => {
        events.push(event);
        self.dirty = true;
      }
      EventData::OnDisk { pending } => pending.push(event),
    }
  }

  /// Resident events, without paging anything in.
  pub fn resident_events(&self) -> Option<&[Event]> {
    match &self.data {
      EventData::Resident(events) => Some(events),
      EventData::OnDisk { .. } => None,
    }
  }

  /// All events, paging them in first if the box is on disk.
  ///
  /// A failed page-in leaves the box on disk and unchanged.
  pub fn get_events(
    &mut self,
    store: Option<&EventStore>,
    controller: &BoxController,
  ) -> Result<&[Event]> {
    self.page_in(store, controller)?;
    Ok(self.resident_events().unwrap_or(&[]))
  }

  /// All events without changing the box's state.
  pub fn read_events(&self, store: Option<&EventStore>) -> Result<Cow<'_, [Event]>> {
    match &self.data {
      EventData::Resident(events) => Ok(Cow::Borrowed(events)),
      EventData::OnDisk { pending } => {
        let mut events = self.read_region(store)?;
        events.extend(pending.iter().cloned());
        Ok(Cow::Owned(events))
      }
    }
  }

  fn read_region(&self, store: Option<&EventStore>) -> Result<Vec<Event>> {
    let region = self.region.unwrap_or_default();
    let store = store.ok_or(BoxError::IoRead {
      region,
      kind: std::io::ErrorKind::NotFound,
    })?;
    store.read_events(region)
  }

  fn page_in(&mut self, store: Option<&EventStore>, controller: &BoxController) -> Result<()> {
    if self.is_resident() {
      return Ok(());
    }
    let mut events = self.read_region(store)?;
    if let EventData::OnDisk { pending } = &mut self.data {
      self.dirty = !pending.is_empty();
      events.append(pending);
    }
    tracing::debug!(id = self.id.raw(), count = events.len(), "paged in box");
    self.data = EventData::Resident(events);
    controller.unregister_file_backing(self.id);
    controller.note_resident(self.id);
    Ok(())
  }

  /// Write resident events to the backing store and drop them from memory.
  ///
  /// Clean boxes are dropped without I/O. Empty boxes stay resident. A failed
  /// write leaves the box resident with all its events.
  pub fn write_out(&mut self, store: &EventStore, controller: &BoxController) -> Result<()> {
    let count = match &self.data {
      EventData::Resident(events) if !events.is_empty() => events.len() as u64,
      _ => return Ok(()),
    };
    if self.release(controller) {
      return Ok(());
    }

    // A reservation that still fits is overwritten in place. It is only
    // resized or released once the write succeeds.
    let old = self.region;
    let in_place = old.is_some_and(|old| count <= old.count);
    let region = match old {
      Some(old) if in_place => FileRegion::new(old.offset, count),
      _ => store.allocate(count),
    };
    let written = match &self.data {
      EventData::Resident(events) => store.write_events(region, events),
      EventData::OnDisk { .. } => Ok(()),
    };
    if let Err(err) = written {
      tracing::warn!(id = self.id.raw(), %err, "write-out failed, box stays resident");
      if !in_place {
        store.release(region);
      }
      self.dirty = true;
      return Err(err);
    }
    match old {
      Some(old) if in_place => {
        store.reallocate(old, count);
      }
      Some(old) => store.release(old),
      None => {}
    }

    tracing::debug!(id = self.id.raw(), offset = region.offset, count, "wrote out box");
    self.region = Some(region);
    self.data = EventData::OnDisk {
      pending: Vec::new(),
    };
    self.dirty = false;
    controller.register_file_backing(self.id);
    Ok(())
  }

  /// Drop the events of a clean, resident box whose copy on disk is current.
  ///
  /// Returns whether the box went back on disk.
  pub fn release(&mut self, controller: &BoxController) -> bool {
    let EventData::Resident(events) = &self.data else {
      return false;
    };
    let clean_copy = !self.dirty
      && !events.is_empty()
      && self.region.is_some_and(|r| r.count == events.len() as u64);
    if clean_copy {
      self.data = EventData::OnDisk {
        pending: Vec::new(),
      };
      controller.register_file_backing(self.id);
    }
    clean_copy
  }

  /// Point the box at a freshly saved region, dropping resident events.
  pub(crate) fn adopt_region(&mut self, region: Option<FileRegion>, controller: &BoxController) {
    self.region = region;
    self.dirty = false;
    match region {
      Some(_) => {
        self.data = EventData::OnDisk {
          pending: Vec::new(),
        };
        controller.register_file_backing(self.id);
      }
      None => self.data = EventData::Resident(Vec::new()),
    }
  }

  /// Empty the box and reset its totals.
  ///
  /// The box's file region, if any, is returned to the store.
  pub fn clear(&mut self, store: Option<&EventStore>, controller: &BoxController) {
    if let (Some(region), Some(store)) = (self.region.take(), store) {
      store.release(region);
    }
    self.data = EventData::Resident(Vec::new());
    self.dirty = false;
    self.signal = 0.0;
    self.error_squared = 0.0;
    controller.forget(self.id);
  }

  /// Page in, then move every event out and clear the box.
  pub(crate) fn take_events(
    &mut self,
    store: Option<&EventStore>,
    controller: &BoxController,
  ) -> Result<Vec<Event>> {
    self.page_in(store, controller)?;
    let events = match &mut self.data {
      EventData::Resident(events) => std::mem::take(events),
      EventData::OnDisk { .. } => Vec::new(),
    };
    self.clear(store, controller);
    Ok(events)
  }

  /// Recompute the cached totals from resident events.
  ///
  /// Boxes on disk keep their totals; recomputing them would need I/O.
  pub fn refresh_cache(&mut self) {
    if let EventData::Resident(events) = &self.data {
      self.signal = events.iter().map(Event::signal).sum();
      self.error_squared = events.iter().map(Event::error_squared).sum();
    }
  }

  /// `event_count > split_threshold && depth < max_depth`.
  pub fn needs_splitting(&self, controller: &BoxController) -> bool {
    let config = controller.config();
    self.event_count() > config.split_threshold as u64 && self.depth < config.max_depth
  }
}

#[cfg(test)]
#[path = "event_box_test.rs"]
mod event_box_test;
