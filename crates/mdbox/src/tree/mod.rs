//! Adaptive box-splitting event tree.
//!
//! # Structure
//!
//! The tree starts as a single [`EventBox`] covering the whole extents. A leaf
//! that holds more than `split_threshold` events is replaced in place by a
//! [`GridBox`] whose children evenly tile it. Depth is bounded by
//! `max_depth`; a leaf at that depth grows without limit.
//!
//! # Paging
//!
//! With a backing store attached, leaves can be written out and paged back
//! in transparently. The [`BoxController`] tracks which leaves are resident
//! and writes the oldest ones out when `memory_budget_boxes` is exceeded.
//!
//! # Module Structure
//!
//! - [`config`]: `SplitConfig` - split policy and memory budget
//! - [`controller`]: `BoxController` - ids, split decisions, file-backing
//!   registry
//! - [`event_box`]: `EventBox` - leaf with resident or on-disk events
//! - [`grid_box`]: `GridBox` - internal node and the split algorithm
//! - [`node`]: `BoxNode` - leaf-or-grid child slot
//! - [`iter`]: `EventIter` - lazy paging iteration
//! - [`stats`]: `TreeStats`

pub mod config;
pub mod controller;
pub mod event_box;
pub mod grid_box;
pub mod iter;
pub mod node;
pub mod stats;

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{BoxError, Result};
use crate::event::Event;
use crate::extents::Extents;
use crate::storage::{EventStore, StorageBackend};

// Re-exports
pub use config::{SplitConfig, SplitInto};
pub use controller::{BoxController, BoxId};
pub use event_box::{EventBox, EventData};
pub use grid_box::GridBox;
pub use iter::EventIter;
pub use node::BoxNode;
pub use stats::TreeStats;

/// A box tree together with its controller and optional backing store.
pub struct EventTree {
  pub(crate) root: BoxNode,
  pub(crate) controller: BoxController,
  pub(crate) store: Option<EventStore>,
}

impl EventTree {
  /// Create an in-memory tree with a single empty root box.
  ///
  /// Every dimension of `extents` must have a positive width.
  pub fn new(extents: Extents, config: SplitConfig) -> Result<Self> {
    if let Some(dim) = (0..extents.nd()).find(|d| extents.size(*d) <= 0.0) {
      return Err(BoxError::config(format!(
        "root extents {extents} have zero width in dimension {dim}"
      )));
    }
    let controller = BoxController::new(extents.nd(), config)?;
    let root = BoxNode::Leaf(EventBox::new(controller.allocate_id(), 0, extents));
    Ok(Self {
      root,
      controller,
      store: None,
    })
  }

  /// Create a tree that can page events out to `backend`.
  pub fn with_storage(
    extents: Extents,
    config: SplitConfig,
    backend: Arc<dyn StorageBackend>,
  ) -> Result<Self> {
    let mut tree = Self::new(extents, config)?;
    tree.store = Some(EventStore::new(backend, tree.nd()));
    Ok(tree)
  }

  /// Assemble a tree from loaded parts.
  pub(crate) fn from_parts(root: BoxNode, controller: BoxController, store: EventStore) -> Self {
    Self {
      root,
      controller,
      store: Some(store),
    }
  }

  /// Replace the split policy. Existing boxes are not re-split; call
  /// [`EventTree::split_all_if_needed`] for that.
  pub fn configure(&mut self, config: SplitConfig) -> Result<()> {
    self.controller.configure(config)
  }

  #[inline]
  pub fn nd(&self) -> usize {
    self.controller.nd()
  }

  #[inline]
  pub fn root(&self) -> &BoxNode {
    &self.root
  }

  #[inline]
  pub fn extents(&self) -> &Extents {
    self.root.extents()
  }

  #[inline]
  pub fn controller(&self) -> &BoxController {
    &self.controller
  }

  #[inline]
  pub fn config(&self) -> &SplitConfig {
    self.controller.config()
  }

  #[inline]
  pub fn store(&self) -> Option<&EventStore> {
    self.store.as_ref()
  }

  #[inline]
  pub fn event_count(&self) -> u64 {
    self.root.event_count()
  }

  #[inline]
  pub fn signal(&self) -> f64 {
    self.root.signal()
  }

  #[inline]
  pub fn error_squared(&self) -> f64 {
    self.root.error_squared()
  }

  // ===========================================================================
  // Ingestion
  // ===========================================================================

  /// Insert one event.
  ///
  /// If the insertion pushes the resident boxes over the memory budget, the
  /// oldest are written out before returning. The event is kept even if that
  /// write-out fails.
  pub fn add_event(&mut self, event: Event) -> Result<()> {
    self
      .root
      .add_event(event, self.store.as_ref(), &self.controller)?;
    self.enforce_memory_budget_if_over()
  }

  /// Insert one event built from its parts.
  pub fn add(&mut self, coords: &[f64], signal: f64, error_squared: f64) -> Result<()> {
    self.add_event(Event::new(coords, signal, error_squared))
  }

  /// Insert a batch of events in order.
  ///
  /// The whole batch is range-checked first; if any event is rejected,
  /// nothing is inserted.
  pub fn add_events(&mut self, events: Vec<Event>) -> Result<()> {
    self.check_batch(&events)?;
    let store = self.store.as_ref();
    for event in events {
      self.root.add_event(event, store, &self.controller)?;
    }
    self.enforce_memory_budget_if_over()
  }

  /// Insert a batch of events using the rayon pool.
  ///
  /// Events are partitioned by root-grid cell and each cell's subtree is
  /// filled by one worker, so no box is ever touched by two threads. While
  /// the root is still a leaf, events go in sequentially until it splits.
  #[tracing::instrument(skip_all, fields(count = events.len()))]
  pub fn add_events_parallel(&mut self, events: Vec<Event>) -> Result<()> {
    self.check_batch(&events)?;
    let store = self.store.as_ref();
    let controller = &self.controller;

    let mut rest = events.into_iter();
    while self.root.is_leaf() {
      match rest.next() {
        Some(event) => self.root.add_event(event, store, controller)?,
        None => return self.enforce_memory_budget_if_over(),
      }
    }

    if let BoxNode::Grid(grid) = &mut self.root {
      let mut buckets: Vec<Vec<Event>> = vec![Vec::new(); grid.children.len()];
      for event in rest {
        buckets[grid.child_index(event.coords())].push(event);
      }
      let result = grid
        .children
        .par_iter_mut()
        .zip(buckets.into_par_iter())
        .try_for_each(|(child, bucket)| {
          bucket
            .into_iter()
            .try_for_each(|event| child.add_event(event, store, controller))
        });
      grid.refresh_totals();
      result?;
    }
    self.enforce_memory_budget_if_over()
  }

  fn check_batch(&self, events: &[Event]) -> Result<()> {
    let extents = self.root.extents();
    for event in events {
      if event.nd() != self.nd() {
        return Err(BoxError::DimensionMismatch {
          expected: self.nd(),
          found: event.nd(),
        });
      }
      if !extents.contains_point(event.coords()) {
        return Err(BoxError::OutOfRange {
          coords: event.coords().to_vec(),
          extents: extents.to_string(),
        });
      }
    }
    Ok(())
  }

  /// Split every leaf that is over the current threshold.
  pub fn split_all_if_needed(&mut self) -> Result<()> {
    self
      .root
      .split_all_if_needed(self.store.as_ref(), &self.controller)
  }

  /// Recompute every cached total from the resident events.
  pub fn refresh_cache(&mut self) {
    self.root.refresh_cache();
  }

  // ===========================================================================
  // Iteration
  // ===========================================================================

  /// Iterate over every event, paging boxes in as needed.
  pub fn events(&mut self) -> EventIter<'_> {
    EventIter::new(&mut self.root, None, self.store.as_ref(), &self.controller)
  }

  /// Iterate over the events inside `region`.
  ///
  /// Boxes that do not overlap `region` are not paged in.
  pub fn events_in(&mut self, region: &Extents) -> Result<EventIter<'_>> {
    if region.nd() != self.nd() {
      return Err(BoxError::DimensionMismatch {
        expected: self.nd(),
        found: region.nd(),
      });
    }
    Ok(EventIter::new(
      &mut self.root,
      Some(region.clone()),
      self.store.as_ref(),
      &self.controller,
    ))
  }

  /// Copy out every event.
  pub fn collect_events(&mut self) -> Result<Vec<Event>> {
    self.events().map(|event| event.cloned()).collect()
  }

  /// Visit every event without growing the resident set.
  ///
  /// Boxes that were on disk are paged in, visited, and dropped again if
  /// they are still clean.
  pub fn visit_events<F>(&mut self, mut f: F) -> Result<()>
  where
    F: FnMut(&Event),
  {
    let store = self.store.as_ref();
    let controller = &self.controller;
    self.root.try_for_each_leaf_mut(|leaf| {
      let was_on_disk = leaf.is_on_disk();
      leaf.get_events(store, controller)?.iter().for_each(&mut f);
      if was_on_disk {
        leaf.release(controller);
      }
      Ok(())
    })
  }

  // ===========================================================================
  // Paging
  // ===========================================================================

  fn enforce_memory_budget_if_over(&mut self) -> Result<()> {
    let config = self.controller.config();
    if self.store.is_some()
      && config.memory_budget_enabled()
      && self.controller.resident_count() > config.memory_budget_boxes
    {
      self.enforce_memory_budget()?;
    }
    Ok(())
  }

  /// Write out the oldest resident boxes above the memory budget.
  ///
  /// Returns the number of boxes written out. Does nothing without a backing
  /// store or with an unlimited budget.
  #[tracing::instrument(skip_all)]
  pub fn enforce_memory_budget(&mut self) -> Result<usize> {
    let Some(store) = self.store.as_ref() else {
      return Ok(0);
    };
    let candidates: HashSet<BoxId> = self.controller.eviction_candidates().into_iter().collect();
    if candidates.is_empty() {
      return Ok(0);
    }

    let controller = &self.controller;
    let mut written = 0;
    self.root.try_for_each_leaf_mut(|leaf| {
      if candidates.contains(&leaf.id()) {
        leaf.write_out(store, controller)?;
        written += 1;
      }
      Ok(())
    })?;
    tracing::debug!(
      written,
      resident = controller.resident_count(),
      file_backed = controller.file_backed_count(),
      "enforced memory budget"
    );
    Ok(written)
  }

  /// Write out every box that holds events, so nothing stays in memory.
  ///
  /// Boxes on disk with pending events are paged in and rewritten.
  pub fn write_out_all(&mut self) -> Result<usize> {
    let store = self
      .store
      .as_ref()
      .ok_or_else(|| BoxError::config("tree has no backing store"))?;
    let controller = &self.controller;
    let mut written = 0;
    self.root.try_for_each_leaf_mut(|leaf| {
      if leaf.is_on_disk() && leaf.is_dirty() {
        leaf.get_events(Some(store), controller)?;
      }
      if leaf.is_resident() && leaf.event_count() > 0 {
        leaf.write_out(store, controller)?;
        written += 1;
      }
      Ok(())
    })?;
    store.flush()?;
    Ok(written)
  }

  // ===========================================================================
  // Inspection
  // ===========================================================================

  /// Walk the tree and count nodes, events and residency.
  pub fn stats(&self) -> TreeStats {
    TreeStats::collect(&self.root)
  }

  /// All leaves, depth-first in child order.
  pub fn leaves(&self) -> Vec<&EventBox> {
    self.root.leaves()
  }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
