//! GridBox - internal node holding a regular grid of children.
//!
//! # Splitting
//!
//! ```text
//!   EventBox [0, 1]  (5 events, threshold 4, split_into [2])
//!        │
//!        ▼
//!   GridBox [0, 1]   (same id)
//!    ├── EventBox [0, 0.5)   0.1 0.2 0.3
//!    └── EventBox [0.5, 1]   0.6 0.9
//! ```
//!
//! Children are laid out with dimension 0 varying fastest. Cell boundaries
//! come from [`Extents::boundary`], so children tile the parent exactly.

use super::{BoxController, BoxId, BoxNode, EventBox, SplitInto};
use crate::error::{BoxError, Result};
use crate::event::Event;
use crate::extents::Extents;
use crate::storage::EventStore;

/// Internal node.
#[derive(Debug)]
pub struct GridBox {
  id: BoxId,
  depth: u32,
  extents: Extents,
  split: SplitInto,
  pub(crate) children: Vec<BoxNode>,
  signal: f64,
  error_squared: f64,
  event_count: u64,
}

impl GridBox {
  /// Move every event of `leaf` into a fresh grid of leaf children.
  ///
  /// Children are not split further here; [`BoxNode::split_if_needed`] drives
  /// the cascade. The grid keeps the leaf's id and depth. `leaf` is left
  /// empty; if paging it in fails, it is left untouched and the error is
  /// returned.
  pub(crate) fn split_box(
    leaf: &mut EventBox,
    store: Option<&EventStore>,
    controller: &BoxController,
  ) -> Result<Self> {
    let events = leaf.take_events(store, controller)?;
    let split = controller.config().split_into.clone();
    let extents = leaf.extents().clone();
    let depth = leaf.depth();

    let mut boxes: Vec<EventBox> = (0..controller.config().children_per_split())
      .map(|linear| EventBox::new(controller.allocate_id(), depth + 1, extents.cell(&split, linear)))
      .collect();

    let moved = events.len();
    for event in events {
      let cell = extents.cell_index(&split, event.coords());
      boxes[cell].push(event);
    }

    let children = boxes
      .into_iter()
      .map(|event_box| {
        if store.is_some() && event_box.event_count() > 0 {
          controller.note_resident(event_box.id());
        }
        BoxNode::Leaf(event_box)
      })
      .collect();

    let mut grid = Self {
      id: leaf.id(),
      depth,
      extents,
      split,
      children,
      signal: 0.0,
      error_squared: 0.0,
      event_count: 0,
    };
    grid.refresh_totals();
    tracing::debug!(
      id = grid.id.raw(),
      depth,
      events = moved,
      children = grid.children.len(),
      "split box"
    );
    Ok(grid)
  }

  /// Assemble a grid from already built children.
  ///
  /// `signal` and `error_squared` are taken as given; the event count is
  /// summed from the children.
  pub(crate) fn from_parts(
    id: BoxId,
    depth: u32,
    extents: Extents,
    split: SplitInto,
    children: Vec<BoxNode>,
    signal: f64,
    error_squared: f64,
  ) -> Self {
    let event_count = children.iter().map(BoxNode::event_count).sum();
    Self {
      id,
      depth,
      extents,
      split,
      children,
      signal,
      error_squared,
      event_count,
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

  /// Cells per dimension.
  #[inline]
  pub fn split_into(&self) -> &[usize] {
    &self.split
  }

  #[inline]
  pub fn children(&self) -> &[BoxNode] {
    &self.children
  }

  #[inline]
  pub fn signal(&self) -> f64 {
    self.signal
  }

  #[inline]
  pub fn error_squared(&self) -> f64 {
    self.error_squared
  }

  #[inline]
  pub fn event_count(&self) -> u64 {
    self.event_count
  }

  /// Index of the child whose cell contains `coords`.
  #[inline]
  pub fn child_index(&self, coords: &[f64]) -> usize {
    self.extents.cell_index(&self.split, coords)
  }

  /// Check that `event` belongs in this grid and pick its child.
  fn route(&self, event: &Event) -> Result<usize> {
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
    Ok(self.child_index(event.coords()))
  }

  /// Route an event down to the leaf containing it.
  ///
  /// The whole path is checked before anything changes. Any later error
  /// comes from splitting the receiving leaf, after the event was stored, so
  /// the totals are updated either way.
  pub(crate) fn add_event(
    &mut self,
    event: Event,
    store: Option<&EventStore>,
    controller: &BoxController,
  ) -> Result<()> {
    let mut path = vec![self.route(&event)?];
    let mut next = &self.children[path[0]];
    while let BoxNode::Grid(grid) = next {
      let index = grid.route(&event)?;
      path.push(index);
      next = &grid.children[index];
    }

    let (signal, error_squared) = (event.signal(), event.error_squared());
    self.add_totals(signal, error_squared, 1);
    let mut node = &mut self.children[path[0]];
    for &index in &path[1..] {
      match node {
        BoxNode::Grid(grid) => {
          grid.add_totals(signal, error_squared, 1);
          node = &mut grid.children[index];
        }
        BoxNode::Leaf(_) => break,
      }
    }
    node.add_event(event, store, controller)
  }

  #[inline]
  pub(crate) fn add_totals(&mut self, signal: f64, error_squared: f64, count: u64) {
    self.signal += signal;
    self.error_squared += error_squared;
    self.event_count += count;
  }

  /// Recompute totals from the direct children's cached totals.
  pub(crate) fn refresh_totals(&mut self) {
    self.signal = self.children.iter().map(BoxNode::signal).sum();
    self.error_squared = self.children.iter().map(BoxNode::error_squared).sum();
    self.event_count = self.children.iter().map(BoxNode::event_count).sum();
  }
}

// Deep grids are taken apart one level at a time.
impl Drop for GridBox {
  fn drop(&mut self) {
    let mut pending = std::mem::take(&mut self.children);
    while let Some(node) = pending.pop() {
      if let BoxNode::Grid(mut grid) = node {
        pending.append(&mut grid.children);
      }
    }
  }
}

#[cfg(test)]
#[path = "grid_box_test.rs"]
mod grid_box_test;
