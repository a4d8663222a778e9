//! BoxNode - the slot a parent holds for each child.
//!
//! A split replaces the slot's value in place (`Leaf` becomes `Grid`). Code
//! that needs a box reaches it through the slot rather than keeping a handle
//! across a possible split.

use rayon::prelude::*;

use super::{BoxController, BoxId, EventBox, GridBox};
use crate::error::Result;
use crate::event::Event;
use crate::extents::Extents;
use crate::storage::EventStore;

/// A node of the tree.
#[derive(Debug)]
pub enum BoxNode {
  Leaf(EventBox),
  Grid(GridBox),
}

impl BoxNode {
  pub fn id(&self) -> BoxId {
    match self {
      BoxNode::Leaf(leaf) => leaf.id(),
      BoxNode::Grid(grid) => grid.id(),
    }
  }

  pub fn depth(&self) -> u32 {
    match self {
      BoxNode::Leaf(leaf) => leaf.depth(),
      BoxNode::Grid(grid) => grid.depth(),
    }
  }

  pub fn extents(&self) -> &Extents {
    match self {
      BoxNode::Leaf(leaf) => leaf.extents(),
      BoxNode::Grid(grid) => grid.extents(),
    }
  }

  pub fn signal(&self) -> f64 {
    match self {
      BoxNode::Leaf(leaf) => leaf.signal(),
      BoxNode::Grid(grid) => grid.signal(),
    }
  }

  pub fn error_squared(&self) -> f64 {
    match self {
      BoxNode::Leaf(leaf) => leaf.error_squared(),
      BoxNode::Grid(grid) => grid.error_squared(),
    }
  }

  pub fn event_count(&self) -> u64 {
    match self {
      BoxNode::Leaf(leaf) => leaf.event_count(),
      BoxNode::Grid(grid) => grid.event_count(),
    }
  }

  #[inline]
  pub fn is_leaf(&self) -> bool {
    matches!(self, BoxNode::Leaf(_))
  }

  pub fn as_leaf(&self) -> Option<&EventBox> {
    match self {
      BoxNode::Leaf(leaf) => Some(leaf),
      BoxNode::Grid(_) => None,
    }
  }

  pub fn as_grid(&self) -> Option<&GridBox> {
    match self {
      BoxNode::Leaf(_) => None,
      BoxNode::Grid(grid) => Some(grid),
    }
  }

  /// Children of a grid; empty for a leaf.
  pub fn children(&self) -> &[BoxNode] {
    match self {
      BoxNode::Leaf(_) => &[],
      BoxNode::Grid(grid) => grid.children(),
    }
  }

  /// Insert an event below this node, splitting the receiving leaf if it
  /// went over the threshold.
  pub fn add_event(
    &mut self,
    event: Event,
    store: Option<&EventStore>,
    controller: &BoxController,
  ) -> Result<()> {
    let leaf = match self {
      BoxNode::Grid(grid) => return grid.add_event(event, store, controller),
      BoxNode::Leaf(leaf) => leaf,
    };

    let was_empty = leaf.event_count() == 0;
    leaf.add_event(event)?;
    if was_empty && store.is_some() && leaf.is_resident() {
      controller.note_resident(leaf.id());
    }

    let config = controller.config();
    if leaf.depth() >= config.max_depth && leaf.event_count() == config.split_threshold as u64 + 1 {
      tracing::warn!(
        id = leaf.id().raw(),
        depth = leaf.depth(),
        threshold = config.split_threshold,
        "box at max depth exceeds split threshold"
      );
    }
    self.split_if_needed(store, controller)
  }

  /// Replace a leaf that needs splitting with a grid, then split its new
  /// children the same way until none is over the threshold.
  ///
  /// Does nothing for grids and for leaves under the threshold. Works from an
  /// explicit stack, so `max_depth` does not bound the call depth.
  pub fn split_if_needed(
    &mut self,
    store: Option<&EventStore>,
    controller: &BoxController,
  ) -> Result<()> {
    let mut stack = vec![self];
    while let Some(node) = stack.pop() {
      let BoxNode::Leaf(leaf) = node else {
        continue;
      };
      if !controller.should_split(leaf) {
        continue;
      }
      let grid = GridBox::split_box(leaf, store, controller)?;
      *node = BoxNode::Grid(grid);
      if let BoxNode::Grid(grid) = node {
        stack.extend(grid.children.iter_mut().rev());
      }
    }
    Ok(())
  }

  /// Split every leaf below this node that needs it, e.g. after lowering
  /// the threshold. Sibling subtrees are processed in parallel.
  pub fn split_all_if_needed(
    &mut self,
    store: Option<&EventStore>,
    controller: &BoxController,
  ) -> Result<()> {
    match self {
      BoxNode::Leaf(_) => self.split_if_needed(store, controller),
      BoxNode::Grid(grid) => {
        let result = grid
          .children
          .par_iter_mut()
          .try_for_each(|child| child.split_subtree(store, controller));
        grid.refresh_totals();
        result
      }
    }
  }

  fn split_subtree(&mut self, store: Option<&EventStore>, controller: &BoxController) -> Result<()> {
    let mut stack = vec![self];
    while let Some(node) = stack.pop() {
      match node {
        BoxNode::Grid(grid) => stack.extend(grid.children.iter_mut()),
        BoxNode::Leaf(_) => node.split_if_needed(store, controller)?,
      }
    }
    Ok(())
  }

  /// Recompute every cached total bottom-up.
  ///
  /// Leaves on disk keep their recorded totals.
  pub fn refresh_cache(&mut self) {
    match self {
      BoxNode::Leaf(leaf) => leaf.refresh_cache(),
      BoxNode::Grid(grid) => {
        grid.children.iter_mut().for_each(BoxNode::refresh_cache);
        grid.refresh_totals();
      }
    }
  }

  /// All leaves below this node, depth-first in child order.
  pub fn leaves(&self) -> Vec<&EventBox> {
    let mut leaves = Vec::new();
    let mut stack = vec![self];
    while let Some(node) = stack.pop() {
      match node {
        BoxNode::Leaf(leaf) => leaves.push(leaf),
        BoxNode::Grid(grid) => stack.extend(grid.children().iter().rev()),
      }
    }
    leaves
  }

  /// Run `f` on every leaf, depth-first in child order, stopping at the
  /// first error.
  pub fn try_for_each_leaf_mut<F>(&mut self, mut f: F) -> Result<()>
  where
    F: FnMut(&mut EventBox) -> Result<()>,
  {
    let mut stack = vec![self];
    while let Some(node) = stack.pop() {
      match node {
        BoxNode::Leaf(leaf) => f(leaf)?,
        BoxNode::Grid(grid) => stack.extend(grid.children.iter_mut().rev()),
      }
    }
    Ok(())
  }
}
