//! Flatten a live tree and write its event payloads.

use std::collections::HashMap;
use std::sync::Arc;

use super::{BoxType, FlatTree, NO_CHILDREN};
use crate::error::{BoxError, Result};
use crate::storage::{EventStore, FileRegion, StorageBackend};
use crate::tree::{BoxId, BoxNode, EventTree};

/// Nodes in flat-index order, with each grid's child index range.
///
/// Depth-first with an explicit stack. When a grid is visited its children
/// receive the next consecutive indices, so every child comes after its
/// parent and siblings are adjacent.
pub fn discovery_order(root: &BoxNode) -> Vec<(&BoxNode, Option<(usize, usize)>)> {
  let mut order: Vec<(&BoxNode, Option<(usize, usize)>)> = vec![(root, None)];
  let mut stack = vec![0usize];
  while let Some(index) = stack.pop() {
    let node = order[index].0;
    if let BoxNode::Grid(grid) = node {
      let first = order.len();
      order.extend(grid.children().iter().map(|child| (child, None)));
      let last = order.len() - 1;
      order[index].1 = Some((first, last));
      stack.extend((first..=last).rev());
    }
  }
  order
}

impl EventTree {
  /// Write every leaf's events to `dest` and return the tree's flat form.
  ///
  /// Leaf payloads are laid out in flat-index order, so sibling leaves are
  /// contiguous. On success the tree adopts `dest` as its backing store and
  /// every non-empty leaf is left on disk, pointing at its saved region. On
  /// failure the tree is unchanged.
  ///
  /// `dest` must not be the tree's current backend.
  #[tracing::instrument(skip_all)]
  pub fn save(&mut self, dest: Arc<dyn StorageBackend>) -> Result<FlatTree> {
    if let Some(store) = &self.store {
      if std::ptr::addr_eq(Arc::as_ptr(&dest), Arc::as_ptr(store.backend())) {
        return Err(BoxError::config(
          "cannot save a tree into the backend it is paging from",
        ));
      }
    }

    let nd = self.nd();
    let new_store = EventStore::new(dest, nd);
    let mut flat = FlatTree::new(nd);
    let mut regions: HashMap<BoxId, FileRegion> = HashMap::new();

    for (node, children) in discovery_order(&self.root) {
      match node {
        BoxNode::Leaf(leaf) => {
          let events = leaf.read_events(self.store.as_ref())?;
          let region = if events.is_empty() {
            FileRegion::default()
          } else {
            let region = new_store.allocate(events.len() as u64);
            new_store.write_events(region, &events)?;
            regions.insert(leaf.id(), region);
            region
          };
          flat.push(
            leaf.id().raw(),
            BoxType::Leaf,
            leaf.depth(),
            leaf.extents(),
            (leaf.signal(), leaf.error_squared()),
            region,
            (NO_CHILDREN, NO_CHILDREN),
          );
        }
        BoxNode::Grid(grid) => {
          let (first, last) = children.unwrap_or_default();
          flat.push(
            grid.id().raw(),
            BoxType::Grid,
            grid.depth(),
            grid.extents(),
            (grid.signal(), grid.error_squared()),
            FileRegion::default(),
            (first as i64, last as i64),
          );
        }
      }
    }
    new_store.flush()?;

    // Commit: nothing below can fail.
    self.controller.reset_backing();
    let controller = &self.controller;
    self.root.try_for_each_leaf_mut(|leaf| {
      leaf.adopt_region(regions.get(&leaf.id()).copied(), controller);
      Ok(())
    })?;
    self.store = Some(new_store);

    tracing::info!(
      nodes = flat.node_count(),
      leaves_with_data = regions.len(),
      events = self.event_count(),
      "saved tree"
    );
    Ok(flat)
  }
}
