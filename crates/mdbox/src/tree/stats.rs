//! Tree shape and residency statistics.

use super::BoxNode;

/// Counts gathered by one walk over the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
  /// Number of leaf boxes.
  pub leaf_count: usize,
  /// Number of grid boxes.
  pub grid_count: usize,
  /// Deepest node depth.
  pub max_depth: u32,
  /// Events in all leaves.
  pub event_count: u64,
  /// Leaves whose events are in memory.
  pub resident_leaves: usize,
  /// Leaves whose events are in the backing store.
  pub on_disk_leaves: usize,
  /// Leaves holding events not yet written to the backing store.
  pub dirty_leaves: usize,
}

impl TreeStats {
  pub(crate) fn collect(root: &BoxNode) -> Self {
    let mut stats = Self::default();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
      stats.max_depth = stats.max_depth.max(node.depth());
      match node {
        BoxNode::Leaf(leaf) => {
          stats.leaf_count += 1;
          stats.event_count += leaf.event_count();
          if leaf.is_resident() {
            stats.resident_leaves += 1;
          } else {
            stats.on_disk_leaves += 1;
          }
          if leaf.is_dirty() {
            stats.dirty_leaves += 1;
          }
        }
        BoxNode::Grid(grid) => {
          stats.grid_count += 1;
          stack.extend(grid.children());
        }
      }
    }
    stats
  }

  /// Total number of nodes.
  #[inline]
  pub fn node_count(&self) -> usize {
    self.leaf_count + self.grid_count
  }
}
