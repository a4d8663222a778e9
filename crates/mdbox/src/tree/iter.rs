//! Event iteration across the whole tree.

use std::slice;

use super::{BoxController, BoxNode};
use crate::error::Result;
use crate::event::Event;
use crate::extents::Extents;
use crate::storage::EventStore;

/// Yields every event below a node, paging boxes in as it reaches them.
///
/// With a region set, subtrees that do not overlap it are skipped without
/// paging, and only events inside the region are yielded. If a page-in
/// fails the error is yielded once and that box is skipped.
pub struct EventIter<'a> {
  stack: Vec<&'a mut BoxNode>,
  current: slice::Iter<'a, Event>,
  region: Option<Extents>,
  store: Option<&'a EventStore>,
  controller: &'a BoxController,
}

impl<'a> EventIter<'a> {
  pub(crate) fn new(
    root: &'a mut BoxNode,
    region: Option<Extents>,
    store: Option<&'a EventStore>,
    controller: &'a BoxController,
  ) -> Self {
    let stack = match &region {
      Some(region) if !root.extents().overlaps(region) => Vec::new(),
      _ => vec![root],
    };
    let empty: &'a [Event] = &[];
    Self {
      stack,
      current: empty.iter(),
      region,
      store,
      controller,
    }
  }

  fn in_region(&self, event: &Event) -> bool {
    self
      .region
      .as_ref()
      .map_or(true, |region| region.contains_point(event.coords()))
  }
}

impl<'a> Iterator for EventIter<'a> {
  type Item = Result<&'a Event>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      while let Some(event) = self.current.next() {
        if self.in_region(event) {
          return Some(Ok(event));
        }
      }

      match self.stack.pop()? {
        BoxNode::Grid(grid) => {
          let region = self.region.as_ref();
          self.stack.extend(
            grid
              .children
              .iter_mut()
              .rev()
              .filter(|child| region.map_or(true, |r| child.extents().overlaps(r))),
          );
        }
        BoxNode::Leaf(leaf) => match leaf.get_events(self.store, self.controller) {
          Ok(events) => self.current = events.iter(),
          Err(err) => return Some(Err(err)),
        },
      }
    }
  }
}
