//! mdbox - adaptive, file-backed box-splitting tree for multi-dimensional
//! events
//!
//! This crate stores streams of point-like events (coordinates plus signal
//! and squared error) in a self-balancing spatial tree. Boxes that collect
//! too many events split into a regular grid of smaller boxes; box contents
//! can be paged out to a backing store and are paged back in on access.
//!
//! # Features
//!
//! - **Adaptive splitting**: leaves split into `split_into[d]` cells per
//!   dimension once they pass `split_threshold`, down to `max_depth`
//! - **Out-of-core paging**: leaves move between memory and a
//!   [`StorageBackend`] under a resident-box budget
//! - **Parallel ingestion**: batches are partitioned by root cell and filled
//!   on the rayon pool
//! - **Flat persistence**: [`FlatTree`] captures the topology in columnar
//!   arrays and rebuilds it without reading event payloads
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mdbox::{EventTree, Extents, MemoryBackend, SplitConfig};
//!
//! let extents = Extents::new(&[0.0, 0.0], &[10.0, 10.0])?;
//! let mut tree = EventTree::new(extents, SplitConfig::uniform(2, 2, 1000, 8))?;
//! tree.add(&[1.5, 3.0], 1.0, 1.0)?;
//!
//! let flat = tree.save(Arc::new(MemoryBackend::new()))?;
//! println!("{} nodes, {} events", flat.node_count(), tree.event_count());
//! ```

pub mod error;
pub mod event;
pub mod extents;
pub mod flat_tree;
pub mod storage;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used items
pub use error::{BoxError, Result};
pub use event::{Coords, Event};
pub use extents::Extents;
pub use flat_tree::{BoxType, FlatTree, FLAT_TREE_VERSION};
pub use storage::{EventStore, FileBackend, FileRegion, MemoryBackend, StorageBackend};
pub use tree::{
  BoxController, BoxId, BoxNode, EventBox, EventIter, EventTree, GridBox, SplitConfig, TreeStats,
};
