//! BoxController - split policy, box identity and file-backing registry.
//!
//! One controller lives exactly as long as its tree. It is the only state
//! shared across boxes: an atomic id counter and two small locked sets. Every
//! method takes `&self` except [`BoxController::configure`], so workers
//! filling different subtrees can share it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use indexmap::IndexSet;

use super::{EventBox, SplitConfig};
use crate::error::Result;

/// Stable box identity, unique for the lifetime of a tree.
///
/// A grid box that replaces a split leaf keeps the leaf's id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BoxId(u64);

impl BoxId {
  pub fn new(raw: u64) -> Self {
    Self(raw)
  }

  /// Get the raw ID value.
  pub fn raw(&self) -> u64 {
    self.0
  }
}

/// Tree-wide policy object.
pub struct BoxController {
  nd: usize,
  config: SplitConfig,
  next_id: AtomicU64,
  /// Boxes whose events currently live only in the backing store.
  file_backed: Mutex<HashSet<BoxId>>,
  /// Resident boxes with data, oldest first; write-out candidates.
  resident: Mutex<IndexSet<BoxId>>,
}

impl BoxController {
  /// Create a controller for an `nd`-dimensional tree.
  pub fn new(nd: usize, config: SplitConfig) -> Result<Self> {
    config.validate(nd)?;
    Ok(Self {
      nd,
      config,
      next_id: AtomicU64::new(0),
      file_backed: Mutex::new(HashSet::new()),
      resident: Mutex::new(IndexSet::new()),
    })
  }

  #[inline]
  pub fn nd(&self) -> usize {
    self.nd
  }

  #[inline]
  pub fn config(&self) -> &SplitConfig {
    &self.config
  }

  /// Replace the configuration.
  ///
  /// Validation happens before anything is applied. Existing boxes are not
  /// re-split; only future splits see the new values.
  pub fn configure(&mut self, config: SplitConfig) -> Result<()> {
    config.validate(self.nd)?;
    tracing::debug!(
      split_threshold = config.split_threshold,
      max_depth = config.max_depth,
      "box controller reconfigured"
    );
    self.config = config;
    Ok(())
  }

  /// Allocate a new, strictly increasing box id.
  #[inline]
  pub fn allocate_id(&self) -> BoxId {
    BoxId(self.next_id.fetch_add(1, Ordering::Relaxed))
  }

  /// Id the next call to [`BoxController::allocate_id`] would return.
  pub fn peek_next_id(&self) -> u64 {
    self.next_id.load(Ordering::Relaxed)
  }

  /// Ensure ids up to and including `id` are never handed out again.
  pub(crate) fn reserve_ids_through(&self, id: BoxId) {
    self.next_id.fetch_max(id.0 + 1, Ordering::Relaxed);
  }

  /// Whether a box must split now.
  #[inline]
  pub fn should_split(&self, event_box: &EventBox) -> bool {
    event_box.needs_splitting(self)
  }

  /// Record that a box's events now live in the backing store only.
  pub fn register_file_backing(&self, id: BoxId) {
    self.resident.lock().unwrap().shift_remove(&id);
    self.file_backed.lock().unwrap().insert(id);
  }

  /// Record that a box's events were paged in.
  ///
  /// Returns whether the box was registered.
  pub fn unregister_file_backing(&self, id: BoxId) -> bool {
    self.file_backed.lock().unwrap().remove(&id)
  }

  pub fn is_file_backed(&self, id: BoxId) -> bool {
    self.file_backed.lock().unwrap().contains(&id)
  }

  /// Number of boxes currently paged out.
  pub fn file_backed_count(&self) -> usize {
    self.file_backed.lock().unwrap().len()
  }

  /// Record that a box holds resident events that could be written out.
  pub(crate) fn note_resident(&self, id: BoxId) {
    self.resident.lock().unwrap().insert(id);
  }

  /// Number of resident boxes tracked for write-out.
  pub fn resident_count(&self) -> usize {
    self.resident.lock().unwrap().len()
  }

  /// Drop all bookkeeping for a box that stopped being a leaf or was emptied.
  pub(crate) fn forget(&self, id: BoxId) {
    self.resident.lock().unwrap().shift_remove(&id);
    self.file_backed.lock().unwrap().remove(&id);
  }

  /// Drop all bookkeeping, before the whole tree moves to a new store.
  pub(crate) fn reset_backing(&self) {
    self.resident.lock().unwrap().clear();
    self.file_backed.lock().unwrap().clear();
  }

  /// Oldest resident boxes beyond the memory budget.
  pub fn eviction_candidates(&self) -> Vec<BoxId> {
    if !self.config.memory_budget_enabled() {
      return Vec::new();
    }
    let resident = self.resident.lock().unwrap();
    let excess = resident.len().saturating_sub(self.config.memory_budget_boxes);
    resident.iter().take(excess).copied().collect()
  }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
