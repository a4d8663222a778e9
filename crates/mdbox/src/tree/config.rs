//! SplitConfig - box splitting and memory policy.

use smallvec::SmallVec;

use crate::error::{BoxError, Result};

/// Per-dimension split factors.
pub type SplitInto = SmallVec<[usize; 4]>;

/// Configuration owned by the [`BoxController`](super::BoxController).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitConfig {
  /// A box holding more events than this splits (unless at `max_depth`).
  pub split_threshold: usize,

  /// Number of cells per dimension when a box splits.
  pub split_into: SplitInto,

  /// Deepest level a box may reach. The root is depth 0.
  pub max_depth: u32,

  /// Resident, file-backable boxes allowed before write-out (0 = unlimited).
  pub memory_budget_boxes: usize,
}

impl SplitConfig {
  /// Default events per box before a split.
  pub const DEFAULT_SPLIT_THRESHOLD: usize = 1000;
  /// Default cells per dimension.
  pub const DEFAULT_SPLIT_INTO: usize = 5;
  /// Default recursion limit.
  pub const DEFAULT_MAX_DEPTH: u32 = 5;

  /// Same split factor along every dimension, unlimited memory budget.
  pub fn uniform(nd: usize, split_into: usize, split_threshold: usize, max_depth: u32) -> Self {
    Self {
      split_threshold,
      split_into: SmallVec::from_elem(split_into, nd),
      max_depth,
      memory_budget_boxes: 0,
    }
  }

  /// Default policy for `nd` dimensions.
  pub fn default_for(nd: usize) -> Self {
    Self::uniform(
      nd,
      Self::DEFAULT_SPLIT_INTO,
      Self::DEFAULT_SPLIT_THRESHOLD,
      Self::DEFAULT_MAX_DEPTH,
    )
  }

  /// Set the memory budget in boxes.
  pub fn with_memory_budget(mut self, boxes: usize) -> Self {
    self.memory_budget_boxes = boxes;
    self
  }

  /// Children created by one split.
  #[inline]
  pub fn children_per_split(&self) -> usize {
    self.split_into.iter().product()
  }

  /// Check if memory budget enforcement is enabled.
  #[inline]
  pub fn memory_budget_enabled(&self) -> bool {
    self.memory_budget_boxes > 0
  }

  /// Reject parameters that cannot describe a valid tree of `nd` dimensions.
  pub fn validate(&self, nd: usize) -> Result<()> {
    if self.split_threshold < 1 {
      return Err(BoxError::config("split_threshold must be at least 1"));
    }
    if self.split_into.len() != nd {
      return Err(BoxError::config(format!(
        "split_into has {} entries for {} dimensions",
        self.split_into.len(),
        nd
      )));
    }
    if let Some((dim, s)) = self.split_into.iter().enumerate().find(|(_, s)| **s < 2) {
      return Err(BoxError::config(format!(
        "split_into[{dim}] = {s}, must be at least 2"
      )));
    }
    let fits = self
      .split_into
      .iter()
      .try_fold(1usize, |acc, s| acc.checked_mul(*s))
      .is_some_and(|n| n <= u32::MAX as usize);
    if !fits {
      return Err(BoxError::config("too many children per split"));
    }
    Ok(())
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
