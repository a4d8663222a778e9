//! Event - immutable point-like value stored in the tree.
//!
//! An event is `nd` coordinates plus a signal and its squared error. Events
//! are owned by exactly one box at a time; splitting moves them, it never
//! copies or alters them.

use smallvec::SmallVec;

/// Inline coordinate storage; up to four dimensions avoid a heap allocation.
pub type Coords = SmallVec<[f64; 4]>;

/// Immutable event value.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
  coords: Coords,
  signal: f64,
  error_squared: f64,
}

impl Event {
  /// Create an event from its coordinates, signal and squared error.
  pub fn new(coords: &[f64], signal: f64, error_squared: f64) -> Self {
    Self {
      coords: Coords::from_slice(coords),
      signal,
      error_squared,
    }
  }

  /// Coordinates in the tree's frame.
  #[inline]
  pub fn coords(&self) -> &[f64] {
    &self.coords
  }

  /// Number of dimensions.
  #[inline]
  pub fn nd(&self) -> usize {
    self.coords.len()
  }

  #[inline]
  pub fn signal(&self) -> f64 {
    self.signal
  }

  #[inline]
  pub fn error_squared(&self) -> f64 {
    self.error_squared
  }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod event_test;
