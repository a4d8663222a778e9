//! Error taxonomy for the box tree.
//!
//! Structural and configuration errors are never recovered from. Only the two
//! I/O variants are meant to be retried: a failed page-in leaves the box on
//! disk and a failed write-out leaves it resident, so a retry is always safe.

use std::io::ErrorKind;

use thiserror::Error;

use crate::storage::FileRegion;

/// Result alias used throughout the crate.
pub type Result<T, E = BoxError> = std::result::Result<T, E>;

/// An error raised by the tree, its controller or the paging layer.
#[derive(Clone, Error, Debug, PartialEq)]
pub enum BoxError {
  /// An event was routed to a box whose extents do not contain it.
  #[error("event at {coords:?} lies outside box extents {extents}")]
  OutOfRange {
    /// Coordinates of the rejected event.
    coords: Vec<f64>,
    /// Extents of the box that rejected it.
    extents: String,
  },

  /// An event or extents value has the wrong number of dimensions.
  #[error("expected {expected} dimensions, found {found}")]
  DimensionMismatch { expected: usize, found: usize },

  /// Controller parameters were rejected; nothing was applied.
  #[error("invalid configuration: {0}")]
  InvalidConfiguration(String),

  /// A flat tree failed validation while loading.
  #[error("corrupt flat tree: {0}")]
  CorruptTree(String),

  /// Reading event data from the backing store failed.
  #[error("failed to read {} events at offset {}: {kind}", .region.count, .region.offset)]
  IoRead { region: FileRegion, kind: ErrorKind },

  /// Writing event data to the backing store failed.
  #[error("failed to write {} events at offset {}: {kind}", .region.count, .region.offset)]
  IoWrite { region: FileRegion, kind: ErrorKind },
}

impl BoxError {
  pub(crate) fn corrupt(message: impl Into<String>) -> Self {
    Self::CorruptTree(message.into())
  }

  pub(crate) fn config(message: impl Into<String>) -> Self {
    Self::InvalidConfiguration(message.into())
  }

  /// Whether retrying the failed operation can succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::IoRead { .. } | Self::IoWrite { .. })
  }

  /// I/O error kind, for the I/O variants.
  pub fn io_kind(&self) -> Option<ErrorKind> {
    match self {
      Self::IoRead { kind, .. } | Self::IoWrite { kind, .. } => Some(*kind),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn io_errors_are_retryable() {
    let region = FileRegion::new(10, 4);
    let read = BoxError::IoRead {
      region,
      kind: ErrorKind::UnexpectedEof,
    };
    assert!(read.is_retryable());
    assert_eq!(read.io_kind(), Some(ErrorKind::UnexpectedEof));
    assert_eq!(
      read.to_string(),
      "failed to read 4 events at offset 10: unexpected end of file"
    );
  }

  #[test]
  fn structural_errors_are_not_retryable() {
    assert!(!BoxError::corrupt("bad range").is_retryable());
    assert!(!BoxError::config("split_threshold must be >= 1").is_retryable());
    assert_eq!(BoxError::corrupt("x").io_kind(), None);
  }
}
