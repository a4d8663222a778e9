//! Axis-aligned n-dimensional extents with double precision.

use std::fmt;

use crate::error::{BoxError, Result};
use crate::event::Coords;

/// Per-dimension `(min, max)` bounds of a box.
///
/// Containment is inclusive on both ends. When split into a regular grid,
/// cell boundaries are computed by [`Extents::boundary`] only, so a cell's max
/// is bit-identical to its neighbour's min and the cells tile the parent with
/// no gap or overlap.
#[derive(Clone, Debug, PartialEq)]
pub struct Extents {
  min: Coords,
  max: Coords,
}

impl Extents {
  /// Create extents from min and max corners.
  ///
  /// Fails if the corners differ in length, are empty, are not finite, or if
  /// `min > max` on any axis.
  pub fn new(min: &[f64], max: &[f64]) -> Result<Self> {
    if min.len() != max.len() {
      return Err(BoxError::DimensionMismatch {
        expected: min.len(),
        found: max.len(),
      });
    }
    if min.is_empty() {
      return Err(BoxError::config("extents need at least one dimension"));
    }
    for (dim, (lo, hi)) in min.iter().zip(max).enumerate() {
      if !lo.is_finite() || !hi.is_finite() || lo > hi {
        return Err(BoxError::config(format!(
          "invalid bounds [{lo}, {hi}] in dimension {dim}"
        )));
      }
    }
    Ok(Self {
      min: Coords::from_slice(min),
      max: Coords::from_slice(max),
    })
  }

  /// Create extents from `(min, max)` pairs, one per dimension.
  pub fn from_bounds(bounds: &[(f64, f64)]) -> Result<Self> {
    let min: Vec<f64> = bounds.iter().map(|b| b.0).collect();
    let max: Vec<f64> = bounds.iter().map(|b| b.1).collect();
    Self::new(&min, &max)
  }

  /// Number of dimensions.
  #[inline]
  pub fn nd(&self) -> usize {
    self.min.len()
  }

  #[inline]
  pub fn min(&self) -> &[f64] {
    &self.min
  }

  #[inline]
  pub fn max(&self) -> &[f64] {
    &self.max
  }

  /// Check if these extents contain a point (inclusive).
  #[inline]
  pub fn contains_point(&self, coords: &[f64]) -> bool {
    coords.len() == self.nd()
      && coords
        .iter()
        .zip(self.min.iter().zip(&self.max))
        .all(|(x, (lo, hi))| *x >= *lo && *x <= *hi)
  }

  /// Check if these extents overlap another (touching counts).
  #[inline]
  pub fn overlaps(&self, other: &Extents) -> bool {
    self.nd() == other.nd()
      && (0..self.nd()).all(|d| self.min[d] <= other.max[d] && self.max[d] >= other.min[d])
  }

  /// Width along one dimension.
  #[inline]
  pub fn size(&self, dim: usize) -> f64 {
    self.max[dim] - self.min[dim]
  }

  /// Product of the widths.
  pub fn volume(&self) -> f64 {
    (0..self.nd()).map(|d| self.size(d)).product()
  }

  /// Boundary `i` of `split` equal cells along `dim`.
  ///
  /// Boundary 0 is exactly `min` and boundary `split` is exactly `max`.
  #[inline]
  pub fn boundary(&self, dim: usize, split: usize, i: usize) -> f64 {
    if i == 0 {
      self.min[dim]
    } else if i >= split {
      self.max[dim]
    } else {
      self.min[dim] + self.size(dim) * (i as f64) / (split as f64)
    }
  }

  /// Extents of cell `linear` in a regular grid with `split[d]` cells per
  /// dimension. Dimension 0 varies fastest.
  pub fn cell(&self, split: &[usize], linear: usize) -> Extents {
    let mut rest = linear;
    let mut min = Coords::with_capacity(self.nd());
    let mut max = Coords::with_capacity(self.nd());
    for (dim, &s) in split.iter().enumerate() {
      let i = rest % s;
      rest /= s;
      min.push(self.boundary(dim, s, i));
      max.push(self.boundary(dim, s, i + 1));
    }
    Extents { min, max }
  }

  /// Cell index along one dimension.
  ///
  /// Cells are half-open `[lo, hi)` except the last, which also takes `max`.
  /// Values outside the extents clamp to the first or last cell.
  pub fn cell_along(&self, dim: usize, split: usize, x: f64) -> usize {
    let size = self.size(dim);
    if size <= 0.0 || split <= 1 {
      return 0;
    }
    let f = ((x - self.min[dim]) / size * split as f64).floor();
    let mut i = if f.is_nan() || f < 0.0 {
      0
    } else {
      (f as usize).min(split - 1)
    };
    // Settle rounding against the exact boundaries.
    while i > 0 && x < self.boundary(dim, split, i) {
      i -= 1;
    }
    while i + 1 < split && x >= self.boundary(dim, split, i + 1) {
      i += 1;
    }
    i
  }

  /// Linear index of the grid cell containing `coords`.
  pub fn cell_index(&self, split: &[usize], coords: &[f64]) -> usize {
    let mut linear = 0;
    let mut stride = 1;
    for (dim, &s) in split.iter().enumerate() {
      linear += self.cell_along(dim, s, coords[dim]) * stride;
      stride *= s;
    }
    linear
  }

  /// Compare with a per-dimension tolerance scaled by `reference` widths.
  pub fn approx_eq(&self, other: &Extents, reference: &Extents, rel_tol: f64) -> bool {
    self.nd() == other.nd()
      && (0..self.nd()).all(|d| {
        let tol = rel_tol * reference.size(d).abs().max(f64::MIN_POSITIVE);
        (self.min[d] - other.min[d]).abs() <= tol && (self.max[d] - other.max[d]).abs() <= tol
      })
  }
}

impl fmt::Display for Extents {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for d in 0..self.nd() {
      if d > 0 {
        write!(f, "x")?;
      }
      write!(f, "[{}, {}]", self.min[d], self.max[d])?;
    }
    Ok(())
  }
}
