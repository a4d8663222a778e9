//! Test utilities shared by the tree, storage and flat tree tests.
//!
//! Provides a test logger, a fault-injecting backend and event fixture
//! generators.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::storage::{MemoryBackend, StorageBackend};
use crate::{Event, Extents};

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_test_logger() {
  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new("debug"))
    .expect("valid default filter");

  let _ = tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_test_writer())
    .with(env_filter)
    .try_init();
}

// =============================================================================
// Fault injection
// =============================================================================

/// Memory backend whose reads or writes can be switched to fail.
#[derive(Default)]
pub struct FlakyBackend {
  inner: MemoryBackend,
  pub fail_reads: AtomicBool,
  pub fail_writes: AtomicBool,
}

impl FlakyBackend {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }
}

impl StorageBackend for FlakyBackend {
  fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(io::Error::other("injected read failure"));
    }
    self.inner.read_at(offset, buf)
  }

  fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(io::Error::other("injected write failure"));
    }
    self.inner.write_at(offset, data)
  }

  fn len(&self) -> io::Result<u64> {
    self.inner.len()
  }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Unit extents `[0, 1]` in every dimension.
pub fn unit_extents(nd: usize) -> Extents {
  Extents::new(&vec![0.0; nd], &vec![1.0; nd]).unwrap()
}

/// One-dimensional events with signal `1 + i` and error `0.5 * (1 + i)`.
pub fn events_1d(xs: &[f64]) -> Vec<Event> {
  xs.iter()
    .enumerate()
    .map(|(i, x)| Event::new(&[*x], 1.0 + i as f64, 0.5 * (1.0 + i as f64)))
    .collect()
}

/// Deterministic random events inside `extents`.
///
/// Signals are small integers and errors are halves, so sums are exact.
pub fn random_events(extents: &Extents, count: usize, seed: u64) -> Vec<Event> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..count)
    .map(|_| {
      let coords: Vec<f64> = (0..extents.nd())
        .map(|d| rng.random_range(extents.min()[d]..=extents.max()[d]))
        .collect();
      let signal = rng.random_range(1..=8) as f64;
      Event::new(&coords, signal, signal * 0.5)
    })
    .collect()
}

/// Events sorted by coordinates then signal, for multiset comparison.
pub fn sorted(mut events: Vec<Event>) -> Vec<Event> {
  events.sort_by(|a, b| {
    a.coords()
      .iter()
      .zip(b.coords())
      .map(|(x, y)| x.total_cmp(y))
      .find(|o| o.is_ne())
      .unwrap_or(std::cmp::Ordering::Equal)
      .then(a.signal().total_cmp(&b.signal()))
      .then(a.error_squared().total_cmp(&b.error_squared()))
  });
  events
}
