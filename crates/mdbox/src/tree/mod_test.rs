use std::sync::Arc;

use proptest::prelude::*;

use super::*;
use crate::storage::MemoryBackend;
use crate::test_utils::{
  events_1d, init_test_logger, random_events, sorted, unit_extents, FlakyBackend,
};

fn scenario_tree() -> EventTree {
  let mut tree = EventTree::new(unit_extents(1), SplitConfig::uniform(1, 2, 4, 3)).unwrap();
  for event in events_1d(&[0.1, 0.2, 0.3, 0.6, 0.9]) {
    tree.add_event(event).unwrap();
  }
  tree
}

// =========================================================================
// Construction
// =========================================================================

#[test]
fn test_new_rejects_bad_input() {
  let flat = Extents::new(&[0.0, 1.0], &[1.0, 1.0]).unwrap();
  assert!(matches!(
    EventTree::new(flat, SplitConfig::default_for(2)),
    Err(BoxError::InvalidConfiguration(_))
  ));

  let mismatched = SplitConfig::default_for(3);
  assert!(matches!(
    EventTree::new(unit_extents(2), mismatched),
    Err(BoxError::InvalidConfiguration(_))
  ));
}

#[test]
fn test_empty_tree() {
  let mut tree = EventTree::new(unit_extents(3), SplitConfig::default_for(3)).unwrap();
  assert_eq!(tree.event_count(), 0);
  assert!(tree.root().is_leaf());
  assert_eq!(tree.stats().node_count(), 1);
  assert!(tree.collect_events().unwrap().is_empty());
}

// =========================================================================
// Ingestion
// =========================================================================

#[test]
fn test_scenario_five_events_split_root() {
  let tree = scenario_tree();

  let grid = tree.root().as_grid().expect("root split");
  assert_eq!(grid.children().len(), 2);

  let left = grid.children()[0].as_leaf().unwrap();
  let right = grid.children()[1].as_leaf().unwrap();
  assert_eq!(left.extents().min(), &[0.0]);
  assert_eq!(left.extents().max(), &[0.5]);
  assert_eq!(right.extents().min(), &[0.5]);
  assert_eq!(right.extents().max(), &[1.0]);

  let xs = |leaf: &EventBox| -> Vec<f64> {
    leaf
      .resident_events()
      .unwrap()
      .iter()
      .map(|e| e.coords()[0])
      .collect()
  };
  assert_eq!(xs(left), vec![0.1, 0.2, 0.3]);
  assert_eq!(xs(right), vec![0.6, 0.9]);

  // Signals 1..=5, errors 0.5..=2.5.
  assert_eq!(left.signal() + right.signal(), 15.0);
  assert_eq!(left.error_squared() + right.error_squared(), 7.5);
  assert_eq!(tree.signal(), 15.0);
  assert_eq!(tree.error_squared(), 7.5);
}

#[test]
fn test_add_out_of_range_is_rejected() {
  let mut tree = scenario_tree();
  let err = tree.add(&[1.5], 1.0, 1.0).unwrap_err();
  assert!(matches!(err, BoxError::OutOfRange { .. }));
  let err = tree.add(&[0.5, 0.5], 1.0, 1.0).unwrap_err();
  assert!(matches!(err, BoxError::DimensionMismatch { .. }));
  assert_eq!(tree.event_count(), 5);
}

#[test]
fn test_batch_is_all_or_nothing() {
  let mut tree = scenario_tree();
  let mut batch = events_1d(&[0.4, 0.45]);
  batch.push(Event::new(&[2.0], 1.0, 1.0));

  assert!(tree.add_events(batch).is_err());
  assert_eq!(tree.event_count(), 5);
}

#[test]
fn test_parallel_ingestion_matches_sequential() {
  let extents = Extents::new(&[0.0, 0.0], &[10.0, 10.0]).unwrap();
  let config = SplitConfig::uniform(2, 2, 16, 6);
  let events = random_events(&extents, 5000, 42);

  let mut sequential = EventTree::new(extents.clone(), config.clone()).unwrap();
  sequential.add_events(events.clone()).unwrap();
  let mut parallel = EventTree::new(extents, config).unwrap();
  parallel.add_events_parallel(events.clone()).unwrap();

  assert_eq!(parallel.event_count(), 5000);
  assert_eq!(parallel.signal(), sequential.signal());
  assert_eq!(parallel.error_squared(), sequential.error_squared());
  assert_eq!(sorted(parallel.collect_events().unwrap()), sorted(events));

  let stats = parallel.stats();
  assert!(stats.max_depth <= 6);
  assert_eq!(stats.event_count, 5000);
}

#[test]
fn test_lower_threshold_applies_on_request() {
  let mut tree = scenario_tree();
  let before = tree.stats().node_count();

  tree.configure(SplitConfig::uniform(1, 2, 1, 3)).unwrap();
  assert_eq!(tree.stats().node_count(), before, "configure never re-splits");

  tree.split_all_if_needed().unwrap();
  assert!(tree.stats().node_count() > before);
  assert!(tree.leaves().iter().all(|leaf| leaf.event_count() <= 1));
  assert_eq!(tree.signal(), 15.0);
}

#[test]
fn test_refresh_cache_recomputes_totals() {
  let mut tree = scenario_tree();
  tree.refresh_cache();
  assert_eq!(tree.signal(), 15.0);
  assert_eq!(tree.event_count(), 5);
}

/// Coincident events with a deep `max_depth` split one level at a time, so
/// the chain of grids does not grow the call stack.
#[test]
fn test_deep_split_of_coincident_events() {
  let worker = std::thread::Builder::new()
    .stack_size(512 * 1024)
    .spawn(|| {
      let mut tree = EventTree::new(unit_extents(1), SplitConfig::uniform(1, 2, 1, 3_000)).unwrap();
      tree.add_events(events_1d(&[0.3, 0.3])).unwrap();

      let stats = tree.stats();
      assert_eq!(stats.max_depth, 3_000);
      assert_eq!(stats.grid_count, 3_000);
      assert_eq!(stats.leaf_count, 3_001);
      assert_eq!(stats.event_count, 2);

      tree.add(&[0.3], 1.0, 1.0).unwrap();
      assert_eq!(tree.event_count(), 3);
      assert_eq!(tree.signal(), 4.0);
      assert_eq!(tree.collect_events().unwrap().len(), 3);
    })
    .unwrap();
  worker.join().unwrap();
}

// =========================================================================
// Paging
// =========================================================================

#[test]
fn test_memory_budget_pages_out_oldest() {
  init_test_logger();
  let extents = unit_extents(1);
  let config = SplitConfig::uniform(1, 4, 8, 3).with_memory_budget(2);
  let mut tree = EventTree::with_storage(extents.clone(), config, Arc::new(MemoryBackend::new())).unwrap();
  let events = random_events(&extents, 500, 3);
  for event in events.clone() {
    tree.add_event(event).unwrap();
  }

  assert!(tree.controller().resident_count() <= 2);
  let stats = tree.stats();
  assert!(stats.on_disk_leaves > 0);
  assert_eq!(stats.event_count, 500);

  assert_eq!(sorted(tree.collect_events().unwrap()), sorted(events));
}

#[test]
fn test_write_out_all_then_iterate() {
  let mut tree = scenario_tree();
  assert!(matches!(
    tree.write_out_all(),
    Err(BoxError::InvalidConfiguration(_))
  ));

  let mut tree = EventTree::with_storage(
    unit_extents(1),
    SplitConfig::uniform(1, 2, 4, 3),
    Arc::new(MemoryBackend::new()),
  )
  .unwrap();
  tree.add_events(events_1d(&[0.1, 0.2, 0.3, 0.6, 0.9])).unwrap();

  assert_eq!(tree.write_out_all().unwrap(), 2);
  assert_eq!(tree.stats().resident_leaves, 0);
  assert_eq!(tree.signal(), 15.0);

  let xs: Vec<f64> = tree.events().map(|e| e.unwrap().coords()[0]).collect();
  assert_eq!(xs, vec![0.1, 0.2, 0.3, 0.6, 0.9]);
  assert_eq!(tree.stats().on_disk_leaves, 0);
}

#[test]
fn test_visit_events_leaves_boxes_on_disk() {
  let mut tree = EventTree::with_storage(
    unit_extents(1),
    SplitConfig::uniform(1, 2, 4, 3),
    Arc::new(MemoryBackend::new()),
  )
  .unwrap();
  tree.add_events(events_1d(&[0.1, 0.2, 0.3, 0.6, 0.9])).unwrap();
  tree.write_out_all().unwrap();

  let mut total = 0.0;
  tree.visit_events(|e| total += e.signal()).unwrap();
  assert_eq!(total, 15.0);
  assert_eq!(tree.stats().on_disk_leaves, 2);
}

#[test]
fn test_events_in_skips_other_boxes() {
  let backend = FlakyBackend::new();
  let mut tree = EventTree::with_storage(
    unit_extents(1),
    SplitConfig::uniform(1, 2, 4, 3),
    backend.clone(),
  )
  .unwrap();
  tree.add_events(events_1d(&[0.1, 0.2, 0.3, 0.6, 0.9])).unwrap();
  tree.write_out_all().unwrap();

  let region = Extents::new(&[0.55], &[0.95]).unwrap();
  let xs: Vec<f64> = tree
    .events_in(&region)
    .unwrap()
    .map(|e| e.unwrap().coords()[0])
    .collect();
  assert_eq!(xs, vec![0.6, 0.9]);
  let stats = tree.stats();
  assert_eq!((stats.resident_leaves, stats.on_disk_leaves), (1, 1));

  // A failed page-in surfaces as an error item and can be retried.
  backend.set_fail_reads(true);
  let results: Vec<_> = tree.events().collect();
  assert!(results.iter().any(|r| r.as_ref().is_err_and(BoxError::is_retryable)));
  backend.set_fail_reads(false);
  assert_eq!(tree.collect_events().unwrap().len(), 5);
}

// =========================================================================
// Properties
// =========================================================================

proptest! {
  #![proptest_config(ProptestConfig::with_cases(32))]

  /// Whatever the split policy, no event is lost or duplicated and no box
  /// goes past max_depth.
  #[test]
  fn prop_conservation_and_depth_bound(
    xs in prop::collection::vec((0.0f64..=1.0, 0.0f64..=1.0), 0..300),
    split in 2usize..4,
    threshold in 1usize..20,
    max_depth in 0u32..5,
  ) {
    let config = SplitConfig::uniform(2, split, threshold, max_depth);
    let mut tree = EventTree::new(unit_extents(2), config).unwrap();
    let events: Vec<Event> = xs
      .iter()
      .enumerate()
      .map(|(i, (x, y))| Event::new(&[*x, *y], (i % 7) as f64, 0.5))
      .collect();
    tree.add_events(events.clone()).unwrap();

    let stats = tree.stats();
    prop_assert_eq!(stats.event_count, events.len() as u64);
    prop_assert!(stats.max_depth <= max_depth);
    prop_assert_eq!(tree.signal(), events.iter().map(Event::signal).sum::<f64>());
    for leaf in tree.leaves() {
      prop_assert!(leaf.event_count() <= threshold as u64 || leaf.depth() == max_depth);
      for event in leaf.resident_events().unwrap() {
        prop_assert!(leaf.extents().contains_point(event.coords()));
      }
    }
    prop_assert_eq!(sorted(tree.collect_events().unwrap()), sorted(events));
  }
}
