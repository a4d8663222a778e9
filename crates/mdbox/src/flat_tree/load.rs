//! Rebuild a live tree from a [`FlatTree`] without reading event payloads.
//!
//! Loading happens in two passes. The first walks the arrays root to leaves
//! and rejects anything inconsistent; the second assembles nodes leaves to
//! root. Nothing is built unless the first pass succeeds.

use std::collections::HashSet;
use std::sync::Arc;

use super::{BoxType, FlatTree, NO_CHILDREN};
use crate::error::{BoxError, Result};
use crate::extents::Extents;
use crate::storage::{EventStore, FreeSpaceMap, StorageBackend};
use crate::tree::{BoxController, BoxId, BoxNode, EventBox, EventTree, GridBox, SplitConfig, SplitInto};

/// Relative tolerance, against the parent's width, for child extents.
const TILING_TOLERANCE: f64 = 1e-9;

/// Per-node facts established by validation.
struct Checked {
  box_type: BoxType,
  extents: Extents,
  children: Option<(usize, usize)>,
  split: SplitInto,
}

/// Recover a grid's per-dimension split from its children's extents and
/// check that they tile `parent`.
///
/// Returns the canonical cell extents, in child order.
fn infer_split(parent: &Extents, children: &[Extents]) -> Option<(SplitInto, Vec<Extents>)> {
  let mut split = SplitInto::new();
  for d in 0..parent.nd() {
    let tol = TILING_TOLERANCE * parent.size(d);
    let mut mins: Vec<f64> = children.iter().map(|c| c.min()[d]).collect();
    mins.sort_by(f64::total_cmp);
    mins.dedup_by(|a, b| (*a - *b).abs() <= tol);
    split.push(mins.len());
  }
  if split.iter().product::<usize>() != children.len() {
    return None;
  }
  let cells: Vec<Extents> = (0..children.len()).map(|p| parent.cell(&split, p)).collect();
  let tiles = children
    .iter()
    .zip(&cells)
    .all(|(child, cell)| child.approx_eq(cell, parent, TILING_TOLERANCE));
  tiles.then_some((split, cells))
}

fn validate(flat: &FlatTree, store: &EventStore) -> Result<Vec<Checked>> {
  let n = flat.node_count();
  let mut parent: Vec<Option<usize>> = vec![None; n];
  let mut ids = HashSet::with_capacity(n);
  let mut extents: Vec<Option<Extents>> = vec![None; n];
  let mut checked = Vec::with_capacity(n);
  let mut regions = Vec::new();

  for i in 0..n {
    if i > 0 && parent[i].is_none() {
      return Err(BoxError::corrupt(format!("node {i} is not the child of any grid")));
    }
    if i == 0 && flat.depth[0] != 0 {
      return Err(BoxError::corrupt("root depth is not 0"));
    }
    if !ids.insert(flat.box_id[i]) {
      return Err(BoxError::corrupt(format!("duplicate box id {}", flat.box_id[i])));
    }

    let box_type = flat.box_type_of(i)?;
    // Children get canonical extents from their parent's check.
    let own = match extents[i].take() {
      Some(own) => own,
      None => flat.extents_of(i)?,
    };
    let (first, last) = flat.children_range_of(i);

    let node = match box_type {
      BoxType::None => {
        return Err(BoxError::corrupt(format!("node {i} has box type none")));
      }
      BoxType::Leaf => {
        if (first, last) != (NO_CHILDREN, NO_CHILDREN) {
          return Err(BoxError::corrupt(format!("leaf {i} has a child range")));
        }
        let region = flat.event_region(i);
        if region.count > 0 {
          if region.checked_end().is_none() {
            return Err(BoxError::corrupt(format!(
              "leaf {i} events at {} with count {} overflow the event data",
              region.offset, region.count
            )));
          }
          if !store.contains_region(region)? {
            return Err(BoxError::corrupt(format!(
              "leaf {i} events {}..{} lie beyond the event data",
              region.offset,
              region.end()
            )));
          }
          regions.push(region);
        }
        Checked {
          box_type,
          extents: own,
          children: None,
          split: SplitInto::new(),
        }
      }
      BoxType::Grid => {
        if first <= i as i64 || first > last || last >= n as i64 {
          return Err(BoxError::corrupt(format!(
            "grid {i} child range {first}..={last} is out of bounds for {n} nodes"
          )));
        }
        let (first, last) = (first as usize, last as usize);
        let mut child_extents = Vec::with_capacity(last - first + 1);
        for c in first..=last {
          if parent[c].replace(i).is_some() {
            return Err(BoxError::corrupt(format!("node {c} is claimed by two grids")));
          }
          if flat.depth[i].checked_add(1) != Some(flat.depth[c]) {
            return Err(BoxError::corrupt(format!(
              "node {c} has depth {}, its parent {i} has depth {}",
              flat.depth[c], flat.depth[i]
            )));
          }
          child_extents.push(flat.extents_of(c)?);
        }
        let (split, cells) = infer_split(&own, &child_extents).ok_or_else(|| {
          BoxError::corrupt(format!("children of grid {i} do not tile its extents {own}"))
        })?;
        for (c, cell) in (first..=last).zip(cells) {
          extents[c] = Some(cell);
        }
        Checked {
          box_type,
          extents: own,
          children: Some((first, last)),
          split,
        }
      }
    };
    checked.push(node);
  }

  regions.sort_by_key(|r| r.offset);
  if let Some(pair) = regions.windows(2).find(|w| w[0].end() > w[1].offset) {
    return Err(BoxError::corrupt(format!(
      "event regions at {} and {} overlap",
      pair[0].offset, pair[1].offset
    )));
  }
  Ok(checked)
}

impl EventTree {
  /// Rebuild a tree from its flat form, paging events from `backend`.
  ///
  /// No event payload is read: non-empty leaves start on disk and are paged
  /// in on first access. Any inconsistency aborts the whole load with
  /// [`BoxError::CorruptTree`].
  #[tracing::instrument(skip_all, fields(nodes = flat.node_count()))]
  pub fn load(
    flat: &FlatTree,
    config: SplitConfig,
    backend: Arc<dyn StorageBackend>,
  ) -> Result<Self> {
    flat.check_lengths()?;
    if flat.version != super::FLAT_TREE_VERSION {
      return Err(BoxError::corrupt(format!("unsupported version {}", flat.version)));
    }
    let nd = flat.nd();
    let n = flat.node_count();
    if n == 0 {
      return Err(BoxError::corrupt("flat tree has no nodes"));
    }

    let controller = BoxController::new(nd, config)?;
    let reader = EventStore::new(backend, nd);
    let checked = validate(flat, &reader)?;

    let mut nodes: Vec<Option<BoxNode>> = (0..n).map(|_| None).collect();
    let mut regions = Vec::new();
    for (i, node) in checked.into_iter().enumerate().rev() {
      let id = BoxId::new(flat.box_id[i]);
      controller.reserve_ids_through(id);
      let depth = flat.depth[i];
      let Checked {
        box_type,
        extents,
        children,
        split,
      } = node;

      let node = match (box_type, children) {
        (BoxType::Grid, Some((first, last))) => {
          let kids = (first..=last)
            .map(|c| {
              nodes[c]
                .take()
                .ok_or_else(|| BoxError::corrupt(format!("node {c} was used twice")))
            })
            .collect::<Result<Vec<_>>>()?;
          BoxNode::Grid(GridBox::from_parts(
            id,
            depth,
            extents,
            split,
            kids,
            flat.signal[i],
            flat.error_squared[i],
          ))
        }
        _ => {
          let region = flat.event_region(i);
          if region.count > 0 {
            regions.push(region);
            controller.register_file_backing(id);
            BoxNode::Leaf(EventBox::on_disk(
              id,
              depth,
              extents,
              region,
              flat.signal[i],
              flat.error_squared[i],
            ))
          } else {
            BoxNode::Leaf(EventBox::new(id, depth, extents))
          }
        }
      };
      nodes[i] = Some(node);
    }

    let root = nodes[0]
      .take()
      .ok_or_else(|| BoxError::corrupt("root was not built"))?;
    let mut space = FreeSpaceMap::new();
    space.mark_used(regions);
    let store = EventStore::with_space(Arc::clone(reader.backend()), nd, space);

    tracing::info!(
      nodes = n,
      file_backed = controller.file_backed_count(),
      events = root.event_count(),
      "loaded tree"
    );
    Ok(EventTree::from_parts(root, controller, store))
  }
}
