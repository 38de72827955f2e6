//! Distance propagation over an occupancy layer.
//!
//! The [`Propagator`] trait is the seam between the update scheduler and the
//! kernel that turns occupancy into distances. The scheduler decides *which*
//! voxels need fresh values (the seeds); the propagator rewrites exactly those
//! voxels and nothing else.
//!
//! [`WavefrontPropagator`] is a brushfire kernel: Dijkstra over the
//! 26-neighbourhood, run twice.
//!
//! ```text
//! outside pass   sites = Occupied   front crosses Free       Free.d = min(d_occ, max)
//! inside pass    sites = Free       front crosses Occupied   Occ.d  = min(max(0, d_free - vs), max)
//! ```
//!
//! With the exact metric every reached voxel remembers its nearest site and
//! its cost is `|voxel - site| * voxel_size`. The chamfer metric accumulates
//! step costs (1, √2, √3) instead, which is cheaper but overestimates off-axis
//! distances slightly.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use glam::IVec3;
use smallvec::SmallVec;

use crate::config::PropagatorConfig;
use crate::constants::{
  block_of, global_key, influence_radius_cells, NEIGHBOR_OFFSETS, VOXELS_PER_SIDE,
};
use crate::error::PropagationError;
use crate::layer::Layer;
use crate::occupancy::OccupancyLayer;
use crate::types::{EsdfVoxel, OccupancyState};

/// ESDF voxel store.
pub type EsdfLayer = Layer<EsdfVoxel>;

/// One call's worth of work for a propagator.
#[derive(Clone, Copy, Debug)]
pub struct PropagationRequest<'a> {
  /// Voxels to rewrite.
  pub seeds: &'a [IVec3],
  /// Clamp bound for written distances.
  pub max_distance: f32,
  pub voxel_size: f32,
  /// Exact Euclidean metric (`true`) or chamfer metric (`false`).
  pub exact: bool,
}

/// Work counters for a single `propagate` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropagationStats {
  pub seeds_written: usize,
  pub sites: usize,
  pub queue_pops: usize,
  pub gathered_blocks: usize,
}

/// Distance propagation primitive.
///
/// Contract:
/// - rewrites exactly the seed voxels; observed seeds get a clamped distance
///   and a sign, Unknown seeds become unobserved
/// - deterministic for identical seeds and occupancy
/// - on error, `esdf` is left untouched
pub trait Propagator: Send + Sync {
  fn propagate(
    &self,
    request: &PropagationRequest<'_>,
    occupancy: &OccupancyLayer,
    esdf: &mut EsdfLayer,
  ) -> Result<PropagationStats, PropagationError>;
}

/// Blanket impl for boxed trait objects.
impl Propagator for Box<dyn Propagator> {
  fn propagate(
    &self,
    request: &PropagationRequest<'_>,
    occupancy: &OccupancyLayer,
    esdf: &mut EsdfLayer,
  ) -> Result<PropagationStats, PropagationError> {
    (**self).propagate(request, occupancy, esdf)
  }
}

/// Brushfire reference kernel.
#[derive(Clone, Debug, Default)]
pub struct WavefrontPropagator {
  config: PropagatorConfig,
}

impl WavefrontPropagator {
  pub fn new(config: PropagatorConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &PropagatorConfig {
    &self.config
  }
}

impl Propagator for WavefrontPropagator {
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "propagation::wavefront"))]
  fn propagate(
    &self,
    request: &PropagationRequest<'_>,
    occupancy: &OccupancyLayer,
    esdf: &mut EsdfLayer,
  ) -> Result<PropagationStats, PropagationError> {
    let mut stats = PropagationStats::default();
    if request.seeds.is_empty() {
      return Ok(stats);
    }

    let region = Region::gather(occupancy, request);
    stats.gathered_blocks = region.blocks.len();

    let bound = request.max_distance + request.voxel_size;
    let mut budget = PopBudget {
      pops: 0,
      limit: self.config.max_queue_pops,
    };

    let not_converged = |pops| PropagationError::NotConverged {
      seeds: request.seeds.len(),
      pops,
    };

    let outside = region
      .wavefront(
        OccupancyState::Occupied,
        OccupancyState::Free,
        request,
        bound,
        &mut budget,
      )
      .ok_or_else(|| not_converged(budget.pops))?;
    let inside = region
      .wavefront(
        OccupancyState::Free,
        OccupancyState::Occupied,
        request,
        bound,
        &mut budget,
      )
      .ok_or_else(|| not_converged(budget.pops))?;

    stats.sites = outside.sites + inside.sites;
    stats.queue_pops = budget.pops;

    // Both passes converged; only now touch the output layer.
    let max_distance = request.max_distance;
    for &seed in request.seeds {
      let voxel = match region.state(seed) {
        Some(OccupancyState::Free) => {
          let d = outside.cost(seed).unwrap_or(max_distance);
          EsdfVoxel::outside(d.min(max_distance))
        }
        Some(OccupancyState::Occupied) => {
          let d = inside
            .cost(seed)
            .map_or(max_distance, |d_free| (d_free - request.voxel_size).max(0.0));
          EsdfVoxel::inside(d.min(max_distance))
        }
        _ => {
          if esdf.get(seed).is_some() {
            esdf.set(seed, EsdfVoxel::UNOBSERVED);
            stats.seeds_written += 1;
          }
          continue;
        }
      };
      esdf.set(seed, voxel);
      stats.seeds_written += 1;
    }

    Ok(stats)
  }
}

struct PopBudget {
  pops: usize,
  limit: usize,
}

/// Nearest site found so far for a voxel.
#[derive(Clone, Copy)]
struct Reached {
  cost: f32,
  site: IVec3,
}

struct Wavefront {
  reached: HashMap<IVec3, Reached>,
  sites: usize,
}

impl Wavefront {
  fn cost(&self, key: IVec3) -> Option<f32> {
    self.reached.get(&key).map(|reached| reached.cost)
  }
}

/// Min-heap entry. Ties break on the key so pop order is deterministic.
#[derive(Clone, Copy, PartialEq)]
struct Front {
  cost: f32,
  key: IVec3,
}

impl Eq for Front {}

impl Ord for Front {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .cost
      .total_cmp(&self.cost)
      .then_with(|| other.key.to_array().cmp(&self.key.to_array()))
  }
}

impl PartialOrd for Front {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Allocated occupancy blocks that can influence the seeds.
struct Region<'a> {
  occupancy: &'a OccupancyLayer,
  blocks: HashSet<IVec3>,
}

impl<'a> Region<'a> {
  fn gather(occupancy: &'a OccupancyLayer, request: &PropagationRequest<'_>) -> Self {
    // A front reaching a seed stays within one radius of its site, and the
    // site within one radius of the seed.
    let radius_cells = influence_radius_cells(request.max_distance, request.voxel_size);
    let side = VOXELS_PER_SIDE as i32;
    let block_radius = radius_cells.saturating_mul(2).saturating_add(side - 1) / side;

    let seed_blocks: HashSet<IVec3> = request.seeds.iter().map(|&seed| block_of(seed)).collect();
    let within = |block_index: IVec3| {
      seed_blocks
        .iter()
        .any(|&seed_block| chebyshev(block_index, seed_block) <= block_radius as i64)
    };

    // Walk whichever is smaller: the cubes around the seed blocks or the
    // allocated blocks.
    let span = 2 * block_radius as u64 + 1;
    let cubes = span
      .saturating_mul(span)
      .saturating_mul(span)
      .saturating_mul(seed_blocks.len() as u64);
    let blocks: HashSet<IVec3> = if cubes > occupancy.block_count() as u64 {
      occupancy.block_indices().filter(|&b| within(b)).collect()
    } else {
      let mut blocks = HashSet::new();
      for &seed_block in &seed_blocks {
        for x in -block_radius..=block_radius {
          for y in -block_radius..=block_radius {
            for z in -block_radius..=block_radius {
              let block_index = seed_block + IVec3::new(x, y, z);
              if occupancy.contains_block(block_index) {
                blocks.insert(block_index);
              }
            }
          }
        }
      }
      blocks
    };

    Self { occupancy, blocks }
  }

  /// Occupancy at `key`, `None` outside the gathered region.
  #[inline]
  fn state(&self, key: IVec3) -> Option<OccupancyState> {
    if self.blocks.contains(&block_of(key)) {
      self.occupancy.get(key).map(|voxel| voxel.state)
    } else {
      None
    }
  }

  /// Neighbours of `key` in the given state, with their step cost in cells.
  fn neighbors_in_state(&self, key: IVec3, state: OccupancyState) -> SmallVec<[(IVec3, f32); 26]> {
    NEIGHBOR_OFFSETS
      .iter()
      .map(|&(offset, step)| (key + IVec3::from_array(offset), step))
      .filter(|&(neighbor, _)| self.state(neighbor) == Some(state))
      .collect()
  }

  /// Dijkstra from every `site_state` voxel through `front_state` voxels.
  /// Returns `None` when the pop budget runs out.
  fn wavefront(
    &self,
    site_state: OccupancyState,
    front_state: OccupancyState,
    request: &PropagationRequest<'_>,
    bound: f32,
    budget: &mut PopBudget,
  ) -> Option<Wavefront> {
    let mut reached: HashMap<IVec3, Reached> = HashMap::new();
    let mut heap = BinaryHeap::new();

    for &block_index in &self.blocks {
      let Some(block) = self.occupancy.block(block_index) else {
        continue;
      };
      for (idx, voxel) in block.voxels().iter().enumerate() {
        if voxel.state == site_state {
          let key = global_key(block_index, idx);
          reached.insert(key, Reached { cost: 0.0, site: key });
          heap.push(Front { cost: 0.0, key });
        }
      }
    }
    let sites = reached.len();

    while let Some(Front { cost, key }) = heap.pop() {
      budget.pops += 1;
      if budget.pops > budget.limit {
        return None;
      }

      let current = reached[&key];
      if cost > current.cost {
        continue;
      }

      for (neighbor, step) in self.neighbors_in_state(key, front_state) {
        let candidate = if request.exact {
          (neighbor - current.site).as_vec3().length() * request.voxel_size
        } else {
          cost + step * request.voxel_size
        };
        if candidate > bound {
          continue;
        }
        let improves = reached
          .get(&neighbor)
          .map_or(true, |existing| candidate < existing.cost);
        if improves {
          reached.insert(
            neighbor,
            Reached {
              cost: candidate,
              site: current.site,
            },
          );
          heap.push(Front {
            cost: candidate,
            key: neighbor,
          });
        }
      }
    }

    Some(Wavefront { reached, sites })
  }
}

/// Chebyshev distance between block indices, widened so extreme keys cannot
/// overflow.
#[inline]
fn chebyshev(a: IVec3, b: IVec3) -> i64 {
  (a.as_i64vec3() - b.as_i64vec3()).abs().max_element()
}

#[cfg(test)]
#[path = "propagation_test.rs"]
mod propagation_test;
