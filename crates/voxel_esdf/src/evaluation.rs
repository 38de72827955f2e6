//! Divergence of the maintained stores from a reference.
//!
//! The reference answers per voxel with either a distance or an occupancy
//! state. Comparison runs over the allocated blocks of the maintained stores:
//!
//! ```text
//! reference            maintained       error
//! ─────────            ──────────       ─────
//! Distance(d)          ESDF observed    |signed_distance - d|
//! Occupancy(s)         occ observed     0.0 if equal, 1.0 otherwise
//! observed             not observed     NO_DATA (excluded from stats)
//! not observed         observed         NO_DATA (excluded from stats)
//! ```

use std::collections::HashSet;

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::constants::{center_of_key, global_key, VOXELS_PER_BLOCK};
use crate::error::PropagationError;
use crate::layer::{Block, Layer};
use crate::occupancy::OccupancyLayer;
use crate::propagation::{EsdfLayer, PropagationRequest, Propagator};
use crate::types::{ErrorVoxel, OccupancyState};

/// Per-voxel error produced by one evaluation.
pub type ErrorField = Layer<ErrorVoxel>;

/// What a reference knows about one voxel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReferenceSample {
  Occupancy(OccupancyState),
  /// Signed distance, negative inside obstacles.
  Distance(f32),
}

/// Ground truth to compare against. `None` = not observed by the reference.
pub trait ReferenceSource: Send + Sync {
  fn sample(&self, key: IVec3, voxel_size: f32) -> Option<ReferenceSample>;
}

/// Snapshot of an occupancy layer used as reference.
#[derive(Clone, Debug)]
pub struct OccupancyReference {
  layer: OccupancyLayer,
}

impl OccupancyReference {
  pub fn new(layer: OccupancyLayer) -> Self {
    Self { layer }
  }

  /// Copy a maintained occupancy store.
  pub fn from_layer(layer: &OccupancyLayer) -> Self {
    Self::new(layer.clone())
  }

  pub fn layer(&self) -> &OccupancyLayer {
    &self.layer
  }
}

impl ReferenceSource for OccupancyReference {
  fn sample(&self, key: IVec3, _voxel_size: f32) -> Option<ReferenceSample> {
    self
      .layer
      .get(key)
      .filter(|voxel| voxel.observed)
      .map(|voxel| ReferenceSample::Occupancy(voxel.state))
  }
}

/// Analytic reference: a signed distance function of world position,
/// evaluated at voxel centres.
pub struct DistanceReference<F> {
  distance: F,
}

impl<F> DistanceReference<F>
where
  F: Fn(Vec3) -> f32 + Send + Sync,
{
  pub fn new(distance: F) -> Self {
    Self { distance }
  }
}

impl<F> ReferenceSource for DistanceReference<F>
where
  F: Fn(Vec3) -> f32 + Send + Sync,
{
  fn sample(&self, key: IVec3, voxel_size: f32) -> Option<ReferenceSample> {
    let distance = (self.distance)(center_of_key(key, voxel_size));
    distance.is_finite().then_some(ReferenceSample::Distance(distance))
  }
}

/// An ESDF layer seen as a distance reference.
struct EsdfReference<'a> {
  esdf: &'a EsdfLayer,
}

impl ReferenceSource for EsdfReference<'_> {
  fn sample(&self, key: IVec3, _voxel_size: f32) -> Option<ReferenceSample> {
    self
      .esdf
      .get(key)
      .filter(|voxel| voxel.observed)
      .map(|voxel| ReferenceSample::Distance(voxel.signed_distance()))
  }
}

/// Aggregate statistics plus the per-voxel error field.
#[derive(Clone, Debug)]
pub struct EvaluationReport {
  pub mean_abs_error: f32,
  pub max_error: f32,
  /// Voxels observed on both sides.
  pub compared_voxels: usize,
  pub per_voxel_error: ErrorField,
}

#[derive(Clone, Copy, Default)]
struct Partial {
  sum: f64,
  max: f32,
  count: usize,
}

impl Partial {
  fn merge(self, other: Self) -> Self {
    Self {
      sum: self.sum + other.sum,
      max: self.max.max(other.max),
      count: self.count + other.count,
    }
  }
}

/// Compare the maintained ESDF and occupancy stores against `reference`.
#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "evaluation::evaluate"))]
pub fn evaluate(
  esdf: &EsdfLayer,
  occupancy: &OccupancyLayer,
  reference: &dyn ReferenceSource,
) -> EvaluationReport {
  let voxel_size = esdf.voxel_size();
  let domain: HashSet<IVec3> = esdf.block_indices().chain(occupancy.block_indices()).collect();
  let domain: Vec<IVec3> = domain.into_iter().collect();

  let blocks: Vec<(IVec3, Block<ErrorVoxel>, Partial)> = domain
    .into_par_iter()
    .map(|block_index| {
      let mut block = Block::new();
      let mut partial = Partial::default();
      for idx in 0..VOXELS_PER_BLOCK {
        let key = global_key(block_index, idx);
        let Some(error) = compare_voxel(esdf, occupancy, reference, key, voxel_size) else {
          continue;
        };
        block.set(idx, ErrorVoxel { error });
        partial.sum += error as f64;
        partial.max = partial.max.max(error);
        partial.count += 1;
      }
      (block_index, block, partial)
    })
    .collect();

  let mut per_voxel_error = ErrorField::new(voxel_size);
  let mut total = Partial::default();
  for (block_index, block, partial) in blocks {
    per_voxel_error.insert_block(block_index, block);
    total = total.merge(partial);
  }

  let mean_abs_error = if total.count == 0 {
    0.0
  } else {
    (total.sum / total.count as f64) as f32
  };

  EvaluationReport {
    mean_abs_error,
    max_error: total.max,
    compared_voxels: total.count,
    per_voxel_error,
  }
}

/// Error for one voxel, `None` unless both sides observed it.
#[inline]
fn compare_voxel(
  esdf: &EsdfLayer,
  occupancy: &OccupancyLayer,
  reference: &dyn ReferenceSource,
  key: IVec3,
  voxel_size: f32,
) -> Option<f32> {
  match reference.sample(key, voxel_size)? {
    ReferenceSample::Distance(expected) => {
      let maintained = esdf.get(key).filter(|voxel| voxel.observed)?;
      Some((maintained.signed_distance() - expected).abs())
    }
    ReferenceSample::Occupancy(expected) => {
      if !expected.is_observed() {
        return None;
      }
      let maintained = occupancy.get(key).filter(|voxel| voxel.observed)?;
      Some(if maintained.state == expected { 0.0 } else { 1.0 })
    }
  }
}

/// Rebuild an ESDF from the reference occupancy with `propagator` and compare
/// distances voxel by voxel against the maintained ESDF.
#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "evaluation::evaluate_reconstructed"))]
pub fn evaluate_reconstructed<P: Propagator + ?Sized>(
  propagator: &P,
  esdf: &EsdfLayer,
  occupancy: &OccupancyLayer,
  reference: &OccupancyReference,
  max_distance: f32,
) -> Result<EvaluationReport, PropagationError> {
  let voxel_size = esdf.voxel_size();
  let seeds: Vec<IVec3> = reference
    .layer()
    .iter()
    .filter(|(_, voxel)| voxel.observed)
    .map(|(key, _)| key)
    .collect();

  let mut rebuilt = EsdfLayer::new(voxel_size);
  propagator.propagate(
    &PropagationRequest {
      seeds: &seeds,
      max_distance,
      voxel_size,
      exact: true,
    },
    reference.layer(),
    &mut rebuilt,
  )?;

  Ok(evaluate(esdf, occupancy, &EsdfReference { esdf: &rebuilt }))
}

#[cfg(test)]
#[path = "evaluation_test.rs"]
mod evaluation_test;
