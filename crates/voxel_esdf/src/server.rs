//! EsdfServer - keeps an ESDF consistent with a mutating TSDF.
//!
//! # Passes
//!
//! ```text
//!                 ┌──────────────── tick() ─────────────────┐
//!                 │ disabled → Disabled                     │
//!                 │ counter += 1                            │
//!                 │ n <= 0 or counter % n == 0 → incremental│
//!                 │ otherwise → Skipped                     │
//!                 └─────────────────────────────────────────┘
//!
//! update_incremental                       update_batch
//! ──────────────────                       ────────────
//! drain touched voxels                     drain touched voxels
//! derive occupancy per voxel               derive a fresh occupancy layer
//! keep voxels whose ESDF disagrees         seed every observed voxel
//!   (plus voxels of earlier failed groups) propagate into a fresh ESDF layer
//! group by TSDF block                      swap both layers in on success
//! seed = group box + influence radius      re-arm flags on failure
//! merge groups whose seed boxes overlap
//! one propagate call per group (exact)
//! re-arm flags of failed groups, remember
//!   their voxels for the next pass
//! ```
//!
//! # Locking
//!
//! Every entry point takes `&self`. Passes, `clear()`, setters and queries
//! serialise on one state mutex; TSDF access is a read lock taken while that
//! mutex is held (update mutex → TSDF read lock). Integrators only ever take
//! the TSDF write lock, so the order cannot invert.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLockReadGuard};

use glam::{IVec3, Vec3};
use web_time::Instant;

use crate::config::{validate_influence_radius, validate_max_distance, EsdfConfig};
use crate::constants::{block_of, key_of_position};
use crate::error::{ConfigError, EsdfError, PropagationError};
use crate::evaluation::{self, EvaluationReport, OccupancyReference, ReferenceSource};
use crate::metrics::PassMetrics;
use crate::occupancy::{self, OccupancyLayer};
use crate::propagation::{EsdfLayer, PropagationRequest, Propagator, WavefrontPropagator};
use crate::tsdf::{SharedTsdf, TsdfLayer};
use crate::types::Sign;
use crate::update_status;

/// Lifecycle of the maintained field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EsdfStatus {
  /// No batch pass has completed since construction or `clear()`.
  #[default]
  Uninitialized,
  Ready,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PassKind {
  #[default]
  Incremental,
  Batch,
}

/// Summary of one finished pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
  pub kind: PassKind,
  /// Touched voxels consumed from the TSDF.
  pub drained: usize,
  /// Drained voxels whose occupancy disagreed with their ESDF value.
  pub changed: usize,
  /// Voxels handed to the propagator.
  pub seeds: usize,
  pub propagation_calls: usize,
  /// Seed groups whose propagation failed; their flags were re-armed.
  pub failed_groups: usize,
  pub elapsed_us: u64,
}

/// Result of one `tick()`.
#[derive(Debug)]
pub enum TickOutcome {
  /// Incremental updates are switched off; the counter was not advanced.
  Disabled,
  /// Not on an `update_esdf_every_n` boundary.
  Skipped,
  Updated(UpdateReport),
  Failed(EsdfError),
}

/// Capability surface used by orchestration code. The algorithm variant is
/// fixed by the propagator type the server was built with.
pub trait EsdfMapper: Send + Sync {
  fn update_incremental(&self) -> Result<UpdateReport, EsdfError>;
  fn update_batch(&self, full_euclidean: bool) -> Result<UpdateReport, EsdfError>;
  fn clear(&self);
  fn evaluate(&self, reference: &dyn ReferenceSource) -> EvaluationReport;
}

struct EsdfState {
  config: EsdfConfig,
  esdf: EsdfLayer,
  occupancy: OccupancyLayer,
  status: EsdfStatus,
  update_counter: u64,
  /// True while a pass is mutating the stores.
  pass_in_flight: bool,
  /// Changed voxels of groups whose propagation failed. Reseeded by the next
  /// incremental pass even if their ESDF value agrees by then.
  pending_reseed: HashSet<IVec3>,
  metrics: PassMetrics,
}

impl EsdfState {
  fn new(config: EsdfConfig) -> Self {
    Self {
      esdf: EsdfLayer::new(config.voxel_size),
      occupancy: OccupancyLayer::new(config.voxel_size),
      config,
      status: EsdfStatus::Uninitialized,
      update_counter: 0,
      pass_in_flight: false,
      pending_reseed: HashSet::new(),
      metrics: PassMetrics::new(),
    }
  }
}

/// Maintains the ESDF and occupancy stores for one shared TSDF.
pub struct EsdfServer<P: Propagator = WavefrontPropagator> {
  tsdf: SharedTsdf,
  propagator: P,
  state: Mutex<EsdfState>,
}

impl EsdfServer<WavefrontPropagator> {
  /// Server with the reference wavefront kernel configured from
  /// `config.propagation`.
  pub fn new(tsdf: SharedTsdf, config: EsdfConfig) -> Result<Self, ConfigError> {
    let propagator = WavefrontPropagator::new(config.propagation.clone());
    Self::with_propagator(tsdf, config, propagator)
  }
}

impl<P: Propagator> EsdfServer<P> {
  pub fn with_propagator(
    tsdf: SharedTsdf,
    config: EsdfConfig,
    propagator: P,
  ) -> Result<Self, ConfigError> {
    config.validate()?;
    let layer_voxel_size = tsdf
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .voxel_size();
    if (layer_voxel_size - config.voxel_size).abs() > f32::EPSILON * layer_voxel_size.max(1.0) {
      return Err(ConfigError::VoxelSizeMismatch {
        config: config.voxel_size,
        layer: layer_voxel_size,
      });
    }

    Ok(Self {
      tsdf,
      propagator,
      state: Mutex::new(EsdfState::new(config)),
    })
  }

  pub fn tsdf(&self) -> &SharedTsdf {
    &self.tsdf
  }

  pub fn propagator(&self) -> &P {
    &self.propagator
  }

  fn lock_state(&self) -> MutexGuard<'_, EsdfState> {
    self.state.lock().unwrap_or_else(|poisoned| {
      tracing::warn!("ESDF state mutex poisoned by a panicked pass; recovering");
      let mut state = poisoned.into_inner();
      state.pass_in_flight = false;
      state
    })
  }

  fn read_tsdf(&self) -> RwLockReadGuard<'_, TsdfLayer> {
    self.tsdf.read().unwrap_or_else(|poisoned| {
      tracing::warn!("TSDF lock poisoned by a panicked writer; recovering");
      poisoned.into_inner()
    })
  }

  // =========================================================================
  // Passes
  // =========================================================================

  /// Bring the ESDF up to date with every TSDF voxel touched since the last
  /// pass. A no-op (zero propagation calls) when nothing was touched.
  pub fn update_incremental(&self) -> Result<UpdateReport, EsdfError> {
    let mut state = self.lock_state();
    self.run_incremental(&mut state)
  }

  /// Recompute occupancy and ESDF from the whole TSDF.
  ///
  /// `full_euclidean` selects the exact metric; otherwise the chamfer metric
  /// is used. On failure the previous stores are kept.
  pub fn update_batch(&self, full_euclidean: bool) -> Result<UpdateReport, EsdfError> {
    let mut state = self.lock_state();
    self.run_batch(&mut state, full_euclidean)
  }

  /// Batch pass with the configured `full_euclidean_on_batch` metric.
  pub fn update_batch_default(&self) -> Result<UpdateReport, EsdfError> {
    let mut state = self.lock_state();
    let full_euclidean = state.config.full_euclidean_on_batch;
    self.run_batch(&mut state, full_euclidean)
  }

  /// Cadence entry point for an external timer.
  pub fn tick(&self) -> TickOutcome {
    let mut state = self.lock_state();
    if !state.config.incremental_update {
      return TickOutcome::Disabled;
    }

    state.update_counter += 1;
    let every_n = state.config.update_esdf_every_n;
    if every_n > 0 && state.update_counter % every_n as u64 != 0 {
      return TickOutcome::Skipped;
    }

    match self.run_incremental(&mut state) {
      Ok(report) => TickOutcome::Updated(report),
      Err(err) => TickOutcome::Failed(err),
    }
  }

  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "esdf::incremental"))]
  fn run_incremental(&self, state: &mut EsdfState) -> Result<UpdateReport, EsdfError> {
    let start = Instant::now();
    let mut report = UpdateReport {
      kind: PassKind::Incremental,
      ..Default::default()
    };

    state.pass_in_flight = true;

    // Drain and classify under the TSDF read lock, propagate without it.
    let groups = {
      let tsdf = self.read_tsdf();
      let drained = update_status::drain_touched(&tsdf);
      report.drained = drained.len();

      let threshold = state.config.observed_weight_threshold;
      let mut changed: HashSet<IVec3> = state.pending_reseed.clone();
      for key in drained {
        let Some(voxel) = tsdf.voxel(key) else {
          continue;
        };
        let derived = occupancy::derive(&voxel, threshold);
        state.occupancy.set(key, derived);
        if !state.esdf.get_or_default(key).agrees_with(derived.state) {
          changed.insert(key);
        }
      }

      let mut by_block: HashMap<IVec3, Vec<IVec3>> = HashMap::new();
      for key in changed {
        by_block.entry(block_of(key)).or_default().push(key);
      }
      let mut by_block: Vec<(IVec3, Vec<IVec3>)> = by_block.into_iter().collect();
      by_block.sort_by_key(|(block_index, _)| block_index.to_array());

      let radius = state.config.influence_radius_cells();
      merge_overlapping(
        by_block
          .into_iter()
          .map(|(block_index, keys)| SeedGroup::new(block_index, keys, radius))
          .collect(),
      )
    };

    let max_distance = state.config.esdf_max_distance;
    let voxel_size = state.config.voxel_size;
    let mut last_error: Option<PropagationError> = None;

    for group in &groups {
      report.changed += group.changed.len();

      let seeds = state.occupancy.keys_in_box(group.seed_min, group.seed_max);
      let request = PropagationRequest {
        seeds: &seeds,
        max_distance,
        voxel_size,
        exact: true,
      };

      report.propagation_calls += 1;
      match self
        .propagator
        .propagate(&request, &state.occupancy, &mut state.esdf)
      {
        Ok(_) => {
          report.seeds += seeds.len();
          for key in &group.changed {
            state.pending_reseed.remove(key);
          }
        }
        Err(err) => {
          let rearmed = update_status::retouch(&self.read_tsdf(), &group.changed);
          state.pending_reseed.extend(group.changed.iter().copied());
          tracing::warn!(
            block = ?group.block_index,
            rearmed,
            error = %err,
            "incremental ESDF propagation failed; keeping previous distances"
          );
          report.failed_groups += 1;
          last_error = Some(err);
        }
      }
    }

    state.pass_in_flight = false;
    report.elapsed_us = start.elapsed().as_micros() as u64;
    state.metrics.record(&report);

    tracing::debug!(
      drained = report.drained,
      changed = report.changed,
      calls = report.propagation_calls,
      failed = report.failed_groups,
      elapsed_us = report.elapsed_us,
      "incremental ESDF pass"
    );

    match last_error {
      Some(err) if report.failed_groups == report.propagation_calls => Err(err.into()),
      _ => Ok(report),
    }
  }

  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "esdf::batch"))]
  fn run_batch(&self, state: &mut EsdfState, full_euclidean: bool) -> Result<UpdateReport, EsdfError> {
    let start = Instant::now();
    let mut report = UpdateReport {
      kind: PassKind::Batch,
      ..Default::default()
    };

    state.pass_in_flight = true;

    let (drained, occupancy) = {
      let tsdf = self.read_tsdf();
      let drained = update_status::drain_touched(&tsdf);
      let occupancy = occupancy::derive_layer(&tsdf, state.config.observed_weight_threshold);
      (drained, occupancy)
    };
    report.drained = drained.len();

    let seeds: Vec<IVec3> = occupancy
      .iter()
      .filter(|(_, voxel)| voxel.observed)
      .map(|(key, _)| key)
      .collect();
    let mut esdf = EsdfLayer::new(state.config.voxel_size);
    let request = PropagationRequest {
      seeds: &seeds,
      max_distance: state.config.esdf_max_distance,
      voxel_size: state.config.voxel_size,
      exact: full_euclidean,
    };

    report.propagation_calls = 1;
    let result = self.propagator.propagate(&request, &occupancy, &mut esdf);
    state.pass_in_flight = false;

    if let Err(err) = result {
      let rearmed = update_status::retouch(&self.read_tsdf(), &drained);
      tracing::warn!(
        seeds = seeds.len(),
        rearmed,
        error = %err,
        "batch ESDF propagation failed; keeping previous field"
      );
      return Err(err.into());
    }

    report.changed = seeds.len();
    report.seeds = seeds.len();
    state.occupancy = occupancy;
    state.esdf = esdf;
    state.pending_reseed.clear();
    state.status = EsdfStatus::Ready;
    report.elapsed_us = start.elapsed().as_micros() as u64;
    state.metrics.record(&report);

    tracing::info!(
      blocks = state.esdf.block_count(),
      seeds = report.seeds,
      full_euclidean,
      elapsed_us = report.elapsed_us,
      "batch ESDF pass"
    );

    Ok(report)
  }

  /// Reset the ESDF and occupancy stores, the update counter and every
  /// touched flag.
  pub fn clear(&self) {
    let mut state = self.lock_state();
    debug_assert!(!state.pass_in_flight, "clear() during an ESDF pass");

    state.esdf.clear();
    state.occupancy.clear();
    state.pending_reseed.clear();
    state.update_counter = 0;
    state.status = EsdfStatus::Uninitialized;
    state.metrics.reset();
    update_status::clear_all(&self.read_tsdf());

    tracing::debug!("ESDF cleared");
  }

  // =========================================================================
  // Configuration
  // =========================================================================

  /// Change the clamp bound for subsequent passes. Existing values are not
  /// rewritten.
  pub fn set_esdf_max_distance(&self, max_distance: f32) -> Result<(), ConfigError> {
    validate_max_distance(max_distance)?;
    let mut state = self.lock_state();
    validate_influence_radius(max_distance, state.config.voxel_size)?;
    state.config.esdf_max_distance = max_distance;
    Ok(())
  }

  pub fn esdf_max_distance(&self) -> f32 {
    self.lock_state().config.esdf_max_distance
  }

  pub fn set_update_esdf_every_n(&self, every_n: i32) {
    self.lock_state().config.update_esdf_every_n = every_n;
  }

  pub fn set_traversability_radius(&self, radius: f32) -> Result<(), ConfigError> {
    if !(radius.is_finite() && radius >= 0.0) {
      return Err(ConfigError::NegativeTraversabilityRadius(radius));
    }
    self.lock_state().config.traversability_radius = radius;
    Ok(())
  }

  pub fn enable_incremental_update(&self) {
    self.lock_state().config.incremental_update = true;
  }

  pub fn disable_incremental_update(&self) {
    self.lock_state().config.incremental_update = false;
  }

  pub fn incremental_update_enabled(&self) -> bool {
    self.lock_state().config.incremental_update
  }

  pub fn config(&self) -> EsdfConfig {
    self.lock_state().config.clone()
  }

  // =========================================================================
  // Queries
  // =========================================================================

  pub fn status(&self) -> EsdfStatus {
    self.lock_state().status
  }

  /// Ticks counted since construction or the last `clear()`.
  pub fn update_counter(&self) -> u64 {
    self.lock_state().update_counter
  }

  pub fn metrics(&self) -> PassMetrics {
    self.lock_state().metrics.clone()
  }

  /// Signed distance at a voxel (negative inside obstacles).
  pub fn distance_at(&self, key: IVec3) -> Result<f32, EsdfError> {
    self
      .lock_state()
      .esdf
      .get(key)
      .filter(|voxel| voxel.observed)
      .map(|voxel| voxel.signed_distance())
      .ok_or(EsdfError::Unobserved { key })
  }

  /// Signed distance at the voxel containing a world position.
  pub fn distance_at_position(&self, position: Vec3) -> Result<f32, EsdfError> {
    let voxel_size = self.lock_state().config.voxel_size;
    self.distance_at(key_of_position(position, voxel_size))
  }

  /// Observed free-space voxels with at least `radius` clearance, sorted by
  /// key.
  pub fn traversable_voxels(&self, radius: f32) -> Vec<IVec3> {
    let state = self.lock_state();
    let mut keys: Vec<IVec3> = state
      .esdf
      .iter()
      .filter(|(_, voxel)| voxel.observed && voxel.sign == Sign::Outside && voxel.distance >= radius)
      .map(|(key, _)| key)
      .collect();
    keys.sort_by_key(|key| key.to_array());
    keys
  }

  /// [`Self::traversable_voxels`] with the configured radius.
  pub fn traversable_voxels_default(&self) -> Vec<IVec3> {
    let radius = self.lock_state().config.traversability_radius;
    self.traversable_voxels(radius)
  }

  /// Consistent copy of the ESDF store.
  pub fn esdf_snapshot(&self) -> EsdfLayer {
    self.lock_state().esdf.clone()
  }

  /// Consistent copy of the occupancy store.
  pub fn occupancy_snapshot(&self) -> OccupancyLayer {
    self.lock_state().occupancy.clone()
  }

  // =========================================================================
  // Evaluation
  // =========================================================================

  /// Compare the maintained stores against a reference.
  pub fn evaluate(&self, reference: &dyn ReferenceSource) -> EvaluationReport {
    let state = self.lock_state();
    evaluation::evaluate(&state.esdf, &state.occupancy, reference)
  }

  /// Rebuild an ESDF from reference occupancy with this server's propagator
  /// and current clamp, then compare distances.
  pub fn evaluate_reconstructed(
    &self,
    reference: &OccupancyReference,
  ) -> Result<EvaluationReport, EsdfError> {
    let state = self.lock_state();
    let report = evaluation::evaluate_reconstructed(
      &self.propagator,
      &state.esdf,
      &state.occupancy,
      reference,
      state.config.esdf_max_distance,
    )?;
    Ok(report)
  }
}

impl<P: Propagator> EsdfMapper for EsdfServer<P> {
  fn update_incremental(&self) -> Result<UpdateReport, EsdfError> {
    EsdfServer::update_incremental(self)
  }

  fn update_batch(&self, full_euclidean: bool) -> Result<UpdateReport, EsdfError> {
    EsdfServer::update_batch(self, full_euclidean)
  }

  fn clear(&self) {
    EsdfServer::clear(self)
  }

  fn evaluate(&self, reference: &dyn ReferenceSource) -> EvaluationReport {
    EsdfServer::evaluate(self, reference)
  }
}

/// Changed voxels propagated together, with the inclusive box of voxels
/// they can influence.
#[derive(Debug)]
struct SeedGroup {
  /// Lowest TSDF block the group started from, for logging.
  block_index: IVec3,
  changed: Vec<IVec3>,
  seed_min: IVec3,
  seed_max: IVec3,
}

impl SeedGroup {
  fn new(block_index: IVec3, changed: Vec<IVec3>, radius: i32) -> Self {
    let (min, max) = bounds(&changed);
    let radius = IVec3::splat(radius);
    Self {
      block_index,
      changed,
      seed_min: min.saturating_sub(radius),
      seed_max: max.saturating_add(radius),
    }
  }

  fn overlaps(&self, other: &Self) -> bool {
    self.seed_min.cmple(other.seed_max).all() && other.seed_min.cmple(self.seed_max).all()
  }

  fn absorb(&mut self, other: Self) {
    self.block_index = self.block_index.min(other.block_index);
    self.changed.extend(other.changed);
    self.seed_min = self.seed_min.min(other.seed_min);
    self.seed_max = self.seed_max.max(other.seed_max);
  }
}

/// Merge groups until no two seed boxes overlap, so no voxel is propagated
/// by two calls of one pass. Output is sorted by box minimum.
fn merge_overlapping(groups: Vec<SeedGroup>) -> Vec<SeedGroup> {
  let mut merged: Vec<SeedGroup> = Vec::with_capacity(groups.len());
  for mut group in groups {
    while let Some(idx) = merged.iter().position(|other| other.overlaps(&group)) {
      let other = merged.swap_remove(idx);
      group.absorb(other);
    }
    merged.push(group);
  }
  merged.sort_by_key(|group| (group.seed_min.to_array(), group.block_index.to_array()));
  merged
}

/// Inclusive bounding box of a non-empty key set.
fn bounds(keys: &[IVec3]) -> (IVec3, IVec3) {
  keys.iter().fold(
    (IVec3::splat(i32::MAX), IVec3::splat(i32::MIN)),
    |(min, max), &key| (min.min(key), max.max(key)),
  )
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
