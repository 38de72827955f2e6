//! EsdfConfig - configuration surface of the ESDF server.
//!
//! Loaded from TOML (all keys optional, missing keys take the defaults) or
//! built in code with the `with_*` setters. Either way [`EsdfConfig::validate`]
//! runs before a server accepts it; invalid values are rejected, never clamped.
//!
//! ```toml
//! voxel_size = 0.1
//! esdf_max_distance = 2.0
//! update_esdf_every_n = 3
//! incremental_update = true
//! observed_weight_threshold = 0.0001
//! full_euclidean_on_batch = false
//! traversability_radius = 0.4
//!
//! [propagation]
//! max_queue_pops = 50000000
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::constants::{influence_radius_cells, MAX_INFLUENCE_RADIUS_CELLS};
use crate::error::ConfigError;

/// Configuration for the wavefront propagation kernel.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PropagatorConfig {
  /// Upper bound on priority-queue pops per `propagate` call. Exceeding it
  /// reports the seed set as not converged.
  pub max_queue_pops: usize,
}

impl Default for PropagatorConfig {
  fn default() -> Self {
    Self {
      max_queue_pops: 50_000_000,
    }
  }
}

/// Configuration for the ESDF update scheduler.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EsdfConfig {
  /// Voxel edge length in world units. Must match the TSDF layer.
  pub voxel_size: f32,

  /// Clamp bound for ESDF distances.
  pub esdf_max_distance: f32,

  /// Run an incremental update every N ticks. `0` or negative = every tick.
  pub update_esdf_every_n: i32,

  /// Master switch for tick-driven incremental updates.
  pub incremental_update: bool,

  /// TSDF weight below which a voxel is Unknown.
  pub observed_weight_threshold: f32,

  /// Metric used by `update_batch_default`.
  pub full_euclidean_on_batch: bool,

  /// Default clearance for traversability queries.
  pub traversability_radius: f32,

  pub propagation: PropagatorConfig,
}

impl Default for EsdfConfig {
  fn default() -> Self {
    Self {
      voxel_size: 0.1,
      esdf_max_distance: 2.0,
      update_esdf_every_n: 0,
      incremental_update: true,
      observed_weight_threshold: 1e-4,
      full_euclidean_on_batch: false,
      traversability_radius: 0.4,
      propagation: PropagatorConfig::default(),
    }
  }
}

impl EsdfConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_voxel_size(mut self, voxel_size: f32) -> Self {
    self.voxel_size = voxel_size;
    self
  }

  pub fn with_esdf_max_distance(mut self, max_distance: f32) -> Self {
    self.esdf_max_distance = max_distance;
    self
  }

  pub fn with_update_every_n(mut self, n: i32) -> Self {
    self.update_esdf_every_n = n;
    self
  }

  pub fn with_incremental_update(mut self, enabled: bool) -> Self {
    self.incremental_update = enabled;
    self
  }

  pub fn with_observed_weight_threshold(mut self, threshold: f32) -> Self {
    self.observed_weight_threshold = threshold;
    self
  }

  pub fn with_full_euclidean_on_batch(mut self, full_euclidean: bool) -> Self {
    self.full_euclidean_on_batch = full_euclidean;
    self
  }

  pub fn with_traversability_radius(mut self, radius: f32) -> Self {
    self.traversability_radius = radius;
    self
  }

  pub fn with_max_queue_pops(mut self, max_queue_pops: usize) -> Self {
    self.propagation.max_queue_pops = max_queue_pops;
    self
  }

  /// Reject values the server cannot honour.
  pub fn validate(&self) -> Result<(), ConfigError> {
    validate_max_distance(self.esdf_max_distance)?;
    if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
      return Err(ConfigError::NonPositiveVoxelSize(self.voxel_size));
    }
    validate_influence_radius(self.esdf_max_distance, self.voxel_size)?;
    if !(self.observed_weight_threshold.is_finite() && self.observed_weight_threshold >= 0.0) {
      return Err(ConfigError::NegativeWeightThreshold(
        self.observed_weight_threshold,
      ));
    }
    if !(self.traversability_radius.is_finite() && self.traversability_radius >= 0.0) {
      return Err(ConfigError::NegativeTraversabilityRadius(
        self.traversability_radius,
      ));
    }
    Ok(())
  }

  /// Parse and validate a TOML document.
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: EsdfConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Load and validate a TOML file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml_str(&content)
  }

  /// Radius in cells that a change at one voxel can influence.
  #[inline]
  pub fn influence_radius_cells(&self) -> i32 {
    influence_radius_cells(self.esdf_max_distance, self.voxel_size)
  }
}

/// Shared check for the clamp bound (also used by runtime setters).
pub(crate) fn validate_max_distance(max_distance: f32) -> Result<(), ConfigError> {
  if max_distance.is_finite() && max_distance >= 0.0 {
    Ok(())
  } else {
    Err(ConfigError::NegativeMaxDistance(max_distance))
  }
}

/// Clamp bound and voxel size together must stay within
/// [`MAX_INFLUENCE_RADIUS_CELLS`].
pub(crate) fn validate_influence_radius(max_distance: f32, voxel_size: f32) -> Result<(), ConfigError> {
  let cells = influence_radius_cells(max_distance, voxel_size);
  if cells > MAX_INFLUENCE_RADIUS_CELLS {
    return Err(ConfigError::InfluenceRadiusTooLarge {
      cells,
      limit: MAX_INFLUENCE_RADIUS_CELLS,
    });
  }
  Ok(())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
