//! Error taxonomy for the ESDF subsystem.
//!
//! None of these are fatal: queries surface `Unobserved`, propagation failures
//! degrade only the seed group that failed, and configuration errors are
//! rejected before they reach the server state.

use std::path::PathBuf;

use glam::IVec3;
use thiserror::Error;

/// Invalid configuration, rejected at the configuration boundary.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("esdf_max_distance must be finite and >= 0, got {0}")]
  NegativeMaxDistance(f32),

  #[error("voxel_size must be finite and > 0, got {0}")]
  NonPositiveVoxelSize(f32),

  #[error("observed_weight_threshold must be finite and >= 0, got {0}")]
  NegativeWeightThreshold(f32),

  #[error("traversability_radius must be finite and >= 0, got {0}")]
  NegativeTraversabilityRadius(f32),

  #[error("esdf_max_distance / voxel_size spans {cells} cells, more than the limit of {limit}")]
  InfluenceRadiusTooLarge { cells: i32, limit: i32 },

  #[error("voxel_size {config} does not match the TSDF layer voxel size {layer}")]
  VoxelSizeMismatch { config: f32, layer: f32 },

  #[error("failed to read config file {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config TOML")]
  Parse(#[from] toml::de::Error),
}

/// The propagation primitive could not finish a seed set.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PropagationError {
  #[error("propagation of {seeds} seeds did not converge within {pops} queue pops")]
  NotConverged { seeds: usize, pops: usize },
}

/// Errors surfaced by the ESDF server.
#[derive(Debug, Error)]
pub enum EsdfError {
  /// The voxel has never been observed by the ESDF; its distance is unknown.
  /// Recoverable by a batch recompute once the TSDF covers it.
  #[error("voxel {key} has no ESDF distance yet")]
  Unobserved { key: IVec3 },

  #[error(transparent)]
  Propagation(#[from] PropagationError),

  #[error(transparent)]
  Config(#[from] ConfigError),
}
