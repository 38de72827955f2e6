//! voxel_esdf - Incremental Euclidean signed distance fields over a sparse
//! TSDF voxel grid
//!
//! An integrator writes truncated signed distances into a shared
//! [`TsdfLayer`]; every write raises a per-voxel "touched" flag. The
//! [`EsdfServer`] consumes those flags and keeps a Euclidean signed distance
//! field consistent with the TSDF, either incrementally (only around changed
//! voxels) or with a full batch recompute.
//!
//! # Data flow
//!
//! ```text
//! integrator ──write──► TsdfLayer (touched flags)
//!                          │ drain
//!                          ▼
//!                   occupancy::derive ──► OccupancyLayer
//!                          │ seeds
//!                          ▼
//!                   Propagator::propagate ──► EsdfLayer ──► queries / evaluate
//! ```
//!
//! # Features
//!
//! - **Incremental passes**: only voxels whose occupancy disagrees with the
//!   field are reseeded, grouped per TSDF block
//! - **Batch passes**: exact Euclidean or chamfer metric, swapped in atomically
//! - **Cadence**: `tick()` runs an incremental pass every N calls
//! - **Evaluation**: per-voxel error against occupancy or analytic references
//!
//! # Example
//!
//! ```ignore
//! use voxel_esdf::{EsdfConfig, EsdfServer, TsdfLayer};
//! use glam::IVec3;
//!
//! let tsdf = TsdfLayer::new(0.1).into_shared();
//! tsdf.write().unwrap().set_voxel(IVec3::ZERO, -0.02, 1.0);
//!
//! let server = EsdfServer::new(tsdf.clone(), EsdfConfig::default())?;
//! server.update_batch(true)?;
//! let d = server.distance_at(IVec3::ZERO)?;
//! ```

pub mod constants;
pub mod error;
pub mod layer;
pub mod types;

pub use constants::{
  block_of, center_of_key, global_key, influence_radius_cells, key_of_position, local_index_of,
  MAX_INFLUENCE_RADIUS_CELLS, VOXELS_PER_BLOCK, VOXELS_PER_SIDE,
};
pub use error::{ConfigError, EsdfError, PropagationError};
pub use layer::{Block, Layer};
pub use types::{ErrorVoxel, EsdfVoxel, OccupancyState, OccupancyVoxel, Sign, TsdfVoxel};

// TSDF store and its touched flags
pub mod tsdf;
pub mod update_status;
pub use tsdf::{SharedTsdf, TsdfLayer};

// Occupancy classification
pub mod occupancy;
pub use occupancy::OccupancyLayer;

// Configuration (serde + TOML)
pub mod config;
pub use config::{EsdfConfig, PropagatorConfig};

// Distance propagation kernel
pub mod propagation;
pub use propagation::{
  EsdfLayer, PropagationRequest, PropagationStats, Propagator, WavefrontPropagator,
};

// Update scheduling
pub mod metrics;
pub mod server;
pub use metrics::{PassMetrics, RollingWindow};
pub use server::{EsdfMapper, EsdfServer, EsdfStatus, PassKind, TickOutcome, UpdateReport};

// Evaluation against references
pub mod evaluation;
pub use evaluation::{
  DistanceReference, ErrorField, EvaluationReport, OccupancyReference, ReferenceSample,
  ReferenceSource,
};

#[cfg(test)]
#[path = "consistency_test.rs"]
mod consistency_test;
