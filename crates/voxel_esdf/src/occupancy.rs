//! Occupancy derivation from TSDF voxels.
//!
//! ```text
//! weight <  threshold            → Unknown
//! weight >= threshold, d <= 0    → Occupied
//! weight >= threshold, d >  0    → Free
//! ```

use glam::IVec3;
use rayon::prelude::*;

use crate::constants::VOXELS_PER_BLOCK;
use crate::layer::{Block, Layer};
use crate::tsdf::TsdfLayer;
use crate::types::{OccupancyState, OccupancyVoxel, TsdfVoxel};

/// Occupancy voxel store.
pub type OccupancyLayer = Layer<OccupancyVoxel>;

/// Classify a single TSDF voxel. Total and stateless.
#[inline]
pub fn derive(voxel: &TsdfVoxel, observed_weight_threshold: f32) -> OccupancyVoxel {
  let state = if voxel.weight < observed_weight_threshold {
    OccupancyState::Unknown
  } else if voxel.distance <= 0.0 {
    OccupancyState::Occupied
  } else {
    OccupancyState::Free
  };
  OccupancyVoxel::from_state(state)
}

/// Reclassify every allocated TSDF voxel into a fresh occupancy layer.
///
/// Blocks are derived in parallel; the result has exactly the TSDF's block
/// set.
#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "occupancy::derive_layer"))]
pub fn derive_layer(tsdf: &TsdfLayer, observed_weight_threshold: f32) -> OccupancyLayer {
  let block_indices: Vec<IVec3> = tsdf.block_indices().collect();

  let blocks: Vec<(IVec3, Block<OccupancyVoxel>)> = block_indices
    .into_par_iter()
    .filter_map(|block_index| {
      let voxels = tsdf.block_voxels(block_index)?;
      let mut block = Block::new();
      for (idx, (_, voxel)) in voxels.enumerate().take(VOXELS_PER_BLOCK) {
        block.set(idx, derive(&voxel, observed_weight_threshold));
      }
      Some((block_index, block))
    })
    .collect();

  let mut layer = OccupancyLayer::new(tsdf.voxel_size());
  for (block_index, block) in blocks {
    layer.insert_block(block_index, block);
  }
  layer
}

#[cfg(test)]
#[path = "occupancy_test.rs"]
mod occupancy_test;
