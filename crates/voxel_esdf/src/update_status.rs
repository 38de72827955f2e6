//! Update-status tracking over the TSDF touched flags.
//!
//! Draining is a consuming read with at-least-once semantics: a voxel touched
//! concurrently with a drain is returned either by that drain or by the next
//! one, never lost. The block summary flag is cleared *before* its voxel flags
//! are scanned, so a writer that sets a voxel flag after the scan passed it
//! also re-sets the summary flag the next drain checks.

use glam::IVec3;

use crate::constants::{global_key, VOXELS_PER_BLOCK};
use crate::tsdf::TsdfLayer;

/// Whether any voxel may have been touched since the last drain.
///
/// May report `true` for a block whose voxels were already drained; never
/// reports `false` while a touched voxel exists.
pub fn has_any_touched(tsdf: &TsdfLayer) -> bool {
  tsdf.blocks().any(|(_, block)| block.may_have_touched())
}

/// Take every touched voxel, clearing its flag.
pub fn drain_touched(tsdf: &TsdfLayer) -> Vec<IVec3> {
  let mut drained = Vec::new();

  for (block_index, block) in tsdf.blocks() {
    if !block.take_any_touched() {
      continue;
    }
    for idx in 0..VOXELS_PER_BLOCK {
      if block.take_touched(idx) {
        drained.push(global_key(block_index, idx));
      }
    }
  }

  drained
}

/// Clear every touched flag without reporting them.
pub fn clear_all(tsdf: &TsdfLayer) {
  for (_, block) in tsdf.blocks() {
    block.take_any_touched();
    for idx in 0..VOXELS_PER_BLOCK {
      block.take_touched(idx);
    }
  }
}

/// Re-arm the flags of voxels whose change has not been consumed yet.
///
/// Returns the number of voxels re-armed (unallocated keys are skipped).
pub fn retouch(tsdf: &TsdfLayer, keys: &[IVec3]) -> usize {
  keys.iter().filter(|key| tsdf.mark_touched(**key)).count()
}

#[cfg(test)]
#[path = "update_status_test.rs"]
mod update_status_test;
