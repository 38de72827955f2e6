//! TSDF voxel store with per-voxel "touched" flags.
//!
//! The store is written by an integration context and read by the ESDF
//! update context. Voxel data is protected by the surrounding `RwLock`
//! ([`SharedTsdf`]); the touched flags are atomics so the update context can
//! drain them while holding only a read lock.
//!
//! ```text
//! integrator (write lock)            ESDF update (read lock)
//! ───────────────────────            ───────────────────────
//! write distance/weight
//! touched[i].store(true)  ─────────► any_touched.swap(false)
//! any_touched.store(true)            touched[i].swap(false) for each voxel
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use glam::IVec3;

use crate::constants::{block_of, global_key, local_index_of, VOXELS_PER_BLOCK};
use crate::layer::allocated_keys_in_box;
use crate::types::TsdfVoxel;

/// TSDF store shared between the integration and map-update contexts.
pub type SharedTsdf = Arc<RwLock<TsdfLayer>>;

#[derive(Clone, Copy, Debug, Default)]
struct TsdfSample {
  distance: f32,
  weight: f32,
}

/// One 8³ block of TSDF voxels and their touched flags.
pub struct TsdfBlock {
  samples: Box<[TsdfSample]>,
  touched: Box<[AtomicBool]>,
  /// Set after any voxel flag in this block; may be stale-true, never
  /// stale-false.
  any_touched: AtomicBool,
}

impl TsdfBlock {
  fn new() -> Self {
    Self {
      samples: vec![TsdfSample::default(); VOXELS_PER_BLOCK].into_boxed_slice(),
      touched: (0..VOXELS_PER_BLOCK)
        .map(|_| AtomicBool::new(false))
        .collect(),
      any_touched: AtomicBool::new(false),
    }
  }

  #[inline]
  fn voxel(&self, idx: usize) -> TsdfVoxel {
    let sample = self.samples[idx];
    TsdfVoxel {
      distance: sample.distance,
      weight: sample.weight,
      touched: self.touched[idx].load(Ordering::Acquire),
    }
  }

  #[inline]
  pub(crate) fn mark_touched(&self, idx: usize) {
    self.touched[idx].store(true, Ordering::Release);
    self.any_touched.store(true, Ordering::Release);
  }

  /// Clear the block summary flag, returning its previous value.
  #[inline]
  pub(crate) fn take_any_touched(&self) -> bool {
    self.any_touched.swap(false, Ordering::AcqRel)
  }

  #[inline]
  pub(crate) fn may_have_touched(&self) -> bool {
    self.any_touched.load(Ordering::Acquire)
  }

  /// Clear one voxel flag, returning its previous value.
  #[inline]
  pub(crate) fn take_touched(&self, idx: usize) -> bool {
    self.touched[idx].swap(false, Ordering::AcqRel)
  }
}

/// Sparse TSDF layer.
pub struct TsdfLayer {
  voxel_size: f32,
  blocks: HashMap<IVec3, TsdfBlock>,
}

impl TsdfLayer {
  pub fn new(voxel_size: f32) -> Self {
    Self {
      voxel_size,
      blocks: HashMap::new(),
    }
  }

  /// Wrap the layer for sharing with an integrator thread.
  pub fn into_shared(self) -> SharedTsdf {
    Arc::new(RwLock::new(self))
  }

  #[inline]
  pub fn voxel_size(&self) -> f32 {
    self.voxel_size
  }

  /// Voxel at a global key, `None` if its block was never allocated.
  pub fn voxel(&self, key: IVec3) -> Option<TsdfVoxel> {
    self
      .blocks
      .get(&block_of(key))
      .map(|block| block.voxel(local_index_of(key)))
  }

  /// Integration write: stores the sample and marks the voxel touched.
  pub fn set_voxel(&mut self, key: IVec3, distance: f32, weight: f32) {
    let block = self.blocks.entry(block_of(key)).or_insert_with(TsdfBlock::new);
    let idx = local_index_of(key);
    block.samples[idx] = TsdfSample { distance, weight };
    block.mark_touched(idx);
  }

  /// Re-arm the touched flag of an allocated voxel.
  ///
  /// Returns `false` when the voxel's block does not exist.
  pub fn mark_touched(&self, key: IVec3) -> bool {
    match self.blocks.get(&block_of(key)) {
      Some(block) => {
        block.mark_touched(local_index_of(key));
        true
      }
      None => false,
    }
  }

  pub(crate) fn blocks(&self) -> impl Iterator<Item = (IVec3, &TsdfBlock)> + '_ {
    self.blocks.iter().map(|(index, block)| (*index, block))
  }

  pub fn block_indices(&self) -> impl Iterator<Item = IVec3> + '_ {
    self.blocks.keys().copied()
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  /// Every voxel of a block, in linear index order.
  pub fn block_voxels(
    &self,
    block_index: IVec3,
  ) -> Option<impl Iterator<Item = (IVec3, TsdfVoxel)> + '_> {
    self.blocks.get(&block_index).map(move |block| {
      (0..VOXELS_PER_BLOCK).map(move |idx| (global_key(block_index, idx), block.voxel(idx)))
    })
  }

  /// Every voxel of every allocated block.
  pub fn iter_voxels(&self) -> impl Iterator<Item = (IVec3, TsdfVoxel)> + '_ {
    self.blocks.iter().flat_map(|(index, block)| {
      let index = *index;
      (0..VOXELS_PER_BLOCK).map(move |idx| (global_key(index, idx), block.voxel(idx)))
    })
  }

  /// Allocated voxel keys within `radius` cells (Chebyshev) of `center`,
  /// including `center` itself.
  pub fn neighbors_within(&self, center: IVec3, radius: i32) -> Vec<IVec3> {
    let radius = IVec3::splat(radius.max(0));
    allocated_keys_in_box(center - radius, center + radius, |block_index| {
      self.blocks.contains_key(&block_index)
    })
  }

  /// Drop every block (map reset by the owner of the TSDF).
  pub fn clear(&mut self) {
    self.blocks.clear();
  }
}

#[cfg(test)]
#[path = "tsdf_test.rs"]
mod tsdf_test;
