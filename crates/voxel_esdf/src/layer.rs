//! Sparse block storage shared by the occupancy, ESDF and error stores.
//!
//! A [`Layer`] maps block indices to fixed-size blocks of 8³ voxels. Blocks
//! are allocated on first write and filled with `V::default()`. Each store
//! owns its own layer; stores never alias each other's blocks, so they can be
//! sized and cleared independently.

use std::collections::HashMap;

use glam::IVec3;

use crate::constants::{block_of, global_key, local_index_of, VOXELS_PER_BLOCK, VOXELS_PER_SIDE};

/// One allocated block of voxels.
#[derive(Clone, Debug)]
pub struct Block<V> {
  voxels: Box<[V]>,
}

impl<V: Copy + Default> Block<V> {
  pub fn new() -> Self {
    Self {
      voxels: vec![V::default(); VOXELS_PER_BLOCK].into_boxed_slice(),
    }
  }

  #[inline]
  pub fn get(&self, idx: usize) -> V {
    self.voxels[idx]
  }

  #[inline]
  pub fn get_mut(&mut self, idx: usize) -> &mut V {
    &mut self.voxels[idx]
  }

  #[inline]
  pub fn set(&mut self, idx: usize, voxel: V) {
    self.voxels[idx] = voxel;
  }

  /// Voxels in linear index order.
  pub fn voxels(&self) -> &[V] {
    &self.voxels
  }
}

impl<V: Copy + Default> Default for Block<V> {
  fn default() -> Self {
    Self::new()
  }
}

/// Sparse voxel layer keyed by block index.
#[derive(Clone, Debug)]
pub struct Layer<V> {
  voxel_size: f32,
  blocks: HashMap<IVec3, Block<V>>,
}

impl<V: Copy + Default> Layer<V> {
  pub fn new(voxel_size: f32) -> Self {
    Self {
      voxel_size,
      blocks: HashMap::new(),
    }
  }

  /// Edge length of one voxel in world units.
  #[inline]
  pub fn voxel_size(&self) -> f32 {
    self.voxel_size
  }

  /// Voxel at a global key, `None` if its block is not allocated.
  #[inline]
  pub fn get(&self, key: IVec3) -> Option<V> {
    self
      .blocks
      .get(&block_of(key))
      .map(|block| block.get(local_index_of(key)))
  }

  /// Voxel at a global key, or the default value when unallocated.
  #[inline]
  pub fn get_or_default(&self, key: IVec3) -> V {
    self.get(key).unwrap_or_default()
  }

  /// Mutable voxel access, allocating the block if needed.
  pub fn get_mut_or_allocate(&mut self, key: IVec3) -> &mut V {
    self
      .blocks
      .entry(block_of(key))
      .or_default()
      .get_mut(local_index_of(key))
  }

  /// Write a voxel, allocating its block if needed.
  #[inline]
  pub fn set(&mut self, key: IVec3, voxel: V) {
    *self.get_mut_or_allocate(key) = voxel;
  }

  pub fn block(&self, block_index: IVec3) -> Option<&Block<V>> {
    self.blocks.get(&block_index)
  }

  /// Insert or replace a whole block.
  pub fn insert_block(&mut self, block_index: IVec3, block: Block<V>) {
    self.blocks.insert(block_index, block);
  }

  pub fn contains_block(&self, block_index: IVec3) -> bool {
    self.blocks.contains_key(&block_index)
  }

  pub fn block_indices(&self) -> impl Iterator<Item = IVec3> + '_ {
    self.blocks.keys().copied()
  }

  pub fn blocks(&self) -> impl Iterator<Item = (IVec3, &Block<V>)> + '_ {
    self.blocks.iter().map(|(index, block)| (*index, block))
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  /// Iterate every voxel of every allocated block.
  pub fn iter(&self) -> impl Iterator<Item = (IVec3, V)> + '_ {
    self.blocks.iter().flat_map(|(index, block)| {
      let index = *index;
      block
        .voxels()
        .iter()
        .enumerate()
        .map(move |(idx, voxel)| (global_key(index, idx), *voxel))
    })
  }

  /// Keys of allocated voxels inside the inclusive box `[min, max]`.
  pub fn keys_in_box(&self, min: IVec3, max: IVec3) -> Vec<IVec3> {
    allocated_keys_in_box(min, max, |block_index| self.blocks.contains_key(&block_index))
  }

  /// Drop all blocks, keeping the voxel size.
  pub fn clear(&mut self) {
    self.blocks.clear();
  }
}

/// Enumerate keys of the inclusive box `[min, max]` that fall inside blocks
/// for which `is_allocated` holds.
pub(crate) fn allocated_keys_in_box(
  min: IVec3,
  max: IVec3,
  is_allocated: impl Fn(IVec3) -> bool,
) -> Vec<IVec3> {
  let min_block = block_of(min);
  let max_block = block_of(max);
  let mut keys = Vec::new();

  for bx in min_block.x..=max_block.x {
    for by in min_block.y..=max_block.y {
      for bz in min_block.z..=max_block.z {
        let block_index = IVec3::new(bx, by, bz);
        if !is_allocated(block_index) {
          continue;
        }
        let base = block_index * VOXELS_PER_SIDE as i32;
        let lo = min.max(base);
        let hi = max.min(base + IVec3::splat(VOXELS_PER_SIDE as i32 - 1));
        for x in lo.x..=hi.x {
          for y in lo.y..=hi.y {
            for z in lo.z..=hi.z {
              keys.push(IVec3::new(x, y, z));
            }
          }
        }
      }
    }
  }

  keys
}

#[cfg(test)]
#[path = "layer_test.rs"]
mod layer_test;
