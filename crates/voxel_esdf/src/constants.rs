//! Block layout constants for the sparse voxel stores.
//!
//! Every store (TSDF, occupancy, ESDF) partitions the infinite voxel grid into
//! cubic blocks of 8³ voxels. Blocks are allocated on demand and addressed by
//! their block index; voxels inside a block are addressed with bit shifts.
//!
//! # Addressing
//!
//! ```text
//! global voxel key  (x, y, z) : i32, may be negative
//!
//! block index   = key.div_euclid(8)      (-1 for x in -8..=-1)
//! local coord   = key.rem_euclid(8)      (always 0..=7)
//! global key    = block * 8 + local
//! ```
//!
//! # Memory Layout
//!
//! ```text
//! Block memory layout (row-major, Z innermost):
//!
//! Address:  0    1   ...   7    8    9  ...  63    64  ...
//! Content: [0,0,0][0,0,1]..[0,0,7][0,1,0]..[0,7,7][1,0,0]...
//!          └──── Z ─────┘ └──── Z ─────┘
//!
//! index = x << 6 | y << 3 | z
//!       = x * 64 + y * 8 + z
//! ```

use glam::{IVec3, Vec3};

/// Number of voxels per block axis (must be a power of two for bit shifts)
pub const VOXELS_PER_SIDE: usize = 8;

/// Voxels per block slab (8² = 64)
pub const VOXELS_PER_SIDE_SQ: usize = VOXELS_PER_SIDE * VOXELS_PER_SIDE;

/// Total voxels in a block (8³ = 512)
pub const VOXELS_PER_BLOCK: usize = VOXELS_PER_SIDE * VOXELS_PER_SIDE * VOXELS_PER_SIDE;

/// Bit shift for Y coordinate indexing (log2(8) = 3)
pub const Y_SHIFT: u32 = 3;

/// Bit shift for X coordinate indexing (log2(64) = 6)
pub const X_SHIFT: u32 = 6;

/// Mask for extracting a single axis from a local index (0x7 = 7)
pub const INDEX_MASK: usize = 0x7;

/// Convert local block coordinates to linear index using bit shifts.
///
/// Layout: X is major axis (stride 64), Y is middle (stride 8), Z is minor
/// (stride 1)
#[inline(always)]
pub const fn coord_to_index(x: usize, y: usize, z: usize) -> usize {
  (x << X_SHIFT) | (y << Y_SHIFT) | z
}

/// Convert linear index to local block coordinates.
#[inline(always)]
pub const fn index_to_coord(idx: usize) -> (usize, usize, usize) {
  let x = idx >> X_SHIFT;
  let y = (idx >> Y_SHIFT) & INDEX_MASK;
  let z = idx & INDEX_MASK;
  (x, y, z)
}

/// Block index containing a global voxel key.
#[inline]
pub fn block_of(key: IVec3) -> IVec3 {
  key.div_euclid(IVec3::splat(VOXELS_PER_SIDE as i32))
}

/// Linear index of a global voxel key inside its block.
#[inline]
pub fn local_index_of(key: IVec3) -> usize {
  let local = key.rem_euclid(IVec3::splat(VOXELS_PER_SIDE as i32));
  coord_to_index(local.x as usize, local.y as usize, local.z as usize)
}

/// Global voxel key for a block index and a linear index inside it.
#[inline]
pub fn global_key(block: IVec3, idx: usize) -> IVec3 {
  let (x, y, z) = index_to_coord(idx);
  block * VOXELS_PER_SIDE as i32 + IVec3::new(x as i32, y as i32, z as i32)
}

/// Voxel key containing a world position. Voxel `k` spans
/// `[k * voxel_size, (k + 1) * voxel_size)` on each axis.
#[inline]
pub fn key_of_position(position: Vec3, voxel_size: f32) -> IVec3 {
  (position / voxel_size).floor().as_ivec3()
}

/// World position of a voxel's centre.
#[inline]
pub fn center_of_key(key: IVec3, voxel_size: f32) -> Vec3 {
  (key.as_vec3() + Vec3::splat(0.5)) * voxel_size
}

/// Largest influence radius, in cells, a configuration may ask for.
pub const MAX_INFLUENCE_RADIUS_CELLS: i32 = 1 << 12;

/// Radius in cells that a change at one voxel can influence: the clamp bound
/// rounded up, plus one cell for the bounded traversal. Saturates instead of
/// overflowing for huge ratios.
#[inline]
pub fn influence_radius_cells(max_distance: f32, voxel_size: f32) -> i32 {
  // `as` saturates (NaN maps to 0)
  ((max_distance / voxel_size).ceil() as i32).saturating_add(1)
}

/// The 26-neighbourhood offsets with their step length in voxel units.
///
/// Face neighbours cost 1, edge neighbours √2, corner neighbours √3.
pub const NEIGHBOR_OFFSETS: [([i32; 3], f32); 26] = {
  const F: f32 = 1.0;
  const E: f32 = std::f32::consts::SQRT_2;
  const C: f32 = 1.732_050_8;
  [
    // faces
    ([-1, 0, 0], F),
    ([1, 0, 0], F),
    ([0, -1, 0], F),
    ([0, 1, 0], F),
    ([0, 0, -1], F),
    ([0, 0, 1], F),
    // edges
    ([-1, -1, 0], E),
    ([-1, 1, 0], E),
    ([1, -1, 0], E),
    ([1, 1, 0], E),
    ([-1, 0, -1], E),
    ([-1, 0, 1], E),
    ([1, 0, -1], E),
    ([1, 0, 1], E),
    ([0, -1, -1], E),
    ([0, -1, 1], E),
    ([0, 1, -1], E),
    ([0, 1, 1], E),
    // corners
    ([-1, -1, -1], C),
    ([-1, -1, 1], C),
    ([-1, 1, -1], C),
    ([-1, 1, 1], C),
    ([1, -1, -1], C),
    ([1, -1, 1], C),
    ([1, 1, -1], C),
    ([1, 1, 1], C),
  ]
};

#[cfg(test)]
#[path = "constants_test.rs"]
mod constants_test;
