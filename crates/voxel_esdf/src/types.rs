//! Core voxel types shared by the TSDF, occupancy and ESDF stores.

/// Truncated signed distance sample as written by an integrator.
///
/// `touched` is a snapshot of the store's atomic flag at read time; writing a
/// `TsdfVoxel` back never clears it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TsdfVoxel {
  /// Signed distance to the surface. Negative = behind the surface.
  pub distance: f32,

  /// Accumulated integration weight. Zero = never observed.
  pub weight: f32,

  /// Set by integration, cleared when the ESDF consumes the change.
  pub touched: bool,
}

impl TsdfVoxel {
  pub fn new(distance: f32, weight: f32) -> Self {
    Self {
      distance,
      weight,
      touched: false,
    }
  }
}

/// Ternary occupancy classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OccupancyState {
  Occupied,
  Free,
  #[default]
  Unknown,
}

impl OccupancyState {
  /// True for Occupied and Free.
  #[inline]
  pub fn is_observed(self) -> bool {
    !matches!(self, OccupancyState::Unknown)
  }
}

/// Occupancy derived from a single TSDF voxel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OccupancyVoxel {
  pub state: OccupancyState,
  pub observed: bool,
}

impl OccupancyVoxel {
  pub const UNKNOWN: Self = Self {
    state: OccupancyState::Unknown,
    observed: false,
  };

  #[inline]
  pub fn from_state(state: OccupancyState) -> Self {
    Self {
      state,
      observed: state.is_observed(),
    }
  }
}

/// Which side of the obstacle boundary an ESDF voxel lies on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Sign {
  /// Inside an obstacle (occupied space).
  Inside,
  /// In free space.
  #[default]
  Outside,
}

/// Euclidean signed distance sample.
///
/// `distance` is always non-negative; the side is carried by `sign`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EsdfVoxel {
  pub distance: f32,
  pub sign: Sign,
  pub observed: bool,
}

impl EsdfVoxel {
  pub const UNOBSERVED: Self = Self {
    distance: 0.0,
    sign: Sign::Outside,
    observed: false,
  };

  pub fn outside(distance: f32) -> Self {
    Self {
      distance,
      sign: Sign::Outside,
      observed: true,
    }
  }

  pub fn inside(distance: f32) -> Self {
    Self {
      distance,
      sign: Sign::Inside,
      observed: true,
    }
  }

  /// Distance with the sign applied (negative inside obstacles).
  #[inline]
  pub fn signed_distance(&self) -> f32 {
    match self.sign {
      Sign::Inside => -self.distance,
      Sign::Outside => self.distance,
    }
  }

  /// Whether this voxel already reflects the given occupancy.
  ///
  /// Used to decide if a changed TSDF voxel needs a fresh propagation seed:
  /// any mismatch (including a sign flip) forces one.
  #[inline]
  pub fn agrees_with(&self, state: OccupancyState) -> bool {
    match state {
      OccupancyState::Unknown => !self.observed,
      OccupancyState::Occupied => self.observed && self.sign == Sign::Inside,
      OccupancyState::Free => self.observed && self.sign == Sign::Outside,
    }
  }
}

/// Per-voxel evaluation error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorVoxel {
  pub error: f32,
}

impl ErrorVoxel {
  /// Sentinel for voxels observed by only one of the compared sources.
  pub const NO_DATA: Self = Self { error: -1.0 };

  #[inline]
  pub fn has_data(&self) -> bool {
    self.error >= 0.0
  }
}

impl Default for ErrorVoxel {
  fn default() -> Self {
    Self::NO_DATA
  }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
