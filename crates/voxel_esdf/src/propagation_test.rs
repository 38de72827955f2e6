use super::*;
use crate::types::{OccupancyVoxel, Sign};

const VOXEL_SIZE: f32 = 0.1;
const EPS: f32 = 1e-5;

/// Fill the inclusive box `[min, max]` using `state_at`.
fn grid(min: IVec3, max: IVec3, state_at: impl Fn(IVec3) -> OccupancyState) -> OccupancyLayer {
  let mut layer = OccupancyLayer::new(VOXEL_SIZE);
  for x in min.x..=max.x {
    for y in min.y..=max.y {
      for z in min.z..=max.z {
        let key = IVec3::new(x, y, z);
        layer.set(key, OccupancyVoxel::from_state(state_at(key)));
      }
    }
  }
  layer
}

/// Single occupied voxel at the origin, free everywhere else in the box.
fn point_obstacle() -> OccupancyLayer {
  grid(IVec3::splat(-6), IVec3::splat(6), |key| {
    if key == IVec3::ZERO {
      OccupancyState::Occupied
    } else {
      OccupancyState::Free
    }
  })
}

fn request(seeds: &[IVec3], max_distance: f32, exact: bool) -> PropagationRequest<'_> {
  PropagationRequest {
    seeds,
    max_distance,
    voxel_size: VOXEL_SIZE,
    exact,
  }
}

#[test]
fn test_exact_distances_around_point_obstacle() {
  let occupancy = point_obstacle();
  let seeds = [
    IVec3::ZERO,
    IVec3::new(3, 0, 0),
    IVec3::new(2, 2, 0),
    IVec3::new(2, 1, 0),
    IVec3::new(-1, -1, -1),
  ];
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);

  let stats = WavefrontPropagator::default()
    .propagate(&request(&seeds, 2.0, true), &occupancy, &mut esdf)
    .unwrap();
  assert_eq!(stats.seeds_written, seeds.len());

  let origin = esdf.get(IVec3::ZERO).unwrap();
  assert_eq!(origin.sign, Sign::Inside);
  assert_eq!(origin.distance, 0.0);

  let expect = |key: IVec3, d: f32| {
    let voxel = esdf.get(key).unwrap();
    assert!(voxel.observed);
    assert_eq!(voxel.sign, Sign::Outside);
    assert!((voxel.distance - d).abs() < EPS, "{key}: {} vs {d}", voxel.distance);
  };
  expect(IVec3::new(3, 0, 0), 0.3);
  expect(IVec3::new(2, 2, 0), 8.0_f32.sqrt() * VOXEL_SIZE);
  expect(IVec3::new(2, 1, 0), 5.0_f32.sqrt() * VOXEL_SIZE);
  expect(IVec3::new(-1, -1, -1), 3.0_f32.sqrt() * VOXEL_SIZE);
}

#[test]
fn test_chamfer_never_underestimates() {
  let occupancy = point_obstacle();
  let seeds = [IVec3::new(2, 1, 0), IVec3::new(4, 0, 0)];

  let mut exact = EsdfLayer::new(VOXEL_SIZE);
  let mut chamfer = EsdfLayer::new(VOXEL_SIZE);
  let propagator = WavefrontPropagator::default();
  propagator
    .propagate(&request(&seeds, 2.0, true), &occupancy, &mut exact)
    .unwrap();
  propagator
    .propagate(&request(&seeds, 2.0, false), &occupancy, &mut chamfer)
    .unwrap();

  // On-axis both metrics agree
  let axis = IVec3::new(4, 0, 0);
  assert!((exact.get(axis).unwrap().distance - chamfer.get(axis).unwrap().distance).abs() < EPS);

  // Off-axis chamfer is 1 + √2 cells instead of √5
  let off = IVec3::new(2, 1, 0);
  let chamfer_d = chamfer.get(off).unwrap().distance;
  assert!(chamfer_d > exact.get(off).unwrap().distance);
  assert!((chamfer_d - (1.0 + std::f32::consts::SQRT_2) * VOXEL_SIZE).abs() < EPS);
}

#[test]
fn test_distances_are_clamped() {
  let occupancy = point_obstacle();
  let seeds = [IVec3::new(1, 0, 0), IVec3::new(5, 0, 0), IVec3::new(6, 6, 6)];
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);

  WavefrontPropagator::default()
    .propagate(&request(&seeds, 0.25, true), &occupancy, &mut esdf)
    .unwrap();

  assert!((esdf.get(IVec3::new(1, 0, 0)).unwrap().distance - 0.1).abs() < EPS);
  assert_eq!(esdf.get(IVec3::new(5, 0, 0)).unwrap().distance, 0.25);
  assert_eq!(esdf.get(IVec3::new(6, 6, 6)).unwrap().distance, 0.25);
}

#[test]
fn test_huge_max_distance_gathers_allocated_blocks() {
  let occupancy = point_obstacle();
  let seeds = [IVec3::new(3, 0, 0), IVec3::new(-4, 2, 0)];
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);

  let stats = WavefrontPropagator::default()
    .propagate(&request(&seeds, 1.0e9, true), &occupancy, &mut esdf)
    .unwrap();

  assert_eq!(stats.gathered_blocks, occupancy.block_count());
  assert!((esdf.get(IVec3::new(3, 0, 0)).unwrap().distance - 0.3).abs() < EPS);
  let expected = (20.0f32).sqrt() * VOXEL_SIZE;
  assert!((esdf.get(IVec3::new(-4, 2, 0)).unwrap().distance - expected).abs() < EPS);
}

#[test]
fn test_only_seeds_are_written() {
  let occupancy = point_obstacle();
  let seeds = [IVec3::new(1, 0, 0)];
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);

  WavefrontPropagator::default()
    .propagate(&request(&seeds, 2.0, true), &occupancy, &mut esdf)
    .unwrap();

  let observed: Vec<IVec3> = esdf
    .iter()
    .filter(|(_, voxel)| voxel.observed)
    .map(|(key, _)| key)
    .collect();
  assert_eq!(observed, vec![IVec3::new(1, 0, 0)]);
}

#[test]
fn test_unknown_seed_becomes_unobserved() {
  let occupancy = point_obstacle();
  let unknown = IVec3::new(40, 0, 0);
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);
  esdf.set(unknown, EsdfVoxel::outside(0.5));

  let stats = WavefrontPropagator::default()
    .propagate(&request(&[unknown], 2.0, true), &occupancy, &mut esdf)
    .unwrap();

  assert_eq!(stats.seeds_written, 1);
  assert!(!esdf.get(unknown).unwrap().observed);
}

#[test]
fn test_unknown_seed_without_block_is_not_allocated() {
  let occupancy = point_obstacle();
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);

  WavefrontPropagator::default()
    .propagate(&request(&[IVec3::new(40, 0, 0)], 2.0, true), &occupancy, &mut esdf)
    .unwrap();

  assert!(esdf.is_empty());
}

#[test]
fn test_inside_distances_of_solid_cube() {
  // Solid 5x5x5 cube at [0, 4]^3 surrounded by one shell of free space
  let occupancy = grid(IVec3::splat(-1), IVec3::splat(5), |key| {
    let inside = key.cmpge(IVec3::ZERO).all() && key.cmple(IVec3::splat(4)).all();
    if inside {
      OccupancyState::Occupied
    } else {
      OccupancyState::Free
    }
  });
  let seeds = [IVec3::splat(2), IVec3::new(0, 2, 2), IVec3::new(1, 2, 2)];
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);

  WavefrontPropagator::default()
    .propagate(&request(&seeds, 2.0, true), &occupancy, &mut esdf)
    .unwrap();

  let center = esdf.get(IVec3::splat(2)).unwrap();
  assert_eq!(center.sign, Sign::Inside);
  assert!((center.distance - 0.2).abs() < EPS);
  assert!((center.signed_distance() + 0.2).abs() < EPS);

  // Boundary voxel reads zero
  assert_eq!(esdf.get(IVec3::new(0, 2, 2)).unwrap().distance, 0.0);
  assert!((esdf.get(IVec3::new(1, 2, 2)).unwrap().distance - 0.1).abs() < EPS);
}

#[test]
fn test_front_does_not_cross_unknown() {
  // Occupied wall at x = 0, unknown gap at x = 1, free slab at x in [2, 4]
  let occupancy = grid(IVec3::new(0, -2, -2), IVec3::new(4, 2, 2), |key| match key.x {
    0 => OccupancyState::Occupied,
    1 => OccupancyState::Unknown,
    _ => OccupancyState::Free,
  });
  let seed = IVec3::new(2, 0, 0);
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);

  WavefrontPropagator::default()
    .propagate(&request(&[seed], 1.0, true), &occupancy, &mut esdf)
    .unwrap();

  assert_eq!(esdf.get(seed).unwrap().distance, 1.0);
}

#[test]
fn test_budget_exhaustion_writes_nothing() {
  let occupancy = point_obstacle();
  let seeds = [IVec3::new(1, 0, 0), IVec3::new(3, 0, 0)];
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);
  esdf.set(IVec3::new(1, 0, 0), EsdfVoxel::outside(0.7));

  let propagator = WavefrontPropagator::new(PropagatorConfig { max_queue_pops: 1 });
  let result = propagator.propagate(&request(&seeds, 2.0, true), &occupancy, &mut esdf);

  assert!(matches!(result, Err(PropagationError::NotConverged { seeds: 2, .. })));
  assert_eq!(esdf.get(IVec3::new(1, 0, 0)), Some(EsdfVoxel::outside(0.7)));
  assert!(!esdf.get(IVec3::new(3, 0, 0)).unwrap().observed);
}

#[test]
fn test_propagation_is_deterministic() {
  let occupancy = grid(IVec3::splat(-4), IVec3::splat(12), |key| {
    if (key.x * 7 + key.y * 3 + key.z) % 11 == 0 {
      OccupancyState::Occupied
    } else {
      OccupancyState::Free
    }
  });
  let seeds: Vec<IVec3> = occupancy.iter().map(|(key, _)| key).collect();
  let propagator = WavefrontPropagator::default();

  let mut first = EsdfLayer::new(VOXEL_SIZE);
  let mut second = EsdfLayer::new(VOXEL_SIZE);
  for exact in [true, false] {
    propagator
      .propagate(&request(&seeds, 0.5, exact), &occupancy, &mut first)
      .unwrap();
    propagator
      .propagate(&request(&seeds, 0.5, exact), &occupancy, &mut second)
      .unwrap();
    for (key, voxel) in first.iter() {
      assert_eq!(second.get(key), Some(voxel));
    }
  }
}

#[test]
fn test_empty_seed_set_is_a_no_op() {
  let occupancy = point_obstacle();
  let mut esdf = EsdfLayer::new(VOXEL_SIZE);
  let stats = WavefrontPropagator::default()
    .propagate(&request(&[], 2.0, true), &occupancy, &mut esdf)
    .unwrap();
  assert_eq!(stats, PropagationStats::default());
  assert!(esdf.is_empty());
}
