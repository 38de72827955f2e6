//! Randomised consistency checks across passes.
//!
//! Builds random occupancy worlds, mutates them between incremental passes
//! and checks the maintained field against a from-scratch batch pass.

use glam::IVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::EsdfConfig;
use crate::server::EsdfServer;
use crate::tsdf::{SharedTsdf, TsdfLayer};
use crate::update_status;

const VOXEL_SIZE: f32 = 0.1;
const MAX_DISTANCE: f32 = 0.5;
const SIZE: i32 = 16;

fn config() -> EsdfConfig {
  EsdfConfig::default()
    .with_voxel_size(VOXEL_SIZE)
    .with_esdf_max_distance(MAX_DISTANCE)
}

fn random_distance(rng: &mut StdRng) -> f32 {
  if rng.random_bool(0.1) {
    -0.05
  } else {
    0.05
  }
}

fn random_key(rng: &mut StdRng) -> IVec3 {
  IVec3::new(
    rng.random_range(0..SIZE),
    rng.random_range(0..SIZE),
    rng.random_range(0..SIZE),
  )
}

/// Fully observed `SIZE³` world with ~10% occupied voxels.
fn random_world(rng: &mut StdRng) -> SharedTsdf {
  random_world_of_side(rng, SIZE)
}

fn random_world_of_side(rng: &mut StdRng, side: i32) -> SharedTsdf {
  let mut tsdf = TsdfLayer::new(VOXEL_SIZE);
  for x in 0..side {
    for y in 0..side {
      for z in 0..side {
        let distance = random_distance(rng);
        tsdf.set_voxel(IVec3::new(x, y, z), distance, 1.0);
      }
    }
  }
  tsdf.into_shared()
}

#[test]
fn test_incremental_converges_to_batch() {
  for seed in 0..3 {
    let mut rng = StdRng::seed_from_u64(seed);
    let tsdf = random_world(&mut rng);

    let incremental = EsdfServer::new(tsdf.clone(), config()).unwrap();
    incremental.update_batch(true).unwrap();

    for _ in 0..4 {
      {
        let mut layer = tsdf.write().unwrap();
        for _ in 0..12 {
          let key = random_key(&mut rng);
          let distance = random_distance(&mut rng);
          layer.set_voxel(key, distance, 1.0);
        }
      }
      incremental.update_incremental().unwrap();
    }

    let batch = EsdfServer::new(tsdf.clone(), config()).unwrap();
    batch.update_batch(true).unwrap();

    let expected = batch.esdf_snapshot();
    let actual = incremental.esdf_snapshot();
    for (key, voxel) in expected.iter() {
      let maintained = actual.get_or_default(key);
      assert_eq!(maintained.observed, voxel.observed, "seed {seed} key {key}");
      if voxel.observed {
        let diff = (maintained.signed_distance() - voxel.signed_distance()).abs();
        assert!(
          diff <= VOXEL_SIZE + 1e-5,
          "seed {seed} key {key}: incremental {} vs batch {}",
          maintained.signed_distance(),
          voxel.signed_distance()
        );
      }
    }
  }
}

#[test]
fn test_voxel_by_voxel_build_from_empty_matches_batch() {
  const SIDE: i32 = 8;
  let mut rng = StdRng::seed_from_u64(3);
  let tsdf = random_world_of_side(&mut rng, SIDE);
  let server = EsdfServer::new(tsdf.clone(), config()).unwrap();
  server.clear();

  for x in 0..SIDE {
    for y in 0..SIDE {
      for z in 0..SIDE {
        tsdf.read().unwrap().mark_touched(IVec3::new(x, y, z));
        let report = server.update_incremental().unwrap();
        assert_eq!(report.drained, 1);
        assert_eq!(report.failed_groups, 0);
      }
    }
  }

  let actual = server.esdf_snapshot();
  server.update_batch(true).unwrap();
  let expected = server.esdf_snapshot();
  for (key, voxel) in expected.iter() {
    let maintained = actual.get_or_default(key);
    assert_eq!(maintained.observed, voxel.observed, "key {key}");
    if voxel.observed {
      let diff = (maintained.signed_distance() - voxel.signed_distance()).abs();
      assert!(
        diff <= VOXEL_SIZE + 1e-5,
        "key {key}: incremental {} vs batch {}",
        maintained.signed_distance(),
        voxel.signed_distance()
      );
    }
  }
}

#[test]
fn test_distances_stay_clamped() {
  let mut rng = StdRng::seed_from_u64(7);
  let tsdf = random_world(&mut rng);
  let server = EsdfServer::new(tsdf.clone(), config()).unwrap();

  server.update_batch(false).unwrap();
  let check = |server: &EsdfServer| {
    let bound = server.esdf_max_distance();
    for (key, voxel) in server.esdf_snapshot().iter() {
      if voxel.observed {
        assert!(voxel.distance >= 0.0 && voxel.distance <= bound, "{key}: {}", voxel.distance);
      }
    }
  };
  check(&server);

  server.set_esdf_max_distance(0.2).unwrap();
  server.update_batch(true).unwrap();
  check(&server);

  {
    let mut layer = tsdf.write().unwrap();
    for _ in 0..20 {
      let key = random_key(&mut rng);
      let distance = random_distance(&mut rng);
      layer.set_voxel(key, distance, 1.0);
    }
  }
  server.update_incremental().unwrap();
  check(&server);
}

#[test]
fn test_every_write_is_consumed_by_some_pass() {
  let mut rng = StdRng::seed_from_u64(11);
  let tsdf = random_world(&mut rng);
  let server = EsdfServer::new(tsdf.clone(), config()).unwrap();
  server.update_batch(true).unwrap();

  for _ in 0..5 {
    {
      let mut layer = tsdf.write().unwrap();
      for _ in 0..8 {
        let key = random_key(&mut rng);
        let distance = random_distance(&mut rng);
        layer.set_voxel(key, distance, 1.0);
      }
    }
    server.tick();
    assert!(!update_status::has_any_touched(&tsdf.read().unwrap()));
  }

  // The maintained occupancy matches a fresh derivation of the whole TSDF
  let fresh = crate::occupancy::derive_layer(&tsdf.read().unwrap(), config().observed_weight_threshold);
  let maintained = server.occupancy_snapshot();
  for (key, voxel) in fresh.iter() {
    assert_eq!(maintained.get(key), Some(voxel), "{key}");
  }
}
