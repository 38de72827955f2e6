//! Benchmarks for batch and incremental ESDF passes on a sphere TSDF.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{IVec3, Vec3};
use voxel_esdf::{center_of_key, occupancy, EsdfConfig, EsdfServer, SharedTsdf, TsdfLayer};

const VOXEL_SIZE: f32 = 0.1;

/// Sphere of `radius` metres centred in a `side`³ voxel cube.
fn sphere_tsdf(side: i32, radius: f32) -> SharedTsdf {
  let center = Vec3::splat(side as f32 * VOXEL_SIZE * 0.5);
  let mut tsdf = TsdfLayer::new(VOXEL_SIZE);
  for x in 0..side {
    for y in 0..side {
      for z in 0..side {
        let key = IVec3::new(x, y, z);
        let distance = center_of_key(key, VOXEL_SIZE).distance(center) - radius;
        tsdf.set_voxel(key, distance, 1.0);
      }
    }
  }
  tsdf.into_shared()
}

fn config() -> EsdfConfig {
  EsdfConfig::default()
    .with_voxel_size(VOXEL_SIZE)
    .with_esdf_max_distance(1.0)
}

/// Occupancy derivation of a whole grid.
fn bench_derive_layer(c: &mut Criterion) {
  let tsdf = sphere_tsdf(32, 1.0);
  let layer = tsdf.read().unwrap();

  c.bench_function("occupancy::derive_layer (32³ sphere)", |b| {
    b.iter(|| black_box(occupancy::derive_layer(black_box(&layer), 1e-4)))
  });
}

/// Batch pass with both metrics.
fn bench_batch(c: &mut Criterion) {
  let mut group = c.benchmark_group("esdf_batch");
  group.sample_size(10);

  for side in [16, 32] {
    let tsdf = sphere_tsdf(side, side as f32 * VOXEL_SIZE * 0.3);
    let server = EsdfServer::new(tsdf, config()).unwrap();

    for full_euclidean in [true, false] {
      let name = if full_euclidean { "exact" } else { "chamfer" };
      group.bench_with_input(BenchmarkId::new(name, side), &full_euclidean, |b, &exact| {
        b.iter(|| black_box(server.update_batch(exact).unwrap()))
      });
    }
  }

  group.finish();
}

/// Incremental pass after a single voxel flips.
fn bench_incremental(c: &mut Criterion) {
  let tsdf = sphere_tsdf(32, 1.0);
  let server = EsdfServer::new(tsdf.clone(), config()).unwrap();
  server.update_batch(true).unwrap();

  let key = IVec3::new(2, 16, 16);
  let mut occupied = false;

  c.bench_function("esdf_incremental (single flip, 32³)", |b| {
    b.iter(|| {
      occupied = !occupied;
      let distance = if occupied { -0.05 } else { 0.05 };
      tsdf.write().unwrap().set_voxel(key, distance, 1.0);
      black_box(server.update_incremental().unwrap())
    })
  });
}

criterion_group!(benches, bench_derive_layer, bench_batch, bench_incremental);
criterion_main!(benches);
