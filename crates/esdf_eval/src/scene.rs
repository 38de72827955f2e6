//! Synthetic TSDF integration for a drifting sphere.

use glam::{IVec3, Vec3};
use voxel_esdf::{center_of_key, TsdfLayer};

use crate::config::SceneConfig;

/// A solid sphere inside a cube of observed space.
#[derive(Debug, Clone)]
pub struct SphereScene {
	pub voxel_size: f32,
	pub extent: i32,
	pub radius: f32,
	pub truncation: f32,
	pub center: Vec3,
	drift: Vec3,
}

impl SphereScene {
	/// Sphere centred in the cube.
	pub fn new(config: &SceneConfig, voxel_size: f32) -> Self {
		Self {
			voxel_size,
			extent: config.extent,
			radius: config.sphere_radius,
			truncation: config.truncation,
			center: Vec3::splat(config.extent as f32 * voxel_size * 0.5),
			drift: Vec3::from_array(config.drift),
		}
	}

	/// Exact signed distance to the sphere surface.
	#[inline]
	pub fn distance(&self, position: Vec3) -> f32 {
		position.distance(self.center) - self.radius
	}

	fn truncated(&self, key: IVec3) -> f32 {
		self
			.distance(center_of_key(key, self.voxel_size))
			.clamp(-self.truncation, self.truncation)
	}

	fn keys(&self) -> impl Iterator<Item = IVec3> {
		let extent = self.extent;
		(0..extent).flat_map(move |x| {
			(0..extent).flat_map(move |y| (0..extent).map(move |z| IVec3::new(x, y, z)))
		})
	}

	/// Write every voxel of the cube. Returns the number of writes.
	pub fn integrate_all(&self, layer: &mut TsdfLayer) -> usize {
		let mut writes = 0;
		for key in self.keys() {
			layer.set_voxel(key, self.truncated(key), 1.0);
			writes += 1;
		}
		writes
	}

	/// Move the sphere by one drift step and rewrite the voxels whose
	/// truncated distance changed. Returns the number of writes.
	pub fn step(&mut self, layer: &mut TsdfLayer) -> usize {
		let before = self.clone();
		self.center += self.drift;

		let mut writes = 0;
		for key in self.keys() {
			let distance = self.truncated(key);
			if distance != before.truncated(key) {
				layer.set_voxel(key, distance, 1.0);
				writes += 1;
			}
		}
		writes
	}
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod scene_test;
