use super::*;

fn scene() -> SphereScene {
	let config = SceneConfig {
		extent: 20,
		sphere_radius: 0.5,
		truncation: 0.2,
		drift: [0.1, 0.0, 0.0],
	};
	SphereScene::new(&config, 0.1)
}

#[test]
fn test_sphere_is_centred() {
	let scene = scene();
	assert!((scene.center - Vec3::splat(1.0)).length() < 1e-6);
	assert!((scene.distance(Vec3::new(1.5, 1.0, 1.0))).abs() < 1e-6);
	assert!(scene.distance(scene.center) < 0.0);
}

#[test]
fn test_integrate_all_writes_truncated_cube() {
	let scene = scene();
	let mut layer = TsdfLayer::new(0.1);
	assert_eq!(scene.integrate_all(&mut layer), 20 * 20 * 20);

	let inside = layer.voxel(IVec3::splat(10)).unwrap();
	assert_eq!(inside.distance, -0.2);
	let outside = layer.voxel(IVec3::ZERO).unwrap();
	assert_eq!(outside.distance, 0.2);
}

#[test]
fn test_step_only_rewrites_the_band() {
	let mut scene = scene();
	let mut layer = TsdfLayer::new(0.1);
	scene.integrate_all(&mut layer);
	voxel_esdf::update_status::clear_all(&layer);

	let writes = scene.step(&mut layer);
	assert!(writes > 0);
	assert!(writes < 20 * 20 * 20 / 2);
	assert!((scene.center - Vec3::new(1.1, 1.0, 1.0)).length() < 1e-6);

	// Far corner is outside the band both before and after
	let touched = voxel_esdf::update_status::drain_touched(&layer);
	assert_eq!(touched.len(), writes);
	assert!(!touched.contains(&IVec3::ZERO));
}
