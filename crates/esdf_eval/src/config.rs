//! Scenario file parsing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use voxel_esdf::EsdfConfig;

/// Root scenario description. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
	/// Server configuration, same keys as a standalone ESDF config file.
	pub esdf: EsdfConfig,
	pub scene: SceneConfig,
	pub run: RunConfig,
}

/// Synthetic world: one sphere in a cube of observed space.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
	/// Cube edge length in voxels.
	pub extent: i32,
	/// Sphere radius in metres.
	pub sphere_radius: f32,
	/// TSDF truncation distance in metres.
	pub truncation: f32,
	/// Sphere displacement per tick in metres.
	pub drift: [f32; 3],
}

impl Default for SceneConfig {
	fn default() -> Self {
		Self {
			extent: 40,
			sphere_radius: 1.0,
			truncation: 0.3,
			drift: [0.02, 0.0, 0.01],
		}
	}
}

/// How long to drive the server.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
	/// Number of `tick()` calls after the initial batch pass.
	pub ticks: u32,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self { ticks: 12 }
	}
}

impl Scenario {
	/// Load a scenario from a TOML file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
		Self::from_toml_str(&content)
	}

	pub fn from_toml_str(content: &str) -> Result<Self> {
		let scenario: Scenario =
			toml::from_str(content).with_context(|| "Failed to parse scenario TOML")?;
		scenario.validate()?;
		Ok(scenario)
	}

	pub fn validate(&self) -> Result<()> {
		self.esdf.validate().context("Invalid [esdf] section")?;

		if self.scene.extent <= 0 {
			anyhow::bail!("scene.extent must be positive, got {}", self.scene.extent);
		}
		if !(self.scene.sphere_radius > 0.0) {
			anyhow::bail!(
				"scene.sphere_radius must be positive, got {}",
				self.scene.sphere_radius
			);
		}
		if !(self.scene.truncation > 0.0) {
			anyhow::bail!(
				"scene.truncation must be positive, got {}",
				self.scene.truncation
			);
		}

		Ok(())
	}
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
