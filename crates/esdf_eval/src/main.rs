//! ESDF scenario runner.
//!
//! Integrates a sphere into a TSDF, builds the ESDF with a batch pass, then
//! drifts the sphere for a number of ticks while the server updates
//! incrementally. Finally the maintained field is evaluated three ways:
//! - against the analytic sphere distance
//! - against occupancy derived fresh from the final TSDF
//! - against an ESDF rebuilt from that occupancy

mod config;
mod scene;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};

use voxel_esdf::{
	occupancy, DistanceReference, EsdfServer, EvaluationReport, OccupancyReference, TickOutcome,
	TsdfLayer,
};

use config::Scenario;
use scene::SphereScene;

/// Drive an ESDF server over a synthetic scene and report its error.
#[derive(Parser, Debug)]
#[command(name = "esdf_eval")]
#[command(about = "Evaluates incremental ESDF maintenance on a drifting sphere")]
struct Args {
	/// Scenario TOML file (built-in defaults when omitted).
	#[arg(short, long)]
	scenario: Option<PathBuf>,

	/// Override the number of ticks.
	#[arg(short, long)]
	ticks: Option<u32>,

	/// Write the per-voxel analytic error as CSV (x,y,z,error).
	#[arg(long)]
	error_csv: Option<PathBuf>,
}

fn main() -> Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let args = Args::parse();

	let mut scenario = match &args.scenario {
		Some(path) => {
			log::info!("Loading scenario from: {}", path.display());
			Scenario::load(path)?
		}
		None => Scenario::default(),
	};
	if let Some(ticks) = args.ticks {
		scenario.run.ticks = ticks;
	}

	let voxel_size = scenario.esdf.voxel_size;
	let mut scene = SphereScene::new(&scenario.scene, voxel_size);

	let mut layer = TsdfLayer::new(voxel_size);
	let writes = scene.integrate_all(&mut layer);
	log::info!(
		"Integrated {} voxels ({} blocks), sphere r={:.2}m",
		writes,
		layer.block_count(),
		scene.radius
	);
	let tsdf = layer.into_shared();

	let server = EsdfServer::new(tsdf.clone(), scenario.esdf.clone())
		.context("Failed to create ESDF server")?;

	let report = server
		.update_batch_default()
		.context("Initial batch pass failed")?;
	log::info!(
		"Batch pass: {} seeds in {:.1}ms",
		report.seeds,
		report.elapsed_us as f64 / 1000.0
	);

	for tick in 1..=scenario.run.ticks {
		let writes = {
			let mut layer = tsdf.write().map_err(|_| anyhow!("TSDF lock poisoned"))?;
			scene.step(&mut layer)
		};

		match server.tick() {
			TickOutcome::Updated(report) => log::info!(
				"Tick {:>3}: {:>5} writes, {:>5} changed, {} calls, {} failed, {:.1}ms",
				tick,
				writes,
				report.changed,
				report.propagation_calls,
				report.failed_groups,
				report.elapsed_us as f64 / 1000.0
			),
			TickOutcome::Skipped => log::debug!("Tick {:>3}: {:>5} writes, skipped", tick, writes),
			TickOutcome::Disabled => log::warn!("Tick {:>3}: incremental updates disabled", tick),
			TickOutcome::Failed(err) => log::warn!("Tick {:>3}: update failed: {}", tick, err),
		}
	}

	// Consume writes left over by skipped ticks
	let flush = server
		.update_incremental()
		.context("Final incremental pass failed")?;
	log::debug!("Flush pass: {} drained", flush.drained);

	let max_distance = server.esdf_max_distance();
	let analytic = {
		let scene = scene.clone();
		DistanceReference::new(move |p| scene.distance(p).clamp(-max_distance, max_distance))
	};
	let analytic_report = server.evaluate(&analytic);

	let fresh_occupancy = {
		let layer = tsdf.read().map_err(|_| anyhow!("TSDF lock poisoned"))?;
		occupancy::derive_layer(&layer, scenario.esdf.observed_weight_threshold)
	};
	let occupancy_reference = OccupancyReference::new(fresh_occupancy);
	let occupancy_report = server.evaluate(&occupancy_reference);
	let rebuilt_report = server
		.evaluate_reconstructed(&occupancy_reference)
		.context("Reference ESDF reconstruction failed")?;

	let metrics = server.metrics();
	println!();
	println!(
		"Passes: {} batch, {} incremental (avg {:.1}us, max {}us)",
		metrics.batch_passes,
		metrics.incremental_passes,
		metrics.incremental_timings.average(),
		metrics.incremental_timings.max().unwrap_or(0)
	);
	println!(
		"Traversable voxels (r={:.2}m): {}",
		server.config().traversability_radius,
		server.traversable_voxels_default().len()
	);
	print_report("analytic sphere", &analytic_report);
	print_report("fresh occupancy", &occupancy_report);
	print_report("rebuilt ESDF", &rebuilt_report);

	if let Some(path) = &args.error_csv {
		write_error_csv(path, &analytic_report)?;
		println!("\nPer-voxel errors written to: {}", path.display());
	}

	Ok(())
}

fn print_report(name: &str, report: &EvaluationReport) {
	println!(
		"  {:<16} compared {:>7}  mean {:.4}  max {:.4}",
		name, report.compared_voxels, report.mean_abs_error, report.max_error
	);
}

fn write_error_csv(path: &Path, report: &EvaluationReport) -> Result<()> {
	let file = std::fs::File::create(path)
		.with_context(|| format!("Failed to create: {}", path.display()))?;
	let mut out = std::io::BufWriter::new(file);

	writeln!(out, "x,y,z,error")?;
	for (key, voxel) in report.per_voxel_error.iter() {
		if voxel.has_data() {
			writeln!(out, "{},{},{},{}", key.x, key.y, key.z, voxel.error)?;
		}
	}
	out
		.flush()
		.with_context(|| format!("Failed to write: {}", path.display()))?;

	Ok(())
}
