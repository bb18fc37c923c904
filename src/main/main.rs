pub(crate) mod clap;

use std::process::ExitCode;

use clap::Command;
use cr_select::scenario::{builtin_scenarios, Scenario};
use cr_select_core::{error, info, Config};

fn main() -> ExitCode {
	let args = clap::parse();

	let raw = match Config::load(args.config.as_deref()) {
		Ok(raw) => raw,
		Err(e) => {
			eprintln!("failed to load configuration: {e}");
			return ExitCode::FAILURE;
		},
	};
	let config = match Config::new(&raw) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("invalid configuration: {e}");
			return ExitCode::FAILURE;
		},
	};
	cr_select_core::log::init(&config.log);

	let scenario = match args.command {
		Command::List => {
			for s in builtin_scenarios() {
				println!("{}\t{}", s.name, s.description);
			}
			return ExitCode::SUCCESS;
		},
		Command::Demo { name } => match builtin_scenarios().into_iter().find(|s| s.name == name) {
			Some(s) => s,
			None => {
				eprintln!("no such built-in scenario: {name}");
				return ExitCode::FAILURE;
			},
		},
		Command::Run { path } => match load_scenario(&path) {
			Ok(s) => s,
			Err(e) => {
				eprintln!("failed to load scenario {}: {e}", path.display());
				return ExitCode::FAILURE;
			},
		},
	};

	info!("running scenario {}", scenario.name);
	match scenario.run_with_config(&config) {
		Ok(allocation) => {
			println!("{}", serde_json::to_string_pretty(&allocation_summary(&allocation)).unwrap_or_default());
			ExitCode::SUCCESS
		},
		Err(e) => {
			error!("scenario {} failed: {e}", scenario.name);
			eprintln!("infeasible: {e}");
			ExitCode::FAILURE
		},
	}
}

fn load_scenario(path: &std::path::Path) -> Result<Scenario, String> {
	let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
	match path.extension().and_then(|e| e.to_str()) {
		Some("json") => serde_json::from_str(&text).map_err(|e| e.to_string()),
		_ => toml::from_str(&text).map_err(|e| e.to_string()),
	}
}

fn allocation_summary(a: &cr_select::AllocatedResources) -> serde_json::Value {
	serde_json::json!({
		"hosts": a.hosts,
		"cpus": a.cpus,
		"ncpus": a.ncpus,
		"memory_allocated": a.memory_allocated,
	})
}
