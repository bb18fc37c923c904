//! Integration with `clap`

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Commandline arguments
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub(crate) struct Args {
	#[arg(short, long)]
	/// Optional path to a configuration TOML file
	pub(crate) config: Option<PathBuf>,

	#[command(subcommand)]
	pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
	/// List the built-in worked-example scenarios
	List,
	/// Run one of the built-in worked-example scenarios by name
	Demo {
		/// Scenario name, e.g. `s1`
		name: String,
	},
	/// Run a scenario loaded from a TOML or JSON file
	Run {
		/// Path to a scenario file
		path: PathBuf,
	},
}

/// Parse commandline arguments into structured data
#[must_use]
pub(crate) fn parse() -> Args { Args::parse() }
