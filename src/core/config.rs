use std::path::Path;

use figment::{
	providers::{Env, Format, Toml},
	Figment,
};
use serde::{Deserialize, Serialize};

use crate::{error, Result};

/// Selector-wide configuration. Distinct from anything the enclosing daemon
/// loads for itself (partitions, reservations, RPC endpoints, accounting) —
/// those remain out of scope per the spec. This covers only the knobs the
/// selector itself reads on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Whether gang scheduling is enabled cluster-wide. Design note: this
	/// was process-wide mutable state cached on first call in the source
	/// this was distilled from; here it is an explicit field threaded
	/// through the planner instead.
	pub gang_scheduling: bool,

	/// Default consumable-resource type bitfield used when a job does not
	/// specify one. Combination of `cr_core`, `cr_socket`, `cr_memory`,
	/// `cr_lln` as plain booleans rather than a raw bitfield, since this is
	/// the crate's own config surface rather than the wire format.
	pub default_cr_core: bool,
	pub default_cr_socket: bool,
	pub default_cr_memory: bool,
	pub default_cr_lln: bool,

	/// `tracing` `EnvFilter` directive string, e.g. `"info"` or
	/// `"cr_select=debug"`.
	pub log: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			gang_scheduling: false,
			default_cr_core: true,
			default_cr_socket: false,
			default_cr_memory: true,
			default_cr_lln: false,
			log: default_log(),
		}
	}
}

#[must_use]
pub fn default_log() -> String { String::from("info") }

impl Config {
	/// Layers an optional config file (if it exists) under environment
	/// variables prefixed `CRSELECT_`, mirroring the teacher's
	/// file-then-env layering.
	pub fn load(path: Option<&Path>) -> Result<Figment> {
		let mut figment = Figment::new();
		if let Some(path) = path {
			if path.is_file() {
				figment = figment.merge(Toml::file(path));
			}
		}

		Ok(figment.merge(Env::prefixed("CRSELECT_").global().split("__")))
	}

	pub fn new(raw: &Figment) -> Result<Self> {
		raw.extract::<Self>()
			.map_err(|e| error::Error::Config(format!("invalid configuration: {e}")))
	}
}
