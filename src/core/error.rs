use std::fmt;

/// The selector's error kinds, one per row of the error-handling table.
///
/// The selector never retries I/O and performs none; every variant here is
/// either returned to the caller or, for `Misconfigured exclusion`, merely
/// logged and absorbed (see [`crate::log::warn`] call sites in the planner).
#[derive(thiserror::Error)]
pub enum Error {
	/// Candidate mask, after filtering, has fewer than `min_nodes`; or a
	/// required node failed filtering; or no chooser attempt succeeded.
	#[error("job is infeasible on the candidate node set: {0}")]
	Infeasible(&'static str),

	/// Required nodes span more than one top-level switch.
	#[error("required nodes are not reachable through a single top-level switch")]
	TopologyUnroutable,

	/// Including the required nodes would exceed the job's `max_cpus`.
	#[error("required nodes alone exceed the job's max_cpus budget")]
	Overbudget,

	/// Node count snapshot mismatched the controller view, or a core-bitmap
	/// index went out of range during final assembly.
	#[error("internal consistency error: {0}")]
	Consistency(String),

	/// `req_switch` exceeded without meeting `wait4switch`; caller should
	/// retry later.
	#[error("switch-count gate not satisfied, retry after wait4switch")]
	SwitchWait,

	/// The selector's own configuration failed to load or validate.
	#[error("configuration error: {0}")]
	Config(String),
}

impl fmt::Debug for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{self}") }
}

impl Error {
	/// True for the single soft-error kind the caller is expected to retry
	/// rather than treat as a hard planning failure.
	#[must_use]
	pub const fn is_retryable(&self) -> bool { matches!(self, Self::SwitchWait) }
}
