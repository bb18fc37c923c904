//! Knapsack retry (component C6, `choose_nodes`). See spec §4.8.
//!
//! Wraps whichever C5 chooser the caller selected (bound into `chooser`)
//! with a CPU-count pruning retry: nodes with a vanishing or over-budget
//! contribution are dropped first, then, on failure, increasing
//! CPU-count thresholds are tried until one of them lets the chooser
//! succeed.

use cr_select_core::{error::Error, Result};

use crate::{bitmap::NodeMask, types::JobDetails};

fn is_required(job: &JobDetails, node: usize) -> bool { job.req_node_bitmap.as_ref().is_some_and(|r| r[node]) }

/// Drops every candidate whose cpu count matches the drop predicate,
/// returning an error if a required node would be dropped.
fn prune(job: &JobDetails, mask: &mut NodeMask, cpus: &[u32], mut should_drop: impl FnMut(u32) -> bool) -> Result<()> {
	for i in mask.iter_ones().collect::<Vec<_>>() {
		if should_drop(cpus[i]) {
			if is_required(job, i) {
				return Err(Error::Infeasible("knapsack pruning would drop a required node"));
			}
			mask.set(i, false);
		}
	}
	Ok(())
}

/// `chooser` runs one of the three C5 strategies over the candidate mask
/// and cpu vector handed to it, narrowing both in place on success.
pub fn choose_nodes(
	job: &JobDetails,
	node_mask: &mut NodeMask,
	cpus: &mut [u32],
	mut chooser: impl FnMut(&mut NodeMask, &mut [u32]) -> Result<()>,
) -> Result<()> {
	let mut filtered = node_mask.clone();
	let base_cpus = cpus.to_vec();

	prune(job, &mut filtered, &base_cpus, |c| {
		c == 0 || (job.whole_node && job.max_cpus.is_some_and(|m| c > m))
	})?;

	let mut attempt_mask = filtered.clone();
	let mut attempt_cpus = base_cpus.clone();
	if chooser(&mut attempt_mask, &mut attempt_cpus).is_ok() {
		*node_mask = attempt_mask;
		cpus.copy_from_slice(&attempt_cpus);
		return Ok(());
	}

	let max_cpu = base_cpus.iter().copied().max().unwrap_or(0);
	for threshold in 1..=max_cpu {
		let mut mask = filtered.clone();
		let mut cpu_vec = base_cpus.clone();
		if prune(job, &mut mask, &base_cpus, |c| c > 0 && c <= threshold).is_err() {
			continue;
		}
		if chooser(&mut mask, &mut cpu_vec).is_ok() {
			*node_mask = mask;
			cpus.copy_from_slice(&cpu_vec);
			return Ok(());
		}
	}

	Err(Error::Infeasible("no knapsack threshold produced a feasible allocation"))
}
