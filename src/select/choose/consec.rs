//! Consecutive best-fit chooser (component C5.a). See spec §4.5.
//!
//! Builds runs of consecutive available node indices and repeatedly draws
//! from the best-fitting run (tightest sufficient run, else the largest),
//! then best-fits a single node within that run, applying `cpus_to_use`
//! reservation logic on each pick.

use cr_select_core::{error::Error, Result};

use crate::{bitmap::NodeMask, types::JobDetails};

struct Run {
	start: usize,
	end: usize, // exclusive
}

impl Run {
	fn unused_cpus(&self, cpus: &[u32], used: &NodeMask) -> u32 {
		(self.start..self.end).filter(|&i| !used[i]).map(|i| cpus[i]).sum()
	}

	fn unused_nodes(&self, used: &NodeMask) -> u32 { (self.start..self.end).filter(|&i| !used[i]).count() as u32 }
}

fn build_runs(node_mask: &NodeMask) -> Vec<Run> {
	let mut runs = Vec::new();
	let mut i = 0;
	let n = node_mask.len();
	while i < n {
		if !node_mask[i] {
			i += 1;
			continue;
		}
		let start = i;
		while i < n && node_mask[i] {
			i += 1;
		}
		runs.push(Run { start, end: i });
	}
	runs
}

/// `node_mask` is narrowed in place to the chosen subset. `cpus` holds the
/// per-node available CPU count on input (indexed by global node index,
/// zero for non-candidates) and the per-node CPU-to-use on output for
/// every node left set in `node_mask`.
pub fn choose_consec(
	job: &JobDetails,
	node_mask: &mut NodeMask,
	cpus: &mut [u32],
	min_nodes: u32,
	max_nodes: u32,
	req_nodes: u32,
) -> Result<()> {
	let runs = build_runs(node_mask);

	let req_mask = job.req_node_bitmap.as_ref();
	let mut used = NodeMask::repeat(false, node_mask.len());
	let mut total_cpus: u32 = 0;
	let mut required_count: u32 = 0;

	if let Some(req) = req_mask {
		for i in req.iter_ones() {
			if !node_mask[i] {
				return Err(Error::Infeasible("a required node is not in the candidate set"));
			}
			used.set(i, true);
			total_cpus = total_cpus.saturating_add(cpus[i]);
			required_count += 1;
		}
		if let Some(max_cpus) = job.max_cpus {
			if total_cpus > max_cpus {
				return Err(Error::Overbudget);
			}
		}
		if job.contiguous && required_count > 0 {
			let spanning_runs = runs.iter().filter(|r| req.iter_ones().any(|i| i >= r.start && i < r.end)).count();
			if spanning_runs > 1 {
				return Err(Error::Infeasible("required nodes span multiple runs under a contiguous request"));
			}
		}
	}

	let target_nodes = req_nodes.max(min_nodes);
	let mut rem_nodes: i64 = i64::from(target_nodes) - i64::from(required_count);
	let mut min_rem_nodes: i64 = i64::from(min_nodes) - i64::from(required_count);
	let mut rem_cpus: i64 = i64::from(job.min_cpus) - i64::from(total_cpus);
	let mut total_nodes = required_count;

	while !(rem_cpus <= 0 && min_rem_nodes <= 0) {
		if total_nodes >= max_nodes {
			return Err(Error::Infeasible("exhausted max_nodes before satisfying the job"));
		}

		let available: Vec<&Run> = runs.iter().filter(|r| r.unused_nodes(&used) > 0).collect();
		if available.is_empty() {
			return Err(Error::Infeasible("no consecutive run has an unused node left"));
		}

		let nodes_needed = min_rem_nodes.max(1);
		let sufficient: Vec<&&Run> = available
			.iter()
			.filter(|r| {
				i64::from(r.unused_cpus(cpus, &used)) >= rem_cpus
					&& i64::from(r.unused_nodes(&used)) >= nodes_needed
			})
			.collect();

		let chosen = if let Some(best) = sufficient.iter().min_by_key(|r| r.unused_cpus(cpus, &used)) {
			**best
		} else {
			available
				.iter()
				.max_by_key(|r| r.unused_cpus(cpus, &used))
				.expect("available is non-empty")
		};

		let pick_single = rem_nodes <= 1 && min_rem_nodes <= 1;
		let node_i = if pick_single {
			let sufficient_node = (chosen.start..chosen.end)
				.filter(|&i| !used[i] && i64::from(cpus[i]) >= rem_cpus)
				.min_by_key(|&i| cpus[i]);
			sufficient_node.unwrap_or_else(|| {
				(chosen.start..chosen.end)
					.filter(|&i| !used[i])
					.max_by_key(|&i| cpus[i])
					.expect("chosen run has an unused node")
			})
		} else {
			(chosen.start..chosen.end).find(|&i| !used[i]).expect("chosen run has an unused node")
		};

		let mut node_cpus = cpus[node_i];
		if !job.whole_node {
			let reservation = job.pn_min_cpus.saturating_mul(rem_nodes.max(min_rem_nodes).saturating_sub(1).max(0) as u32);
			let capped = (rem_cpus.max(0) as u32).saturating_sub(reservation).max(job.pn_min_cpus);
			node_cpus = node_cpus.min(capped.max(1));
		}
		if let Some(max_cpus) = job.max_cpus {
			if total_cpus.saturating_add(node_cpus) > max_cpus {
				node_cpus = max_cpus.saturating_sub(total_cpus);
			}
		}
		cpus[node_i] = node_cpus;

		used.set(node_i, true);
		total_cpus = total_cpus.saturating_add(node_cpus);
		total_nodes += 1;
		rem_cpus -= i64::from(node_cpus);
		rem_nodes -= 1;
		min_rem_nodes -= 1;
	}

	if job.contiguous {
		let chosen: Vec<usize> = used.iter_ones().collect();
		if let (Some(&first), Some(&last)) = (chosen.first(), chosen.last()) {
			if last - first + 1 != chosen.len() {
				return Err(Error::Infeasible("selection is not contiguous"));
			}
		}
	}

	*node_mask = used;
	Ok(())
}
