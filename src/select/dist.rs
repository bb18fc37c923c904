//! Task distribution and allocation lifecycle collaborators (§6's
//! `cr_dist`, `build_job_resources`, `build_job_resources_cpu_array`,
//! `free_job_resources`, `cr_sort_part_rows`).
//!
//! These sit just past the selector's boundary: the planner (C8) calls
//! them to turn a selected node/core set into the `AllocatedResources`
//! a job actually runs against.

use crate::types::{AllocatedResources, CrType, JobDetails, NodeDescriptor, Partition};

/// Densest-first row ordering, used before C8's Test 4 so the fullest
/// rows are tried last and the emptiest row is found quickly when every
/// row fails.
pub fn cr_sort_part_rows(partition: &mut Partition) {
	partition.rows.sort_by_key(|row| std::cmp::Reverse(row.popcount()));
}

/// Block-distributes `num_tasks` (falling back to one task per selected
/// CPU when unset) across the selected nodes in proportion to each
/// node's allocated CPU count, respecting `cpus_per_task`. Returns the
/// per-node task count in node-bitmap order.
#[must_use]
pub fn cr_dist(job: &JobDetails, _cr_type: CrType, cpus: &[u32]) -> Vec<u32> {
	let cpus_per_task = job.cpus_per_task_effective();
	let mut tasks: Vec<u32> = cpus.iter().map(|&c| c / cpus_per_task).collect();

	if let Some(total) = job.num_tasks {
		let mut assigned: u32 = tasks.iter().sum();
		// Cyclic top-up / trim so the per-node tasks sum to exactly
		// `total`, never exceeding a node's own cpu-derived capacity.
		let mut i = 0;
		while assigned < total && !tasks.is_empty() {
			let idx = i % tasks.len();
			if tasks[idx] < cpus[idx] / cpus_per_task.max(1) {
				tasks[idx] += 1;
				assigned += 1;
			}
			i += 1;
			if i > tasks.len() * (total as usize + 1) {
				break;
			}
		}
		while assigned > total {
			if let Some((idx, _)) = tasks.iter().enumerate().filter(|(_, &t)| t > 0).max_by_key(|&(_, &t)| t) {
				tasks[idx] -= 1;
				assigned -= 1;
			} else {
				break;
			}
		}
	}

	tasks
}

/// Builds the final `AllocatedResources` from the selector's surviving
/// bitmaps and per-node cpu vector.
#[must_use]
pub fn build_job_resources(
	node_bitmap: crate::bitmap::NodeMask,
	core_bitmap: crate::bitmap::CoreMask,
	cpus: Vec<u32>,
	memory_allocated: Vec<u64>,
	ncpus: u32,
	hosts: Vec<String>,
) -> AllocatedResources {
	AllocatedResources { node_bitmap, core_bitmap, cpus, memory_allocated, ncpus, hosts }
}

/// Expands a job's selected-node indices into a dense host-name list in
/// node-bitmap order.
#[must_use]
pub fn build_job_resources_cpu_array(nodes: &[NodeDescriptor], node_bitmap: &crate::bitmap::NodeMask) -> Vec<String> {
	node_bitmap.iter_ones().map(|i| nodes[i].name.clone()).collect()
}

/// No-op: ownership of `AllocatedResources` is released by normal `Drop`
/// when the job record goes out of scope. Kept as a named call site so
/// the planner's lifecycle reads the same as the system it was
/// distilled from.
pub fn free_job_resources(_resources: AllocatedResources) {}
