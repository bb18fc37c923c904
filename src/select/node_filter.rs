//! Node filter (component C3, `can_job_run_on_node`).
//!
//! Wraps `allocate_sc` (C2); folds in memory accounting and generic-
//! resource filtering; returns the per-node CPU count. See spec §4.3.

use crate::{
	allocate_sc::allocate_sc,
	bitmap::{clear_node_cores, ClusterLayout, CoreMask},
	gres::{gres_job_core_filter, gres_job_test},
	types::{CrType, JobDetails, MinMemory, NodeDescriptor, NodeUsage},
};

#[allow(clippy::too_many_arguments)]
pub fn can_job_run_on_node(
	job: &JobDetails,
	core_mask: &mut CoreMask,
	part_core_map: Option<&CoreMask>,
	layout: &ClusterLayout,
	node: &NodeDescriptor,
	node_usage: &NodeUsage,
	node_i: usize,
	cr_type: CrType,
	test_only: bool,
	max_cpus_per_node: Option<u32>,
) -> u32 {
	if !test_only && node.node_state.completing {
		clear_node_cores(layout, core_mask, node_i);
		return 0;
	}

	let core_begin = layout.core_begin(node_i);
	let core_end = layout.core_end(node_i);
	let gres_list = node_usage.gres_list.as_deref().unwrap_or(&node.gres_list);

	gres_job_core_filter(&job.gres_demand, gres_list, core_mask, core_begin, core_end);

	let (mut cpus, cpu_alloc_size) = if cr_type.core {
		let cpus = allocate_sc(job, core_mask, part_core_map, layout, node, node_i, false, max_cpus_per_node);
		(cpus, node.threads_per_core.max(1))
	} else if cr_type.socket {
		let cpus = allocate_sc(job, core_mask, part_core_map, layout, node, node_i, true, max_cpus_per_node);
		(cpus, node.cores_per_socket.max(1).saturating_mul(node.threads_per_core.max(1)))
	} else {
		let cpus = allocate_sc(job, core_mask, part_core_map, layout, node, node_i, false, max_cpus_per_node);
		(cpus, 1)
	};

	if cr_type.memory && cpus > 0 {
		let avail_mem = node.real_memory.saturating_sub(node_usage.alloc_memory);
		match job.pn_min_memory {
			MinMemory::PerCpu(per_cpu) => {
				while cpus > 0 && per_cpu.saturating_mul(u64::from(cpus)) > avail_mem {
					cpus = cpus.saturating_sub(cpu_alloc_size);
				}
				let below = job.ntasks_per_node.is_some_and(|n| cpus < n) || cpus < job.cpus_per_task_effective();
				if below {
					cpus = 0;
				}
			},
			MinMemory::PerNode(per_node) => {
				if per_node > avail_mem {
					cpus = 0;
				}
			},
		}
	}

	if !job.gres_demand.is_empty() && cpus > 0 {
		let gres_cpus = gres_job_test(&job.gres_demand, gres_list);
		if gres_cpus != u32::MAX {
			let below = job.ntasks_per_node.is_some_and(|n| gres_cpus < n) || gres_cpus < job.cpus_per_task_effective();
			if below {
				cpus = 0;
			} else {
				while gres_cpus < cpus && cpus > 0 {
					cpus = cpus.saturating_sub(cpu_alloc_size);
				}
			}
		}
	}

	if cpus == 0 {
		clear_node_cores(layout, core_mask, node_i);
	}

	cpus
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{bitmap::ClusterLayout, types::NodeSharePolicy, types::NodeStateFlags};

	fn node() -> NodeDescriptor {
		NodeDescriptor {
			name: "n0".into(),
			sockets: 1,
			cores_per_socket: 4,
			threads_per_core: 1,
			real_memory: 4096,
			gres_list: Vec::new(),
			node_state: NodeStateFlags::default(),
		}
	}

	#[test]
	fn completing_node_refused_outside_test_only() {
		let mut n = node();
		n.node_state.completing = true;
		let layout = ClusterLayout::new(std::slice::from_ref(&n));
		let mut cores = layout.new_core_mask();
		cores.fill(true);
		let usage = NodeUsage { alloc_memory: 0, node_state: NodeSharePolicy::Available, gres_list: None };
		let job = JobDetails { cpus_per_task: 1, pn_min_cpus: 1, ..JobDetails::default() };
		let cpus = can_job_run_on_node(&job, &mut cores, None, &layout, &n, &usage, 0, CrType::default(), false, None);
		assert_eq!(cpus, 0);
		assert_eq!(cores.count_ones(), 0);
	}

	#[test]
	fn memory_shortfall_zeroes_cpus() {
		let mut n = node();
		n.real_memory = 100;
		let layout = ClusterLayout::new(std::slice::from_ref(&n));
		let mut cores = layout.new_core_mask();
		cores.fill(true);
		let usage = NodeUsage { alloc_memory: 90, node_state: NodeSharePolicy::Available, gres_list: None };
		let job = JobDetails {
			cpus_per_task: 1,
			pn_min_cpus: 1,
			pn_min_memory: MinMemory::PerNode(50),
			cr_type: CrType { memory: true, ..CrType::default() },
			..JobDetails::default()
		};
		let cpus = can_job_run_on_node(
			&job,
			&mut cores,
			None,
			&layout,
			&n,
			&usage,
			0,
			CrType { memory: true, ..CrType::default() },
			false,
			None,
		);
		assert_eq!(cpus, 0, "only 10 bytes free against a 50-byte per-node requirement");
	}

	#[test]
	fn plain_cpu_job_gets_all_free_cores() {
		let n = node();
		let layout = ClusterLayout::new(std::slice::from_ref(&n));
		let mut cores = layout.new_core_mask();
		cores.fill(true);
		let usage = NodeUsage { alloc_memory: 0, node_state: NodeSharePolicy::Available, gres_list: None };
		let job = JobDetails { cpus_per_task: 1, pn_min_cpus: 1, ..JobDetails::default() };
		let cpus = can_job_run_on_node(&job, &mut cores, None, &layout, &n, &usage, 0, CrType::default(), false, None);
		assert_eq!(cpus, 4);
	}
}
