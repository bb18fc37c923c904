//! Per-node feasibility (component C2, `allocate_sc`).
//!
//! Given one node and a core-mask already narrowed to what's currently
//! free, decides how many CPUs and which cores this job may use on that
//! node, honoring socket/core/thread/task constraints in a single
//! deterministic pass. See spec §4.2 for the nine numbered steps this
//! function implements in order.

use crate::{
	bitmap::{clear_node_cores, ClusterLayout, CoreMask},
	types::{JobDetails, NodeDescriptor},
};

/// Step 8's per-socket task cap is compared against `avail_cpus` *after*
/// that pool has already been clipped by `ntasks_per_socket` in step 5/6;
/// on a hyperthreaded socket where `cpus_per_task` doesn't evenly divide
/// `threads_per_core`, the two clips can disagree by one thread and this
/// walk ends up allocating one fewer CPU than `avail_cpus` promised.
/// Per design note, this is reproduced, not corrected — see
/// `tests::step8_rounding_under_allocates_one_thread` in `selector.rs`'s
/// test module.
pub fn allocate_sc(
	job: &JobDetails,
	core_mask: &mut CoreMask,
	part_core_map: Option<&CoreMask>,
	layout: &ClusterLayout,
	node: &NodeDescriptor,
	node_i: usize,
	entire_sockets_only: bool,
	max_cpus_per_node: Option<u32>,
) -> u32 {
	let sockets = node.sockets.max(1) as usize;
	let cores_per_socket = node.cores_per_socket.max(1);
	let threads_per_core = node.threads_per_core.max(1);

	let core_begin = layout.core_begin(node_i);
	let core_end = layout.core_end(node_i);

	let min_cores = job.mc.min_cores_per_socket.unwrap_or(1);
	let min_sockets = job.mc.min_sockets_per_node.unwrap_or(1);
	let mut ntasks_per_core = job.mc.ntasks_per_core.unwrap_or(u32::MAX);
	if let Some(tpc) = job.mc.threads_per_core {
		ntasks_per_core = ntasks_per_core.min(tpc);
	}
	let ntasks_per_socket = job.mc.ntasks_per_socket.unwrap_or(0);
	let cpus_per_task = job.cpus_per_task_effective();

	// Step 1: per-socket free/used/partition-owned tallies.
	let mut free_cores = vec![0_u32; sockets];
	let mut used_cores = vec![0_u32; sockets];
	let mut part_owned = vec![0_u32; sockets];
	for c in core_begin..core_end {
		let i = socket_index(c, core_begin, cores_per_socket);
		if core_mask[c as usize] {
			free_cores[i] = free_cores[i].saturating_add(1);
		} else {
			used_cores[i] = used_cores[i].saturating_add(1);
		}
		if part_core_map.is_some_and(|m| m[c as usize]) {
			part_owned[i] = part_owned[i].saturating_add(1);
		}
	}

	let mut free_core_count: u32 = free_cores.iter().sum();
	let mut free_cpu_count = 0_u32;
	let mut used_cpu_count = 0_u32;
	for i in 0..sockets {
		// Step 2: a socket with any used core is unusable when the job
		// wants whole sockets only.
		if entire_sockets_only && used_cores[i] > 0 {
			free_core_count = free_core_count.saturating_sub(free_cores[i]);
			used_cores[i] = used_cores[i].saturating_add(free_cores[i]);
			free_cores[i] = 0;
		}
		free_cpu_count = free_cpu_count.saturating_add(free_cores[i].saturating_mul(threads_per_core));
		if part_owned[i] > 0 {
			used_cpu_count = used_cores[i].saturating_mul(threads_per_core);
		}
	}

	// Step 3: partition per-node CPU cap.
	if let Some(cap) = max_cpus_per_node {
		let total = free_cpu_count.saturating_add(used_cpu_count);
		if total > cap {
			let mut excess = i64::from(total.saturating_sub(cap));
			for c in core_begin..core_end {
				let i = socket_index(c, core_begin, cores_per_socket);
				if free_cores[i] > 0 {
					free_core_count = free_core_count.saturating_sub(1);
					free_cores[i] = free_cores[i].saturating_sub(1);
					excess -= i64::from(threads_per_core);
					if excess <= 0 {
						break;
					}
				}
			}
		}
	}

	// Step 4: min-cores-per-socket / min-sockets-per-node.
	let mut usable_sockets = 0_u32;
	for free in &mut free_cores {
		if *free < min_cores {
			free_core_count = free_core_count.saturating_sub(*free);
			*free = 0;
			continue;
		}
		usable_sockets = usable_sockets.saturating_add(1);
	}

	let mut num_tasks;
	let mut cpu_count;
	if usable_sockets < min_sockets || free_core_count < 1 {
		num_tasks = 0;
		cpu_count = 0;
	} else {
		// Step 5: task count.
		let threads_eff = threads_per_core.min(ntasks_per_core);
		let mut avail_cpus = 0_u32;
		num_tasks = 0_u32;
		for &free in &free_cores {
			let tmp = free.saturating_mul(threads_eff);
			avail_cpus = avail_cpus.saturating_add(tmp);
			num_tasks = num_tasks.saturating_add(if ntasks_per_socket > 0 {
				tmp.min(ntasks_per_socket)
			} else {
				tmp
			});
		}
		if let Some(npn) = job.ntasks_per_node {
			if job.share_res {
				num_tasks = num_tasks.min(npn);
			}
		}

		// Step 6: CPUs vs. tasks.
		if cpus_per_task < 2 {
			avail_cpus = num_tasks;
		} else {
			num_tasks = num_tasks.min(avail_cpus / cpus_per_task);
			if job.ntasks_per_node.is_some() {
				avail_cpus = num_tasks.saturating_mul(cpus_per_task);
			}
		}

		// Step 7: per-node thresholds.
		let under_tasks =
			job.ntasks_per_node.is_some_and(|npn| num_tasks < npn) && !job.overcommit;
		let under_pn_min = job.pn_min_cpus > 0 && avail_cpus < job.pn_min_cpus;
		if under_tasks || under_pn_min {
			num_tasks = 0;
			cpu_count = 0;
		} else {
			// Step 8: core selection, ascending scan.
			let cps = if ntasks_per_socket >= 1 {
				if cpus_per_task > 1 {
					ntasks_per_socket.saturating_mul(cpus_per_task)
				} else {
					ntasks_per_socket
				}
			} else {
				num_tasks
			};

			let mut si: Option<usize> = None;
			let mut cpu_cnt = 0_u32;
			let mut remaining = avail_cpus;
			cpu_count = 0_u32;
			let mut c = core_begin;
			while c < core_end && remaining > 0 {
				if !core_mask[c as usize] {
					c = c.saturating_add(1);
					continue;
				}
				let i = socket_index(c, core_begin, cores_per_socket);
				if free_cores[i] > 0 {
					if si != Some(i) {
						si = Some(i);
						cpu_cnt = threads_per_core;
					} else if cpu_cnt >= cps {
						core_mask.set(c as usize, false);
						c = c.saturating_add(1);
						continue;
					} else {
						cpu_cnt = cpu_cnt.saturating_add(threads_per_core);
					}
					free_cores[i] = free_cores[i].saturating_sub(1);
					if remaining >= threads_per_core {
						remaining -= threads_per_core;
						cpu_count = cpu_count.saturating_add(threads_per_core);
					} else {
						cpu_count = cpu_count.saturating_add(remaining);
						remaining = 0;
					}
				} else {
					core_mask.set(c as usize, false);
				}
				c = c.saturating_add(1);
			}
			if c < core_end {
				core_mask[c as usize..core_end as usize].fill(false);
			}
		}
	}

	// Step 9.
	if num_tasks == 0 {
		clear_node_cores(layout, core_mask, node_i);
		cpu_count = 0;
	}
	cpu_count
}

fn socket_index(core: u32, core_begin: u32, cores_per_socket: u32) -> usize {
	(core.saturating_sub(core_begin) / cores_per_socket) as usize
}
