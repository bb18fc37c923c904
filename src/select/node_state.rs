//! Node-state verifier (component C4).
//!
//! Removes nodes that fail node-level preconditions before any per-node
//! feasibility test runs. See spec §4.4.

use cr_select_core::{error::Error, Result};

use crate::{
	bitmap::{clear_node_cores, ClusterLayout, NodeMask},
	gres::gres_job_test,
	types::{CrType, JobDetails, JobNodeReq, MinMemory, NodeDescriptor, NodeSharePolicy, NodeUsage, Partition},
};

#[allow(clippy::too_many_arguments)]
pub fn verify_node_state(
	job: &JobDetails,
	node_mask: &mut NodeMask,
	core_mask: &mut crate::bitmap::CoreMask,
	layout: &ClusterLayout,
	nodes: &[NodeDescriptor],
	usage: &[NodeUsage],
	cr_type: CrType,
	job_node_req: JobNodeReq,
	partitions: &[Partition],
) -> Result<()> {
	let candidates: Vec<usize> = node_mask.iter_ones().collect();

	for node_i in candidates {
		let drop = node_fails(job, layout, &nodes[node_i], &usage[node_i], cr_type, job_node_req, partitions, node_i);

		if drop {
			node_mask.set(node_i, false);
			clear_node_cores(layout, core_mask, node_i);

			if job.req_node_bitmap.as_ref().is_some_and(|req| req[node_i]) {
				return Err(Error::Infeasible("a required node failed node-state verification"));
			}
		}
	}

	Ok(())
}

#[allow(clippy::too_many_arguments)]
fn node_fails(
	job: &JobDetails,
	layout: &ClusterLayout,
	node: &NodeDescriptor,
	usage: &NodeUsage,
	cr_type: CrType,
	job_node_req: JobNodeReq,
	partitions: &[Partition],
	node_i: usize,
) -> bool {
	if cr_type.memory {
		let min_mem = match job.pn_min_memory {
			MinMemory::PerNode(m) => m,
			MinMemory::PerCpu(per_cpu) => {
				let scale = job
					.ntasks_per_node
					.unwrap_or(0)
					.max(job.pn_min_cpus)
					.max(job.cpus_per_task_effective())
					.max(1);
				per_cpu.saturating_mul(u64::from(scale))
			},
		};
		let avail_mem = node.real_memory.saturating_sub(usage.alloc_memory);
		if avail_mem < min_mem {
			return true;
		}
	}

	if !job.gres_demand.is_empty() {
		let gres_list = usage.gres_list.as_deref().unwrap_or(&node.gres_list);
		if gres_job_test(&job.gres_demand, gres_list) == 0 {
			return true;
		}
	}

	if usage.node_state >= NodeSharePolicy::Reserved {
		return true;
	}

	if usage.node_state >= NodeSharePolicy::OneRow
		&& matches!(job_node_req, JobNodeReq::Reserved | JobNodeReq::Available)
	{
		return true;
	}

	if job_node_req == JobNodeReq::OneRow && node_busy_under_sharing_partition(layout, partitions, node_i) {
		return true;
	}

	false
}

fn node_busy_under_sharing_partition(layout: &ClusterLayout, partitions: &[Partition], node_i: usize) -> bool {
	let range = layout.node_core_range(node_i);
	partitions.iter().filter(|p| p.rows.len() > 1).any(|p| {
		p.rows
			.iter()
			.any(|row| row.row_bitmap[range.start as usize..range.end as usize].any())
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		bitmap::NodeMask,
		types::{NodeStateFlags, PartitionRow},
	};

	fn node() -> NodeDescriptor {
		NodeDescriptor {
			name: "n0".into(),
			sockets: 1,
			cores_per_socket: 2,
			threads_per_core: 1,
			real_memory: 1024,
			gres_list: Vec::new(),
			node_state: NodeStateFlags::default(),
		}
	}

	#[test]
	fn reserved_node_is_dropped() {
		let nodes = vec![node()];
		let usage = vec![NodeUsage { alloc_memory: 0, node_state: NodeSharePolicy::Reserved, gres_list: None }];
		let layout = ClusterLayout::new(&nodes);
		let mut node_mask = layout.new_node_mask();
		node_mask.fill(true);
		let mut core_mask = layout.new_core_mask();
		core_mask.fill(true);
		let job = JobDetails::default();
		verify_node_state(&job, &mut node_mask, &mut core_mask, &layout, &nodes, &usage, CrType::default(), JobNodeReq::Available, &[])
			.unwrap();
		assert!(!node_mask[0]);
		assert_eq!(core_mask.count_ones(), 0);
	}

	#[test]
	fn required_node_failing_verification_is_an_error() {
		let nodes = vec![node()];
		let usage = vec![NodeUsage { alloc_memory: 0, node_state: NodeSharePolicy::Reserved, gres_list: None }];
		let layout = ClusterLayout::new(&nodes);
		let mut node_mask = layout.new_node_mask();
		node_mask.fill(true);
		let mut core_mask = layout.new_core_mask();
		core_mask.fill(true);
		let mut req = NodeMask::repeat(false, 1);
		req.set(0, true);
		let job = JobDetails { req_node_bitmap: Some(req), ..JobDetails::default() };
		let result = verify_node_state(
			&job,
			&mut node_mask,
			&mut core_mask,
			&layout,
			&nodes,
			&usage,
			CrType::default(),
			JobNodeReq::Available,
			&[],
		);
		assert!(result.is_err());
	}

	#[test]
	fn one_row_job_skips_nodes_busy_in_a_sharing_partition() {
		let nodes = vec![node()];
		let usage = vec![NodeUsage { alloc_memory: 0, node_state: NodeSharePolicy::Available, gres_list: None }];
		let layout = ClusterLayout::new(&nodes);
		let mut node_mask = layout.new_node_mask();
		node_mask.fill(true);
		let mut core_mask = layout.new_core_mask();
		core_mask.fill(true);
		let mut row_a = PartitionRow::new(layout.total_cores());
		row_a.row_bitmap.set(0, true);
		let row_b = PartitionRow::new(layout.total_cores());
		let sharing_partition = Partition { priority: 0, rows: vec![row_a, row_b], max_cpus_per_node: None };
		let job = JobDetails::default();
		verify_node_state(
			&job,
			&mut node_mask,
			&mut core_mask,
			&layout,
			&nodes,
			&usage,
			CrType::default(),
			JobNodeReq::OneRow,
			&[sharing_partition],
		)
		.unwrap();
		assert!(!node_mask[0], "node has a busy core under a multi-row partition, unusable for a one-row job");
	}
}
