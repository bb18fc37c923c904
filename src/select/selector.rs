//! Selector (component C7, `select_nodes`). See spec §4.9.
//!
//! Builds the per-node CPU vector via C3 over the candidate set, drives
//! C6 (which drives one of the C5 choosers), then synchronises the
//! surviving core-mask.

use cr_select_core::{error::Error, Result};

use crate::{
	bitmap::{clear_node_cores, ClusterLayout, CoreMask, NodeMask},
	choose::{choose_consec, choose_lln, choose_topo, ChooserKind},
	knapsack::choose_nodes,
	node_filter::can_job_run_on_node,
	types::{CrType, JobDetails, NodeDescriptor, NodeUsage, SwitchRecord},
};

#[allow(clippy::too_many_arguments)]
pub fn select_nodes(
	job: &mut JobDetails,
	node_mask: &mut NodeMask,
	core_mask: &mut CoreMask,
	part_core_map: Option<&CoreMask>,
	layout: &ClusterLayout,
	nodes: &[NodeDescriptor],
	usage: &[NodeUsage],
	cr_type: CrType,
	switches: &[SwitchRecord],
	min_nodes: u32,
	max_nodes: u32,
	req_nodes: u32,
	now_millis: u64,
) -> Result<Vec<u32>> {
	if (node_mask.count_ones() as u32) < min_nodes {
		return Err(Error::Infeasible("candidate mask has fewer than min_nodes nodes"));
	}

	let mut cpus = vec![0_u32; layout.num_nodes()];
	for node_i in node_mask.iter_ones().collect::<Vec<_>>() {
		let c = can_job_run_on_node(
			job,
			core_mask,
			part_core_map,
			layout,
			&nodes[node_i],
			&usage[node_i],
			node_i,
			cr_type,
			false,
			None,
		);
		cpus[node_i] = c;
		if c == 0 {
			node_mask.set(node_i, false);
			if job.req_node_bitmap.as_ref().is_some_and(|r| r[node_i]) {
				return Err(Error::Infeasible("a required node was reduced to zero cpus"));
			}
		}
	}

	let mut min_nodes = min_nodes;
	if let (Some(per_node), Some(total)) = (job.ntasks_per_node, job.num_tasks) {
		if per_node > 0 {
			let raised = total.div_ceil(per_node);
			min_nodes = min_nodes.max(raised);
		}
	}

	let kind = if cr_type.lln && job.req_node_layout.is_empty() {
		ChooserKind::LeastLoaded
	} else if !switches.is_empty() {
		ChooserKind::Topology
	} else {
		ChooserKind::Consecutive
	};

	match kind {
		ChooserKind::Consecutive => {
			choose_nodes(job, node_mask, &mut cpus, |mask, cpu_vec| {
				choose_consec(job, mask, cpu_vec, min_nodes, max_nodes, req_nodes)
			})?;
		},
		ChooserKind::LeastLoaded => {
			choose_nodes(job, node_mask, &mut cpus, |mask, cpu_vec| {
				choose_lln(job, mask, cpu_vec, min_nodes, max_nodes, req_nodes)
			})?;
		},
		ChooserKind::Topology => {
			let mut job_scratch = job.clone();
			choose_nodes(job, node_mask, &mut cpus, |mask, cpu_vec| {
				choose_topo(&mut job_scratch, mask, cpu_vec, switches, min_nodes, max_nodes, req_nodes, now_millis)
			})?;
			job.best_switch = job_scratch.best_switch;
		},
	}

	for node_i in 0..layout.num_nodes() {
		if !node_mask[node_i] {
			clear_node_cores(layout, core_mask, node_i);
		}
	}

	let compact: Vec<u32> = node_mask.iter_ones().map(|i| cpus[i]).collect();

	Ok(compact)
}
