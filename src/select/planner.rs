//! Four-phase planner (component C8, `cr_job_test`). See spec §4.10.
//!
//! Top-level entry point. Layers the job against existing allocations
//! under partition priority and sharing policy before committing to a
//! final allocation.

use cr_select_core::{debug, error::Error, warn, Result};

use crate::{
	bitmap::{build_avail_cores, ClusterLayout, CoreMask, NodeMask},
	dist::{build_job_resources, build_job_resources_cpu_array, cr_dist, cr_sort_part_rows},
	node_state::verify_node_state,
	selector::select_nodes,
	types::{
		AllocatedResources, CrType, JobDetails, JobNodeReq, MinMemory, Mode, NodeDescriptor, NodeUsage, Partition,
		SwitchRecord,
	},
};

struct Attempt {
	mask: NodeMask,
	cores: CoreMask,
	cpus: Vec<u32>,
}

#[allow(clippy::too_many_arguments)]
fn try_phase(
	job: &mut JobDetails,
	base_mask: &NodeMask,
	free_cores: CoreMask,
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
) -> Result<Attempt> {
	let mut mask = base_mask.clone();
	let mut cores = free_cores;
	let cpus = select_nodes(
		job, &mut mask, &mut cores, part_core_map, layout, nodes, usage, cr_type, switches, min_nodes, max_nodes, req_nodes,
		now_millis,
	)?;
	Ok(Attempt { mask, cores, cpus })
}

fn subtract_rows(free_cores: &mut CoreMask, partitions: &[Partition], mut include: impl FnMut(&Partition) -> bool) {
	for p in partitions.iter().filter(|p| include(p)) {
		for row in &p.rows {
			*free_cores &= !row.row_bitmap.clone();
		}
	}
}

/// Top-level entry point. `node_mask` is the caller's candidate set and is
/// read-only here; the planner works from its own clone throughout.
#[allow(clippy::too_many_arguments)]
pub fn cr_job_test(
	job: &mut JobDetails,
	node_mask: &NodeMask,
	min_nodes: u32,
	max_nodes: u32,
	req_nodes: u32,
	mode: Mode,
	cr_type: CrType,
	job_node_req: JobNodeReq,
	nodes: &[NodeDescriptor],
	usage: &[NodeUsage],
	partitions: &mut [Partition],
	switches: &[SwitchRecord],
	exclusion_core_mask: Option<&CoreMask>,
	gang_scheduling: bool,
	now_millis: u64,
) -> Result<AllocatedResources> {
	let layout = ClusterLayout::new(nodes);
	let mut base_mask = node_mask.clone();
	let mut avail_cores = build_avail_cores(&layout, &mut base_mask, job.core_spec);

	// Gate starts open; only the topology chooser (§4.7) may close it, on a
	// request that spans more switches than `req_switch` allows.
	job.best_switch = true;

	verify_node_state(job, &mut base_mask, &mut avail_cores, &layout, nodes, usage, cr_type, job_node_req, partitions)?;

	// Test 0: bare feasibility, no partition occupancy subtracted.
	let attempt0 = try_phase(
		job,
		&base_mask,
		avail_cores.clone(),
		None,
		&layout,
		nodes,
		usage,
		cr_type,
		switches,
		min_nodes,
		max_nodes,
		req_nodes,
		now_millis,
	)?;

	if mode == Mode::TestOnly {
		return Ok(finalize(job, nodes, attempt0));
	}
	if !job.best_switch {
		return Err(Error::SwitchWait);
	}

	// Test 1: idle search against every partition's current occupancy.
	let mut free_cores_1 = avail_cores.clone();
	if let Some(exclusion) = exclusion_core_mask {
		if exclusion.len() == free_cores_1.len() {
			free_cores_1 &= !exclusion.clone();
		} else {
			warn!("exclusion core-mask size mismatch, ignoring exclusion for job {}", job.job_id);
		}
	}
	subtract_rows(&mut free_cores_1, partitions, |_| true);
	let mut part_core_map = avail_cores.clone();
	part_core_map.fill(false);
	for row in &partitions[job.own_partition].rows {
		part_core_map |= row.row_bitmap.clone();
	}

	let attempt1 = try_phase(
		job,
		&base_mask,
		free_cores_1,
		Some(&part_core_map),
		&layout,
		nodes,
		usage,
		cr_type,
		switches,
		min_nodes,
		max_nodes,
		req_nodes,
		now_millis,
	);

	let winning = match attempt1 {
		Ok(attempt) => attempt,
		Err(e) => {
			let one_row_exclusive = job_node_req == JobNodeReq::OneRow;
			if !gang_scheduling && one_row_exclusive {
				return Err(e);
			}
			run_layered_phases(
				job,
				&base_mask,
				&avail_cores,
				partitions,
				job_node_req,
				&layout,
				nodes,
				usage,
				cr_type,
				switches,
				min_nodes,
				max_nodes,
				req_nodes,
				now_millis,
			)?
		},
	};

	Ok(finalize(job, nodes, winning))
}

#[allow(clippy::too_many_arguments)]
fn run_layered_phases(
	job: &mut JobDetails,
	base_mask: &NodeMask,
	avail_cores: &CoreMask,
	partitions: &mut [Partition],
	job_node_req: JobNodeReq,
	layout: &ClusterLayout,
	nodes: &[NodeDescriptor],
	usage: &[NodeUsage],
	cr_type: CrType,
	switches: &[SwitchRecord],
	min_nodes: u32,
	max_nodes: u32,
	req_nodes: u32,
	now_millis: u64,
) -> Result<Attempt> {
	// Test 2: strictly-higher-priority partitions only — an optimistic
	// best-case test. Failure here means the job can never run against
	// this cluster state regardless of same/lower-priority occupancy, so
	// it goes straight to allocation-failure rather than trying Test 3/4.
	let mut free_cores_2 = avail_cores.clone();
	let own_priority = partitions[job.own_partition].priority;
	subtract_rows(&mut free_cores_2, partitions, |p| p.priority > own_priority);
	try_phase(
		job, base_mask, free_cores_2, None, layout, nodes, usage, cr_type, switches, min_nodes, max_nodes, req_nodes, now_millis,
	)?;

	// Test 3: equal-priority partitions also excluded.
	let mut free_cores_3 = avail_cores.clone();
	subtract_rows(&mut free_cores_3, partitions, |p| p.priority >= own_priority);
	if let Ok(attempt) = try_phase(
		job, base_mask, free_cores_3, None, layout, nodes, usage, cr_type, switches, min_nodes, max_nodes, req_nodes, now_millis,
	) {
		return Ok(attempt);
	}

	// Test 4: row-fitting within the job's own partition, densest row
	// first.
	cr_sort_part_rows(&mut partitions[job.own_partition]);
	let num_rows = partitions[job.own_partition].num_rows();
	let upper = if job_node_req == JobNodeReq::Available { num_rows } else { 1 };

	for i in 0..upper {
		let mut free_cores_i = avail_cores.clone();
		if let Some(row) = partitions[job.own_partition].rows.get(i) {
			free_cores_i &= !row.row_bitmap.clone();
		}
		if let Ok(attempt) = try_phase(
			job, base_mask, free_cores_i, None, layout, nodes, usage, cr_type, switches, min_nodes, max_nodes, req_nodes,
			now_millis,
		) {
			return Ok(attempt);
		}
	}

	if upper == 1 && partitions[job.own_partition].rows.iter().any(|r| r.popcount() == 0) {
		let free_cores_empty = avail_cores.clone();
		if let Ok(attempt) = try_phase(
			job, base_mask, free_cores_empty, None, layout, nodes, usage, cr_type, switches, min_nodes, max_nodes, req_nodes,
			now_millis,
		) {
			return Ok(attempt);
		}
	}

	Err(Error::Infeasible("no phase admitted the job against current partition occupancy"))
}

fn finalize(job: &JobDetails, nodes: &[NodeDescriptor], attempt: Attempt) -> AllocatedResources {
	let Attempt { mask, cores, mut cpus } = attempt;

	for (pos, node_idx) in mask.iter_ones().enumerate() {
		if let Some(&cap) = job.req_node_layout.get(&node_idx) {
			cpus[pos] = cpus[pos].min(cap);
		}
	}

	let nhosts = mask.count_ones() as u32;
	let mut ncpus = nhosts.saturating_mul(job.ntasks_per_node.unwrap_or(1).max(1));
	ncpus = ncpus.max(job.min_cpus).max(job.pn_min_cpus);

	let total_cpus: u32 = cpus.iter().sum();
	if job.overcommit {
		if let Some(tasks) = job.num_tasks {
			ncpus = total_cpus.min(tasks);
		}
	}

	let tasks = cr_dist(job, job.cr_type, &cpus);
	debug!("task distribution for job {}: {:?}", job.job_id, tasks);

	let memory_allocated: Vec<u64> = cpus
		.iter()
		.map(|&c| match job.pn_min_memory {
			MinMemory::PerCpu(per_cpu) => per_cpu.saturating_mul(u64::from(c)),
			MinMemory::PerNode(per_node) => per_node,
		})
		.collect();

	let hosts = build_job_resources_cpu_array(nodes, &mask);
	build_job_resources(mask, cores, cpus, memory_allocated, ncpus, hosts)
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;
	use crate::{
		bitmap::NodeMask,
		types::{McData, MinMemory, NodeSharePolicy, NodeStateFlags, NodeUsage, PartitionRow},
	};

	fn four_idle_nodes() -> (Vec<NodeDescriptor>, Vec<NodeUsage>) {
		let nodes = (0..4)
			.map(|i| NodeDescriptor {
				name: format!("n{i}"),
				sockets: 1,
				cores_per_socket: 2,
				threads_per_core: 1,
				real_memory: 4096,
				gres_list: Vec::new(),
				node_state: NodeStateFlags::default(),
			})
			.collect();
		let usage = (0..4).map(|_| NodeUsage { alloc_memory: 0, node_state: NodeSharePolicy::Available, gres_list: None }).collect();
		(nodes, usage)
	}

	fn base_job(min_cpus: u32) -> JobDetails {
		JobDetails {
			min_cpus,
			pn_min_cpus: 1,
			pn_min_memory: MinMemory::PerNode(0),
			cpus_per_task: 1,
			mc: McData::default(),
			cr_type: CrType { cpu: true, ..CrType::default() },
			gres_demand: BTreeMap::new(),
			own_partition: 0,
			..JobDetails::default()
		}
	}

	fn empty_partition(layout: &ClusterLayout) -> Vec<Partition> {
		vec![Partition { priority: 0, rows: vec![PartitionRow::new(layout.total_cores())], max_cpus_per_node: None }]
	}

	#[test]
	fn selected_mask_is_a_subset_of_the_candidate_mask() {
		let (nodes, usage) = four_idle_nodes();
		let layout = ClusterLayout::new(&nodes);
		let mut candidates = layout.new_node_mask();
		candidates.set(0, true);
		candidates.set(2, true);
		let mut partitions = empty_partition(&layout);
		let mut job = base_job(2);
		let result = cr_job_test(
			&mut job, &candidates, 1, 2, 1, Mode::RunNow, job.cr_type, JobNodeReq::Available, &nodes, &usage, &mut partitions, &[],
			None, false, 0,
		)
		.unwrap();
		assert!(result.node_bitmap.iter_ones().all(|i| candidates[i]), "selection must stay within the candidate set");
	}

	#[test]
	fn a_required_node_survives_into_the_final_allocation() {
		let (nodes, usage) = four_idle_nodes();
		let layout = ClusterLayout::new(&nodes);
		let mut candidates = layout.new_node_mask();
		candidates.fill(true);
		let mut req = NodeMask::repeat(false, 4);
		req.set(3, true);
		let mut partitions = empty_partition(&layout);
		let mut job = JobDetails { req_node_bitmap: Some(req), ..base_job(2) };
		let result = cr_job_test(
			&mut job, &candidates, 1, 4, 1, Mode::RunNow, job.cr_type, JobNodeReq::Available, &nodes, &usage, &mut partitions, &[],
			None, false, 0,
		)
		.unwrap();
		assert!(result.node_bitmap[3], "a required node must always be part of the final allocation");
	}

	#[test]
	fn allocated_cores_never_exceed_the_nodes_free_cores() {
		let (nodes, usage) = four_idle_nodes();
		let layout = ClusterLayout::new(&nodes);
		let mut candidates = layout.new_node_mask();
		candidates.fill(true);
		let mut row = PartitionRow::new(layout.total_cores());
		row.row_bitmap.set(0, true); // busy the first core of node 0
		let mut partitions = vec![Partition { priority: 0, rows: vec![row], max_cpus_per_node: None }];
		let mut job = base_job(4);
		let result = cr_job_test(
			&mut job, &candidates, 1, 4, 1, Mode::RunNow, job.cr_type, JobNodeReq::Available, &nodes, &usage, &mut partitions, &[],
			None, false, 0,
		)
		.unwrap();
		assert_eq!(result.core_bitmap.count_ones() as u32, result.cpus.iter().sum::<u32>());
		assert!(!result.core_bitmap[0], "the already-busy core must never be re-allocated");
	}

	#[test]
	fn node_count_respects_min_and_max_bounds() {
		let (nodes, usage) = four_idle_nodes();
		let layout = ClusterLayout::new(&nodes);
		let mut candidates = layout.new_node_mask();
		candidates.fill(true);
		let mut partitions = empty_partition(&layout);
		let mut job = base_job(2);
		let result = cr_job_test(
			&mut job, &candidates, 2, 3, 2, Mode::RunNow, job.cr_type, JobNodeReq::Available, &nodes, &usage, &mut partitions, &[],
			None, false, 0,
		)
		.unwrap();
		let nhosts = result.nhosts() as u32;
		assert!((2..=3).contains(&nhosts), "selected node count {nhosts} must lie within [min_nodes, max_nodes]");
	}

	#[test]
	fn a_contiguous_job_is_granted_a_single_consecutive_run() {
		let (nodes, usage) = four_idle_nodes();
		let layout = ClusterLayout::new(&nodes);
		let mut candidates = layout.new_node_mask();
		candidates.fill(true);
		let mut partitions = empty_partition(&layout);
		let mut job = JobDetails { contiguous: true, ..base_job(2) };
		let result = cr_job_test(
			&mut job, &candidates, 2, 2, 2, Mode::RunNow, job.cr_type, JobNodeReq::Available, &nodes, &usage, &mut partitions, &[],
			None, false, 0,
		)
		.unwrap();
		let chosen: Vec<usize> = result.node_bitmap.iter_ones().collect();
		assert_eq!(chosen.len(), 2);
		assert_eq!(chosen[1] - chosen[0], 1, "a contiguous request must land on adjacent node indices");
	}

	#[test]
	fn test_only_runs_are_idempotent() {
		let (nodes, usage) = four_idle_nodes();
		let layout = ClusterLayout::new(&nodes);
		let mut candidates = layout.new_node_mask();
		candidates.fill(true);

		let mut partitions_a = empty_partition(&layout);
		let mut job_a = base_job(2);
		let result_a = cr_job_test(
			&mut job_a, &candidates, 1, 4, 1, Mode::TestOnly, job_a.cr_type, JobNodeReq::Available, &nodes, &usage, &mut partitions_a,
			&[], None, false, 0,
		)
		.unwrap();

		let mut partitions_b = empty_partition(&layout);
		let mut job_b = base_job(2);
		let result_b = cr_job_test(
			&mut job_b, &candidates, 1, 4, 1, Mode::TestOnly, job_b.cr_type, JobNodeReq::Available, &nodes, &usage, &mut partitions_b,
			&[], None, false, 0,
		)
		.unwrap();

		assert_eq!(result_a.hosts, result_b.hosts);
		assert_eq!(result_a.cpus, result_b.cpus);
	}

	#[test]
	fn more_available_capacity_never_turns_a_feasible_job_infeasible() {
		// Knapsack monotonicity: the same job against a strictly less
		// occupied cluster must stay feasible.
		let (nodes, usage) = four_idle_nodes();
		let layout = ClusterLayout::new(&nodes);
		let mut candidates = layout.new_node_mask();
		candidates.fill(true);

		let mut busy_row = PartitionRow::new(layout.total_cores());
		busy_row.row_bitmap.set(0, true);
		let mut busier_partitions = vec![Partition { priority: 0, rows: vec![busy_row], max_cpus_per_node: None }];
		let mut job_busy = base_job(7);
		let busy_result = cr_job_test(
			&mut job_busy, &candidates, 1, 4, 1, Mode::RunNow, job_busy.cr_type, JobNodeReq::Available, &nodes, &usage,
			&mut busier_partitions, &[], None, false, 0,
		);
		assert!(busy_result.is_ok(), "7 of 8 cores free must still satisfy a 7-cpu request");

		let mut idle_partitions = empty_partition(&layout);
		let mut job_idle = base_job(7);
		let idle_result = cr_job_test(
			&mut job_idle, &candidates, 1, 4, 1, Mode::RunNow, job_idle.cr_type, JobNodeReq::Available, &nodes, &usage,
			&mut idle_partitions, &[], None, false, 0,
		);
		assert!(idle_result.is_ok(), "freeing the busy core must not make the same request infeasible");
	}
}
