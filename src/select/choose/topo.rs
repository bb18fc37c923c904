//! Topology-aware chooser (component C5.c). See spec §4.7.
//!
//! Picks a best-fit root switch, restricts the search to the leaves under
//! it, then best-fits individual nodes leaf by leaf.

use cr_select_core::{error::Error, Result};

use crate::{
	bitmap::NodeMask,
	types::{JobDetails, SwitchRecord},
};

struct SwitchView<'a> {
	record: &'a SwitchRecord,
	/// Candidate nodes reachable through this switch, already intersected
	/// with the node-mask handed to the chooser.
	nodes: NodeMask,
	required: bool,
	required_cpus: u32,
}

impl SwitchView<'_> {
	fn unused_nodes(&self, used: &NodeMask) -> u32 { self.nodes.iter_ones().filter(|&i| !used[i]).count() as u32 }

	fn unused_cpus(&self, cpus: &[u32], used: &NodeMask) -> u32 {
		self.nodes.iter_ones().filter(|&i| !used[i]).map(|i| cpus[i]).sum()
	}

	/// True if `other` lies entirely within this switch's reachable nodes.
	fn contains(&self, other: &NodeMask) -> bool { (other.clone() & !self.nodes.clone()).not_any() }
}

/// Ordering used for both root and leaf selection: sufficiency first
/// (tightest among sufficient), then "contains required nodes", then
/// lower switch level, then tighter node count, then higher accumulated
/// required-CPU count.
fn pick_best<'a>(
	views: &'a [SwitchView<'a>],
	used: &NodeMask,
	cpus: &[u32],
	rem_cpus: i64,
	rem_nodes: i64,
) -> Option<&'a SwitchView<'a>> {
	let candidates: Vec<&SwitchView<'_>> = views.iter().filter(|v| v.unused_nodes(used) > 0).collect();
	if candidates.is_empty() {
		return None;
	}

	let sufficient: Vec<&&SwitchView<'_>> = candidates
		.iter()
		.filter(|v| i64::from(v.unused_cpus(cpus, used)) >= rem_cpus && i64::from(v.unused_nodes(used)) >= rem_nodes)
		.collect();

	let pool: Vec<&SwitchView<'_>> = if sufficient.is_empty() {
		candidates
	} else {
		sufficient.into_iter().map(|v| *v).collect()
	};

	pool.into_iter().min_by(|a, b| {
		b.required
			.cmp(&a.required)
			.then(a.record.level.cmp(&b.record.level))
			.then(a.unused_nodes(used).cmp(&b.unused_nodes(used)))
			.then(b.required_cpus.cmp(&a.required_cpus))
	})
}

#[allow(clippy::too_many_arguments)]
pub fn choose_topo(
	job: &mut JobDetails,
	node_mask: &mut NodeMask,
	cpus: &mut [u32],
	switches: &[SwitchRecord],
	min_nodes: u32,
	max_nodes: u32,
	req_nodes: u32,
	now_millis: u64,
) -> Result<()> {
	let candidate = node_mask.clone();
	let req_mask = job.req_node_bitmap.clone();

	if let Some(req) = &req_mask {
		let contained = switches.iter().any(|s| (req.clone() & !s.node_bitmap.clone()).not_any());
		if !contained && req.count_ones() > 0 {
			return Err(Error::TopologyUnroutable);
		}
	}

	let views: Vec<SwitchView<'_>> = switches
		.iter()
		.map(|s| {
			let nodes = s.node_bitmap.clone() & candidate.clone();
			let required = req_mask.as_ref().is_some_and(|r| (r.clone() & nodes.clone()).count_ones() > 0);
			let required_cpus = req_mask
				.as_ref()
				.map(|r| (r.clone() & nodes.clone()).iter_ones().map(|i| cpus[i]).sum())
				.unwrap_or(0);
			SwitchView { record: s, nodes, required, required_cpus }
		})
		.collect();

	let target_nodes = i64::from(req_nodes.max(min_nodes));
	let root = pick_best(&views, &NodeMask::repeat(false, node_mask.len()), cpus, i64::from(job.min_cpus), target_nodes)
		.ok_or(Error::Infeasible("no switch has enough nodes/cpus to root the search"))?;

	let leaves: Vec<SwitchView<'_>> = views
		.iter()
		.filter(|v| v.record.level == 0 && root.contains(&v.nodes))
		.map(|v| SwitchView {
			record: v.record,
			nodes: v.nodes.clone(),
			required: v.required,
			required_cpus: v.required_cpus,
		})
		.collect();

	let mut used = NodeMask::repeat(false, node_mask.len());
	let mut total_cpus = 0_u32;
	let mut total_nodes = 0_u32;
	if let Some(req) = &req_mask {
		for i in req.iter_ones() {
			used.set(i, true);
			total_cpus = total_cpus.saturating_add(cpus[i]);
			total_nodes += 1;
		}
	}

	let mut rem_cpus = i64::from(job.min_cpus) - i64::from(total_cpus);
	let mut rem_nodes = i64::from(min_nodes) - i64::from(total_nodes);
	let mut leaves_used = std::collections::BTreeSet::new();

	while !(rem_cpus <= 0 && rem_nodes <= 0) {
		if total_nodes >= max_nodes {
			return Err(Error::Infeasible("max_nodes exhausted before satisfying the job"));
		}

		let leaf = pick_best(&leaves, &used, cpus, rem_cpus.max(1), rem_nodes.max(1))
			.ok_or(Error::Infeasible("no leaf switch has an unused node left"))?;

		let node_i = {
			let sufficient_node = leaf
				.nodes
				.iter_ones()
				.filter(|&i| !used[i] && i64::from(cpus[i]) >= rem_cpus)
				.min_by_key(|&i| cpus[i]);
			sufficient_node.unwrap_or(
				leaf.nodes
					.iter_ones()
					.filter(|&i| !used[i])
					.max_by_key(|&i| cpus[i])
					.ok_or(Error::Infeasible("chosen leaf has no unused node"))?,
			)
		};

		leaves_used.insert(leaf.record.node_bitmap.clone().iter_ones().next());

		let mut node_cpus = cpus[node_i];
		if !job.whole_node {
			let reservation = job.pn_min_cpus.saturating_mul(rem_nodes.saturating_sub(1).max(0) as u32);
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
	}

	if let Some(req_switch) = job.req_switch {
		let leaf_count = leaves_used.len() as u32;
		let waited_long_enough = job
			.wait4switch_start
			.is_some_and(|start| now_millis.saturating_sub(start) >= u64::from(job.wait4switch));
		job.best_switch = waited_long_enough || leaf_count <= req_switch;
	} else {
		job.best_switch = true;
	}

	*node_mask = used;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Two leaf switches {0,1} and {2,3} under one root, mirroring the
	/// documented two-leaf cluster.
	fn two_leaf_topology() -> Vec<SwitchRecord> {
		let mut leaf_a = NodeMask::repeat(false, 4);
		leaf_a.set(0, true);
		leaf_a.set(1, true);
		let mut leaf_b = NodeMask::repeat(false, 4);
		leaf_b.set(2, true);
		leaf_b.set(3, true);
		let mut root = NodeMask::repeat(false, 4);
		root.fill(true);
		vec![
			SwitchRecord { level: 0, link_speed: 1, node_bitmap: leaf_a },
			SwitchRecord { level: 0, link_speed: 1, node_bitmap: leaf_b },
			SwitchRecord { level: 1, link_speed: 1, node_bitmap: root },
		]
	}

	#[test]
	fn single_leaf_suffices_marks_best_switch_true() {
		let switches = two_leaf_topology();
		let mut mask = NodeMask::repeat(true, 4);
		let mut cpus = vec![2, 2, 2, 2];
		let mut job = JobDetails { min_cpus: 4, req_switch: Some(1), pn_min_cpus: 1, ..JobDetails::default() };
		choose_topo(&mut job, &mut mask, &mut cpus, &switches, 2, 2, 2, 0).unwrap();
		assert!(job.best_switch);
		// both selected nodes must come from the same leaf
		let chosen: Vec<usize> = mask.iter_ones().collect();
		assert!(chosen == vec![0, 1] || chosen == vec![2, 3]);
	}

	#[test]
	fn spanning_both_leaves_without_wait_marks_best_switch_false() {
		let switches = two_leaf_topology();
		let mut mask = NodeMask::repeat(true, 4);
		let mut cpus = vec![2, 2, 2, 2];
		let mut job = JobDetails {
			min_cpus: 8,
			req_switch: Some(1),
			wait4switch: 0,
			wait4switch_start: None,
			pn_min_cpus: 1,
			..JobDetails::default()
		};
		choose_topo(&mut job, &mut mask, &mut cpus, &switches, 4, 4, 4, 0).unwrap();
		assert!(!job.best_switch, "spanning both leaves exceeds req_switch=1 with no accrued wait");
	}

	#[test]
	fn elapsed_wait_overrides_the_switch_gate() {
		let switches = two_leaf_topology();
		let mut mask = NodeMask::repeat(true, 4);
		let mut cpus = vec![2, 2, 2, 2];
		let mut job = JobDetails {
			min_cpus: 8,
			req_switch: Some(1),
			wait4switch: 1_000,
			wait4switch_start: Some(0),
			pn_min_cpus: 1,
			..JobDetails::default()
		};
		choose_topo(&mut job, &mut mask, &mut cpus, &switches, 4, 4, 4, 2_000).unwrap();
		assert!(job.best_switch, "elapsed wait exceeding wait4switch should satisfy the gate regardless of leaf count");
	}

	#[test]
	fn required_nodes_with_no_common_switch_are_unroutable() {
		// Two disjoint leaves with no shared ancestor switch at all.
		let mut leaf_a = NodeMask::repeat(false, 4);
		leaf_a.set(0, true);
		leaf_a.set(1, true);
		let mut leaf_b = NodeMask::repeat(false, 4);
		leaf_b.set(2, true);
		leaf_b.set(3, true);
		let switches =
			vec![SwitchRecord { level: 0, link_speed: 1, node_bitmap: leaf_a }, SwitchRecord { level: 0, link_speed: 1, node_bitmap: leaf_b }];

		let mut mask = NodeMask::repeat(true, 4);
		let mut cpus = vec![2, 2, 2, 2];
		let mut req = NodeMask::repeat(false, 4);
		req.set(0, true);
		req.set(2, true);
		let mut job = JobDetails { min_cpus: 4, req_node_bitmap: Some(req), pn_min_cpus: 1, ..JobDetails::default() };
		let result = choose_topo(&mut job, &mut mask, &mut cpus, &switches, 2, 2, 2, 0);
		assert!(matches!(result, Err(cr_select_core::error::Error::TopologyUnroutable)));
	}
}
