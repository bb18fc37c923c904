//! Generic-resource collaborator interfaces (§6).
//!
//! The source this was distilled from binds gres units to specific cores
//! (NUMA/PCI affinity). This crate's data model (§3) tracks gres as a
//! plain per-node count, so these collaborators narrow by *node*
//! feasibility rather than by individual core — `gres_job_core_filter`
//! clears a node's whole core range when it cannot satisfy the job's gres
//! demand at all, and `gres_job_test` reduces to the core-equivalent
//! count used by `can_job_run_on_node` (C3).

use std::collections::BTreeMap;

use crate::{
	bitmap::CoreMask,
	types::GresEntry,
};

/// Narrows `core_mask[start..end)` to cores compatible with the job's
/// generic-resource demand. With per-node (not per-core) gres accounting,
/// this either leaves the range untouched (every demanded gres type is
/// available in sufficient quantity) or clears it entirely.
pub fn gres_job_core_filter(
	job_gres: &BTreeMap<String, u32>,
	node_gres: &[GresEntry],
	core_mask: &mut CoreMask,
	start: u32,
	end: u32,
) {
	if gres_job_test(job_gres, node_gres) == 0 && !job_gres.is_empty() {
		core_mask[start as usize..end as usize].fill(false);
	}
}

/// The core-equivalent CPU count this node's gres can sustain for the
/// job's demand: for each demanded gres type, `available_units *
/// cpus_per_unit`; the node's overall gres-derived cpu count is the
/// minimum across demanded types, or `u32::MAX` ("no constraint") when the
/// job demands no gres.
#[must_use]
pub fn gres_job_test(job_gres: &BTreeMap<String, u32>, node_gres: &[GresEntry]) -> u32 {
	if job_gres.is_empty() {
		return u32::MAX;
	}

	job_gres
		.iter()
		.map(|(name, demand)| {
			let Some(entry) = node_gres.iter().find(|g| &g.name == name) else {
				return 0;
			};
			if *demand == 0 {
				u32::MAX
			} else {
				entry.available().saturating_mul(entry.cpus_per_unit)
			}
		})
		.min()
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn gpu(count: u32, used: u32, cpus_per_unit: u32) -> GresEntry {
		GresEntry { name: "gpu".into(), count, used, cpus_per_unit }
	}

	#[test]
	fn no_demand_is_unconstrained() {
		assert_eq!(gres_job_test(&BTreeMap::new(), &[]), u32::MAX);
	}

	#[test]
	fn missing_gres_type_on_node_fails() {
		let mut demand = BTreeMap::new();
		demand.insert("gpu".to_string(), 1);
		assert_eq!(gres_job_test(&demand, &[]), 0);
	}

	#[test]
	fn demand_is_scaled_by_cpus_per_unit() {
		let mut demand = BTreeMap::new();
		demand.insert("gpu".to_string(), 1);
		let node_gres = vec![gpu(4, 1, 8)];
		// 3 units available * 8 cpus/unit
		assert_eq!(gres_job_test(&demand, &node_gres), 24);
	}

	#[test]
	fn core_filter_clears_range_when_unsatisfiable() {
		let mut demand = BTreeMap::new();
		demand.insert("gpu".to_string(), 1);
		let node_gres = vec![gpu(2, 2, 4)]; // fully consumed
		let mut mask = CoreMask::repeat(true, 8);
		gres_job_core_filter(&demand, &node_gres, &mut mask, 2, 6);
		assert_eq!(mask[2..6].count_ones(), 0);
		assert!(mask[0] && mask[7], "ranges outside [2, 6) are untouched");
	}

	#[test]
	fn core_filter_is_a_noop_with_no_demand() {
		let mut mask = CoreMask::repeat(true, 4);
		gres_job_core_filter(&BTreeMap::new(), &[], &mut mask, 0, 4);
		assert_eq!(mask.count_ones(), 4);
	}
}
