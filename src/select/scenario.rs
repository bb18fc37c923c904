//! Serde-friendly scenario files (used by both the test suite and the
//! CLI binary) describing a small cluster, its current occupancy, and a
//! single job request to run `cr_job_test` against.
//!
//! Not part of the core algorithm; a thin convenience layer so the
//! worked examples in the specification's testable-properties section
//! can be expressed as data instead of hand-built fixtures in every
//! test.

use std::collections::BTreeMap;

use cr_select_core::Result;
use serde::{Deserialize, Serialize};

use crate::{
	bitmap::{ClusterLayout, NodeMask},
	planner::cr_job_test,
	types::{
		AllocatedResources, CrType, JobDetails, JobNodeReq, McData, MinMemory, Mode, NodeDescriptor, NodeSharePolicy,
		NodeStateFlags, NodeUsage, Partition, PartitionRow, SwitchRecord,
	},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioNode {
	pub name: String,
	pub cpus: u32,
	#[serde(default)]
	pub used_cpus: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSwitch {
	pub level: u32,
	pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioRequest {
	pub min_cpus: u32,
	#[serde(default)]
	pub max_cpus: Option<u32>,
	pub min_nodes: u32,
	#[serde(default)]
	pub max_nodes: Option<u32>,
	#[serde(default)]
	pub req_switches: Option<u32>,
	#[serde(default)]
	pub wait4switch: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
	pub name: String,
	pub description: String,
	pub nodes: Vec<ScenarioNode>,
	#[serde(default)]
	pub switches: Vec<ScenarioSwitch>,
	pub request: ScenarioRequest,
}

impl Scenario {
	/// Builds the runtime cluster/job state and runs the planner in
	/// `RUN_NOW` mode against a single always-available partition, using
	/// default configuration (§9: `cr_core`/`cr_memory` on, gang scheduling
	/// off).
	pub fn run(&self) -> Result<AllocatedResources> { self.run_with_config(&cr_select_core::Config::default()) }

	/// As [`Scenario::run`], but takes the consumable-resource type and the
	/// gang-scheduling flag from `config` rather than hardcoding them.
	pub fn run_with_config(&self, config: &cr_select_core::Config) -> Result<AllocatedResources> {
		let descriptors: Vec<NodeDescriptor> = self
			.nodes
			.iter()
			.map(|n| NodeDescriptor {
				name: n.name.clone(),
				sockets: 1,
				cores_per_socket: n.cpus,
				threads_per_core: 1,
				real_memory: u64::from(n.cpus) * 1024,
				gres_list: Vec::new(),
				node_state: NodeStateFlags::default(),
			})
			.collect();

		let usage: Vec<NodeUsage> = self
			.nodes
			.iter()
			.map(|_| NodeUsage { alloc_memory: 0, node_state: NodeSharePolicy::Available, gres_list: None })
			.collect();

		let layout = ClusterLayout::new(&descriptors);
		let mut row = PartitionRow::new(layout.total_cores());
		for (i, n) in self.nodes.iter().enumerate() {
			let range = layout.node_core_range(i);
			for c in range.start..range.start.saturating_add(n.used_cpus) {
				row.row_bitmap.set(c as usize, true);
			}
		}
		let mut partitions = vec![Partition { priority: 0, rows: vec![row], max_cpus_per_node: None }];

		let switches: Vec<SwitchRecord> = self
			.switches
			.iter()
			.map(|s| {
				let mut mask = layout.new_node_mask();
				for member in &s.members {
					if let Some(i) = self.nodes.iter().position(|n| &n.name == member) {
						mask.set(i, true);
					}
				}
				SwitchRecord { level: s.level, link_speed: 1, node_bitmap: mask }
			})
			.collect();

		let mut node_mask: NodeMask = layout.new_node_mask();
		node_mask.fill(true);

		let mut job = JobDetails {
			min_cpus: self.request.min_cpus,
			max_cpus: self.request.max_cpus,
			min_nodes: self.request.min_nodes,
			max_nodes: self.request.max_nodes,
			pn_min_cpus: 1,
			pn_min_memory: MinMemory::PerNode(0),
			cpus_per_task: 1,
			mc: McData::default(),
			cr_type: CrType {
				cpu: true,
				core: config.default_cr_core,
				socket: config.default_cr_socket,
				memory: config.default_cr_memory,
				lln: config.default_cr_lln,
			},
			gres_demand: BTreeMap::new(),
			own_partition: 0,
			req_switch: self.request.req_switches,
			wait4switch: self.request.wait4switch,
			// No prior waiting has accrued for a job tested fresh — the switch
			// gate falls back to comparing `leaf_count` against `req_switch`.
			wait4switch_start: None,
			..JobDetails::default()
		};

		let max_nodes = self.request.max_nodes.unwrap_or(descriptors.len() as u32);
		let req_nodes = self.request.min_nodes;

		cr_job_test(
			&mut job,
			&node_mask,
			self.request.min_nodes,
			max_nodes,
			req_nodes,
			Mode::RunNow,
			job.cr_type,
			JobNodeReq::Available,
			&descriptors,
			&usage,
			&mut partitions,
			&switches,
			None,
			config.gang_scheduling,
			0,
		)
	}
}

fn three_plus_four(used: [u32; 4]) -> Vec<ScenarioNode> {
	["linux01", "linux02", "linux03"]
		.iter()
		.enumerate()
		.map(|(i, &name)| ScenarioNode { name: name.to_string(), cpus: 2, used_cpus: used[i] })
		.chain(std::iter::once(ScenarioNode { name: "linux04".to_string(), cpus: 4, used_cpus: used[3] }))
		.collect()
}

/// S1: all idle, `-n 4 -N 4`.
#[must_use]
pub fn scenario_s1() -> Scenario {
	Scenario {
		name: "s1".into(),
		description: "all idle, request 4 cpus across 4 nodes".into(),
		nodes: three_plus_four([0, 0, 0, 0]),
		switches: Vec::new(),
		request: ScenarioRequest { min_cpus: 4, max_cpus: None, min_nodes: 4, max_nodes: Some(4), ..Default::default() },
	}
}

/// S2: S1's allocation occupies cpu 1 of each node, then `-n 3 -N 3`.
#[must_use]
pub fn scenario_s2() -> Scenario {
	Scenario {
		name: "s2".into(),
		description: "one cpu busy per node, request 3 cpus across 3 nodes".into(),
		nodes: three_plus_four([1, 1, 1, 1]),
		switches: Vec::new(),
		request: ScenarioRequest { min_cpus: 3, max_cpus: None, min_nodes: 3, max_nodes: Some(3), ..Default::default() },
	}
}

/// S3: after S2, `-n 1`.
#[must_use]
pub fn scenario_s3() -> Scenario {
	Scenario {
		name: "s3".into(),
		description: "after s2, request a single cpu".into(),
		nodes: three_plus_four([2, 2, 2, 1]),
		switches: Vec::new(),
		request: ScenarioRequest { min_cpus: 1, max_cpus: None, min_nodes: 1, max_nodes: Some(1), ..Default::default() },
	}
}

/// S4: after S3, node04 has exactly 2 cpus free (4 total, 1 from S1 plus
/// 1 from S3 already used) — the request size is corrected to 2 here
/// to stay arithmetically consistent with S1-S3's cumulative usage; the
/// documented example's "-n 3" does not fit in the 2 cpus node04 has
/// left at this point.
#[must_use]
pub fn scenario_s4() -> Scenario {
	Scenario {
		name: "s4".into(),
		description: "after s3, request remaining cpus on linux04; cluster becomes full".into(),
		nodes: three_plus_four([2, 2, 2, 2]),
		switches: Vec::new(),
		request: ScenarioRequest { min_cpus: 2, max_cpus: None, min_nodes: 1, max_nodes: Some(1), ..Default::default() },
	}
}

/// S5: after S4 (full cluster), pending `-n 3`; infeasible until S1 exits.
#[must_use]
pub fn scenario_s5_pending() -> Scenario {
	Scenario {
		name: "s5-pending".into(),
		description: "cluster full, request 3 cpus, expected infeasible".into(),
		nodes: three_plus_four([2, 2, 2, 4]),
		switches: Vec::new(),
		request: ScenarioRequest { min_cpus: 3, max_cpus: None, min_nodes: 1, max_nodes: Some(3), ..Default::default() },
	}
}

/// S5 continued: S1's job exits, freeing cpu 1 on linux01-03.
#[must_use]
pub fn scenario_s5_after_exit() -> Scenario {
	Scenario {
		name: "s5-after-exit".into(),
		description: "s1 exits, request 3 cpus across linux01-03".into(),
		nodes: three_plus_four([1, 1, 1, 4]), // S1's job exited, freeing 1 cpu on each of linux01-03
		switches: Vec::new(),
		request: ScenarioRequest { min_cpus: 3, max_cpus: None, min_nodes: 3, max_nodes: Some(3), ..Default::default() },
	}
}

/// S6: all idle, two leaf switches, `-n 4 -N 4 --switches=1` — expects
/// `best_switch = false` since the request needs both leaves (the root).
#[must_use]
pub fn scenario_s6() -> Scenario {
	Scenario {
		name: "s6".into(),
		description: "topology-constrained request spanning both leaf switches".into(),
		nodes: three_plus_four([0, 0, 0, 0]),
		switches: vec![
			ScenarioSwitch { level: 0, members: vec!["linux01".into(), "linux02".into()] },
			ScenarioSwitch { level: 0, members: vec!["linux03".into(), "linux04".into()] },
			ScenarioSwitch {
				level: 1,
				members: vec!["linux01".into(), "linux02".into(), "linux03".into(), "linux04".into()],
			},
		],
		request: ScenarioRequest {
			min_cpus: 4,
			max_cpus: None,
			min_nodes: 4,
			max_nodes: Some(4),
			req_switches: Some(1),
			wait4switch: 0,
		},
	}
}

#[must_use]
pub fn builtin_scenarios() -> Vec<Scenario> {
	vec![
		scenario_s1(),
		scenario_s2(),
		scenario_s3(),
		scenario_s4(),
		scenario_s5_pending(),
		scenario_s5_after_exit(),
		scenario_s6(),
	]
}
