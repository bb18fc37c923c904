//! The data model of §3: read-only cluster snapshot types, the job record,
//! and the allocation result. `NO_VAL` ("unlimited") is represented as
//! `None` on the relevant `Option<u32>` fields rather than a magic
//! sentinel value.

use serde::{Deserialize, Serialize};

/// A single generic-resource type tracked on a node (e.g. `gpu`, `mic`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GresEntry {
	pub name: String,
	/// Total units of this resource on the node.
	pub count: u32,
	/// Units already consumed by other jobs.
	pub used: u32,
	/// How many CPU-equivalents one unit of this resource covers; used by
	/// the gres core-filter collaborator (§6) to translate a gres demand
	/// into a core/CPU count.
	pub cpus_per_unit: u32,
}

impl GresEntry {
	#[must_use]
	pub fn available(&self) -> u32 { self.count.saturating_sub(self.used) }
}

/// `node_state`'s *completing* bit plus whatever else a real snapshot would
/// carry; kept as a small struct of bools rather than a raw bitfield since
/// nothing outside this crate inspects the wire layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateFlags {
	pub completing: bool,
	pub draining: bool,
}

/// Read-only per-node hardware snapshot (§3 `NodeDescriptor`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
	pub name: String,
	pub sockets: u32,
	pub cores_per_socket: u32,
	/// Hardware threads per core, a.k.a. vpus.
	pub threads_per_core: u32,
	pub real_memory: u64,
	#[serde(default)]
	pub gres_list: Vec<GresEntry>,
	#[serde(default)]
	pub node_state: NodeStateFlags,
}

impl NodeDescriptor {
	/// `cpus = sockets * cores_per_socket * threads_per_core` (invariant).
	#[must_use]
	pub fn cpus(&self) -> u32 {
		self.sockets
			.saturating_mul(self.cores_per_socket)
			.saturating_mul(self.threads_per_core)
	}

	#[must_use]
	pub fn physical_cores(&self) -> u32 { self.sockets.saturating_mul(self.cores_per_socket) }
}

/// Sharing policy recorded against a node's current usage (§3 `NodeUsage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeSharePolicy {
	Available,
	OneRow,
	Reserved,
}

/// Per-node, per-call usage snapshot (§3 `NodeUsage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUsage {
	pub alloc_memory: u64,
	pub node_state: NodeSharePolicy,
	/// Overrides `NodeDescriptor::gres_list` when present (a node's
	/// consumable gres can be reconfigured independently of its hardware
	/// snapshot).
	#[serde(default)]
	pub gres_list: Option<Vec<GresEntry>>,
}

/// One row of a partition's occupancy bitmap (§3 `PartitionRow`).
#[derive(Debug, Clone)]
pub struct PartitionRow {
	pub row_bitmap: crate::bitmap::CoreMask,
}

impl PartitionRow {
	#[must_use]
	pub fn new(total_cores: u32) -> Self {
		Self {
			row_bitmap: crate::bitmap::CoreMask::repeat(false, total_cores as usize),
		}
	}

	#[must_use]
	pub fn popcount(&self) -> usize { self.row_bitmap.count_ones() }
}

/// A scheduling partition: a priority, a sharing width, and that many rows
/// of occupancy (§3 `Partition`).
#[derive(Debug, Clone)]
pub struct Partition {
	pub priority: u32,
	pub rows: Vec<PartitionRow>,
	/// `max_cpus_per_node`, `INFINITE` in the source this was distilled
	/// from; `None` here means unlimited.
	pub max_cpus_per_node: Option<u32>,
}

impl Partition {
	#[must_use]
	pub fn num_rows(&self) -> usize { self.rows.len().max(1) }

	#[must_use]
	pub fn is_exclusive(&self) -> bool { self.rows.len() <= 1 }
}

/// A topology switch record; the switch set forms a forest (§3
/// `SwitchRecord`).
#[derive(Debug, Clone)]
pub struct SwitchRecord {
	pub level: u32,
	pub link_speed: u32,
	pub node_bitmap: crate::bitmap::NodeMask,
}

/// Multi-core constraint data, `job_ptr->details->mc_ptr` in the source
/// this was distilled from (§3 `JobDetails.mc_ptr`).
#[derive(Debug, Clone, Default)]
pub struct McData {
	pub min_cores_per_socket: Option<u32>,
	pub min_sockets_per_node: Option<u32>,
	pub ntasks_per_core: Option<u32>,
	pub ntasks_per_socket: Option<u32>,
	pub threads_per_core: Option<u32>,
}

/// Consumable-resource type bitfield (§6). `CR_MEMORY` is orthogonal to
/// the other three and may combine with any of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrType {
	pub cpu: bool,
	pub core: bool,
	pub socket: bool,
	pub memory: bool,
	pub lln: bool,
}

/// `job_node_req` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobNodeReq {
	Available,
	OneRow,
	Reserved,
}

/// `mode` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	TestOnly,
	WillRun,
	RunNow,
}

/// Per-CPU vs. per-node memory requirement, `pn_min_memory`'s high-bit flag
/// made explicit as an enum instead of a tagged integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinMemory {
	PerNode(u64),
	PerCpu(u64),
}

impl Default for MinMemory {
	fn default() -> Self { Self::PerNode(0) }
}

/// The job record (§3 `JobDetails`).
#[derive(Debug, Clone, Default)]
pub struct JobDetails {
	pub job_id: u32,
	pub min_cpus: u32,
	pub max_cpus: Option<u32>,
	pub min_nodes: u32,
	pub max_nodes: Option<u32>,
	pub pn_min_cpus: u32,
	pub pn_min_memory: MinMemory,
	pub cpus_per_task: u32,
	pub ntasks_per_node: Option<u32>,
	pub num_tasks: Option<u32>,
	pub overcommit: bool,
	pub share_res: bool,
	pub whole_node: bool,
	pub contiguous: bool,
	pub core_spec: u32,
	pub req_node_bitmap: Option<crate::bitmap::NodeMask>,
	/// Per-required-node CPU cap, keyed by node index.
	pub req_node_layout: std::collections::BTreeMap<usize, u32>,
	pub mc: McData,
	pub cr_type: CrType,
	/// Generic-resource demand, keyed by gres name (§3 "a job also carries
	/// ... a generic-resource demand").
	pub gres_demand: std::collections::BTreeMap<String, u32>,
	/// Index into the planner's partition slice for this job's home
	/// partition (§3 "a job also carries a partition pointer").
	pub own_partition: usize,
	pub req_switch: Option<u32>,
	pub wait4switch: u32,
	pub wait4switch_start: Option<u64>,
	/// Scratch flag written by the topology chooser (§4.7) and read back
	/// by the planner (§4.10).
	pub best_switch: bool,
	pub partition_priority: u32,
}

impl JobDetails {
	#[must_use]
	pub fn cpus_per_task_effective(&self) -> u32 { self.cpus_per_task.max(1) }
}

/// The return value of a successful selection (§3 `AllocatedResources`).
#[derive(Debug, Clone)]
pub struct AllocatedResources {
	pub node_bitmap: crate::bitmap::NodeMask,
	pub core_bitmap: crate::bitmap::CoreMask,
	pub cpus: Vec<u32>,
	pub memory_allocated: Vec<u64>,
	pub ncpus: u32,
	pub hosts: Vec<String>,
}

impl AllocatedResources {
	#[must_use]
	pub fn nhosts(&self) -> usize { self.node_bitmap.count_ones() }
}
