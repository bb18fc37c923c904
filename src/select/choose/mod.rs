//! Node-choosing strategies (component C5). See spec §4.5-§4.7.
//!
//! Exactly one of the three runs per call, selected by the caller from
//! the job/partition's layout tag; there is no dynamic dispatch, each
//! variant has a distinct signature reflecting what extra state it needs.

pub mod consec;
pub mod lln;
pub mod topo;

pub use consec::choose_consec;
pub use lln::choose_lln;
pub use topo::choose_topo;

/// Which of the three choosers a job/partition combination selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChooserKind {
	Consecutive,
	LeastLoaded,
	Topology,
}
