//! SegStore Archiver
//!
//! Selects the next batch of data sets to archive.
//!
//! Candidates are bucketed by a compound grouping key (organizational unit,
//! sub-unit, experiment, sample, type or data set). A pipeline of grouping
//! keys is tried in order until one produces a group whose total size fits
//! the configured size window. Every decision is recorded in a trace so that
//! an unsuccessful run can be reported to the operator as a whole.

pub mod engine;
pub mod group;
pub mod key;
pub mod task;
pub mod trace;

pub use engine::{BatchSelection, GroupingEngine, SpecAttempt};
pub use group::{partition, CandidateGroup};
pub use key::{GroupKeySpec, Pipeline, PipelineError, Selector};
pub use task::{resolve_sizes, ArchivingTask};
pub use trace::DecisionTrace;
