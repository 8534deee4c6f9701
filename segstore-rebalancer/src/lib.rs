//! SegStore Rebalancer Library
//!
//! Keeps the shares of a segmented store above their free-space threshold
//! and schedules archive batch selection.
//!
//! The rebalancer performs:
//! - Shortfall detection (shares below their minimum free space)
//! - Evacuation of withdrawn shares
//! - Target selection (enough free space, acceptable transfer speed, best fit)
//! - Verified relocation under a per-data-set lock
//! - Clean-up of unarchiving scratch shares

pub mod balancer;
pub mod config;
pub mod locks;
pub mod metrics;
pub mod probe;
pub mod scratch;
pub mod selector;
pub mod service;

// Re-export main types
pub use balancer::{Balancer, BalancerConfig, BalancingReport, RelocationFailure};
pub use config::{ConfigError, SchedulerConfig};
pub use locks::{DataSetLockGuard, DataSetLocks};
pub use probe::{AcceptAllProbe, ProbeRegistry, ProbeSettings, WriteTestProbe};
pub use scratch::ScratchCleaner;
pub use selector::{PlannedMoves, TargetSelector};
pub use service::{SchedulerService, TickReport};
