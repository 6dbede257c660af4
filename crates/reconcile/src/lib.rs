//! Rezn reconciler: converges running containers toward the declared workloads.
//!
//! A pass reads the declaration from the store, lists running containers, plans the
//! creates and destroys that close the gap, and issues them one by one. The
//! [`Controller`] repeats passes on a fixed interval.

#![forbid(unsafe_code)]

pub mod controller;
pub mod execute;
pub mod matching;
pub mod naming;
pub mod plan;

pub use controller::{parse_interval, Controller, ControllerConfig, FailedAction, LoopState, PassError, PassReport, DEFAULT_INTERVAL};
pub use execute::{execute, ActionOutcome};
pub use matching::MatchRule;
pub use naming::{NameSource, SequenceNamer, TimestampNamer};
pub use plan::{plan, Plan, WorkloadStatus};
