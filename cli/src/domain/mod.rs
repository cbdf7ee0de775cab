//! Domain layer: pure types, validation and planning.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod duration;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod reap;
pub mod workflow;

pub use config::VmgrConfig;
pub use error::{ConfigurationError, EngineError, Step, SweepError, WorkflowError};
pub use graph::{UnitDependencyEdge, UnitGraph, UnitSpec};
pub use reap::{ExpiryPolicy, ReapCandidate, SweepReport, plan_sweep};
pub use workflow::{RetryPolicy, StepPolicy, WorkflowPolicy};
