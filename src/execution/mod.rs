//! Workflow Execution Module
//!
//! Runs the stale part of a job graph with bounded parallelism.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution engine orchestrating workflow runs
//! - [`planner`]: Ready-queue bookkeeping under a core budget
//! - [`step`]: Individual job execution logic
//! - [`clean`]: Removal of the workflow's `clean:` paths

pub mod clean;
pub mod engine;
pub mod planner;
pub mod step;

pub use clean::{clean, CleanReport};
pub use engine::{Engine, Plan, RunReport, DEFAULT_LATENCY_WAIT};
pub use planner::{ExecutionPlanner, JobStatus};
