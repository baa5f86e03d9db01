//! Job Graph Module
//!
//! Turns a loaded workflow into a graph of concrete jobs and decides which
//! of them are out of date.
//!
//! - [`builder`]: Rule expansion, edge derivation, cycle checks
//! - [`job`]: Job and task descriptor types
//! - [`staleness`]: Timestamp comparison and forced re-runs

pub mod builder;
pub mod job;
pub mod staleness;

pub use builder::{build, Dag, IdentifierSet};
pub use job::{Job, JobId, TaskDescriptor};
pub use staleness::{evaluate, FileStatCache, ForcePolicy, StaleReason, StalenessReport};
