//! RuleRunner - Rule-Based Workflow Execution Engine
//!
//! Runs pipelines described as rules that turn input files into output
//! files. Rules are parameterized by wildcards such as `{id}`, expanded
//! over identifiers discovered on disk, wired into a job graph by matching
//! paths, and only re-run when their outputs are missing or out of date.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`workflow`]: Workflow file parsing, wildcard patterns, rules and parameters
//! - [`dag`]: Job graph construction and staleness checks
//! - [`execution`]: Core execution engine with parallel scheduling
//! - [`monitoring`]: Execution timeline and timing summary
//! - [`error`]: Configuration errors and job failures
//!
//! # Example
//!
//! ```rust,no_run
//! use rulerunner::execution::Engine;
//! use rulerunner::load_workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML, overriding one parameter
//!     let overrides = vec![("min_depth".to_string(), "20".to_string())];
//!     let workflow = load_workflow("pipeline.yaml", &overrides)?;
//!
//!     // Create execution engine
//!     let mut engine = Engine::new(workflow);
//!     engine.set_cores(4);
//!     engine.set_dry_run(true);
//!
//!     // Print what would run
//!     let runtime = tokio::runtime::Builder::new_current_thread()
//!         .enable_all()
//!         .build()?;
//!     runtime.block_on(engine.run())?;
//!     Ok(())
//! }
//! ```

pub mod dag;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use error::{ConfigError, Error, JobFailure};
pub use execution::engine::Engine;
pub use workflow::parser::{load_workflow, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "RuleRunner";
