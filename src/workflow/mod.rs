//! Workflow Definition Module
//!
//! Provides the data structures for declaring a workflow and loading it
//! from YAML.
//!
//! # Structure
//!
//! - [`model`]: Declarative structures (Rule, WorkflowFile)
//! - [`parser`]: YAML parsing and loading
//! - [`registry`]: Checked, immutable rule set
//! - [`params`]: Global parameter store
//! - [`wildcards`]: Wildcard patterns and identifier discovery
//! - [`template`]: Argument template rendering

pub mod model;
pub mod params;
pub mod parser;
pub mod registry;
pub mod template;
pub mod wildcards;

pub use model::{Discovery, InputSpec, Rule, WorkflowFile};
pub use params::{ParamValue, ParameterStore};
pub use parser::{load_workflow, parse_workflow, IdentifierSource, Workflow};
pub use registry::{InputPattern, RegisteredRule, RuleRegistry};
pub use wildcards::{discover_identifiers, Binding, Pattern};
