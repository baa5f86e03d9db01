//! Workflow Parser
//!
//! Loads a workflow definition from YAML and turns it into the immutable
//! pieces the engine works with: the rule registry, the parameter store,
//! the identifier discovery pattern and the default targets.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::ConfigError;

use super::model::WorkflowFile;
use super::params::ParameterStore;
use super::registry::RuleRegistry;
use super::wildcards::Pattern;

/// Where identifiers are discovered.
#[derive(Debug, Clone)]
pub struct IdentifierSource {
    pub pattern: Pattern,
    pub root: PathBuf,
}

/// A loaded, checked workflow.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub registry: RuleRegistry,
    pub params: ParameterStore,
    pub identifiers: Option<IdentifierSource>,
    /// Default target patterns
    pub targets: Vec<String>,
    /// Paths removed by clean mode
    pub clean: Vec<String>,
}

impl Workflow {
    /// Builds a workflow from its parsed file form, applying parameter
    /// overrides before the store is frozen.
    pub fn from_file(
        file: WorkflowFile,
        overrides: &[(String, String)],
    ) -> Result<Self, ConfigError> {
        let params = ParameterStore::with_overrides(file.config, overrides);
        let registry = RuleRegistry::from_rules(file.rules)?;

        let identifiers = file
            .identifiers
            .map(|d| -> Result<IdentifierSource, ConfigError> {
                Ok(IdentifierSource {
                    pattern: Pattern::parse(&d.pattern)?,
                    root: d.root,
                })
            })
            .transpose()?;

        for target in &file.targets {
            Pattern::parse(target)?;
        }

        Ok(Self {
            registry,
            params,
            identifiers,
            targets: file.targets,
            clean: file.clean,
        })
    }
}

/// Parses workflow YAML text. `path` is only used in error messages.
pub fn parse_workflow(
    yaml: &str,
    path: &Path,
    overrides: &[(String, String)],
) -> Result<Workflow, ConfigError> {
    let file: WorkflowFile = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(
        "Parsed {} rule(s), {} config value(s)",
        file.rules.len(),
        file.config.len()
    );

    Workflow::from_file(file, overrides)
}

/// Loads a workflow from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use rulerunner::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let overrides = vec![("min_freq".to_string(), "0.05".to_string())];
///     let workflow = load_workflow("workflow.yaml", &overrides)?;
///     println!("Loaded {} rules", workflow.registry.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(
    path: impl AsRef<Path>,
    overrides: &[(String, String)],
) -> Result<Workflow, ConfigError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let workflow = parse_workflow(&yaml_content, path, overrides)?;

    info!(
        "Workflow loaded: {} rules, {} parameters",
        workflow.registry.len(),
        workflow.params.len()
    );

    Ok(workflow)
}
