//! Workflow Data Model
//!
//! Declarative structures as they appear in a workflow file.
//!
//! # Example YAML Format
//!
//! ```yaml
//! config:
//!   reference: ref/MN908947.3.fasta
//!   min_quality: 20
//!
//! identifiers:
//!   pattern: bam/{id}.bam
//!
//! targets:
//!   - variants/{id}.tsv
//!
//! rules:
//!   - name: trim
//!     tool: ivar
//!     args: [trim, -i, "{input}", -b, "{config.primer_bed}", -p, "{params.prefix}"]
//!     input: bam/{id}.bam
//!     output: trimmed/{id}.bam
//!     params:
//!       prefix: trimmed/{id}
//!
//!   - name: variants
//!     tool: ivar
//!     args: [variants, -p, "{params.prefix}", -q, "{config.min_quality}"]
//!     input: trimmed/{id}.bam
//!     output: variants/{id}.tsv
//!     params:
//!       prefix: variants/{id}
//!     threads: 2
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params::ParamValue;

/// One entry of a rule's input list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum InputSpec {
    /// A path pattern instantiated with the job's own wildcard values
    Pattern(String),
    /// A pattern instantiated over every identifier (fan-in)
    Expand { expand: String },
}

impl InputSpec {
    /// The underlying pattern text.
    pub fn pattern(&self) -> &str {
        match self {
            InputSpec::Pattern(p) => p,
            InputSpec::Expand { expand } => expand,
        }
    }
}

impl From<&str> for InputSpec {
    fn from(pattern: &str) -> Self {
        InputSpec::Pattern(pattern.to_string())
    }
}

/// A pipeline stage template.
///
/// Each rule is expanded into one job per distinct set of values for the
/// wildcards it uses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Rule {
    /// Unique rule name
    pub name: String,

    /// Executable to run (looked up on PATH)
    pub tool: String,

    /// Argument templates, rendered per job
    #[serde(default)]
    pub args: Vec<String>,

    /// Input path patterns
    #[serde(deserialize_with = "single_or_vec_input", default)]
    pub input: Vec<InputSpec>,

    /// Output path patterns
    #[serde(deserialize_with = "single_or_vec", default)]
    pub output: Vec<String>,

    /// Rule-level parameters; text values may reference wildcards and config
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamValue>,

    /// File receiving the job's stdout and stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    /// File receiving the job's stdout (takes precedence over `log` for stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Resource units this rule's jobs consume
    #[serde(default = "default_threads")]
    pub threads: usize,
}

/// Default thread count for rules that don't specify
fn default_threads() -> usize {
    1
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

/// Like [`single_or_vec`], but entries may also be `{expand: pattern}` maps.
fn single_or_vec_input<'de, D>(deserializer: D) -> Result<Vec<InputSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    let items = match val {
        Value::Null => return Ok(Vec::new()),
        Value::String(s) if s.is_empty() => return Ok(Vec::new()),
        Value::Array(arr) => arr,
        other => vec![other],
    };

    items
        .into_iter()
        .map(|v| serde_json::from_value::<InputSpec>(v).map_err(de::Error::custom))
        .collect()
}

impl Rule {
    /// Creates a new Rule with the given name and executable.
    ///
    /// # Example
    ///
    /// ```
    /// use rulerunner::workflow::Rule;
    ///
    /// let rule = Rule::new("consensus", "ivar")
    ///     .with_args(&["consensus", "-p", "{params.prefix}"])
    ///     .with_input("trimmed/{id}.bam")
    ///     .with_output("consensus/{id}.fa")
    ///     .with_param("prefix", "consensus/{id}")
    ///     .with_threads(2);
    /// assert_eq!(rule.output, vec!["consensus/{id}.fa"]);
    /// ```
    pub fn new(name: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            tool: tool.into().trim().to_string(),
            args: Vec::new(),
            input: Vec::new(),
            output: Vec::new(),
            params: BTreeMap::new(),
            log: None,
            stdout: None,
            threads: 1,
        }
    }

    /// Sets the argument templates.
    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Adds an input pattern.
    pub fn with_input(mut self, pattern: impl Into<String>) -> Self {
        self.input.push(InputSpec::Pattern(pattern.into()));
        self
    }

    /// Adds an input pattern expanded over all identifiers.
    pub fn with_expanded_input(mut self, pattern: impl Into<String>) -> Self {
        self.input.push(InputSpec::Expand {
            expand: pattern.into(),
        });
        self
    }

    /// Adds an output pattern.
    pub fn with_output(mut self, pattern: impl Into<String>) -> Self {
        self.output.push(pattern.into());
        self
    }

    /// Adds a text parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), ParamValue::Text(value.into()));
        self
    }

    /// Sets the log file pattern.
    pub fn with_log(mut self, pattern: impl Into<String>) -> Self {
        self.log = Some(pattern.into());
        self
    }

    /// Sets the stdout redirection pattern.
    pub fn with_stdout(mut self, pattern: impl Into<String>) -> Self {
        self.stdout = Some(pattern.into());
        self
    }

    /// Sets the thread count for this rule.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }
}

/// Where work-item identifiers come from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Discovery {
    /// Pattern matched against files under `root`, e.g. `bam/{id}.bam`
    pub pattern: String,

    /// Directory the pattern is relative to
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

/// A workflow file as written on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowFile {
    /// Global parameters
    #[serde(default)]
    pub config: BTreeMap<String, ParamValue>,

    /// Identifier discovery; without it only wildcard-free rules can run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Discovery>,

    /// Default targets built when none are given on the command line
    #[serde(deserialize_with = "single_or_vec", default)]
    pub targets: Vec<String>,

    /// Paths removed by clean mode
    #[serde(deserialize_with = "single_or_vec", default)]
    pub clean: Vec<String>,

    /// Rule definitions
    pub rules: Vec<Rule>,
}
