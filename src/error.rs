//! Error Types
//!
//! Two families of errors exist:
//!
//! - [`ConfigError`]: problems with the workflow definition or the graph
//!   derived from it. Detected before any job runs and abort the invocation.
//! - [`JobFailure`]: per-job execution problems. They are recorded on the
//!   failing job and only block that job's dependents.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a successful run, dry-run or clean.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code when at least one job failed.
pub const EXIT_JOB_FAILURE: u8 = 1;

/// Exit code for configuration and graph errors.
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Exit code when the run was interrupted by a termination signal.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Errors in the workflow definition or its dependency graph.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Rule '{0}' is already registered")]
    DuplicateRule(String),

    #[error("Unknown rule '{0}'")]
    UnknownRule(String),

    #[error("{context}: wildcard '{{{wildcard}}}' is not bound")]
    UnboundWildcard { context: String, wildcard: String },

    #[error("Cyclic dependency between jobs: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Output '{path}' is declared by both '{first}' and '{second}'")]
    OutputCollision {
        path: String,
        first: String,
        second: String,
    },

    #[error("Job '{job}' requires '{path}', which no rule produces and which does not exist")]
    MissingExternalInput { job: String, path: String },

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Target '{0}' is not produced by any rule and does not exist")]
    MissingTarget(String),

    #[error("Failed to read workflow file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse workflow file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Why a single job did not succeed.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("exited with status {}", describe_status(.0))]
    ExitStatus(Option<i32>),

    #[error("missing output(s) after completion: {}", .0.join(", "))]
    MissingOutputs(Vec<String>),

    #[error("terminated before completion")]
    Terminated,

    #[error("job task ended abnormally: {0}")]
    Aborted(String),

    #[error("I/O error while preparing job: {0}")]
    Io(#[from] io::Error),
}

fn describe_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown (killed by signal)".to_string(),
    }
}

/// Top-level error returned by the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        EXIT_CONFIG_ERROR
    }
}

pub type Result<T> = std::result::Result<T, Error>;
