//! Jobs
//!
//! A job is one rule instantiated for one set of wildcard values.

use std::fmt;

use crate::workflow::Binding;

/// Index of a job inside its [`Dag`](super::Dag).
pub type JobId = usize;

/// Everything needed to run one job as an external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Executable, looked up on PATH
    pub program: String,
    /// Fully rendered arguments
    pub args: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// File receiving the process stdout
    pub stdout: Option<String>,
    /// File receiving stderr (and stdout when `stdout` is unset)
    pub log: Option<String>,
    /// Resource units consumed while running
    pub threads: usize,
}

impl TaskDescriptor {
    /// Human-readable command line, quoting arguments that contain spaces.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(&arg.replace('\'', "'\\''"));
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        if let Some(stdout) = &self.stdout {
            line.push_str(" > ");
            line.push_str(stdout);
        }
        line
    }
}

/// A concrete instance of a rule.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub rule: String,
    pub binding: Binding,
    pub task: TaskDescriptor,
}

impl Job {
    /// Display name, e.g. `trim[id=s1]`. Jobs of wildcard-free rules are
    /// named after the rule alone.
    pub fn name(&self) -> String {
        job_name(&self.rule, &self.binding)
    }

    pub fn inputs(&self) -> &[String] {
        &self.task.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.task.outputs
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

pub(crate) fn job_name(rule: &str, binding: &Binding) -> String {
    if binding.is_empty() {
        return rule.to_string();
    }
    let values: Vec<String> = binding.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}[{}]", rule, values.join(","))
}
