//! Staleness Checking
//!
//! Decides which jobs must run by comparing output and input modification
//! times. The filesystem is the only record of completed work: a job whose
//! outputs all exist and are at least as new as its inputs is up to date.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use log::debug;

use super::builder::Dag;
use super::job::{Job, JobId};

/// Interval between output checks while waiting for files to appear.
pub const LATENCY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lazily filled cache of file modification times for one run.
#[derive(Debug, Default)]
pub struct FileStatCache {
    entries: HashMap<String, Option<SystemTime>>,
}

impl FileStatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modification time of `path`, or `None` if it does not exist.
    pub fn mtime(&mut self, path: &str) -> Option<SystemTime> {
        if let Some(cached) = self.entries.get(path) {
            return *cached;
        }
        let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        self.entries.insert(path.to_string(), mtime);
        mtime
    }

    pub fn exists(&mut self, path: &str) -> bool {
        self.mtime(path).is_some()
    }
}

/// Why a job has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The rule declares no outputs
    NoOutputs,
    /// An output does not exist
    MissingOutput(String),
    /// An input is newer than the oldest output
    UpdatedInput(String),
    /// A job this one depends on will run
    UpstreamRerun(String),
    /// Forced from the command line
    Forced,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::NoOutputs => write!(f, "rule declares no outputs"),
            StaleReason::MissingOutput(path) => write!(f, "missing output {}", path),
            StaleReason::UpdatedInput(path) => write!(f, "updated input {}", path),
            StaleReason::UpstreamRerun(job) => write!(f, "upstream job {} will run", job),
            StaleReason::Forced => write!(f, "forced"),
        }
    }
}

/// Jobs forced to run regardless of timestamps.
#[derive(Debug, Clone, Default)]
pub struct ForcePolicy {
    /// Force every selected job
    pub all: bool,
    /// Force the jobs of these rules
    pub rules: BTreeSet<String>,
}

impl ForcePolicy {
    fn forces(&self, job: &Job) -> bool {
        self.all || self.rules.contains(&job.rule)
    }
}

/// Result of a staleness pass over the selected jobs.
#[derive(Debug, Clone)]
pub struct StalenessReport {
    reasons: HashMap<JobId, StaleReason>,
    /// Selected jobs in topological order
    order: Vec<JobId>,
}

impl StalenessReport {
    pub fn is_stale(&self, id: JobId) -> bool {
        self.reasons.contains_key(&id)
    }

    pub fn reason(&self, id: JobId) -> Option<&StaleReason> {
        self.reasons.get(&id)
    }

    /// Stale jobs in topological order.
    pub fn stale_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.order.iter().copied().filter(|id| self.is_stale(*id))
    }

    /// Up-to-date jobs in topological order.
    pub fn fresh_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.order.iter().copied().filter(|id| !self.is_stale(*id))
    }

    pub fn stale_count(&self) -> usize {
        self.reasons.len()
    }

    pub fn selected_count(&self) -> usize {
        self.order.len()
    }
}

/// Checks a job against the filesystem alone.
fn own_reason(job: &Job, cache: &mut FileStatCache) -> Option<StaleReason> {
    if job.outputs().is_empty() {
        return Some(StaleReason::NoOutputs);
    }

    let mut oldest_output: Option<SystemTime> = None;
    for output in job.outputs() {
        match cache.mtime(output) {
            Some(t) => oldest_output = Some(oldest_output.map_or(t, |o| o.min(t))),
            None => return Some(StaleReason::MissingOutput(output.clone())),
        }
    }
    let oldest_output = oldest_output?;

    let mut newest: Option<(SystemTime, &String)> = None;
    for input in job.inputs() {
        if let Some(t) = cache.mtime(input) {
            if newest.map_or(true, |(n, _)| t > n) {
                newest = Some((t, input));
            }
        }
    }

    match newest {
        Some((t, input)) if t > oldest_output => Some(StaleReason::UpdatedInput(input.clone())),
        _ => None,
    }
}

/// Decides which of the selected jobs must run.
///
/// Jobs are visited in topological order, so a job sees the final verdict
/// of every dependency: once a producer is stale all of its transitive
/// consumers are stale too.
pub fn evaluate(
    dag: &Dag,
    selected: &BTreeSet<JobId>,
    force: &ForcePolicy,
    cache: &mut FileStatCache,
) -> StalenessReport {
    let order: Vec<JobId> = dag
        .topological_order()
        .iter()
        .copied()
        .filter(|id| selected.contains(id))
        .collect();

    let mut reasons: HashMap<JobId, StaleReason> = HashMap::new();

    for &id in &order {
        let job = dag.job(id);

        let reason = if force.forces(job) {
            Some(StaleReason::Forced)
        } else {
            let upstream = dag
                .dependencies(id)
                .iter()
                .find(|dep| reasons.contains_key(dep))
                .map(|&dep| StaleReason::UpstreamRerun(dag.job(dep).name()));

            match own_reason(job, cache) {
                Some(StaleReason::UpdatedInput(input)) => {
                    Some(upstream.unwrap_or(StaleReason::UpdatedInput(input)))
                }
                Some(reason) => Some(reason),
                None => upstream,
            }
        };

        if let Some(reason) = reason {
            debug!("{} is stale: {}", job.name(), reason);
            reasons.insert(id, reason);
        }
    }

    StalenessReport { reasons, order }
}

/// Waits until every path exists, polling every
/// [`LATENCY_POLL_INTERVAL`], for at most `wait`.
///
/// Returns the paths still missing when the wait ran out.
pub async fn await_outputs(outputs: &[String], wait: Duration) -> Result<(), Vec<String>> {
    let deadline = Instant::now() + wait;
    loop {
        let missing: Vec<String> = outputs
            .iter()
            .filter(|p| !Path::new(p.as_str()).exists())
            .cloned()
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(missing);
        }

        debug!("Waiting for {} output(s) to appear", missing.len());
        tokio::time::sleep(LATENCY_POLL_INTERVAL).await;
    }
}
