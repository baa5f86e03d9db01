//! Execution Planner
//!
//! Scheduler state for one run:
//! - Per-job status tracking
//! - Dependency counting and the ready queue
//! - Resource unit allocation
//!
//! Only the engine's controller loop touches this state.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::debug;

use crate::dag::{Dag, JobId, StalenessReport};

/// Status of a job during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting for dependencies
    Pending,
    /// All dependencies done, waiting for resources
    Ready,
    /// Process running
    Running,
    /// Finished successfully
    Succeeded,
    /// Failed with error message
    Failed(String),
    /// Outputs already up to date
    Skipped,
}

impl JobStatus {
    /// True for statuses that let dependents proceed.
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Skipped)
    }
}

/// Execution metrics for a single job.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    pub start_time: Option<Instant>,
    pub duration: Option<Duration>,
    pub status: JobStatus,
}

impl JobMetrics {
    fn new(status: JobStatus) -> Self {
        Self {
            start_time: None,
            duration: None,
            status,
        }
    }
}

/// Tracks which jobs may start and how many resource units are free.
pub struct ExecutionPlanner {
    metrics: HashMap<JobId, JobMetrics>,
    /// Unfinished dependencies per pending job
    remaining: HashMap<JobId, usize>,
    /// Dependents per job, restricted to jobs in this plan
    dependents: HashMap<JobId, Vec<JobId>>,
    threads: HashMap<JobId, usize>,
    ready: VecDeque<JobId>,
    /// Total resource units
    cores: usize,
    /// Units held by running jobs
    in_use: usize,
    running: usize,
    peak_running: usize,
}

impl ExecutionPlanner {
    /// Plans the selected jobs of `dag`. Jobs the staleness pass considered
    /// up to date start out Skipped.
    ///
    /// # Arguments
    ///
    /// * `dag` - The job graph
    /// * `report` - Staleness verdicts for the selected jobs
    /// * `cores` - Resource budget (at least 1)
    pub fn new(dag: &Dag, report: &StalenessReport, cores: usize) -> Self {
        let cores = cores.max(1);
        let mut planner = Self {
            metrics: HashMap::new(),
            remaining: HashMap::new(),
            dependents: HashMap::new(),
            threads: HashMap::new(),
            ready: VecDeque::new(),
            cores,
            in_use: 0,
            running: 0,
            peak_running: 0,
        };

        for id in report.fresh_jobs() {
            planner.metrics.insert(id, JobMetrics::new(JobStatus::Skipped));
        }

        for id in report.stale_jobs() {
            let threads = dag.job(id).task.threads.clamp(1, cores);
            planner.threads.insert(id, threads);

            let pending: Vec<JobId> = dag
                .dependencies(id)
                .iter()
                .copied()
                .filter(|dep| report.is_stale(*dep))
                .collect();
            for &dep in &pending {
                planner.dependents.entry(dep).or_default().push(id);
            }

            if pending.is_empty() {
                planner.ready.push_back(id);
                planner.metrics.insert(id, JobMetrics::new(JobStatus::Ready));
            } else {
                planner.remaining.insert(id, pending.len());
                planner.metrics.insert(id, JobMetrics::new(JobStatus::Pending));
            }
        }

        debug!(
            "Planned {} job(s) to run with {} resource unit(s)",
            planner.threads.len(),
            cores
        );
        planner
    }

    /// Takes the first ready job whose thread count fits the free units.
    ///
    /// Later ready jobs may start ahead of a larger one that does not fit.
    pub fn next_ready(&mut self) -> Option<JobId> {
        let free = self.cores.saturating_sub(self.in_use);
        let position = self
            .ready
            .iter()
            .position(|id| self.threads.get(id).copied().unwrap_or(1) <= free)?;
        self.ready.remove(position)
    }

    /// Marks a job as running and takes its resource units.
    pub fn mark_running(&mut self, id: JobId) {
        let threads = self.threads.get(&id).copied().unwrap_or(1);
        self.in_use += threads;
        self.running += 1;
        self.peak_running = self.peak_running.max(self.running);

        debug!(
            "Job {} started using {} unit(s) (total: {}/{})",
            id, threads, self.in_use, self.cores
        );

        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.start_time = Some(Instant::now());
            metrics.status = JobStatus::Running;
        }
    }

    fn release(&mut self, id: JobId, status: JobStatus) {
        let threads = self.threads.get(&id).copied().unwrap_or(1);
        self.in_use = self.in_use.saturating_sub(threads);
        self.running = self.running.saturating_sub(1);

        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.duration = metrics.start_time.map(|start| start.elapsed());
            metrics.status = status;
        }
    }

    /// Marks a job as succeeded and moves dependents whose last
    /// dependency this was into the ready queue.
    pub fn mark_succeeded(&mut self, id: JobId) {
        self.release(id, JobStatus::Succeeded);

        let dependents = self.dependents.get(&id).cloned().unwrap_or_default();
        for dependent in dependents {
            let Some(count) = self.remaining.get_mut(&dependent) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.remaining.remove(&dependent);
                self.ready.push_back(dependent);
                if let Some(metrics) = self.metrics.get_mut(&dependent) {
                    metrics.status = JobStatus::Ready;
                }
            }
        }
    }

    /// Marks a job as failed. Its dependents stay pending for good.
    pub fn mark_failed(&mut self, id: JobId, error: String) {
        self.release(id, JobStatus::Failed(error));
    }

    /// Number of jobs currently running.
    pub fn running(&self) -> usize {
        self.running
    }

    /// Highest number of jobs that ran at the same time.
    pub fn peak_running(&self) -> usize {
        self.peak_running
    }

    pub fn status(&self, id: JobId) -> Option<&JobStatus> {
        self.metrics.get(&id).map(|m| &m.status)
    }

    /// Consumes the planner, returning the final metrics.
    pub fn into_metrics(self) -> HashMap<JobId, JobMetrics> {
        self.metrics
    }
}
