//! Workflow Execution Engine
//!
//! The core engine that orchestrates a run:
//! - Identifier discovery and job graph construction
//! - Target selection and staleness evaluation
//! - Parallel job scheduling within a resource budget
//! - Graceful termination on SIGINT/SIGTERM

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use colored::Colorize;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::{self, JoinSet};

use crate::dag::{
    build, evaluate, Dag, FileStatCache, ForcePolicy, IdentifierSet, JobId, StalenessReport,
};
use crate::error::{
    ConfigError, JobFailure, Result, EXIT_INTERRUPTED, EXIT_JOB_FAILURE, EXIT_SUCCESS,
};
use crate::monitoring::{EventType, ExecutionTimeline, RuleTiming};
use crate::workflow::Workflow;

use super::planner::{ExecutionPlanner, JobStatus};
use super::step::{execute_job, remove_outputs};

/// Default grace period for outputs to appear after a job exits.
pub const DEFAULT_LATENCY_WAIT: Duration = Duration::from_secs(5);

/// Running job tasks, keyed back to the job each one executes.
struct JobTasks {
    set: JoinSet<std::result::Result<(), JobFailure>>,
    jobs: HashMap<task::Id, JobId>,
}

impl JobTasks {
    fn new() -> Self {
        Self {
            set: JoinSet::new(),
            jobs: HashMap::new(),
        }
    }

    fn spawn<F>(&mut self, job: JobId, future: F)
    where
        F: Future<Output = std::result::Result<(), JobFailure>> + Send + 'static,
    {
        let handle = self.set.spawn(future);
        self.jobs.insert(handle.id(), job);
    }

    fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Waits for the next task to finish. A task that panicked or was
    /// cancelled is reported as [`JobFailure::Aborted`] for its job.
    async fn join_next(&mut self) -> Option<(JobId, std::result::Result<(), JobFailure>)> {
        loop {
            let (task_id, result) = match self.set.join_next_with_id().await? {
                Ok((task_id, result)) => (task_id, result),
                Err(e) => (e.id(), Err(JobFailure::Aborted(e.to_string()))),
            };
            match self.jobs.remove(&task_id) {
                Some(job) => return Some((job, result)),
                None => error!("Finished task {} belongs to no job", task_id),
            }
        }
    }
}

/// What a run would do: the job graph, the identifiers it was expanded
/// over and which selected jobs are stale.
#[derive(Debug)]
pub struct Plan {
    pub dag: Dag,
    pub identifiers: IdentifierSet,
    pub staleness: StalenessReport,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final status of every selected job, by job name
    pub statuses: BTreeMap<String, JobStatus>,
    /// A termination signal stopped the run
    pub interrupted: bool,
    /// Only the plan was printed
    pub dry_run: bool,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    /// Highest number of jobs running at once
    pub peak_running: usize,
    pub rule_timings: BTreeMap<String, RuleTiming>,
}

impl RunReport {
    fn count(&self, predicate: impl Fn(&JobStatus) -> bool) -> usize {
        self.statuses.values().filter(|s| predicate(s)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| *s == JobStatus::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == JobStatus::Skipped)
    }

    /// Names of failed jobs.
    pub fn failed_jobs(&self) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, s)| matches!(s, JobStatus::Failed(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Jobs that ran, successfully or not.
    pub fn executed(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Succeeded | JobStatus::Failed(_)))
    }

    pub fn status(&self, job: &str) -> Option<&JobStatus> {
        self.statuses.get(job)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.dry_run || self.statuses.values().all(JobStatus::is_success) {
            EXIT_SUCCESS
        } else {
            EXIT_JOB_FAILURE
        }
    }

    /// Prints the end-of-run summary.
    pub fn print_summary(&self) {
        if self.dry_run {
            return;
        }

        let failed = self.failed_jobs();
        let not_run = self.statuses.len() - self.executed() - self.skipped();

        println!();
        if self.interrupted {
            println!("{}", "Workflow interrupted".yellow().bold());
        } else if failed.is_empty() && not_run == 0 {
            println!("{}", "Workflow completed successfully".green().bold());
        } else {
            println!(
                "{}",
                format!("Workflow finished with {} failed job(s)", failed.len())
                    .as_str()
                    .red()
                    .bold()
            );
        }
        println!("Started: {}", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        println!("Total execution time: {:.2?}", self.elapsed);
        println!(
            "Jobs: {} succeeded, {} failed, {} up to date, {} not run",
            self.succeeded(),
            failed.len(),
            self.skipped(),
            not_run
        );

        if !self.rule_timings.is_empty() {
            println!();
            for (rule, timing) in &self.rule_timings {
                println!(
                    "  {:20} {:>4} job(s) {:>4} failed  total {:>10.2?}  longest {:>10.2?}",
                    rule, timing.jobs, timing.failed, timing.total, timing.longest
                );
            }
        }

        for name in failed {
            if let Some(JobStatus::Failed(reason)) = self.statuses.get(name) {
                println!("  {} {}: {}", "FAILED".red(), name, reason);
            }
        }
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use rulerunner::execution::Engine;
/// use rulerunner::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("workflow.yaml", &[])?;
///     let mut engine = Engine::new(workflow);
///     engine.set_cores(4);
///
///     let runtime = tokio::runtime::Builder::new_current_thread()
///         .enable_all()
///         .build()?;
///     let report = runtime.block_on(engine.run())?;
///     std::process::exit(report.exit_code() as i32);
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    cores: usize,
    dry_run: bool,
    latency_wait: Duration,
    targets: Vec<String>,
    force: ForcePolicy,
}

impl Engine {
    /// Creates a new execution engine for a workflow.
    pub fn new(workflow: Workflow) -> Self {
        let targets = workflow.targets.clone();
        Self {
            workflow,
            cores: num_cpus::get(),
            dry_run: false,
            latency_wait: DEFAULT_LATENCY_WAIT,
            targets,
            force: ForcePolicy::default(),
        }
    }

    /// Sets the resource budget.
    pub fn set_cores(&mut self, cores: usize) {
        self.cores = cores.max(1);
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Sets how long to wait for outputs after a job exits.
    pub fn set_latency_wait(&mut self, wait: Duration) {
        self.latency_wait = wait;
    }

    /// Overrides the workflow's default targets. An empty list keeps them.
    pub fn set_targets(&mut self, targets: Vec<String>) {
        if !targets.is_empty() {
            self.targets = targets;
        }
    }

    /// Forces every selected job to run.
    pub fn set_forceall(&mut self, force: bool) {
        self.force.all = force;
    }

    /// Forces the jobs of the named rules to run.
    pub fn set_forcerun(&mut self, rules: &[String]) -> std::result::Result<(), ConfigError> {
        for rule in rules {
            self.workflow.registry.get(rule)?;
            self.force.rules.insert(rule.clone());
        }
        Ok(())
    }

    /// Discovers identifiers, builds the job graph and decides which
    /// selected jobs must run. Touches nothing on disk.
    pub fn plan(&self) -> std::result::Result<Plan, ConfigError> {
        let identifiers = match &self.workflow.identifiers {
            Some(source) => {
                let found = IdentifierSet::discover(&source.pattern, &source.root);
                if found.is_empty() {
                    warn!(
                        "No files under {} match '{}'",
                        source.root.display(),
                        source.pattern
                    );
                }
                found
            }
            None => IdentifierSet::empty(),
        };

        let mut cache = FileStatCache::new();
        let dag = build(
            &self.workflow.registry,
            &self.workflow.params,
            &identifiers,
            &mut cache,
        )?;
        let selected = dag.select_targets(&self.targets, &identifiers, &mut cache)?;
        let staleness = evaluate(&dag, &selected, &self.force, &mut cache);

        info!(
            "{} of {} selected job(s) need to run",
            staleness.stale_count(),
            staleness.selected_count()
        );

        Ok(Plan {
            dag,
            identifiers,
            staleness,
        })
    }

    /// Executes the workflow, stopping early on SIGINT or SIGTERM.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_with_shutdown(shutdown_signal()).await
    }

    /// Executes the workflow, stopping early once `shutdown` resolves.
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - The run finished; check [`RunReport::exit_code`]
    /// * `Err` - The workflow or job graph is invalid; nothing was run
    pub async fn run_with_shutdown<F>(&self, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        let started_at = Local::now();
        let start_time = Instant::now();
        let plan = self.plan()?;

        if self.dry_run {
            self.print_plan(&plan);
            return Ok(RunReport {
                statuses: self.initial_statuses(&plan),
                interrupted: false,
                dry_run: true,
                started_at,
                elapsed: start_time.elapsed(),
                peak_running: 0,
                rule_timings: BTreeMap::new(),
            });
        }

        if plan.staleness.stale_count() == 0 {
            info!("Nothing to be done: all outputs are up to date");
        }

        info!("Starting execution (cores: {})", self.cores);
        let (statuses, interrupted, peak_running, timeline) =
            self.execute(&plan, shutdown).await;

        debug!("{}", timeline.gantt_chart());

        Ok(RunReport {
            statuses,
            interrupted,
            dry_run: false,
            started_at,
            elapsed: start_time.elapsed(),
            peak_running,
            rule_timings: timeline.rule_summary(),
        })
    }

    /// Controller loop: launches ready jobs within the budget and waits for
    /// either a job to finish or a shutdown request.
    async fn execute<F>(
        &self,
        plan: &Plan,
        shutdown: F,
    ) -> (BTreeMap<String, JobStatus>, bool, usize, ExecutionTimeline)
    where
        F: Future<Output = ()>,
    {
        let dag = &plan.dag;
        let mut planner = ExecutionPlanner::new(dag, &plan.staleness, self.cores);
        let mut timeline = ExecutionTimeline::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JobTasks::new();
        let mut interrupted = false;

        tokio::pin!(shutdown);

        loop {
            if !interrupted {
                while let Some(id) = planner.next_ready() {
                    let job = dag.job(id);
                    let name = job.name();

                    match plan.staleness.reason(id) {
                        Some(reason) => info!("Starting job: {} ({})", name, reason),
                        None => info!("Starting job: {}", name),
                    }
                    timeline.add_event(name.clone(), job.rule.clone(), EventType::Started);
                    planner.mark_running(id);

                    let task = job.task.clone();
                    let stop = stop_rx.clone();
                    let wait = self.latency_wait;
                    tasks.spawn(id, async move {
                        execute_job(&name, &task, wait, stop).await
                    });
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                Some((id, result)) = tasks.join_next() => {
                    let job = dag.job(id);
                    match result {
                        Ok(()) => {
                            info!("Job '{}' completed successfully", job.name());
                            planner.mark_succeeded(id);
                            timeline.add_event(job.name(), job.rule.clone(), EventType::Completed);
                        }
                        Err(failure) => {
                            if let JobFailure::Aborted(_) = failure {
                                error!("Job '{}' failed: {}", job.name(), failure);
                                remove_outputs(job.outputs());
                            }
                            planner.mark_failed(id, failure.to_string());
                            timeline.add_event(job.name(), job.rule.clone(), EventType::Failed);
                        }
                    }
                },
                _ = &mut shutdown, if !interrupted => {
                    warn!(
                        "Termination requested; stopping {} running job(s)",
                        planner.running()
                    );
                    interrupted = true;
                    let _ = stop_tx.send(true);
                },
                else => break,
            }
        }

        let peak_running = planner.peak_running();
        let statuses = planner
            .into_metrics()
            .into_iter()
            .map(|(id, metrics)| (dag.job(id).name(), metrics.status))
            .collect();

        (statuses, interrupted, peak_running, timeline)
    }

    fn initial_statuses(&self, plan: &Plan) -> BTreeMap<String, JobStatus> {
        let stale: BTreeSet<JobId> = plan.staleness.stale_jobs().collect();
        plan.staleness
            .stale_jobs()
            .chain(plan.staleness.fresh_jobs())
            .map(|id| {
                let status = if stale.contains(&id) {
                    JobStatus::Pending
                } else {
                    JobStatus::Skipped
                };
                (plan.dag.job(id).name(), status)
            })
            .collect()
    }

    /// Prints the jobs a run would execute, in execution order.
    fn print_plan(&self, plan: &Plan) {
        let mut per_rule: BTreeMap<&str, usize> = BTreeMap::new();

        if !plan.identifiers.is_empty() {
            let names = plan.identifiers.names().join(", ");
            println!("{} identifier(s) over {{{}}}", plan.identifiers.len(), names);
        }

        for id in plan.staleness.stale_jobs() {
            let job = plan.dag.job(id);
            *per_rule.entry(job.rule.as_str()).or_default() += 1;

            println!();
            let name = job.name();
            println!("{} Job: {}", "[DRY RUN]".cyan().bold(), name.as_str().bold());
            if let Some(reason) = plan.staleness.reason(id) {
                println!("  Reason: {}", reason);
            }
            println!("  Command: {}", job.task.command_line());
            println!("  Input: {:?}", job.inputs());
            println!("  Output: {:?}", job.outputs());
            if let Some(log) = &job.task.log {
                println!("  Log: {}", log);
            }
            println!("  Threads: {}", job.task.threads);
        }

        println!();
        for (rule, count) in &per_rule {
            println!("  {:20} {:>4}", rule, count);
        }
        println!(
            "{} of {} job(s) would run",
            plan.staleness.stale_count(),
            plan.staleness.selected_count()
        );
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
