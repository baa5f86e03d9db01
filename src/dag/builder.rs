//! Dependency Graph Builder
//!
//! Expands every rule over the discovered identifiers into concrete jobs
//! and links them into a DAG by matching each job's inputs against the
//! outputs of other jobs.
//!
//! Checks performed while building:
//! - every wildcard a rule uses has a value for each identifier
//! - no two jobs declare the same output
//! - every input is either produced by a job or already on disk
//! - the graph has no cycles (a job reading its own output is a cycle)

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use log::{debug, info};

use crate::error::ConfigError;
use crate::workflow::wildcards::{self, discover_identifiers};
use crate::workflow::{
    Binding, InputPattern, ParamValue, ParameterStore, Pattern, RegisteredRule, RuleRegistry,
};
use crate::workflow::template::TemplateContext;

use super::job::{Job, JobId, TaskDescriptor};
use super::staleness::FileStatCache;

/// The identifier bindings a workflow is expanded over.
#[derive(Debug, Clone, Default)]
pub struct IdentifierSet {
    names: Vec<String>,
    bindings: Vec<Binding>,
}

impl IdentifierSet {
    /// No identifiers: only wildcard-free rules produce jobs.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scans `root` for files matching `pattern`.
    pub fn discover(pattern: &Pattern, root: &Path) -> Self {
        let names = pattern.wildcard_names().into_iter().map(String::from).collect();
        let bindings = discover_identifiers(pattern, root).into_iter().collect();
        Self { names, bindings }
    }

    pub fn from_bindings(names: Vec<String>, bindings: Vec<Binding>) -> Self {
        Self { names, bindings }
    }

    /// Wildcard names every binding carries.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Instantiates a pattern over every identifier. A pattern without
    /// wildcards yields itself.
    pub fn expand(&self, pattern: &Pattern) -> Result<Vec<String>, ConfigError> {
        if pattern.has_wildcards() {
            wildcards::expand(pattern, &self.bindings)
        } else {
            Ok(vec![pattern.as_str().to_string()])
        }
    }
}

/// An acyclic graph of jobs with producer -> consumer edges.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    jobs: Vec<Job>,
    dependencies: Vec<Vec<JobId>>,
    dependents: Vec<Vec<JobId>>,
    producers: HashMap<String, JobId>,
    order: Vec<JobId>,
}

impl Dag {
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs that must finish before `id` can start.
    pub fn dependencies(&self, id: JobId) -> &[JobId] {
        &self.dependencies[id]
    }

    /// Jobs that consume an output of `id`.
    pub fn dependents(&self, id: JobId) -> &[JobId] {
        &self.dependents[id]
    }

    /// The job declaring `path` as an output.
    pub fn producer_of(&self, path: &str) -> Option<JobId> {
        self.producers.get(path).copied()
    }

    /// All jobs, dependencies before dependents. Ties are broken by job id
    /// so the order is stable across runs.
    pub fn topological_order(&self) -> &[JobId] {
        &self.order
    }

    /// Selects the jobs needed to produce `targets`, plus all of their
    /// ancestors. Target patterns are expanded over `identifiers`.
    ///
    /// An empty target list selects every job. A target that no job
    /// produces is accepted only if it already exists.
    pub fn select_targets(
        &self,
        targets: &[String],
        identifiers: &IdentifierSet,
        cache: &mut FileStatCache,
    ) -> Result<BTreeSet<JobId>, ConfigError> {
        if targets.is_empty() {
            return Ok((0..self.jobs.len()).collect());
        }

        let mut selected = BTreeSet::new();
        for target in targets {
            let pattern = Pattern::parse(target)?;
            for path in identifiers.expand(&pattern)? {
                match self.producer_of(&path) {
                    Some(id) => self.collect_ancestors(id, &mut selected),
                    None if cache.exists(&path) => {
                        debug!("Target {} exists and has no producer", path);
                    }
                    None => return Err(ConfigError::MissingTarget(path)),
                }
            }
        }
        Ok(selected)
    }

    fn collect_ancestors(&self, id: JobId, selected: &mut BTreeSet<JobId>) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if selected.insert(current) {
                stack.extend(self.dependencies[current].iter().copied());
            }
        }
    }
}

/// Builds the job DAG.
///
/// # Example
///
/// ```rust,no_run
/// use rulerunner::dag::{build, FileStatCache, IdentifierSet};
/// use rulerunner::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("workflow.yaml", &[])?;
///     let dag = build(
///         &workflow.registry,
///         &workflow.params,
///         &IdentifierSet::empty(),
///         &mut FileStatCache::new(),
///     )?;
///     println!("{} jobs", dag.len());
///     Ok(())
/// }
/// ```
pub fn build(
    registry: &RuleRegistry,
    params: &ParameterStore,
    identifiers: &IdentifierSet,
    cache: &mut FileStatCache,
) -> Result<Dag, ConfigError> {
    let mut jobs: Vec<Job> = Vec::new();
    for rule in registry.rules() {
        for binding in rule_bindings(rule, identifiers)? {
            let task = instantiate(rule, &binding, params, identifiers)?;
            jobs.push(Job {
                id: jobs.len(),
                rule: rule.name().to_string(),
                binding,
                task,
            });
        }
    }

    let producers = index_outputs(&jobs)?;

    let mut dependencies: Vec<Vec<JobId>> = vec![Vec::new(); jobs.len()];
    let mut dependents: Vec<Vec<JobId>> = vec![Vec::new(); jobs.len()];

    for job in &jobs {
        let mut deps = BTreeSet::new();
        for input in job.inputs() {
            match producers.get(input) {
                Some(&producer) => {
                    deps.insert(producer);
                }
                None if cache.exists(input) => {}
                None => {
                    return Err(ConfigError::MissingExternalInput {
                        job: job.name(),
                        path: input.clone(),
                    })
                }
            }
        }
        for &dep in &deps {
            dependents[dep].push(job.id);
        }
        dependencies[job.id] = deps.into_iter().collect();
    }

    if let Some(cycle) = find_cycle(&dependents) {
        let names = cycle.into_iter().map(|id| jobs[id].name()).collect();
        return Err(ConfigError::CyclicDependency(names));
    }

    let order = topological_sort(&dependencies, &dependents);

    info!(
        "Dependency graph: {} jobs from {} rules",
        jobs.len(),
        registry.len()
    );
    debug!(
        "Topological order: {:?}",
        order.iter().map(|&id| jobs[id].name()).collect::<Vec<_>>()
    );

    Ok(Dag {
        jobs,
        dependencies,
        dependents,
        producers,
        order,
    })
}

/// Distinct bindings for a rule: the identifiers projected onto the
/// wildcards the rule uses.
fn rule_bindings(
    rule: &RegisteredRule,
    identifiers: &IdentifierSet,
) -> Result<Vec<Binding>, ConfigError> {
    if rule.wildcards.is_empty() {
        return Ok(vec![Binding::new()]);
    }

    for wildcard in &rule.wildcards {
        if !identifiers.names().contains(wildcard) {
            return Err(ConfigError::UnboundWildcard {
                context: format!("rule '{}'", rule.name()),
                wildcard: wildcard.clone(),
            });
        }
    }

    let mut bindings: Vec<Binding> = Vec::new();
    for identifier in identifiers.bindings() {
        let projected: Binding = rule
            .wildcards
            .iter()
            .filter_map(|w| identifier.get(w).map(|v| (w.clone(), v.clone())))
            .collect();
        if !bindings.contains(&projected) {
            bindings.push(projected);
        }
    }
    Ok(bindings)
}

fn push_unique(paths: &mut Vec<String>, path: String) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

/// Renders the task for one (rule, binding) pair.
fn instantiate(
    rule: &RegisteredRule,
    binding: &Binding,
    params: &ParameterStore,
    identifiers: &IdentifierSet,
) -> Result<TaskDescriptor, ConfigError> {
    let mut inputs = Vec::new();
    for input in &rule.inputs {
        match input {
            InputPattern::PerJob(pattern) => {
                push_unique(&mut inputs, pattern.instantiate(binding)?)
            }
            InputPattern::Expand(pattern) => {
                for path in identifiers.expand(pattern)? {
                    push_unique(&mut inputs, path);
                }
            }
        }
    }

    let mut outputs = Vec::new();
    for pattern in &rule.outputs {
        push_unique(&mut outputs, pattern.instantiate(binding)?);
    }

    let stdout = rule
        .stdout
        .as_ref()
        .map(|p| p.instantiate(binding))
        .transpose()?;
    if let Some(path) = &stdout {
        push_unique(&mut outputs, path.clone());
    }
    let log = rule.log.as_ref().map(|p| p.instantiate(binding)).transpose()?;

    let no_params = BTreeMap::new();
    let mut ctx = TemplateContext {
        rule: rule.name(),
        inputs: &inputs,
        outputs: &outputs,
        params: &no_params,
        config: params,
        binding,
        threads: rule.rule.threads,
        log: log.as_deref(),
    };

    let mut rendered_params = BTreeMap::new();
    for (name, value) in &rule.rule.params {
        let text = match value {
            ParamValue::Text(template) => ctx.render(template)?,
            other => other.to_string(),
        };
        rendered_params.insert(name.clone(), text);
    }

    ctx.params = &rendered_params;
    let args = ctx.render_args(&rule.rule.args)?;

    Ok(TaskDescriptor {
        program: rule.rule.tool.clone(),
        args,
        inputs,
        outputs,
        stdout,
        log,
        threads: rule.rule.threads,
    })
}

/// Maps every output path to its producing job.
fn index_outputs(jobs: &[Job]) -> Result<HashMap<String, JobId>, ConfigError> {
    let mut producers: HashMap<String, JobId> = HashMap::new();
    for job in jobs {
        for output in job.outputs() {
            if let Some(&first) = producers.get(output) {
                return Err(ConfigError::OutputCollision {
                    path: output.clone(),
                    first: jobs[first].name(),
                    second: job.name(),
                });
            }
            producers.insert(output.clone(), job.id);
        }
    }
    Ok(producers)
}

/// Depth-first search with an explicit recursion stack.
///
/// Returns the jobs on the first cycle found, with the first job repeated
/// at the end.
fn find_cycle(dependents: &[Vec<JobId>]) -> Option<Vec<JobId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; dependents.len()];

    for root in 0..dependents.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // (job, index of the next edge to follow)
        let mut stack: Vec<(JobId, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnStack;

        while let Some(top) = stack.last_mut() {
            let (node, edge) = *top;
            top.1 += 1;

            if let Some(&child) = dependents[node].get(edge) {
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::OnStack;
                        stack.push((child, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|&(id, _)| id == child)?;
                        let mut cycle: Vec<JobId> =
                            stack[start..].iter().map(|&(id, _)| id).collect();
                        cycle.push(child);
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    None
}

/// Kahn's algorithm, always taking the lowest ready job id.
fn topological_sort(dependencies: &[Vec<JobId>], dependents: &[Vec<JobId>]) -> Vec<JobId> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<JobId> = (0..dependencies.len())
        .filter(|&id| in_degree[id] == 0)
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }
    order
}
