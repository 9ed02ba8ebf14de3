use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::spec::StepSpec;
use crate::{Result, WeftError};

/// How multi-step layers are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One step at a time; a layer stops at its first failure.
    #[default]
    Sequential,
    /// Every step of a layer runs concurrently to completion.
    Parallel,
}

/// What happens to completed steps when a workflow fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
    #[default]
    None,
    /// Undo completed steps, most recently completed first.
    ReverseOrder,
}

impl CompensationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ReverseOrder => "reverse_order",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for CompensationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "reverse_order" => Ok(Self::ReverseOrder),
            other => Err(format!("unknown compensation strategy '{}'", other)),
        }
    }
}

/// How completed steps without a compensation action are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationCoverage {
    /// Steps without an action are skipped.
    #[default]
    Lenient,
    /// Steps without an action count as compensation failures.
    Strict,
}

/// Immutable, validated workflow template.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    execution_mode: ExecutionMode,
    compensation_strategy: CompensationStrategy,
    compensation_coverage: CompensationCoverage,
    global_timeout: Option<Duration>,
    steps: Vec<StepSpec>,
    index: HashMap<String, usize>,
    dependencies: HashMap<String, BTreeSet<String>>,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn compensation_strategy(&self) -> CompensationStrategy {
        self.compensation_strategy
    }

    pub fn compensation_coverage(&self) -> CompensationCoverage {
        self.compensation_coverage
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Steps in the order they were added.
    pub fn steps(&self) -> impl Iterator<Item = &StepSpec> {
        self.steps.iter()
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id())
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn contains_step(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Direct dependencies of `id`. Unknown ids have none.
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flat_map(|deps| deps.iter().map(|d| d.as_str()))
    }

    /// Steps that directly depend on `id`, in insertion order.
    pub fn dependents_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.step_ids().filter(move |candidate| {
            self.dependencies
                .get(*candidate)
                .is_some_and(|deps| deps.contains(id))
        })
    }

    /// Steps with no dependencies.
    pub fn root_steps(&self) -> impl Iterator<Item = &str> {
        self.step_ids()
            .filter(|id| self.dependencies.get(*id).map_or(true, |d| d.is_empty()))
    }

    /// Steps that declare a compensation action.
    pub fn compensable_steps(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|s| s.has_compensation())
            .map(|s| s.id())
    }
}

/// Ordered builder for [`WorkflowDefinition`]. Steps added without explicit
/// dependencies have none.
pub struct WorkflowDefinitionBuilder {
    name: String,
    execution_mode: ExecutionMode,
    compensation_strategy: CompensationStrategy,
    compensation_coverage: CompensationCoverage,
    global_timeout: Option<Duration>,
    steps: Vec<StepSpec>,
    edges: Vec<(String, String)>,
}

impl WorkflowDefinitionBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution_mode: ExecutionMode::default(),
            compensation_strategy: CompensationStrategy::default(),
            compensation_coverage: CompensationCoverage::default(),
            global_timeout: None,
            steps: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn parallel(self) -> Self {
        self.execution_mode(ExecutionMode::Parallel)
    }

    pub fn compensation(mut self, strategy: CompensationStrategy) -> Self {
        self.compensation_strategy = strategy;
        self
    }

    pub fn compensation_coverage(mut self, coverage: CompensationCoverage) -> Self {
        self.compensation_coverage = coverage;
        self
    }

    pub fn global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }

    pub fn step(mut self, step: impl Into<StepSpec>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Add a step that runs after every step in `dependencies`.
    pub fn step_after<I, S>(mut self, step: impl Into<StepSpec>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let step = step.into();
        let id = step.id().to_string();
        self.steps.push(step);
        for dependency in dependencies {
            self.edges.push((id.clone(), dependency.into()));
        }
        self
    }

    /// Declare that `step` depends on `dependency`.
    pub fn depends_on(mut self, step: impl Into<String>, dependency: impl Into<String>) -> Self {
        self.edges.push((step.into(), dependency.into()));
        self
    }

    /// Validate and freeze the definition.
    ///
    /// Fails on duplicate step ids, edges naming unknown steps, self
    /// dependencies and cycles.
    pub fn build(self) -> Result<WorkflowDefinition> {
        if self.name.trim().is_empty() {
            return Err(WeftError::InvalidDefinition(
                "workflow name must not be empty".into(),
            ));
        }
        if self.steps.is_empty() {
            return Err(WeftError::InvalidDefinition(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        let mut index = HashMap::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.id().to_string(), i).is_some() {
                return Err(WeftError::DuplicateStep(step.id().to_string()));
            }
        }

        let mut dependencies: HashMap<String, BTreeSet<String>> = self
            .steps
            .iter()
            .map(|s| (s.id().to_string(), BTreeSet::new()))
            .collect();

        for (step, dependency) in self.edges {
            if !index.contains_key(&step) {
                return Err(WeftError::InvalidDefinition(format!(
                    "dependency declared for unknown step '{}'",
                    step
                )));
            }
            if step == dependency {
                return Err(WeftError::SelfDependency { step });
            }
            if !index.contains_key(&dependency) {
                return Err(WeftError::UnknownDependency { step, dependency });
            }
            if let Some(deps) = dependencies.get_mut(&step) {
                deps.insert(dependency);
            }
        }

        let order: Vec<&str> = self.steps.iter().map(|s| s.id()).collect();
        if let Some(cycle) = find_cycle(&order, &dependencies) {
            return Err(WeftError::CyclicDependency { cycle });
        }

        Ok(WorkflowDefinition {
            name: self.name,
            execution_mode: self.execution_mode,
            compensation_strategy: self.compensation_strategy,
            compensation_coverage: self.compensation_coverage,
            global_timeout: self.global_timeout,
            steps: self.steps,
            index,
            dependencies,
        })
    }
}

/// Iterative depth-first search. `on_path` mirrors the current path so the
/// back-edge check is constant time. Returns the steps forming the first
/// cycle found, closed by repeating its entry step.
fn find_cycle(order: &[&str], dependencies: &HashMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    let none = BTreeSet::new();
    let children = |node: &str| dependencies.get(node).unwrap_or(&none).iter();

    let mut visited: HashSet<&str> = HashSet::with_capacity(order.len());
    let mut on_path: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();
    let mut frames = Vec::new();

    for &root in order {
        if !visited.insert(root) {
            continue;
        }
        on_path.insert(root);
        path.push(root);
        frames.push(children(root));

        loop {
            let next = match frames.last_mut() {
                Some(pending) => pending.next(),
                None => break,
            };

            match next {
                Some(dep) => {
                    let dep = dep.as_str();
                    if on_path.contains(dep) {
                        let start = path.iter().position(|s| *s == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    if visited.insert(dep) {
                        on_path.insert(dep);
                        path.push(dep);
                        frames.push(children(dep));
                    }
                }
                None => {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(done);
                    }
                }
            }
        }
    }
    None
}
