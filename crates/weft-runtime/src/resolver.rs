use std::collections::{HashMap, HashSet};

use weft_core::{Result, WeftError, WorkflowDefinition};

/// Ordered execution layers. Every step in a layer has all of its
/// dependencies in earlier layers.
pub type ExecutionLayers = Vec<Vec<String>>;

/// Turns a definition's dependency graph into execution layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Group steps into layers with Kahn's algorithm.
    ///
    /// Steps inside a layer keep definition order. A graph that stops making
    /// progress fails with `UnresolvableGraph` instead of looping.
    pub fn resolve(&self, definition: &WorkflowDefinition) -> Result<ExecutionLayers> {
        let order: Vec<&str> = definition.step_ids().collect();
        layers(&order, |id| definition.dependencies_of(id).collect())
    }

    /// Whether every dependency of `step_id` is in `completed`.
    pub fn dependencies_satisfied(
        &self,
        definition: &WorkflowDefinition,
        step_id: &str,
        completed: &HashSet<String>,
    ) -> bool {
        definition
            .dependencies_of(step_id)
            .all(|dep| completed.contains(dep))
    }

    /// Steps not yet in `completed` whose dependencies all are.
    pub fn executable_steps<'a>(
        &self,
        definition: &'a WorkflowDefinition,
        completed: &HashSet<String>,
    ) -> Vec<&'a str> {
        definition
            .step_ids()
            .filter(|id| !completed.contains(*id))
            .filter(|id| self.dependencies_satisfied(definition, id, completed))
            .collect()
    }

    /// Steps with no dependencies.
    pub fn root_steps<'a>(&self, definition: &'a WorkflowDefinition) -> Vec<&'a str> {
        definition.root_steps().collect()
    }
}

fn layers<'a, F>(order: &[&'a str], dependencies_of: F) -> Result<ExecutionLayers>
where
    F: Fn(&'a str) -> Vec<&'a str>,
{
    let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::with_capacity(order.len());

    for &id in order {
        let deps = dependencies_of(id);
        in_degree.insert(id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut processed: HashSet<&str> = HashSet::with_capacity(order.len());
    let mut result = Vec::new();

    while processed.len() < order.len() {
        let frontier: Vec<&str> = order
            .iter()
            .copied()
            .filter(|id| !processed.contains(id) && in_degree.get(id) == Some(&0))
            .collect();

        if frontier.is_empty() {
            let remaining = order
                .iter()
                .filter(|id| !processed.contains(*id))
                .map(|id| id.to_string())
                .collect();
            return Err(WeftError::UnresolvableGraph { remaining });
        }

        for &id in &frontier {
            processed.insert(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }

        result.push(frontier.into_iter().map(str::to_string).collect());
    }

    Ok(result)
}
