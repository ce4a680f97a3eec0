//! Static checks on a valid plan's dependency graph.
//!
//! Execution is strictly in declaration order, so a dependency on a step
//! declared later is never satisfied and the dependent will always be
//! skipped. These warnings flag such plans without rejecting them.

use std::collections::HashMap;
use std::fmt;

use flowpilot_types::plan::PlanDefinition;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

/// A warning about a plan that is valid but will not run as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanLint {
    /// `step_id` depends on a step that is only reached after it.
    ForwardDependency { step_id: String, dependency: String },
    /// These steps depend on each other; none of them can ever run.
    DependencyCycle { steps: Vec<String> },
}

impl fmt::Display for PlanLint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanLint::ForwardDependency {
                step_id,
                dependency,
            } => write!(
                f,
                "step '{step_id}' depends on '{dependency}', which runs later; it will always be skipped"
            ),
            PlanLint::DependencyCycle { steps } => {
                write!(f, "dependency cycle between steps: {}", steps.join(" -> "))
            }
        }
    }
}

/// Lint a plan that has already passed validation.
///
/// Unknown dependencies are ignored here (validation reports them).
pub fn lint_plan(def: &PlanDefinition) -> Vec<PlanLint> {
    let steps = def.walk_steps();
    let position: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    // Edge from dependency -> dependent.
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    let mut lints = Vec::new();
    for (idx, step) in steps.iter().enumerate() {
        for dep in &step.dependencies {
            let Some(&dep_idx) = position.get(dep.as_str()) else {
                continue;
            };
            graph.add_edge(nodes[dep_idx], nodes[idx], ());
            if dep_idx >= idx {
                lints.push(PlanLint::ForwardDependency {
                    step_id: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.contains_edge(n, n));
        if is_cycle {
            let mut members: Vec<(usize, String)> = component
                .iter()
                .map(|&n| (n.index(), graph[n].to_string()))
                .collect();
            members.sort();
            lints.push(PlanLint::DependencyCycle {
                steps: members.into_iter().map(|(_, id)| id).collect(),
            });
        }
    }

    lints
}
