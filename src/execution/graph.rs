//! Dependency graph - which steps may run given what has completed

use crate::core::{error::CycleError, pipeline::PipelineDefinition};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Read-only view of step dependencies, built once per run
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Step ids in declaration order
    ids: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph, rejecting dependency cycles.
    ///
    /// Uses a three-color depth-first traversal: an edge into a node that is
    /// still in progress closes a cycle, which is reported with its step ids.
    pub fn build(definition: &PipelineDefinition) -> Result<Self, CycleError> {
        let mut dependencies = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut ids = Vec::with_capacity(definition.len());

        for step in definition.steps() {
            ids.push(step.id.clone());
            dependents.entry(step.id.clone()).or_default();
            dependencies.insert(step.id.clone(), step.dependencies.clone());
        }
        for step in definition.steps() {
            for dep in &step.dependencies {
                dependents.entry(dep.clone()).or_default().push(step.id.clone());
            }
        }

        let graph = Self {
            ids,
            dependencies,
            dependents,
        };
        graph.check_cycles()?;
        Ok(graph)
    }

    fn check_cycles(&self) -> Result<(), CycleError> {
        let mut marks: HashMap<&str, Mark> =
            self.ids.iter().map(|id| (id.as_str(), Mark::Unvisited)).collect();

        // Sort for deterministic cycle reports
        let mut roots: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        roots.sort();

        for root in roots {
            if marks.get(root) != Some(&Mark::Unvisited) {
                continue;
            }

            // Explicit stack of (node, index of next dependency to follow)
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::InProgress);

            while let Some((node, next)) = stack.last().copied() {
                let deps = self.dependencies_of(node);
                if next >= deps.len() {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                }
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                let dep = deps[next].as_str();
                match marks.get(dep).copied().unwrap_or(Mark::Done) {
                    Mark::InProgress => {
                        let start = stack.iter().position(|(id, _)| *id == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|(id, _)| id.to_string()).collect();
                        path.push(dep.to_string());
                        return Err(CycleError { path });
                    }
                    Mark::Unvisited => {
                        marks.insert(dep, Mark::InProgress);
                        stack.push((dep, 0));
                    }
                    Mark::Done => {}
                }
            }
        }

        Ok(())
    }

    /// Step ids in declaration order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Direct dependencies of a step
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps that directly depend on the given step
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All steps that depend on the given step, directly or indirectly
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut queue: Vec<&str> = vec![id];

        while let Some(current) = queue.pop() {
            for dependent in self.dependents_of(current) {
                if result.insert(dependent.clone()) {
                    queue.push(dependent);
                }
            }
        }

        result
    }

    /// Steps whose dependencies are all in `completed` and which are neither
    /// completed themselves nor in `started`.
    ///
    /// Ordered by id, so the first entry is the dispatch tie-break winner.
    pub fn ready_steps(
        &self,
        completed: &HashSet<String>,
        started: &HashSet<String>,
    ) -> BTreeSet<String> {
        self.ids
            .iter()
            .filter(|id| !completed.contains(*id) && !started.contains(*id))
            .filter(|id| self.dependencies_of(id).iter().all(|dep| completed.contains(dep)))
            .cloned()
            .collect()
    }

    /// Topological order, lowest id first among steps available at each point
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self
            .ids
            .iter()
            .map(|id| (id.as_str(), self.dependencies_of(id).len()))
            .collect();

        let mut available: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.ids.len());
        while let Some(id) = available.pop_first() {
            order.push(id.to_string());
            for dependent in self.dependents_of(id) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        available.insert(dependent.as_str());
                    }
                }
            }
        }

        order
    }
}
