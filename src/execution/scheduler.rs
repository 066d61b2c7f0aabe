//! Execution scheduler - determines which ready steps to start next

use crate::core::pipeline::PipelineDefinition;
use std::collections::{BTreeSet, HashMap};

/// Exclusive named resources held by running steps.
///
/// A step gets all of its resources or none of them, so two steps can never
/// wait on each other.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    /// resource name -> step currently holding it
    held: HashMap<String, String>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every resource for the step, or none if any is taken
    pub fn try_acquire(&mut self, step_id: &str, resources: &[String]) -> bool {
        let mut sorted: Vec<&String> = resources.iter().collect();
        sorted.sort();
        sorted.dedup();

        if sorted.iter().any(|r| self.held.contains_key(r.as_str())) {
            return false;
        }
        for resource in sorted {
            self.held.insert(resource.clone(), step_id.to_string());
        }
        true
    }

    /// Release everything the step holds
    pub fn release(&mut self, step_id: &str) {
        self.held.retain(|_, holder| holder != step_id);
    }
}

/// Picks steps to dispatch from the ready set.
///
/// Lowest id first, never more than `max_concurrency` in flight, and never
/// two steps sharing a resource at the same time.
#[derive(Debug)]
pub struct ExecutionScheduler {
    max_concurrency: usize,
    locks: ResourceLocks,
}

impl ExecutionScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            locks: ResourceLocks::new(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Select steps to start now and reserve their resources.
    ///
    /// A ready step whose resources are busy is passed over; it stays ready
    /// and is reconsidered after the next completion.
    pub fn next_steps(
        &mut self,
        ready: &BTreeSet<String>,
        in_flight: usize,
        definition: &PipelineDefinition,
    ) -> Vec<String> {
        let mut remaining = self.max_concurrency.saturating_sub(in_flight);
        let mut selected = Vec::new();

        for step_id in ready {
            if remaining == 0 {
                break;
            }
            let Some(step) = definition.step(step_id) else {
                continue;
            };
            if self.locks.try_acquire(step_id, &step.resources) {
                selected.push(step_id.clone());
                remaining -= 1;
            }
        }

        selected
    }

    /// Free the slot's resources once a step stops running
    pub fn release(&mut self, step_id: &str) {
        self.locks.release(step_id);
    }
}
