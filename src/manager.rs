//! C4: turns a set of `TransformConfiguration`s into an ordered, executable
//! list, validating topological feasibility ahead of the orchestrator's own
//! re-verification at DAG-build time.

use crate::configuration::TransformConfiguration;
use crate::error::{ConfigError, EngineResult};
use crate::transform::TransformBase;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A compiled description handed to the engine by the (out-of-scope)
/// front-end: one configuration per node, plus a factory turning a
/// configuration into its executable transform object.
pub struct TransformManager {
    configurations: Vec<TransformConfiguration>,
    factory: Box<dyn Fn(TransformConfiguration) -> Arc<dyn TransformBase>>,
}

impl TransformManager {
    pub fn new(factory: impl Fn(TransformConfiguration) -> Arc<dyn TransformBase> + 'static) -> Self {
        Self {
            configurations: Vec::new(),
            factory: Box::new(factory),
        }
    }

    /// Idempotent append, used by the orchestrator for auto-inserted helper
    /// transforms (e.g. a compiler-synthesized `static_cast`).
    pub fn insert(&mut self, cfg: TransformConfiguration) -> EngineResult<&TransformConfiguration> {
        if self.configurations.iter().any(|c| c.id == cfg.id) {
            return Err(ConfigError::DuplicateId(cfg.id).into());
        }
        self.configurations.push(cfg);
        Ok(self.configurations.last().unwrap())
    }

    /// Validates that every `NodeRef` input points at a configuration
    /// registered earlier, topologically sorting first if the input order
    /// isn't already valid, then rejecting true cycles.
    fn topologically_ordered(&self) -> EngineResult<Vec<usize>> {
        let index_of: HashMap<&str, usize> = self
            .configurations
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.configurations.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.configurations.len()];
        for (i, cfg) in self.configurations.iter().enumerate() {
            for dep in cfg.node_dependencies() {
                let Some(&producer) = index_of.get(dep.node_id.as_str()) else {
                    return Err(ConfigError::MissingHandle {
                        transform_id: cfg.id.clone(),
                        handle: dep.column_id(),
                    }
                    .into());
                };
                dependents[producer].push(i);
                in_degree[i] += 1;
            }
        }

        let mut queue: std::collections::VecDeque<usize> = (0..self.configurations.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.configurations.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.configurations.len() {
            let remaining: Vec<String> = (0..self.configurations.len())
                .filter(|i| !order.contains(i))
                .map(|i| self.configurations[i].id.clone())
                .collect();
            return Err(ConfigError::CircularDependency(remaining).into());
        }

        Ok(order)
    }

    /// `BuildTransforms`: the executable transforms, one per configuration,
    /// in a valid topological order. This is what the orchestrator registers
    /// nodes from.
    pub fn build_transforms(self) -> EngineResult<Vec<Arc<dyn TransformBase>>> {
        let order = self.topologically_ordered()?;
        let mut seen: HashSet<String> = HashSet::new();
        for cfg in &self.configurations {
            if !seen.insert(cfg.id.clone()) {
                return Err(ConfigError::DuplicateId(cfg.id.clone()).into());
            }
        }
        let mut configurations = self.configurations;
        let factory = self.factory;

        // Take configurations out in topological order without re-cloning;
        // `order` indexes into the original Vec, so drain via swap-remove
        // in reverse-sorted order to keep remaining indices stable.
        let mut by_index: Vec<Option<TransformConfiguration>> =
            configurations.drain(..).map(Some).collect();
        let mut out = Vec::with_capacity(order.len());
        for idx in order {
            let cfg = by_index[idx].take().expect("each index visited once");
            out.push((factory)(cfg));
        }
        Ok(out)
    }
}
