//! Dependency ordering for extension startup.

use std::collections::{HashMap, HashSet};

use super::ExtensionError;

/// Declared dependencies of a set of extensions.
///
/// Nodes keep insertion order, which breaks ties so the computed order is
/// deterministic. Dependencies on names that are not nodes are not edges;
/// they are reported by [`DependencyGraph::missing`] and left to the caller.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its dependencies, in declaration order.
    pub fn add(&mut self, name: impl Into<String>, dependencies: impl IntoIterator<Item = String>) {
        let name = name.into();
        if !self.edges.contains_key(&name) {
            self.nodes.push(name.clone());
        }
        self.edges.insert(name, dependencies.into_iter().collect());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes that declare `name` as a dependency, in insertion order.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.dependencies(n).iter().any(|d| d == name))
            .cloned()
            .collect()
    }

    /// `(extension, dependency)` pairs naming a dependency that is not a node.
    pub fn missing(&self) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .flat_map(|n| {
                self.dependencies(n)
                    .iter()
                    .filter(|d| !self.contains(d))
                    .map(move |d| (n.clone(), d.clone()))
            })
            .collect()
    }

    /// Order in which every node comes after its dependencies.
    ///
    /// Fails with [`ExtensionError::DependencyCycle`] carrying the cycle as a
    /// closed path, e.g. `["a", "b", "a"]`.
    pub fn resolve(&self) -> Result<Vec<String>, ExtensionError> {
        let mut sorted = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in &self.nodes {
            self.visit(name, &mut visited, &mut stack, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn visit(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
        sorted: &mut Vec<String>,
    ) -> Result<(), ExtensionError> {
        if visited.contains(name) {
            return Ok(());
        }

        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(ExtensionError::DependencyCycle(cycle));
        }

        stack.push(name.to_string());
        for dep in self.dependencies(name) {
            if self.contains(dep) {
                self.visit(dep, visited, stack, sorted)?;
            }
        }
        stack.pop();

        visited.insert(name.to_string());
        sorted.push(name.to_string());
        Ok(())
    }
}
