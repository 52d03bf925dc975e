//! Dependency graph over resource descriptors.
//!
//! Edges point from a predecessor to the node that waits on it:
//! `(from = engine, to = database, ReadyDependency)` means the database
//! starts only once the engine is Ready.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Result, StagehandError};

use super::descriptor::ResourceDescriptor;

/// What a dependent waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Predecessor must be `Ready`.
    ReadyDependency,
    /// Predecessor must be `Completed`.
    CompletionDependency,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Directed graph of declared resources.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Declaration order, used for deterministic iteration.
    order: Vec<String>,
    nodes: HashMap<String, ResourceDescriptor>,
    edges: Vec<DependencyEdge>,
    /// node -> indices of edges pointing at it
    incoming: HashMap<String, Vec<usize>>,
    /// node -> indices of edges leaving it
    outgoing: HashMap<String, Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, descriptor: ResourceDescriptor) -> Result<()> {
        if self.nodes.contains_key(&descriptor.name) {
            return Err(StagehandError::DuplicateNode(descriptor.name));
        }
        let name = descriptor.name.clone();
        self.order.push(name.clone());
        self.incoming.insert(name.clone(), Vec::new());
        self.outgoing.insert(name.clone(), Vec::new());
        self.nodes.insert(name, descriptor);
        Ok(())
    }

    /// Add an edge. Exact duplicates are ignored; both endpoints must exist.
    pub fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) -> Result<()> {
        for end in [from, to] {
            if !self.nodes.contains_key(end) {
                return Err(StagehandError::UnknownNode(end.to_string()));
            }
        }
        let edge = DependencyEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        };
        if self.edges.contains(&edge) {
            return Ok(());
        }
        let idx = self.edges.len();
        self.edges.push(edge);
        self.outgoing.entry(from.to_string()).or_default().push(idx);
        self.incoming.entry(to.to_string()).or_default().push(idx);
        Ok(())
    }

    /// Check the graph can be scheduled.
    ///
    /// Fails with `Cycle` carrying the offending path when a back-edge is
    /// found, or `Unsatisfiable` when an edge waits for a state its
    /// predecessor can never reach.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = self.find_cycle() {
            return Err(StagehandError::Cycle { path });
        }

        for edge in &self.edges {
            let from_kind = self.nodes[&edge.from].kind;
            match edge.kind {
                EdgeKind::CompletionDependency if !from_kind.is_one_shot() => {
                    return Err(StagehandError::Unsatisfiable(format!(
                        "'{}' waits for completion of '{}', a long-running {}",
                        edge.to, edge.from, from_kind
                    )));
                }
                EdgeKind::ReadyDependency if from_kind.is_one_shot() => {
                    return Err(StagehandError::Unsatisfiable(format!(
                        "'{}' waits for '{}' to be ready, but a {} only completes",
                        edge.to, edge.from, from_kind
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Depth-first search with three-colour marking. Returns the first cycle
    /// found as `[n0, n1, ..., n0]`.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> =
            self.order.iter().map(|n| (n.as_str(), Mark::White)).collect();
        let mut stack: Vec<&str> = Vec::new();

        for start in &self.order {
            if marks[start.as_str()] == Mark::White {
                if let Some(cycle) = self.visit(start, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::Gray);
        stack.push(node);

        for &idx in &self.outgoing[node] {
            let next = self.edges[idx].to.as_str();
            match marks[next] {
                Mark::White => {
                    if let Some(cycle) = self.visit(next, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Gray => {
                    // `next` is on the current path: the cycle is the stack
                    // suffix starting at it.
                    let pos = stack.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[pos..].iter().map(|n| n.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                Mark::Black => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Black);
        None
    }

    pub fn node(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.nodes.get(name)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.order.iter().map(move |n| &self.nodes[n])
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Edges the given node waits on.
    pub fn predecessors(&self, name: &str) -> impl Iterator<Item = &DependencyEdge> {
        self.incoming
            .get(name)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.edges[idx])
    }

    /// Edges leaving the given node.
    pub fn dependents(&self, name: &str) -> impl Iterator<Item = &DependencyEdge> {
        self.outgoing
            .get(name)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.edges[idx])
    }

    /// Every node transitively waiting on `name`, breadth-first.
    pub fn downstream(&self, name: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        let mut out = Vec::new();

        while let Some(current) = queue.pop_front() {
            for edge in self.dependents(current) {
                if seen.insert(edge.to.as_str()) {
                    out.push(edge.to.clone());
                    queue.push_back(edge.to.as_str());
                }
            }
        }
        out
    }

    /// Group nodes into waves where every node only depends on earlier
    /// waves (Kahn's algorithm). Assumes `validate` passed.
    pub fn start_waves(&self) -> Vec<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|n| (n.as_str(), self.incoming[n].len()))
            .collect();
        let mut current: Vec<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree[n] == 0)
            .collect();
        let mut waves = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for node in &current {
                for edge in self.dependents(node) {
                    if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(edge.to.as_str());
                        }
                    }
                }
            }
            waves.push(current.iter().map(|n| n.to_string()).collect());
            next.sort_by_key(|n| self.order.iter().position(|o| o == n));
            current = next;
        }
        waves
    }

    /// Reverse-dependency order for teardown: dependents before the nodes
    /// they depend on.
    pub fn teardown_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self.start_waves().into_iter().flatten().collect();
        order.reverse();
        order
    }
}
