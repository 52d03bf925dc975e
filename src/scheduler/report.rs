//! End-of-run report.

use serde::Serialize;
use std::fmt::Write as _;

use crate::topology::{DisplayUrl, ResourceKind};

use super::state::{FailureReason, NodeState};

/// One applied state change, in the order the scheduler applied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub seq: usize,
    pub node: String,
    pub from: NodeState,
    pub to: NodeState,
}

/// Final state of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub state: NodeState,
    /// The node's own error, if it failed by itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Nodes that never started because this one failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<DisplayUrl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub nodes: Vec<NodeReport>,
    pub transitions: Vec<Transition>,
}

impl RunReport {
    /// True when no node failed for any reason.
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| !n.state.is_failed())
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Nodes that failed on their own (not blocked or cancelled).
    pub fn root_failures(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.state, NodeState::Failed(FailureReason::Own { .. })))
    }

    /// Sequence number at which `node` entered a state with `label`.
    pub fn entered(&self, node: &str, label: &str) -> Option<usize> {
        self.transitions
            .iter()
            .find(|t| t.node == node && t.to.label() == label)
            .map(|t| t.seq)
    }

    /// Human-readable summary: one line per node, its URLs beneath it and
    /// the root cause of every failure.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let width = self
            .nodes
            .iter()
            .map(|n| n.name.len())
            .max()
            .unwrap_or(0)
            .max(4);

        for node in &self.nodes {
            let _ = write!(
                out,
                "  {:<width$}  {:<10} {}",
                node.name,
                node.kind.label(),
                node.state.label(),
                width = width
            );
            match &node.state {
                NodeState::Failed(FailureReason::Blocked { upstream }) => {
                    let _ = write!(out, " (waiting on {})", upstream);
                }
                NodeState::Failed(FailureReason::Own { error }) => {
                    let _ = write!(out, ": {}", error);
                }
                _ => {}
            }
            out.push('\n');
            for url in &node.urls {
                let _ = writeln!(out, "  {:<width$}    {}: {}", "", url.label, url.url, width = width);
            }
        }

        for node in self.root_failures() {
            if !node.blocked.is_empty() {
                let _ = writeln!(
                    out,
                    "\n{} failed; not started: {}",
                    node.name,
                    node.blocked.join(", ")
                );
            }
        }
        out
    }
}
