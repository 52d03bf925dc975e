//! Per-node lifecycle state.

use serde::Serialize;
use std::fmt;

/// Why a node ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The node itself failed (adapter error, probe timeout, ...).
    Own { error: String },
    /// A required predecessor failed; the node was never launched.
    Blocked { upstream: String },
    /// A stop request arrived before the node reached a terminal state.
    Cancelled,
}

/// `Pending -> Starting -> Probing -> Ready | Completed | Failed`.
///
/// No state is revisited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Starting,
    Probing,
    Ready,
    Completed,
    Failed(FailureReason),
}

impl NodeState {
    pub fn failed(error: impl Into<String>) -> Self {
        NodeState::Failed(FailureReason::Own {
            error: error.into(),
        })
    }

    pub fn blocked(upstream: impl Into<String>) -> Self {
        NodeState::Failed(FailureReason::Blocked {
            upstream: upstream.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Ready | NodeState::Completed | NodeState::Failed(_)
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeState::Failed(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, NodeState::Failed(FailureReason::Blocked { .. }))
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (Pending, Starting) => true,
            // Pending nodes only fail by inheritance or cancellation.
            (Pending, Failed(FailureReason::Blocked { .. } | FailureReason::Cancelled)) => true,
            (Starting, Probing) | (Starting, Failed(_)) => true,
            (Probing, Ready) | (Probing, Completed) | (Probing, Failed(_)) => true,
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeState::Pending => "Pending",
            NodeState::Starting => "Starting",
            NodeState::Probing => "Probing",
            NodeState::Ready => "Ready",
            NodeState::Completed => "Completed",
            NodeState::Failed(FailureReason::Blocked { .. }) => "Blocked",
            NodeState::Failed(FailureReason::Cancelled) => "Cancelled",
            NodeState::Failed(FailureReason::Own { .. }) => "Failed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
