//! Error types for Stagehand
//!
//! This module defines all error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Errors split into two families:
//! - build-time errors (cycles, duplicate facts, malformed declarations) abort
//!   a run before any node launches
//! - node-local errors (probe timeouts, adapter failures) fail one node and
//!   block its dependents while independent branches keep running

use std::time::Duration;
use thiserror::Error;

/// The primary error type for Stagehand operations.
#[derive(Error, Debug)]
pub enum StagehandError {
    /// The dependency graph contains a cycle. `path` starts and ends on the
    /// same node, e.g. `[a, b, c, a]`.
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A fact was published twice for the same producer.
    #[error("Fact '{fact}' already published by '{node}'")]
    DuplicateFact { node: String, fact: String },

    /// A fact was resolved before its producer published it.
    #[error("Fact '{fact}' of '{node}' is not available yet")]
    PendingFact { node: String, fact: String },

    /// A health probe never succeeded within its retry budget.
    #[error("Health probe for '{node}' failed after {attempts} attempt(s) ({waited:?}): {last}")]
    ProbeTimeout {
        node: String,
        attempts: u32,
        waited: Duration,
        last: String,
    },

    /// The runtime adapter failed to start, poll, or complete a resource.
    #[error("Runtime error for '{node}': {message}")]
    Adapter { node: String, message: String },

    /// Two resources were declared with the same identity.
    #[error("Resource '{0}' is declared more than once")]
    DuplicateNode(String),

    /// An edge or fact reference names a resource that was never declared.
    #[error("Unknown resource '{0}'")]
    UnknownNode(String),

    /// A secret reference names a parameter that was never declared.
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// An edge can never be satisfied (e.g. waiting for completion of a
    /// long-running container).
    #[error("Unsatisfiable dependency: {0}")]
    Unsatisfiable(String),

    /// A fact export template is malformed or names something missing.
    #[error("Template error: {0}")]
    Template(String),

    /// A secret parameter could not be resolved.
    #[error("Secret error: {0}")]
    Secret(String),

    /// Configuration-related errors (invalid config, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required local assets for a topology are missing.
    #[error("Setup error: {0}")]
    Setup(String),

    /// The run was stopped before the node reached a terminal state.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StagehandError {
    /// Returns `true` for errors that invalidate the whole topology and must
    /// abort the run before any node launches.
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            StagehandError::Cycle { .. }
                | StagehandError::DuplicateFact { .. }
                | StagehandError::DuplicateNode(_)
                | StagehandError::UnknownNode(_)
                | StagehandError::UnknownParameter(_)
                | StagehandError::Unsatisfiable(_)
                | StagehandError::Template(_)
        )
    }

    /// Shorthand for an adapter error attributed to `node`.
    pub fn adapter(node: &str, message: impl Into<String>) -> Self {
        StagehandError::Adapter {
            node: node.to_string(),
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for Stagehand operations.
pub type Result<T> = std::result::Result<T, StagehandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = StagehandError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StagehandError = io_err.into();
        assert!(matches!(err, StagehandError::Io(_)));
    }

    #[test]
    fn test_build_time_classification() {
        assert!(StagehandError::Cycle { path: vec![] }.is_build_time());
        assert!(StagehandError::DuplicateFact {
            node: "db".into(),
            fact: "connection_string".into()
        }
        .is_build_time());
        assert!(StagehandError::Unsatisfiable("x".into()).is_build_time());

        assert!(!StagehandError::adapter("api", "exit 1").is_build_time());
        assert!(!StagehandError::ProbeTimeout {
            node: "api".into(),
            attempts: 4,
            waited: Duration::from_secs(1),
            last: "503".into(),
        }
        .is_build_time());
        assert!(!StagehandError::PendingFact {
            node: "db".into(),
            fact: "connection_string".into()
        }
        .is_build_time());
    }

    #[test]
    fn test_adapter_display() {
        let err = StagehandError::adapter("sql", "image not found");
        assert_eq!(err.to_string(), "Runtime error for 'sql': image not found");
    }

    #[test]
    fn test_probe_timeout_display_mentions_attempts() {
        let err = StagehandError::ProbeTimeout {
            node: "api".into(),
            attempts: 4,
            waited: Duration::from_millis(40),
            last: "status 503".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'api'"));
        assert!(msg.contains("4 attempt(s)"));
        assert!(msg.contains("status 503"));
    }
}
