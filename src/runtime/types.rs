//! Runtime adapter types.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::topology::{ResolvedParams, ResourceDescriptor};

/// A started instance of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceHandle {
    pub node: String,
    /// Adapter-specific identity (container name, job id, ...).
    pub instance_id: String,
    /// Host ports the adapter allocated, by endpoint name.
    pub ports: BTreeMap<String, u16>,
}

impl InstanceHandle {
    pub fn new(node: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            instance_id: instance_id.into(),
            ports: BTreeMap::new(),
        }
    }

    pub fn with_port(mut self, endpoint: impl Into<String>, port: u16) -> Self {
        self.ports.insert(endpoint.into(), port);
        self
    }
}

/// Engine-reported readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeStatus {
    Ready,
    NotReady(String),
}

/// State of a one-shot job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// Boundary to whatever actually starts, polls and stops resources.
///
/// Adapters never touch scheduler state; they only answer calls.
#[async_trait]
pub trait ResourceRuntime: Send + Sync {
    /// Runtime name for logs.
    fn name(&self) -> &str;

    /// Whether the runtime can be used on this machine.
    async fn is_available(&self) -> bool {
        true
    }

    /// Create the instance. Returns once it has been submitted.
    async fn instantiate(
        &self,
        descriptor: &ResourceDescriptor,
        params: &ResolvedParams,
    ) -> Result<InstanceHandle>;

    /// Engine-native readiness check.
    async fn probe_native(&self, handle: &InstanceHandle) -> Result<NativeStatus>;

    /// Progress of a one-shot job.
    async fn poll_job(&self, handle: &InstanceHandle) -> Result<JobStatus>;

    /// Stop and remove the instance.
    async fn terminate(&self, handle: &InstanceHandle) -> Result<()>;

    /// Handle for an instance whose `instantiate` call was abandoned before
    /// it returned, so teardown can still remove whatever it created.
    /// `None` when there is nothing to remove.
    async fn adopt(&self, descriptor: &ResourceDescriptor) -> Option<InstanceHandle> {
        let _ = descriptor;
        None
    }
}
