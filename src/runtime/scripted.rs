//! Scripted runtime for dry runs and tests.
//!
//! Nothing is started on the host. Each node follows an optional
//! [`NodeScript`]; unscripted nodes come up immediately.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{Result, StagehandError};
use crate::topology::{ResolvedParams, ResourceDescriptor};

use super::types::{InstanceHandle, JobStatus, NativeStatus, ResourceRuntime};

/// Behaviour of one node under [`ScriptedRuntime`].
#[derive(Debug, Clone, Default)]
pub struct NodeScript {
    /// Fail `instantiate` with this message.
    pub fail_instantiate: Option<String>,
    /// Delay before `instantiate` returns.
    pub instantiate_delay: Duration,
    /// Native probes report NotReady this many times first.
    pub not_ready_checks: u32,
    /// Job polls report Running this many times first.
    pub running_polls: u32,
    /// Final job outcome is a failure with this message.
    pub job_failure: Option<String>,
}

impl NodeScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_instantiate(mut self, message: &str) -> Self {
        self.fail_instantiate = Some(message.to_string());
        self
    }

    pub fn instantiate_delay(mut self, delay: Duration) -> Self {
        self.instantiate_delay = delay;
        self
    }

    pub fn ready_after(mut self, not_ready_checks: u32) -> Self {
        self.not_ready_checks = not_ready_checks;
        self
    }

    pub fn complete_after(mut self, running_polls: u32) -> Self {
        self.running_polls = running_polls;
        self
    }

    pub fn job_fails(mut self, message: &str) -> Self {
        self.job_failure = Some(message.to_string());
        self
    }
}

/// A call the scheduler made into the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Instantiate(String),
    ProbeNative(String),
    PollJob(String),
    Terminate(String),
}

impl RuntimeCall {
    pub fn node(&self) -> &str {
        match self {
            RuntimeCall::Instantiate(n)
            | RuntimeCall::ProbeNative(n)
            | RuntimeCall::PollJob(n)
            | RuntimeCall::Terminate(n) => n,
        }
    }
}

/// Runtime that follows per-node scripts and records every call.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    scripts: HashMap<String, NodeScript>,
    calls: Mutex<Vec<RuntimeCall>>,
    counters: Mutex<HashMap<String, u32>>,
    received: Mutex<HashMap<String, ResolvedParams>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, node: &str, script: NodeScript) -> Self {
        self.scripts.insert(node.to_string(), script);
        self
    }

    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().await.clone()
    }

    /// Parameters a node was instantiated with.
    pub async fn received(&self, node: &str) -> Option<ResolvedParams> {
        self.received.lock().await.get(node).cloned()
    }

    async fn record(&self, call: RuntimeCall) {
        self.calls.lock().await.push(call);
    }

    /// Increment and return how many times `node` has been checked.
    async fn bump(&self, node: &str) -> u32 {
        let mut counters = self.counters.lock().await;
        let count = counters.entry(node.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

#[async_trait]
impl ResourceRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn instantiate(
        &self,
        descriptor: &ResourceDescriptor,
        params: &ResolvedParams,
    ) -> Result<InstanceHandle> {
        let node = descriptor.name.as_str();
        self.record(RuntimeCall::Instantiate(node.to_string())).await;
        let script = self.scripts.get(node).cloned().unwrap_or_default();

        if !script.instantiate_delay.is_zero() {
            tokio::time::sleep(script.instantiate_delay).await;
        }
        if let Some(message) = script.fail_instantiate {
            return Err(StagehandError::adapter(node, message));
        }

        self.received
            .lock()
            .await
            .insert(node.to_string(), params.clone());

        let mut handle = InstanceHandle::new(node, format!("dry-run-{}", node));
        for endpoint in &descriptor.endpoints {
            handle.ports.insert(
                endpoint.name.clone(),
                endpoint.host_port.unwrap_or(endpoint.target_port),
            );
        }
        Ok(handle)
    }

    async fn probe_native(&self, handle: &InstanceHandle) -> Result<NativeStatus> {
        self.record(RuntimeCall::ProbeNative(handle.node.clone()))
            .await;
        let threshold = self
            .scripts
            .get(&handle.node)
            .map(|s| s.not_ready_checks)
            .unwrap_or(0);
        let count = self.bump(&handle.node).await;
        if count > threshold {
            Ok(NativeStatus::Ready)
        } else {
            Ok(NativeStatus::NotReady(format!("check {} of {}", count, threshold)))
        }
    }

    async fn poll_job(&self, handle: &InstanceHandle) -> Result<JobStatus> {
        self.record(RuntimeCall::PollJob(handle.node.clone())).await;
        let script = self.scripts.get(&handle.node).cloned().unwrap_or_default();
        let count = self.bump(&handle.node).await;
        if count <= script.running_polls {
            return Ok(JobStatus::Running);
        }
        Ok(match script.job_failure {
            Some(message) => JobStatus::Failed(message),
            None => JobStatus::Succeeded,
        })
    }

    async fn terminate(&self, handle: &InstanceHandle) -> Result<()> {
        self.record(RuntimeCall::Terminate(handle.node.clone())).await;
        Ok(())
    }

    async fn adopt(&self, descriptor: &ResourceDescriptor) -> Option<InstanceHandle> {
        let node = descriptor.name.as_str();
        let called = self
            .calls
            .lock()
            .await
            .contains(&RuntimeCall::Instantiate(node.to_string()));
        called.then(|| InstanceHandle::new(node, format!("dry-run-{}", node)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Endpoint, Protocol, ResourceKind};

    fn api() -> ResourceDescriptor {
        let mut desc = ResourceDescriptor::new("api", ResourceKind::Container);
        desc.endpoints.push(Endpoint {
            name: "http".into(),
            protocol: Protocol::Http,
            target_port: 5000,
            host_port: None,
        });
        desc
    }

    #[tokio::test]
    async fn test_unscripted_node_comes_up() {
        let runtime = ScriptedRuntime::new();
        let handle = runtime
            .instantiate(&api(), &ResolvedParams::default())
            .await
            .unwrap();
        assert_eq!(handle.ports["http"], 5000);
        assert_eq!(
            runtime.probe_native(&handle).await.unwrap(),
            NativeStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_instantiate_failure() {
        let runtime =
            ScriptedRuntime::new().script("api", NodeScript::new().fail_instantiate("no image"));
        let err = runtime
            .instantiate(&api(), &ResolvedParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Adapter { .. }));
        assert_eq!(runtime.calls().await, vec![RuntimeCall::Instantiate("api".into())]);
    }

    #[tokio::test]
    async fn test_ready_after_checks() {
        let runtime = ScriptedRuntime::new().script("sql", NodeScript::new().ready_after(2));
        let handle = InstanceHandle::new("sql", "sql");
        assert!(matches!(
            runtime.probe_native(&handle).await.unwrap(),
            NativeStatus::NotReady(_)
        ));
        assert!(matches!(
            runtime.probe_native(&handle).await.unwrap(),
            NativeStatus::NotReady(_)
        ));
        assert_eq!(
            runtime.probe_native(&handle).await.unwrap(),
            NativeStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_job_script() {
        let runtime = ScriptedRuntime::new()
            .script("migrate", NodeScript::new().complete_after(1))
            .script("seed", NodeScript::new().job_fails("exit 1"));
        let migrate = InstanceHandle::new("migrate", "migrate");
        assert_eq!(runtime.poll_job(&migrate).await.unwrap(), JobStatus::Running);
        assert_eq!(
            runtime.poll_job(&migrate).await.unwrap(),
            JobStatus::Succeeded
        );
        let seed = InstanceHandle::new("seed", "seed");
        assert_eq!(
            runtime.poll_job(&seed).await.unwrap(),
            JobStatus::Failed("exit 1".into())
        );
    }

    #[tokio::test]
    async fn test_adopt_only_what_was_instantiated() {
        let runtime = ScriptedRuntime::new();
        assert!(runtime.adopt(&api()).await.is_none());
        runtime
            .instantiate(&api(), &ResolvedParams::default())
            .await
            .unwrap();
        let handle = runtime.adopt(&api()).await.unwrap();
        assert_eq!(handle.instance_id, "dry-run-api");
    }

    #[tokio::test]
    async fn test_received_params_recorded() {
        let runtime = ScriptedRuntime::new();
        let mut params = ResolvedParams::default();
        params.env.insert("KEY".into(), "value".into());
        runtime.instantiate(&api(), &params).await.unwrap();
        assert_eq!(runtime.received("api").await.unwrap().env["KEY"], "value");
        assert!(runtime.received("other").await.is_none());
    }
}
