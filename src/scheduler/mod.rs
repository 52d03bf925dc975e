//! Startup scheduler.
//!
//! The scheduler owns all run state. It walks the dependency graph, launches
//! every node whose predecessors have reached their required state, and
//! advances node state from the events its per-node tasks report back over
//! a channel. Tasks never touch shared state: only the scheduler mutates
//! `NodeState` and publishes facts.
//!
//! Every wait is bounded: instantiation and jobs by the scheduler settings,
//! probes by their retry budget and per-check timeout.

mod report;
mod state;

pub use report::{NodeReport, RunReport, Transition};
pub use state::{FailureReason, NodeState};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::{Result, StagehandError};
use crate::facts::{self, FactStore};
use crate::health::{wait_until_ready, ProbeClient, ProbeOutcome, ProbePolicy, ProbeSpec};
use crate::runtime::{InstanceHandle, JobStatus, NativeStatus, ResourceRuntime};
use crate::secrets::{SecretCache, SecretSource};
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingSink};
use crate::topology::{EdgeKind, ResolvedParams, ResourceDescriptor, Topology};

const EVENT_BUFFER: usize = 64;

// ============================================================================
// Settings
// ============================================================================

/// Bounds for every wait the scheduler performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub probe: ProbePolicy,
    pub instantiate_timeout: Duration,
    pub job_timeout: Duration,
    pub job_poll_interval: Duration,
    pub teardown_timeout: Duration,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            probe: ProbePolicy::from(&config.probe),
            instantiate_timeout: config.scheduler.instantiate_timeout(),
            job_timeout: config.scheduler.job_timeout(),
            job_poll_interval: config.scheduler.job_poll_interval(),
            teardown_timeout: config.scheduler.teardown_timeout(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

// ============================================================================
// Shutdown
// ============================================================================

/// Requests that a running scheduler stop. Cloneable; safe to trigger before
/// or during `run`.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

// ============================================================================
// Events
// ============================================================================

/// What a node task reports back to the scheduler.
#[derive(Debug)]
enum NodeEvent {
    Instantiated {
        node: String,
        handle: InstanceHandle,
    },
    Ready {
        node: String,
    },
    Completed {
        node: String,
    },
    Failed {
        node: String,
        error: String,
    },
}

/// Collaborators shared by all node tasks.
struct TaskContext {
    runtime: Arc<dyn ResourceRuntime>,
    probes: Arc<dyn ProbeClient>,
    sink: Arc<dyn TelemetrySink>,
    settings: SchedulerSettings,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Drives one run of a topology.
///
/// ```
/// use std::sync::Arc;
/// use stagehand::health::ScriptedProbeClient;
/// use stagehand::runtime::ScriptedRuntime;
/// use stagehand::scheduler::{Scheduler, SchedulerSettings};
/// use stagehand::secrets::GeneratedSecretSource;
/// use stagehand::topology::TopologyBuilder;
///
/// # tokio_test::block_on(async {
/// let mut builder = TopologyBuilder::new();
/// builder.add_container("web", "nginx", "alpine");
/// let mut scheduler = Scheduler::new(
///     builder.build().unwrap(),
///     Arc::new(ScriptedRuntime::new()),
///     Arc::new(ScriptedProbeClient::new()),
///     Arc::new(GeneratedSecretSource),
///     SchedulerSettings::default(),
/// );
/// let report = scheduler.run().await;
/// assert!(report.is_success());
/// # });
/// ```
pub struct Scheduler {
    topology: Topology,
    ctx: Arc<TaskContext>,
    secrets: SecretCache,
    states: HashMap<String, NodeState>,
    facts: FactStore,
    handles: HashMap<String, InstanceHandle>,
    resolved: HashMap<String, ResolvedParams>,
    transitions: Vec<Transition>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        topology: Topology,
        runtime: Arc<dyn ResourceRuntime>,
        probes: Arc<dyn ProbeClient>,
        secrets: Arc<dyn SecretSource>,
        settings: SchedulerSettings,
    ) -> Self {
        let states = topology
            .graph()
            .names()
            .iter()
            .map(|n| (n.clone(), NodeState::Pending))
            .collect();
        let secrets = SecretCache::new(secrets, topology.parameter_names());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            topology,
            ctx: Arc::new(TaskContext {
                runtime,
                probes,
                sink: Arc::new(TracingSink),
                settings,
            }),
            secrets,
            states,
            facts: FactStore::new(),
            handles: HashMap::new(),
            resolved: HashMap::new(),
            transitions: Vec::new(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Replace the telemetry sink (defaults to [`TracingSink`]).
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.sink = sink;
        }
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn state(&self, node: &str) -> Option<&NodeState> {
        self.states.get(node)
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    /// Start every node and drive the run until each node is terminal or a
    /// stop is requested.
    pub async fn run(&mut self) -> RunReport {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut tasks = JoinSet::new();
        let mut shutdown_rx = self.shutdown_rx.clone();

        crate::log_component!(
            info,
            "scheduler",
            "Starting topology",
            nodes = self.topology.graph().len(),
            runtime = self.ctx.runtime.name()
        );

        loop {
            if *shutdown_rx.borrow_and_update() {
                crate::log_component!(warn, "scheduler", "Stop requested, cancelling run");
                self.cancel(&mut tasks, &mut rx).await;
                break;
            }

            self.launch_ready(&tx, &mut tasks);

            if !self.has_in_flight() {
                break;
            }

            tokio::select! {
                // The loop head re-reads the flag.
                _ = shutdown_rx.changed() => {}
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }

        let report = self.report();
        crate::log_component!(
            info,
            "scheduler",
            "Run finished",
            success = report.is_success()
        );
        report
    }

    /// Terminate every started instance, dependents first.
    ///
    /// Best-effort: each call is bounded by the teardown timeout and failures
    /// are logged, not returned. Returns the nodes torn down, in order.
    pub async fn teardown(&mut self) -> Vec<String> {
        let mut done = Vec::new();
        for node in self.topology.graph().teardown_order() {
            let Some(handle) = self.handles.remove(&node) else {
                continue;
            };
            let timeout = self.ctx.settings.teardown_timeout;
            match tokio::time::timeout(timeout, self.ctx.runtime.terminate(&handle)).await {
                Ok(Ok(())) => {
                    crate::log_component!(info, "scheduler", "Terminated", node = node.as_str());
                }
                Ok(Err(e)) => {
                    crate::log_component!(
                        warn,
                        "scheduler",
                        "Teardown failed",
                        node = node.as_str(),
                        error = e.to_string().as_str()
                    );
                }
                Err(_) => {
                    crate::log_component!(
                        warn,
                        "scheduler",
                        "Teardown timed out",
                        node = node.as_str()
                    );
                }
            }
            done.push(node);
        }
        done
    }

    // ------------------------------------------------------------------------
    // Launching
    // ------------------------------------------------------------------------

    /// A node may start once every Ready predecessor is Ready and every
    /// Completion predecessor is Completed.
    fn is_launchable(&self, node: &str) -> bool {
        if self.states.get(node) != Some(&NodeState::Pending) {
            return false;
        }
        self.topology
            .graph()
            .predecessors(node)
            .all(|edge| match (edge.kind, self.states.get(&edge.from)) {
                (EdgeKind::ReadyDependency, Some(NodeState::Ready)) => true,
                (EdgeKind::CompletionDependency, Some(NodeState::Completed)) => true,
                _ => false,
            })
    }

    fn launch_ready(&mut self, tx: &mpsc::Sender<NodeEvent>, tasks: &mut JoinSet<()>) {
        let launchable: Vec<String> = self
            .topology
            .graph()
            .names()
            .iter()
            .filter(|n| self.is_launchable(n))
            .cloned()
            .collect();

        for node in launchable {
            self.transition(&node, NodeState::Starting);

            let Some(descriptor) = self.topology.graph().node(&node).cloned() else {
                continue;
            };
            let resolved = match facts::resolve_params(&descriptor, &self.facts, &mut self.secrets)
            {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.fail(&node, e.to_string());
                    continue;
                }
            };
            self.resolved.insert(node.clone(), resolved.clone());

            let probe = self.topology.probe(&node).clone();
            let ctx = Arc::clone(&self.ctx);
            let tx = tx.clone();
            crate::log_component!(
                info,
                "scheduler",
                "Launching",
                node = node.as_str(),
                kind = descriptor.kind.label()
            );
            tasks.spawn(async move {
                drive_node(ctx, descriptor, probe, resolved, tx).await;
            });
        }
    }

    fn has_in_flight(&self) -> bool {
        self.states
            .values()
            .any(|s| matches!(s, NodeState::Starting | NodeState::Probing))
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Instantiated { node, handle } => {
                self.handles.insert(node.clone(), handle);
                self.transition(&node, NodeState::Probing);
            }
            NodeEvent::Ready { node } => match self.publish_facts(&node) {
                Ok(()) => {
                    self.transition(&node, NodeState::Ready);
                }
                Err(e) => self.fail(&node, e.to_string()),
            },
            NodeEvent::Completed { node } => {
                self.transition(&node, NodeState::Completed);
            }
            NodeEvent::Failed { node, error } => self.fail(&node, error),
        }
    }

    fn publish_facts(&mut self, node: &str) -> Result<()> {
        let descriptor = self
            .topology
            .graph()
            .node(node)
            .ok_or_else(|| StagehandError::UnknownNode(node.to_string()))?;
        let handle = self
            .handles
            .get(node)
            .ok_or_else(|| StagehandError::adapter(node, "ready without an instance"))?;
        let resolved = self.resolved.get(node).cloned().unwrap_or_default();
        for (fact, value) in facts::derive_facts(descriptor, handle, &resolved)? {
            self.facts.publish(node, &fact, value)?;
        }
        Ok(())
    }

    /// Mark `node` failed and block everything downstream of it.
    fn fail(&mut self, node: &str, error: String) {
        crate::log_component!(
            error,
            "scheduler",
            "Node failed",
            node = node,
            error = error.as_str()
        );
        if !self.transition(node, NodeState::failed(error)) {
            return;
        }
        for dependent in self.topology.graph().downstream(node) {
            if self.states.get(&dependent) == Some(&NodeState::Pending) {
                self.transition(&dependent, NodeState::blocked(node));
            }
        }
    }

    /// Abort every node task and mark unfinished nodes Cancelled.
    ///
    /// Instances created before the abort stay in `handles` so `teardown`
    /// removes them: reported ones from the channel, and ones whose
    /// `instantiate` was cut short through the runtime's `adopt`.
    async fn cancel(&mut self, tasks: &mut JoinSet<()>, rx: &mut mpsc::Receiver<NodeEvent>) {
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        while let Ok(event) = rx.try_recv() {
            if let NodeEvent::Instantiated { node, handle } = event {
                self.handles.insert(node, handle);
            }
        }

        let names: Vec<String> = self.topology.graph().names().to_vec();
        for node in names {
            if self.states.get(&node) == Some(&NodeState::Starting)
                && !self.handles.contains_key(&node)
            {
                if let Some(descriptor) = self.topology.graph().node(&node) {
                    if let Some(handle) = self.ctx.runtime.adopt(descriptor).await {
                        self.handles.insert(node.clone(), handle);
                    }
                }
            }
            let terminal = self.states.get(&node).map_or(true, NodeState::is_terminal);
            if !terminal {
                self.transition(&node, NodeState::Failed(FailureReason::Cancelled));
            }
        }
    }

    /// Apply a transition if the state machine allows it. Returns whether it
    /// was applied.
    fn transition(&mut self, node: &str, next: NodeState) -> bool {
        let Some(current) = self.states.get(node).cloned() else {
            return false;
        };
        if !current.can_transition_to(&next) {
            crate::log_component!(
                warn,
                "scheduler",
                "Ignoring invalid transition",
                node = node,
                from = current.label(),
                to = next.label()
            );
            return false;
        }
        crate::log_component!(
            debug,
            "scheduler",
            "Transition",
            node = node,
            from = current.label(),
            to = next.label()
        );
        self.ctx
            .sink
            .emit(TelemetryEvent::state_changed(node, &current, &next));
        self.transitions.push(Transition {
            seq: self.transitions.len(),
            node: node.to_string(),
            from: current,
            to: next.clone(),
        });
        self.states.insert(node.to_string(), next);
        true
    }

    fn report(&self) -> RunReport {
        let graph = self.topology.graph();
        let nodes = graph
            .nodes()
            .map(|descriptor| {
                let name = descriptor.name.as_str();
                let state = self
                    .states
                    .get(name)
                    .cloned()
                    .unwrap_or(NodeState::Pending);
                let error = match &state {
                    NodeState::Failed(FailureReason::Own { error }) => Some(error.clone()),
                    _ => None,
                };
                let blocked = graph
                    .names()
                    .iter()
                    .filter(|other| {
                        matches!(
                            self.states.get(other.as_str()),
                            Some(NodeState::Failed(FailureReason::Blocked { upstream })) if upstream == name
                        )
                    })
                    .cloned()
                    .collect();
                let urls = if state == NodeState::Ready {
                    self.topology.projection(name).project(&facts::resolved_endpoints(
                        descriptor,
                        self.handles.get(name),
                    ))
                } else {
                    Vec::new()
                };
                NodeReport {
                    name: name.to_string(),
                    kind: descriptor.kind,
                    parent: descriptor.parent.clone(),
                    state,
                    error,
                    blocked,
                    urls,
                }
            })
            .collect();
        RunReport {
            nodes,
            transitions: self.transitions.clone(),
        }
    }
}

// ============================================================================
// Node tasks
// ============================================================================

/// Drive one node from instantiation to Ready, Completed or Failed, reporting
/// every step to the scheduler.
async fn drive_node(
    ctx: Arc<TaskContext>,
    descriptor: ResourceDescriptor,
    probe: ProbeSpec,
    resolved: ResolvedParams,
    tx: mpsc::Sender<NodeEvent>,
) {
    let node = descriptor.name.clone();
    let event = match run_node(&ctx, &descriptor, &probe, &resolved, &tx).await {
        Ok(event) => event,
        Err(e) => NodeEvent::Failed {
            node,
            error: e.to_string(),
        },
    };
    let _ = tx.send(event).await;
}

async fn run_node(
    ctx: &TaskContext,
    descriptor: &ResourceDescriptor,
    probe: &ProbeSpec,
    resolved: &ResolvedParams,
    tx: &mpsc::Sender<NodeEvent>,
) -> Result<NodeEvent> {
    let node = descriptor.name.clone();
    let handle = tokio::time::timeout(
        ctx.settings.instantiate_timeout,
        ctx.runtime.instantiate(descriptor, resolved),
    )
    .await
    .map_err(|_| {
        StagehandError::adapter(
            &node,
            format!(
                "instantiation did not finish within {:?}",
                ctx.settings.instantiate_timeout
            ),
        )
    })??;

    let _ = tx
        .send(NodeEvent::Instantiated {
            node: node.clone(),
            handle: handle.clone(),
        })
        .await;

    if descriptor.kind.is_one_shot() {
        wait_for_job(ctx, &handle).await?;
        Ok(NodeEvent::Completed { node })
    } else {
        wait_for_probe(ctx, descriptor, probe, &handle).await?;
        Ok(NodeEvent::Ready { node })
    }
}

async fn wait_for_job(ctx: &TaskContext, handle: &InstanceHandle) -> Result<()> {
    let deadline = tokio::time::Instant::now() + ctx.settings.job_timeout;
    let expired = || {
        StagehandError::adapter(
            &handle.node,
            format!("job did not complete within {:?}", ctx.settings.job_timeout),
        )
    };
    loop {
        // A poll that hangs past the deadline counts against it.
        let status = tokio::time::timeout_at(deadline, ctx.runtime.poll_job(handle))
            .await
            .map_err(|_| expired())??;
        match status {
            JobStatus::Succeeded => return Ok(()),
            JobStatus::Failed(message) => return Err(StagehandError::adapter(&handle.node, message)),
            JobStatus::Running => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(expired());
        }
        tokio::time::sleep(ctx.settings.job_poll_interval).await;
    }
}

async fn wait_for_probe(
    ctx: &TaskContext,
    descriptor: &ResourceDescriptor,
    probe: &ProbeSpec,
    handle: &InstanceHandle,
) -> Result<()> {
    let node = descriptor.name.as_str();
    let policy = &ctx.settings.probe;
    let sink = ctx.sink.as_ref();

    match probe {
        ProbeSpec::None => Ok(()),
        ProbeSpec::Native => {
            let runtime = &ctx.runtime;
            wait_until_ready(node, policy, sink, move || async move {
                match runtime.probe_native(handle).await {
                    Ok(NativeStatus::Ready) => ProbeOutcome::Success,
                    Ok(NativeStatus::NotReady(detail)) => ProbeOutcome::Failure(detail),
                    Err(e) => ProbeOutcome::Failure(e.to_string()),
                }
            })
            .await
            .map(|_| ())
        }
        ProbeSpec::Http {
            endpoint,
            path,
            expected,
        } => {
            let base = facts::endpoint_url(descriptor, endpoint, Some(handle)).ok_or_else(|| {
                StagehandError::adapter(node, format!("no endpoint '{}' to probe", endpoint))
            })?;
            let url = format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            );
            let (client, url, expected) = (&ctx.probes, url.as_str(), expected.as_slice());
            let timeout = policy.request_timeout;
            wait_until_ready(node, policy, sink, move || client.check(url, expected, timeout))
                .await
                .map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffKind;
    use crate::health::ScriptedProbeClient;
    use crate::runtime::{NodeScript, RuntimeCall, ScriptedRuntime};
    use crate::secrets::StaticSecretSource;
    use crate::telemetry::ChannelSink;
    use crate::topology::{ImageRef, TopologyBuilder};

    fn fast_settings(max_attempts: u32) -> SchedulerSettings {
        SchedulerSettings {
            probe: ProbePolicy {
                interval: Duration::from_millis(1),
                backoff: BackoffKind::Fixed,
                max_delay: Duration::from_millis(2),
                max_attempts,
                request_timeout: Duration::from_millis(50),
            },
            instantiate_timeout: Duration::from_secs(5),
            job_timeout: Duration::from_secs(5),
            job_poll_interval: Duration::from_millis(1),
            teardown_timeout: Duration::from_secs(1),
        }
    }

    fn secrets() -> Arc<dyn SecretSource> {
        Arc::new(StaticSecretSource::new([("sql-password", "P@ssw0rd!")]))
    }

    fn small_topology() -> Topology {
        let mut builder = TopologyBuilder::new();
        let password = builder.add_parameter("sql-password", true);
        let sql = builder
            .add_engine("sql", ImageRef::new("mssql/server", "2022-latest"), &password)
            .handle();
        let db = builder.add_database(&sql, "TodoDb").handle();
        builder
            .add_container("api", "dab", "1")
            .with_http_endpoint("http", 5000, Some(5000))
            .with_environment("MSSQL_CONNECTION_STRING", db.connection_string())
            .with_http_health_check("/health");
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_facts_flow_into_dependents() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mut scheduler = Scheduler::new(
            small_topology(),
            runtime.clone(),
            Arc::new(ScriptedProbeClient::new()),
            secrets(),
            fast_settings(3),
        );
        let report = scheduler.run().await;
        assert!(report.is_success(), "{}", report.render());

        let api = runtime.received("api").await.unwrap();
        assert_eq!(
            api.env["MSSQL_CONNECTION_STRING"],
            "Server=host.docker.internal,1433;User ID=sa;Password=P@ssw0rd!;TrustServerCertificate=true;Database=TodoDb"
        );
        assert_eq!(
            scheduler
                .facts()
                .resolve(&crate::topology::FactRef::new("api", "endpoint.http"))
                .unwrap(),
            "http://localhost:5000"
        );
    }

    #[tokio::test]
    async fn test_http_probe_failure_fails_node() {
        let probes = ScriptedProbeClient::new().fail_always("http://localhost:5000/health");
        let mut scheduler = Scheduler::new(
            small_topology(),
            Arc::new(ScriptedRuntime::new()),
            Arc::new(probes),
            secrets(),
            fast_settings(2),
        );
        let report = scheduler.run().await;
        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);
        let api = report.node("api").unwrap();
        assert_eq!(api.state.label(), "Failed");
        assert!(api.error.as_deref().unwrap().contains("2 attempt(s)"));
        assert_eq!(report.node("TodoDb").unwrap().state, NodeState::Ready);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_consumer() {
        let mut scheduler = Scheduler::new(
            small_topology(),
            Arc::new(ScriptedRuntime::new()),
            Arc::new(ScriptedProbeClient::new()),
            Arc::new(StaticSecretSource::default()),
            fast_settings(2),
        );
        let report = scheduler.run().await;
        assert_eq!(report.node("sql").unwrap().state.label(), "Failed");
        let sql = report.node("sql").unwrap();
        assert_eq!(sql.blocked, vec!["TodoDb".to_string(), "api".to_string()]);
        assert!(report.node("api").unwrap().state.is_blocked());
    }

    #[tokio::test]
    async fn test_stop_before_run_cancels_everything() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mut scheduler = Scheduler::new(
            small_topology(),
            runtime.clone(),
            Arc::new(ScriptedProbeClient::new()),
            secrets(),
            fast_settings(2),
        );
        scheduler.shutdown_handle().stop();
        let report = scheduler.run().await;
        assert!(report
            .nodes
            .iter()
            .all(|n| n.state == NodeState::Failed(FailureReason::Cancelled)));
        assert!(runtime.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_run() {
        let runtime = Arc::new(ScriptedRuntime::new().script(
            "sql",
            NodeScript::new().instantiate_delay(Duration::from_secs(30)),
        ));
        let mut scheduler = Scheduler::new(
            small_topology(),
            runtime.clone(),
            Arc::new(ScriptedProbeClient::new()),
            secrets(),
            fast_settings(2),
        );
        let stop = scheduler.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.stop();
        });
        let report = scheduler.run().await;
        assert_eq!(report.node("sql").unwrap().state.label(), "Cancelled");
        assert_eq!(report.node("api").unwrap().state.label(), "Cancelled");
    }

    #[tokio::test]
    async fn test_teardown_reverse_order() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mut scheduler = Scheduler::new(
            small_topology(),
            runtime.clone(),
            Arc::new(ScriptedProbeClient::new()),
            secrets(),
            fast_settings(2),
        );
        scheduler.run().await;
        let order = scheduler.teardown().await;
        assert_eq!(order, vec!["api", "TodoDb", "sql"]);
        let terminated: Vec<String> = runtime
            .calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, RuntimeCall::Terminate(_)))
            .map(|c| c.node().to_string())
            .collect();
        assert_eq!(terminated, order);
        // Second teardown has nothing left to do.
        assert!(scheduler.teardown().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_changes_reach_sink() {
        let (sink, mut rx) = ChannelSink::new(256);
        let mut scheduler = Scheduler::new(
            small_topology(),
            Arc::new(ScriptedRuntime::new()),
            Arc::new(ScriptedProbeClient::new()),
            secrets(),
            fast_settings(2),
        )
        .with_sink(Arc::new(sink));
        let report = scheduler.run().await;

        let mut state_changes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TelemetryEvent::StateChanged { .. }) {
                state_changes += 1;
            }
        }
        assert_eq!(state_changes, report.transitions.len());
    }

    #[tokio::test]
    async fn test_job_timeout_fails_job() {
        let mut builder = TopologyBuilder::new();
        builder.add_completion_job("seed", "seed", "1");
        let runtime = ScriptedRuntime::new().script("seed", NodeScript::new().complete_after(10_000));
        let mut settings = fast_settings(2);
        settings.job_timeout = Duration::from_millis(20);
        let mut scheduler = Scheduler::new(
            builder.build().unwrap(),
            Arc::new(runtime),
            Arc::new(ScriptedProbeClient::new()),
            secrets(),
            settings,
        );
        let report = scheduler.run().await;
        let seed = report.node("seed").unwrap();
        assert!(seed.error.as_deref().unwrap().contains("did not complete"));
    }

    #[tokio::test]
    async fn test_instantiate_timeout_fails_node() {
        let mut builder = TopologyBuilder::new();
        builder.add_container("slow", "x", "1");
        let runtime = ScriptedRuntime::new().script(
            "slow",
            NodeScript::new().instantiate_delay(Duration::from_secs(30)),
        );
        let mut settings = fast_settings(2);
        settings.instantiate_timeout = Duration::from_millis(20);
        let mut scheduler = Scheduler::new(
            builder.build().unwrap(),
            Arc::new(runtime),
            Arc::new(ScriptedProbeClient::new()),
            secrets(),
            settings,
        );
        let report = scheduler.run().await;
        assert!(report.node("slow").unwrap().error.is_some());
    }
}
