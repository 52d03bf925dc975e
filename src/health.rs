//! Health probes.
//!
//! A node that has been instantiated stays in `Probing` until its probe
//! succeeds. Two probe kinds exist:
//! - protocol probes issue an HTTP request to a declared endpoint and accept
//!   a configured set of status codes ([`ProbeClient`])
//! - engine-native probes ask the runtime adapter whether the engine reports
//!   itself ready (used for database engines with no HTTP surface)
//!
//! Every probe runs under a [`ProbePolicy`]: a bounded number of attempts
//! with fixed or exponential backoff between them.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::config::{BackoffKind, ProbeConfig};
use crate::error::{Result, StagehandError};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

// ============================================================================
// ProbeSpec
// ============================================================================

/// How readiness is decided for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSpec {
    /// Request `path` on the named endpoint and accept any `expected` status.
    Http {
        endpoint: String,
        path: String,
        expected: Vec<u16>,
    },
    /// Ask the runtime adapter directly.
    Native,
    /// Ready as soon as the instance exists.
    None,
}

impl ProbeSpec {
    /// HTTP probe accepting `200`.
    pub fn http(endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        ProbeSpec::Http {
            endpoint: endpoint.into(),
            path: path.into(),
            expected: vec![200],
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ProbeSpec::Http {
                endpoint,
                path,
                expected,
            } => {
                let codes: Vec<String> = expected.iter().map(u16::to_string).collect();
                format!("http {} {} [{}]", endpoint, path, codes.join(","))
            }
            ProbeSpec::Native => "native".to_string(),
            ProbeSpec::None => "none".to_string(),
        }
    }
}

// ============================================================================
// HealthProbeRegistry
// ============================================================================

/// Maps node identity to its probe. Nodes without an entry use `ProbeSpec::None`.
#[derive(Debug, Clone, Default)]
pub struct HealthProbeRegistry {
    probes: HashMap<String, ProbeSpec>,
}

impl HealthProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe. Replaces any previous probe for the same node.
    pub fn register(&mut self, node: impl Into<String>, spec: ProbeSpec) {
        self.probes.insert(node.into(), spec);
    }

    pub fn get(&self, node: &str) -> &ProbeSpec {
        static NONE: ProbeSpec = ProbeSpec::None;
        self.probes.get(node).unwrap_or(&NONE)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

// ============================================================================
// ProbePolicy
// ============================================================================

/// Retry budget and backoff for one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePolicy {
    pub interval: Duration,
    pub backoff: BackoffKind,
    pub max_delay: Duration,
    /// Failed checks tolerated before the node fails. At least 1.
    pub max_attempts: u32,
    /// Timeout for a single check. A check that outlives it counts as failed.
    pub request_timeout: Duration,
}

impl ProbePolicy {
    /// Delay after the `attempt`-th failed check (0-indexed).
    ///
    /// Exponential backoff doubles the interval each attempt and adds a
    /// little jitter; both kinds are capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.interval.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let delay = match self.backoff {
            BackoffKind::Fixed => base_ms,
            BackoffKind::Exponential => {
                // Nanosecond component of the clock as a lightweight jitter source.
                let jitter_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.subsec_nanos() as u64 % (base_ms / 4).max(1))
                    .unwrap_or(0);
                compute_delay(attempt, base_ms, jitter_ms)
            }
        };
        Duration::from_millis(delay.min(max_ms))
    }
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self::from(&ProbeConfig::default())
    }
}

impl From<&ProbeConfig> for ProbePolicy {
    fn from(cfg: &ProbeConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.interval_ms),
            backoff: cfg.backoff,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts.max(1),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        }
    }
}

/// Exponential delay for `attempt` (0-indexed) before capping.
pub fn compute_delay(attempt: u32, base_delay_ms: u64, jitter_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(16))
        .saturating_add(jitter_ms)
}

// ============================================================================
// Probe clients
// ============================================================================

/// Result of one probe check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

/// Issues protocol probe requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn check(&self, url: &str, expected: &[u16], timeout: Duration) -> ProbeOutcome;
}

/// Protocol probes over HTTP with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpProbeClient {
    client: reqwest::Client,
}

impl HttpProbeClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProbeClient for HttpProbeClient {
    async fn check(&self, url: &str, expected: &[u16], timeout: Duration) -> ProbeOutcome {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) if expected.contains(&resp.status().as_u16()) => ProbeOutcome::Success,
            Ok(resp) => ProbeOutcome::Failure(format!("unexpected status {}", resp.status())),
            Err(e) => ProbeOutcome::Failure(e.to_string()),
        }
    }
}

/// Scripted probe client for dry runs and tests.
///
/// Every URL succeeds unless a script says otherwise. Scripts are keyed by
/// exact URL.
#[derive(Debug, Default)]
pub struct ScriptedProbeClient {
    failures: Mutex<HashMap<String, VecDeque<String>>>,
    always_fail: HashSet<String>,
    checks: Mutex<Vec<String>>,
}

impl ScriptedProbeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `times` checks of `url`, then succeed.
    pub fn fail_times(mut self, url: &str, times: u32) -> Self {
        let detail = (1..=times).map(|i| format!("scripted failure {}", i));
        self.failures
            .get_mut()
            .entry(url.to_string())
            .or_default()
            .extend(detail);
        self
    }

    /// Fail every check of `url`.
    pub fn fail_always(mut self, url: &str) -> Self {
        self.always_fail.insert(url.to_string());
        self
    }

    /// URLs checked so far, in order.
    pub async fn checks(&self) -> Vec<String> {
        self.checks.lock().await.clone()
    }
}

#[async_trait]
impl ProbeClient for ScriptedProbeClient {
    async fn check(&self, url: &str, _expected: &[u16], _timeout: Duration) -> ProbeOutcome {
        self.checks.lock().await.push(url.to_string());
        if self.always_fail.contains(url) {
            return ProbeOutcome::Failure("scripted failure".to_string());
        }
        match self
            .failures
            .lock()
            .await
            .get_mut(url)
            .and_then(VecDeque::pop_front)
        {
            Some(detail) => ProbeOutcome::Failure(detail),
            None => ProbeOutcome::Success,
        }
    }
}

// ============================================================================
// Probe loop
// ============================================================================

/// Run `check` until it succeeds or the policy's budget is spent.
///
/// The first check runs immediately. Each check is bounded by
/// `request_timeout`; one that runs longer is abandoned and counted as a
/// failure. Every outcome is reported to `sink`. Returns the number of checks
/// performed, or `ProbeTimeout` after `max_attempts` consecutive failures.
pub async fn wait_until_ready<F, Fut>(
    node: &str,
    policy: &ProbePolicy,
    sink: &dyn TelemetrySink,
    mut check: F,
) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeOutcome>,
{
    let started = tokio::time::Instant::now();
    let mut last = String::new();

    for attempt in 1..=policy.max_attempts {
        let outcome = tokio::time::timeout(policy.request_timeout, check())
            .await
            .unwrap_or_else(|_| {
                ProbeOutcome::Failure(format!(
                    "check did not answer within {:?}",
                    policy.request_timeout
                ))
            });
        match outcome {
            ProbeOutcome::Success => {
                sink.emit(TelemetryEvent::probe(node, attempt, true, None));
                crate::log_component!(debug, "probe", "Probe succeeded", node = node, attempt = attempt);
                return Ok(attempt);
            }
            ProbeOutcome::Failure(detail) => {
                sink.emit(TelemetryEvent::probe(node, attempt, false, Some(detail.clone())));
                crate::log_component!(
                    debug,
                    "probe",
                    "Probe failed",
                    node = node,
                    attempt = attempt,
                    detail = detail.as_str()
                );
                last = detail;
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay_for(attempt - 1)).await;
        }
    }

    Err(StagehandError::ProbeTimeout {
        node: node.to_string(),
        attempts: policy.max_attempts,
        waited: started.elapsed(),
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ChannelSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> ProbePolicy {
        ProbePolicy {
            interval: Duration::from_millis(1),
            backoff: BackoffKind::Fixed,
            max_delay: Duration::from_millis(5),
            max_attempts,
            request_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_registry_defaults_to_none() {
        let mut registry = HealthProbeRegistry::new();
        registry.register("api", ProbeSpec::http("http", "/health"));
        registry.register("sql", ProbeSpec::Native);
        assert_eq!(registry.get("sql"), &ProbeSpec::Native);
        assert_eq!(registry.get("web"), &ProbeSpec::None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_probe_spec_describe() {
        assert_eq!(
            ProbeSpec::http("http", "/health").describe(),
            "http http /health [200]"
        );
        assert_eq!(ProbeSpec::Native.describe(), "native");
    }

    #[test]
    fn test_compute_delay() {
        assert_eq!(compute_delay(0, 1000, 0), 1000);
        assert_eq!(compute_delay(1, 1000, 0), 2000);
        assert_eq!(compute_delay(3, 1000, 7), 8007);
        // Large attempts saturate rather than overflow.
        assert!(compute_delay(100, u64::MAX / 2, 0) > 0);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = ProbePolicy {
            interval: Duration::from_millis(1000),
            backoff: BackoffKind::Exponential,
            max_delay: Duration::from_millis(3000),
            max_attempts: 10,
            request_timeout: Duration::from_secs(1),
        };
        assert!(policy.delay_for(0) >= Duration::from_millis(1000));
        assert!(policy.delay_for(0) < Duration::from_millis(1250));
        assert_eq!(policy.delay_for(5), Duration::from_millis(3000));
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let mut policy = fast_policy(3);
        policy.interval = Duration::from_millis(4);
        assert_eq!(policy.delay_for(0), policy.delay_for(7));
    }

    #[test]
    fn test_policy_from_config_enforces_one_attempt() {
        let cfg = ProbeConfig {
            max_attempts: 0,
            ..ProbeConfig::default()
        };
        assert_eq!(ProbePolicy::from(&cfg).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_first_success_is_ready() {
        let (sink, mut rx) = ChannelSink::new(8);
        let attempts = wait_until_ready("api", &fast_policy(4), &sink, || async {
            ProbeOutcome::Success
        })
        .await
        .unwrap();
        assert_eq!(attempts, 1);
        assert!(matches!(
            rx.try_recv().unwrap(),
            TelemetryEvent::ProbeOutcome { success: true, attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_ready_after_failures() {
        let calls = AtomicU32::new(0);
        let (sink, _rx) = ChannelSink::new(8);
        let attempts = wait_until_ready("sql", &fast_policy(5), &sink, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    ProbeOutcome::Failure("starting".into())
                } else {
                    ProbeOutcome::Success
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_is_timeout() {
        let calls = AtomicU32::new(0);
        let (sink, mut rx) = ChannelSink::new(16);
        let err = wait_until_ready("api", &fast_policy(4), &sink, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { ProbeOutcome::Failure("status 503".into()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            StagehandError::ProbeTimeout {
                node,
                attempts,
                last,
                ..
            } => {
                assert_eq!(node, "api");
                assert_eq!(attempts, 4);
                assert_eq!(last, "status 503");
            }
            other => panic!("expected probe timeout, got {:?}", other),
        }
        let mut failures = 0;
        while let Ok(event) = rx.try_recv() {
            if let TelemetryEvent::ProbeOutcome { success: false, .. } = event {
                failures += 1;
            }
        }
        assert_eq!(failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_check_counts_as_failure() {
        let calls = AtomicU32::new(0);
        let (sink, _rx) = ChannelSink::new(16);
        let policy = fast_policy(3);
        let err = wait_until_ready("sql", &policy, &sink, || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<ProbeOutcome>()
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            StagehandError::ProbeTimeout { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("did not answer"), "last: {}", last);
            }
            other => panic!("expected probe timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_client_in_probe_loop() {
        let mut client = MockProbeClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_check()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| ProbeOutcome::Failure("refused".into()));
        client
            .expect_check()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| ProbeOutcome::Success);

        let (sink, _rx) = ChannelSink::new(8);
        let policy = fast_policy(3);
        let attempts = wait_until_ready("api", &policy, &sink, || {
            client.check("http://localhost:5000/health", &[200], policy.request_timeout)
        })
        .await
        .unwrap();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_scripted_client() {
        let client = ScriptedProbeClient::new()
            .fail_times("http://a/health", 2)
            .fail_always("http://b/health");
        let t = Duration::from_millis(10);
        assert!(!client.check("http://a/health", &[200], t).await.is_success());
        assert!(!client.check("http://a/health", &[200], t).await.is_success());
        assert!(client.check("http://a/health", &[200], t).await.is_success());
        assert!(!client.check("http://b/health", &[200], t).await.is_success());
        assert!(client.check("http://c/", &[200], t).await.is_success());
        assert_eq!(client.checks().await.len(), 5);
    }
}
