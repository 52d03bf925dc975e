//! Configuration type definitions for Stagehand
//!
//! This module defines all configuration structs used throughout the crate.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration struct for Stagehand
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Log output format, level and destination
    pub logging: LoggingConfig,
    /// Health probe timing and retry budget
    pub probe: ProbeConfig,
    /// Scheduler bounds for instantiation, jobs and teardown
    pub scheduler: SchedulerConfig,
    /// Resource runtime backend selection
    pub runtime: RuntimeConfig,
    /// OTLP export settings injected into instrumented resources
    pub telemetry: TelemetryConfig,
    /// Topology location and naming
    pub topology: TopologyConfig,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line output with a `component` field
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Optional file to append JSON logs to
    pub file: Option<String>,
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            file: None,
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// Probe Configuration
// ============================================================================

/// How the delay between probe attempts grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Constant `interval_ms` between attempts
    Fixed,
    /// `interval_ms * 2^attempt`, capped at `max_delay_ms`
    #[default]
    Exponential,
}

/// Default health probe policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Base delay between attempts in milliseconds
    pub interval_ms: u64,
    /// Backoff strategy
    pub backoff: BackoffKind,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
    /// Failed attempts allowed before the node fails
    pub max_attempts: u32,
    /// Per-request timeout for protocol probes in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            backoff: BackoffKind::Exponential,
            max_delay_ms: 10_000,
            max_attempts: 30,
            request_timeout_ms: 2_000,
        }
    }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Scheduler bounds. Every wait the scheduler performs is capped by one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum time for the runtime to create an instance
    pub instantiate_timeout_secs: u64,
    /// Maximum time for a one-shot job to finish
    pub job_timeout_secs: u64,
    /// Interval between job status polls in milliseconds
    pub job_poll_interval_ms: u64,
    /// Maximum time for each teardown call
    pub teardown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instantiate_timeout_secs: 300,
            job_timeout_secs: 600,
            job_poll_interval_ms: 1_000,
            teardown_timeout_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn instantiate_timeout(&self) -> Duration {
        Duration::from_secs(self.instantiate_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

// ============================================================================
// Runtime Configuration
// ============================================================================

/// Which runtime adapter instantiates resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeBackend {
    /// Real containers via the docker CLI
    #[default]
    Docker,
    /// Scripted adapter that succeeds without touching the host
    DryRun,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Adapter backend
    pub backend: RuntimeBackend,
    /// Path or name of the docker binary
    pub docker_binary: String,
    /// Optional docker network to attach every container to
    pub network: Option<String>,
    /// Pull images before running them
    pub pull: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::Docker,
            docker_binary: "docker".to_string(),
            network: None,
            pull: false,
        }
    }
}

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// OTLP settings handed to resources declared with an OTLP exporter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Inject OTLP environment variables at all
    pub enabled: bool,
    /// Collector endpoint
    pub otlp_endpoint: String,
    /// OTLP protocol (`grpc` or `http/protobuf`)
    pub otlp_protocol: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: "http://localhost:4318".to_string(),
            otlp_protocol: "http/protobuf".to_string(),
        }
    }
}

// ============================================================================
// Topology Configuration
// ============================================================================

/// Where the topology assets live and how resources are named
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TopologyConfig {
    /// Checkout root containing `data-api/`, `web-app/` and `database/`
    pub root: Option<String>,
    /// Fixed name suffix; derived from the root path when unset
    pub token: Option<String>,
}
