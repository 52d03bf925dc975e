//! Stagehand - dependency-ordered startup for local development topologies

pub mod config;
pub mod error;
pub mod facts;
pub mod health;
pub mod quickstart;
pub mod runtime;
pub mod scheduler;
pub mod secrets;
pub mod telemetry;
pub mod topology;
pub mod utils;

pub use config::Config;
pub use error::{Result, StagehandError};
pub use facts::FactStore;
pub use health::{ProbeClient, ProbePolicy, ProbeSpec};
pub use runtime::{InstanceHandle, ResourceRuntime};
pub use scheduler::{NodeState, RunReport, Scheduler, SchedulerSettings};
pub use secrets::{SecretSource, SecretValue};
pub use telemetry::{TelemetryEvent, TelemetrySink};
pub use topology::{DependencyGraph, EdgeKind, Topology, TopologyBuilder};
