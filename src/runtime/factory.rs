//! Runtime factory for creating resource runtimes from configuration

use std::sync::Arc;

use crate::config::{RuntimeBackend, RuntimeConfig};
use crate::error::{Result, StagehandError};
use crate::health::{HttpProbeClient, ProbeClient, ScriptedProbeClient};

use super::docker::DockerRuntime;
use super::scripted::ScriptedRuntime;
use super::types::ResourceRuntime;

/// Effective backend once the `--dry-run` flag is taken into account.
pub fn effective_backend(config: &RuntimeConfig, dry_run: bool) -> RuntimeBackend {
    if dry_run {
        RuntimeBackend::DryRun
    } else {
        config.backend
    }
}

/// Create a resource runtime from configuration.
///
/// The docker backend fails early when docker is not usable.
pub async fn create_runtime(
    config: &RuntimeConfig,
    dry_run: bool,
) -> Result<Arc<dyn ResourceRuntime>> {
    match effective_backend(config, dry_run) {
        RuntimeBackend::DryRun => Ok(Arc::new(ScriptedRuntime::new())),
        RuntimeBackend::Docker => {
            let runtime = DockerRuntime::from_config(config);
            if !runtime.is_available().await {
                return Err(StagehandError::Config(format!(
                    "Docker is not installed or not running ({})",
                    config.docker_binary
                )));
            }
            Ok(Arc::new(runtime))
        }
    }
}

/// Probe client matching the runtime: dry runs never touch the network.
pub fn create_probe_client(config: &RuntimeConfig, dry_run: bool) -> Arc<dyn ProbeClient> {
    match effective_backend(config, dry_run) {
        RuntimeBackend::DryRun => Arc::new(ScriptedProbeClient::new()),
        RuntimeBackend::Docker => Arc::new(HttpProbeClient::new()),
    }
}
