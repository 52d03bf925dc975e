//! `stagehand up`: run the topology, hold it until Ctrl-C, tear it down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use stagehand::config::Config;
use stagehand::runtime::{create_probe_client, create_runtime};
use stagehand::scheduler::{Scheduler, SchedulerSettings};
use stagehand::secrets::{EnvSecretSource, SecretSource};

use super::common::{load_topology, resolve_root};

pub(crate) async fn cmd_up(config: Config, root: Option<PathBuf>, dry_run: bool) -> Result<()> {
    // Parameters may come from a .env file next to the checkout.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!("Failed to load .env: {}", e);
        }
    }

    let root = resolve_root(root, &config)?;
    let (topology, token) = load_topology(&root, &config)?;

    let runtime = create_runtime(&config.runtime, dry_run)
        .await
        .context("Failed to create runtime")?;
    let probes = create_probe_client(&config.runtime, dry_run);
    let secrets: Arc<dyn SecretSource> = Arc::new(EnvSecretSource::new().generate_missing(true));

    println!(
        "Starting {} resource(s) for {} (token {}, runtime {})",
        topology.graph().len(),
        root.display(),
        token,
        runtime.name()
    );

    let mut scheduler = Scheduler::new(
        topology,
        runtime,
        probes,
        secrets,
        SchedulerSettings::from(&config),
    );

    // Ctrl-C while starting cancels the run; teardown still happens below.
    let stop = scheduler.shutdown_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });
    let report = scheduler.run().await;
    interrupt.abort();

    println!();
    print!("{}", report.render());
    println!();

    if report.is_success() && !dry_run {
        println!("All resources are up. Press Ctrl-C to stop.");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
    }

    println!("Stopping resources...");
    let stopped = scheduler.teardown().await;
    info!(count = stopped.len(), "Teardown finished");
    println!("Stopped {} resource(s)", stopped.len());

    if !report.is_success() {
        std::process::exit(report.exit_code());
    }
    Ok(())
}
