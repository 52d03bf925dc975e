//! Shared CLI helpers used across multiple command handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use stagehand::config::Config;
use stagehand::quickstart;
use stagehand::topology::Topology;

/// Load config from `path`, or the default location when none is given.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load().context("Failed to load config"),
    }
}

/// Expand `~/` prefix to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Checkout root: `--root`, then `topology.root` from config, then the
/// current directory.
pub(crate) fn resolve_root(arg: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    if let Some(root) = arg {
        return Ok(root);
    }
    if let Some(root) = config.topology.root.as_deref() {
        return Ok(expand_tilde(root));
    }
    std::env::current_dir().context("Failed to determine current directory")
}

/// Verify the checkout and declare the quickstart topology for it.
pub(crate) fn load_topology(root: &Path, config: &Config) -> Result<(Topology, String)> {
    quickstart::verify_setup(root)?;
    let token = quickstart::token(root, config)
        .with_context(|| format!("Failed to derive a name token for {}", root.display()))?;
    let topology =
        quickstart::declare(root, &token, config).context("Failed to declare topology")?;
    Ok((topology, token))
}
