//! Logging setup.
//!
//! `component` is the default format: one compact line per event, with a
//! `component` field (`scheduler`, `probe`, `runtime`, `facts`, `secrets`)
//! added by [`log_component!`]. `pretty` is multi-line and coloured; `json`
//! writes one object per line, to `logging.file` when set.

use std::fs::{File, OpenOptions};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, StagehandError};

/// Filter directive to use: `RUST_LOG` when set and non-empty, else the
/// configured level.
pub fn filter_directive(cfg: &LoggingConfig, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim).filter(|v| !v.is_empty()) {
        Some(directive) => directive.to_string(),
        None => cfg.level.clone(),
    }
}

fn open_log_file(path: &str) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StagehandError::Config(format!("cannot open log file {}: {}", path, e)))
}

/// Install the global subscriber. Call once, before the first event.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(cfg, rust_log.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (cfg.format, cfg.file.as_deref()) {
        (LogFormat::Json, Some(path)) => {
            let file = open_log_file(path)?;
            builder.json().with_writer(Mutex::new(file)).init();
        }
        (LogFormat::Json, None) => builder.json().with_writer(std::io::stderr).init(),
        (LogFormat::Pretty, _) => builder.pretty().with_writer(std::io::stderr).init(),
        (LogFormat::Component, _) => builder
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

/// Emit a tracing event tagged with a `component` field.
///
/// ```
/// # use stagehand::log_component;
/// log_component!(info, "scheduler", "node launched");
/// log_component!(warn, "probe", "probe failed", node = "api", attempt = 2u32);
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}
