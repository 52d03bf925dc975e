//! `stagehand config check`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use stagehand::config::validate::{validate_config, Diagnostic, DiagnosticLevel};
use stagehand::config::Config;

use super::ConfigAction;

pub(crate) async fn cmd_config(action: ConfigAction, path: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Check => {
            let path = path.unwrap_or_else(Config::path);
            println!("Config file: {}", path.display());
            if !path.exists() {
                println!("[OK] No config file found (using defaults)");
                return Ok(());
            }
            let diagnostics = check_file(&path)?;
            for diag in &diagnostics {
                println!("{}", diag);
            }
            print_summary(&diagnostics);
        }
    }
    Ok(())
}

/// Field-level diagnostics plus a typed load of the whole file.
fn check_file(path: &Path) -> Result<Vec<Diagnostic>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            return Ok(vec![Diagnostic {
                level: DiagnosticLevel::Error,
                path: String::new(),
                message: format!("Invalid JSON: {}", e),
            }])
        }
    };

    let mut diagnostics = validate_config(&raw);
    // Known fields can still carry the wrong type.
    if let Err(e) = serde_json::from_value::<Config>(raw) {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            path: String::new(),
            message: format!("Does not load: {}", e),
        });
    }
    Ok(diagnostics)
}

fn print_summary(diagnostics: &[Diagnostic]) {
    let count = |level: DiagnosticLevel| diagnostics.iter().filter(|d| d.level == level).count();
    let (errors, warnings) = (count(DiagnosticLevel::Error), count(DiagnosticLevel::Warn));
    if errors == 0 && warnings == 0 {
        println!("\nConfiguration looks good!");
    } else {
        println!("\nFound {} error(s), {} warning(s)", errors, warnings);
    }
}
