//! Plan and URL listing: show what `up` would do without launching anything.

use std::path::PathBuf;

use anyhow::Result;

use stagehand::config::Config;
use stagehand::topology::EdgeKind;

use super::common::{load_topology, resolve_root};

pub(crate) fn cmd_plan(config: Config, root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root, &config)?;
    let (topology, token) = load_topology(&root, &config)?;
    let graph = topology.graph();

    println!("Topology for {} (token {})", root.display(), token);
    println!();
    println!("Start waves:");
    for (i, wave) in graph.start_waves().iter().enumerate() {
        println!("  {}. {}", i + 1, wave.join(", "));
    }

    println!();
    println!("Dependencies:");
    for edge in graph.edges() {
        let waits_for = match edge.kind {
            EdgeKind::ReadyDependency => "ready",
            EdgeKind::CompletionDependency => "completed",
        };
        println!("  {} -> {} (waits until {})", edge.from, edge.to, waits_for);
    }

    let parameters: Vec<String> = topology
        .parameters()
        .map(|p| {
            if p.secret {
                format!("{} (secret)", p.name)
            } else {
                p.name.clone()
            }
        })
        .collect();
    if !parameters.is_empty() {
        println!();
        println!("Parameters: {}", parameters.join(", "));
    }
    Ok(())
}

pub(crate) fn cmd_urls(config: Config, root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root, &config)?;
    let (topology, _) = load_topology(&root, &config)?;

    for node in topology.graph().names() {
        let urls = topology.planned_urls(node);
        if urls.is_empty() {
            continue;
        }
        println!("{}", node);
        for url in urls {
            println!("  {:<10} {}", url.label, url.url);
        }
    }
    Ok(())
}
