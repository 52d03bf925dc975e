//! Display URL projection.
//!
//! A projection turns a node's raw endpoints into the list of links shown to
//! the user (e.g. `/graphql` labelled "GraphQL"). Projections are pure.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// An endpoint after the runtime assigned it a concrete address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub name: String,
    /// Base URL without a trailing slash, e.g. `http://localhost:5000`.
    pub url: String,
}

/// One user-facing link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayUrl {
    pub url: String,
    pub label: String,
    /// Name of the endpoint the link was derived from.
    pub endpoint: String,
}

type ProjectFn = dyn Fn(&[ResolvedEndpoint]) -> Vec<DisplayUrl> + Send + Sync;

/// Per-node function from raw endpoints to display links.
#[derive(Clone)]
pub struct UrlProjection {
    f: Arc<ProjectFn>,
}

impl UrlProjection {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[ResolvedEndpoint]) -> Vec<DisplayUrl> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Lists every endpoint under its own name.
    pub fn all_endpoints() -> Self {
        Self::new(|endpoints| {
            endpoints
                .iter()
                .map(|e| DisplayUrl {
                    url: e.url.clone(),
                    label: e.name.clone(),
                    endpoint: e.name.clone(),
                })
                .collect()
        })
    }

    /// Replaces the listing with `(path, label)` entries under one endpoint.
    /// Produces nothing if the endpoint is absent.
    pub fn paths(endpoint: &str, entries: &[(&str, &str)]) -> Self {
        let endpoint = endpoint.to_string();
        let entries: Vec<(String, String)> = entries
            .iter()
            .map(|(p, l)| (p.to_string(), l.to_string()))
            .collect();
        Self::new(move |endpoints| {
            let Some(base) = endpoints.iter().find(|e| e.name == endpoint) else {
                return Vec::new();
            };
            entries
                .iter()
                .map(|(path, label)| DisplayUrl {
                    url: join_path(&base.url, path),
                    label: label.clone(),
                    endpoint: endpoint.clone(),
                })
                .collect()
        })
    }

    pub fn project(&self, endpoints: &[ResolvedEndpoint]) -> Vec<DisplayUrl> {
        (self.f)(endpoints)
    }
}

impl Default for UrlProjection {
    fn default() -> Self {
        Self::all_endpoints()
    }
}

impl fmt::Debug for UrlProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UrlProjection(..)")
    }
}

fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        return format!("{}/", base);
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
