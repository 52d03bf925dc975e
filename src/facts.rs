//! Connection facts.
//!
//! A fact is a value a node exposes once it is Ready: endpoint URLs,
//! connection strings and anything else it declares under `exports`.
//! Facts are published exactly once per `(producer, name)` and are read-only
//! afterwards. Only the scheduler publishes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, StagehandError};
use crate::runtime::InstanceHandle;
use crate::secrets::SecretCache;
use crate::topology::{FactRef, ParamValue, ResolvedEndpoint, ResolvedParams, ResourceDescriptor};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(param|endpoint|port):([A-Za-z0-9_.\-]+)\}").unwrap());

/// Prefix of the facts derived from declared endpoints.
pub const ENDPOINT_FACT_PREFIX: &str = "endpoint.";
/// Prefix of the same endpoints as seen from inside another container.
pub const INTERNAL_ENDPOINT_FACT_PREFIX: &str = "internal_endpoint.";
/// Name containers use to reach ports published on the host.
pub const CONTAINER_HOST: &str = "host.docker.internal";

/// Publish-once store of connection facts, keyed by producer then fact name.
#[derive(Debug, Default, Clone)]
pub struct FactStore {
    facts: HashMap<String, BTreeMap<String, String>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fact. Fails with `DuplicateFact` if it was already published.
    pub fn publish(&mut self, node: &str, fact: &str, value: impl Into<String>) -> Result<()> {
        let entry = self.facts.entry(node.to_string()).or_default();
        if entry.contains_key(fact) {
            return Err(StagehandError::DuplicateFact {
                node: node.to_string(),
                fact: fact.to_string(),
            });
        }
        entry.insert(fact.to_string(), value.into());
        crate::log_component!(debug, "facts", "fact published", node = node, fact = fact);
        Ok(())
    }

    /// Look up a published fact. Fails with `PendingFact` if the producer has
    /// not published it yet.
    pub fn resolve(&self, reference: &FactRef) -> Result<&str> {
        self.facts
            .get(&reference.producer)
            .and_then(|facts| facts.get(&reference.fact))
            .map(String::as_str)
            .ok_or_else(|| StagehandError::PendingFact {
                node: reference.producer.clone(),
                fact: reference.fact.clone(),
            })
    }

    /// Every fact a producer has published.
    pub fn facts_of(&self, node: &str) -> Option<&BTreeMap<String, String>> {
        self.facts.get(node)
    }

    pub fn len(&self) -> usize {
        self.facts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve a single declared value against published facts and secrets.
pub fn resolve_value(
    value: &ParamValue,
    facts: &FactStore,
    secrets: &mut SecretCache,
) -> Result<String> {
    match value {
        ParamValue::Literal(s) => Ok(s.clone()),
        ParamValue::Fact(reference) => facts.resolve(reference).map(str::to_string),
        ParamValue::Secret(name) => secrets.get(name).map(|v| v.expose().to_string()),
        ParamValue::Join(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&resolve_value(part, facts, secrets)?);
            }
            Ok(out)
        }
    }
}

/// Resolve every parameter and environment entry of a node.
pub fn resolve_params(
    descriptor: &ResourceDescriptor,
    facts: &FactStore,
    secrets: &mut SecretCache,
) -> Result<ResolvedParams> {
    let mut resolved = ResolvedParams::default();
    for (key, value) in &descriptor.params {
        resolved
            .params
            .insert(key.clone(), resolve_value(value, facts, secrets)?);
    }
    for (key, value) in &descriptor.env {
        resolved
            .env
            .insert(key.clone(), resolve_value(value, facts, secrets)?);
    }
    Ok(resolved)
}

/// Host port an endpoint is reachable on: the runtime's allocation, then the
/// declared host port, then the target port.
pub fn endpoint_port(
    descriptor: &ResourceDescriptor,
    endpoint: &str,
    handle: Option<&InstanceHandle>,
) -> Option<u16> {
    let declared = descriptor.endpoint(endpoint)?;
    handle
        .and_then(|h| h.ports.get(endpoint).copied())
        .or(declared.host_port)
        .or(Some(declared.target_port))
}

fn url_on(
    host: &str,
    descriptor: &ResourceDescriptor,
    endpoint: &str,
    handle: Option<&InstanceHandle>,
) -> Option<String> {
    let declared = descriptor.endpoint(endpoint)?;
    let port = endpoint_port(descriptor, endpoint, handle)?;
    Some(format!("{}://{}:{}", declared.protocol.scheme(), host, port))
}

/// URL of an endpoint from the host: probes and display URLs.
pub fn endpoint_url(
    descriptor: &ResourceDescriptor,
    endpoint: &str,
    handle: Option<&InstanceHandle>,
) -> Option<String> {
    url_on("localhost", descriptor, endpoint, handle)
}

/// URL of an endpoint from inside another container.
pub fn internal_endpoint_url(
    descriptor: &ResourceDescriptor,
    endpoint: &str,
    handle: Option<&InstanceHandle>,
) -> Option<String> {
    url_on(CONTAINER_HOST, descriptor, endpoint, handle)
}

/// Endpoints of a node with concrete addresses, in declaration order.
pub fn resolved_endpoints(
    descriptor: &ResourceDescriptor,
    handle: Option<&InstanceHandle>,
) -> Vec<ResolvedEndpoint> {
    descriptor
        .endpoints
        .iter()
        .filter_map(|e| {
            endpoint_url(descriptor, &e.name, handle).map(|url| ResolvedEndpoint {
                name: e.name.clone(),
                url,
            })
        })
        .collect()
}

/// Check an export template only names params and endpoints the node declares.
pub fn check_template(descriptor: &ResourceDescriptor, template: &str) -> Result<()> {
    for caps in PLACEHOLDER.captures_iter(template) {
        let (scope, key) = (&caps[1], &caps[2]);
        let known = match scope {
            "param" => descriptor.params.contains_key(key),
            _ => descriptor.endpoint(key).is_some(),
        };
        if !known {
            return Err(StagehandError::Template(format!(
                "'{}' export references unknown {} '{}'",
                descriptor.name, scope, key
            )));
        }
    }
    Ok(())
}

/// Expand `{param:KEY}`, `{endpoint:NAME}` and `{port:NAME}` placeholders.
pub fn render_template(
    descriptor: &ResourceDescriptor,
    template: &str,
    handle: &InstanceHandle,
    resolved: &ResolvedParams,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let (scope, key) = (&caps[1], &caps[2]);
        let value = match scope {
            "param" => resolved.params.get(key).cloned(),
            "endpoint" => endpoint_url(descriptor, key, Some(handle)),
            _ => endpoint_port(descriptor, key, Some(handle)).map(|p| p.to_string()),
        }
        .ok_or_else(|| {
            StagehandError::Template(format!(
                "'{}' cannot expand {{{}:{}}}",
                descriptor.name, scope, key
            ))
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Compute every fact a node publishes on Ready: `endpoint.<name>` and
/// `internal_endpoint.<name>` per endpoint, plus its rendered exports.
pub fn derive_facts(
    descriptor: &ResourceDescriptor,
    handle: &InstanceHandle,
    resolved: &ResolvedParams,
) -> Result<Vec<(String, String)>> {
    let mut facts = Vec::new();
    for endpoint in &descriptor.endpoints {
        let name = endpoint.name.as_str();
        if let Some(url) = endpoint_url(descriptor, name, Some(handle)) {
            facts.push((format!("{}{}", ENDPOINT_FACT_PREFIX, name), url));
        }
        if let Some(url) = internal_endpoint_url(descriptor, name, Some(handle)) {
            facts.push((format!("{}{}", INTERNAL_ENDPOINT_FACT_PREFIX, name), url));
        }
    }
    for (name, template) in &descriptor.exports {
        facts.push((
            name.clone(),
            render_template(descriptor, template, handle, resolved)?,
        ));
    }
    Ok(facts)
}

/// Names of the facts a node will publish, known at build time.
pub fn declared_facts(descriptor: &ResourceDescriptor) -> Vec<String> {
    descriptor
        .endpoints
        .iter()
        .flat_map(|e| {
            [
                format!("{}{}", ENDPOINT_FACT_PREFIX, e.name),
                format!("{}{}", INTERNAL_ENDPOINT_FACT_PREFIX, e.name),
            ]
        })
        .chain(descriptor.exports.keys().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecretSource;
    use crate::topology::{Endpoint, Protocol, ResourceKind};
    use std::sync::Arc;

    fn engine() -> ResourceDescriptor {
        let mut desc = ResourceDescriptor::new("sql", ResourceKind::Engine);
        desc.endpoints.push(Endpoint {
            name: "tds".into(),
            protocol: Protocol::Tcp,
            target_port: 1433,
            host_port: None,
        });
        desc.params
            .insert("password".into(), ParamValue::Secret("sql-password".into()));
        desc.exports.insert(
            "connection_string".into(),
            "Server=127.0.0.1,{port:tds};Password={param:password}".into(),
        );
        desc
    }

    fn handle(port: u16) -> InstanceHandle {
        let mut handle = InstanceHandle::new("sql", "sql");
        handle.ports.insert("tds".into(), port);
        handle
    }

    fn secrets() -> SecretCache {
        let source = StaticSecretSource::new([("sql-password", "P@ss1")]);
        SecretCache::new(Arc::new(source), ["sql-password".to_string()])
    }

    #[test]
    fn test_publish_then_resolve() {
        let mut store = FactStore::new();
        store.publish("db", "connection_string", "Server=x").unwrap();
        let reference = FactRef::new("db", "connection_string");
        assert_eq!(store.resolve(&reference).unwrap(), "Server=x");
        // Immutable after publish: repeated reads agree.
        assert_eq!(
            store.resolve(&reference).unwrap(),
            store.resolve(&reference).unwrap()
        );
    }

    #[test]
    fn test_publish_twice_is_duplicate() {
        let mut store = FactStore::new();
        store.publish("db", "connection_string", "a").unwrap();
        let err = store.publish("db", "connection_string", "b").unwrap_err();
        assert!(matches!(err, StagehandError::DuplicateFact { .. }));
        assert_eq!(
            store
                .resolve(&FactRef::new("db", "connection_string"))
                .unwrap(),
            "a"
        );
    }

    #[test]
    fn test_resolve_before_publish_is_pending() {
        let store = FactStore::new();
        let err = store
            .resolve(&FactRef::new("db", "connection_string"))
            .unwrap_err();
        assert!(matches!(err, StagehandError::PendingFact { node, .. } if node == "db"));
    }

    #[test]
    fn test_same_fact_name_different_producers() {
        let mut store = FactStore::new();
        store.publish("a", "endpoint.http", "1").unwrap();
        store.publish("b", "endpoint.http", "2").unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_resolve_params_joins_parts() {
        let mut store = FactStore::new();
        store
            .publish("api", "endpoint.http", "http://localhost:5000")
            .unwrap();
        let mut desc = ResourceDescriptor::new("inspector", ResourceKind::Sidecar);
        desc.env.insert(
            "MCP_SERVER_URL".into(),
            ParamValue::join([ParamValue::fact("api", "endpoint.http"), "/mcp".into()]),
        );
        desc.env.insert("MODE".into(), "debug".into());

        let resolved = resolve_params(&desc, &store, &mut secrets()).unwrap();
        assert_eq!(resolved.env["MCP_SERVER_URL"], "http://localhost:5000/mcp");
        assert_eq!(resolved.env["MODE"], "debug");
    }

    #[test]
    fn test_resolve_params_pending_fact() {
        let mut desc = ResourceDescriptor::new("api", ResourceKind::Container);
        desc.env
            .insert("DB".into(), ParamValue::fact("db", "connection_string"));
        let err = resolve_params(&desc, &FactStore::new(), &mut secrets()).unwrap_err();
        assert!(matches!(err, StagehandError::PendingFact { .. }));
    }

    #[test]
    fn test_derive_facts_uses_allocated_port() {
        let desc = engine();
        let resolved = resolve_params(&desc, &FactStore::new(), &mut secrets()).unwrap();
        let facts = derive_facts(&desc, &handle(41433), &resolved).unwrap();
        let map: BTreeMap<_, _> = facts.into_iter().collect();
        assert_eq!(map["endpoint.tds"], "tcp://localhost:41433");
        assert_eq!(map["internal_endpoint.tds"], "tcp://host.docker.internal:41433");
        assert_eq!(
            map["connection_string"],
            "Server=127.0.0.1,41433;Password=P@ss1"
        );
    }

    #[test]
    fn test_endpoint_port_fallbacks() {
        let mut desc = engine();
        assert_eq!(endpoint_port(&desc, "tds", None), Some(1433));
        desc.endpoints[0].host_port = Some(14330);
        assert_eq!(endpoint_port(&desc, "tds", None), Some(14330));
        assert_eq!(endpoint_port(&desc, "tds", Some(&handle(5))), Some(5));
        assert_eq!(endpoint_port(&desc, "nope", None), None);
    }

    #[test]
    fn test_check_template_rejects_unknown_names() {
        let desc = engine();
        assert!(check_template(&desc, "{port:tds}/{param:password}").is_ok());
        assert!(matches!(
            check_template(&desc, "{endpoint:http}"),
            Err(StagehandError::Template(_))
        ));
        assert!(matches!(
            check_template(&desc, "{param:user}"),
            Err(StagehandError::Template(_))
        ));
    }

    #[test]
    fn test_render_template_leaves_plain_text() {
        let desc = engine();
        let out = render_template(
            &desc,
            "no placeholders {here}",
            &handle(1),
            &ResolvedParams::default(),
        )
        .unwrap();
        assert_eq!(out, "no placeholders {here}");
    }

    #[test]
    fn test_declared_facts() {
        let names = declared_facts(&engine());
        assert_eq!(
            names,
            vec!["endpoint.tds", "internal_endpoint.tds", "connection_string"]
        );
    }
}
