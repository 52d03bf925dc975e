//! Resource descriptors: the immutable declaration of one node.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of resource a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A database server process.
    Engine,
    /// A database hosted inside an engine.
    ManagedDatabase,
    /// A one-shot schema deployment.
    MigrationJob,
    /// A long-running service container.
    Container,
    /// Any other one-shot job.
    CompletionJob,
    /// A helper container attached to another resource.
    Sidecar,
}

impl ResourceKind {
    /// One-shot kinds finish in `Completed`; everything else ends in `Ready`.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, ResourceKind::MigrationJob | ResourceKind::CompletionJob)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Engine => "engine",
            ResourceKind::ManagedDatabase => "database",
            ResourceKind::MigrationJob => "migration",
            ResourceKind::Container => "container",
            ResourceKind::CompletionJob => "job",
            ResourceKind::Sidecar => "sidecar",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A reference to a fact another node publishes once it is Ready.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactRef {
    pub producer: String,
    pub fact: String,
}

impl FactRef {
    pub fn new(producer: impl Into<String>, fact: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            fact: fact.into(),
        }
    }
}

impl fmt::Display for FactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.producer, self.fact)
    }
}

/// A declared parameter or environment value.
///
/// Values other than `Literal` are resolved lazily, exactly once, when the
/// owning node enters `Starting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Literal(String),
    Fact(FactRef),
    /// A declared secret parameter, by name.
    Secret(String),
    /// Concatenation of the resolved parts.
    Join(Vec<ParamValue>),
}

impl ParamValue {
    pub fn literal(value: impl Into<String>) -> Self {
        ParamValue::Literal(value.into())
    }

    pub fn fact(producer: impl Into<String>, fact: impl Into<String>) -> Self {
        ParamValue::Fact(FactRef::new(producer, fact))
    }

    pub fn join(parts: impl IntoIterator<Item = ParamValue>) -> Self {
        ParamValue::Join(parts.into_iter().collect())
    }

    /// Collect every fact reference in this value, including nested ones.
    pub fn fact_refs<'a>(&'a self, out: &mut Vec<&'a FactRef>) {
        match self {
            ParamValue::Fact(r) => out.push(r),
            ParamValue::Join(parts) => parts.iter().for_each(|p| p.fact_refs(out)),
            ParamValue::Literal(_) | ParamValue::Secret(_) => {}
        }
    }

    /// Collect every secret name in this value, including nested ones.
    pub fn secret_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ParamValue::Secret(name) => out.push(name),
            ParamValue::Join(parts) => parts.iter().for_each(|p| p.secret_refs(out)),
            ParamValue::Literal(_) | ParamValue::Fact(_) => {}
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Literal(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Literal(value)
    }
}

impl From<FactRef> for ParamValue {
    fn from(value: FactRef) -> Self {
        ParamValue::Fact(value)
    }
}

/// Wire protocol of an exposed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
        }
    }
}

/// A named port the resource exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub protocol: Protocol,
    /// Port inside the resource.
    pub target_port: u16,
    /// Fixed host port; `None` lets the runtime allocate one.
    pub host_port: Option<u16>,
}

/// A volume or bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mount {
    Volume {
        name: String,
        target: String,
    },
    Bind {
        source: String,
        target: String,
        read_only: bool,
    },
}

/// Image coordinates for container-backed kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub image: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: None,
            image: image.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.registry {
            Some(registry) => write!(f, "{}/{}:{}", registry, self.image, self.tag),
            None => write!(f, "{}:{}", self.image, self.tag),
        }
    }
}

/// Immutable description of one node in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Stable identity, unique within a topology.
    pub name: String,
    pub kind: ResourceKind,
    pub image: Option<ImageRef>,
    /// Display-only grouping; does not imply an edge.
    pub parent: Option<String>,
    /// Kind-specific parameters (database name, readiness command, ...).
    pub params: BTreeMap<String, ParamValue>,
    /// Environment passed to the instance.
    pub env: BTreeMap<String, ParamValue>,
    /// Extra arguments appended after the image.
    pub args: Vec<String>,
    pub endpoints: Vec<Endpoint>,
    pub mounts: Vec<Mount>,
    /// Facts published on Ready, as name -> template.
    pub exports: BTreeMap<String, String>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            image: None,
            parent: None,
            params: BTreeMap::new(),
            env: BTreeMap::new(),
            args: Vec::new(),
            endpoints: Vec::new(),
            mounts: Vec::new(),
            exports: BTreeMap::new(),
        }
    }

    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Every fact this node consumes, from params and env alike.
    pub fn fact_refs(&self) -> Vec<&FactRef> {
        let mut out = Vec::new();
        for value in self.params.values().chain(self.env.values()) {
            value.fact_refs(&mut out);
        }
        out
    }

    /// Every secret parameter this node consumes.
    pub fn secret_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for value in self.params.values().chain(self.env.values()) {
            value.secret_refs(&mut out);
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Parameters and environment after every reference has been resolved.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResolvedParams {
    pub params: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl fmt::Debug for ResolvedParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may contain secrets.
        f.debug_struct("ResolvedParams")
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}
