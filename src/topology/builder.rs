//! Topology declaration.
//!
//! A [`TopologyBuilder`] collects resource declarations and is consumed by
//! [`TopologyBuilder::build`], which derives implicit edges, validates the
//! graph and freezes everything into an immutable [`Topology`].
//!
//! ```
//! use stagehand::topology::{ImageRef, TopologyBuilder};
//!
//! let mut builder = TopologyBuilder::new();
//! let password = builder.add_parameter("sql-password", true);
//! let sql = builder
//!     .add_engine("sql", ImageRef::new("mssql/server", "2022-latest"), &password)
//!     .handle();
//! let db = builder.add_database(&sql, "TodoDb").handle();
//! builder
//!     .add_container("api", "data-api-builder", "latest")
//!     .with_http_endpoint("http", 5000, Some(5000))
//!     .with_environment("MSSQL_CONNECTION_STRING", db.connection_string())
//!     .with_http_health_check("/health");
//!
//! let topology = builder.build().unwrap();
//! assert_eq!(topology.graph().len(), 3);
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::config::TelemetryConfig;
use crate::error::{Result, StagehandError};
use crate::facts;
use crate::health::{HealthProbeRegistry, ProbeSpec};

use super::descriptor::{
    Endpoint, FactRef, ImageRef, Mount, ParamValue, Protocol, ResourceDescriptor, ResourceKind,
};
use super::graph::{DependencyGraph, EdgeKind};
use super::urls::{DisplayUrl, UrlProjection};

/// Data directory of the database engine image.
pub const ENGINE_DATA_DIR: &str = "/var/opt/mssql";

/// Fact every engine and managed database exports.
pub const CONNECTION_STRING: &str = "connection_string";

const SQLCMD: &str = r#"/opt/mssql-tools18/bin/sqlcmd -C -S localhost -U sa -P "$MSSQL_SA_PASSWORD""#;

// ============================================================================
// Handles
// ============================================================================

/// Reference to a declared resource, used to wire dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    name: String,
}

impl ResourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A fact this resource publishes once Ready.
    pub fn fact(&self, fact: &str) -> ParamValue {
        ParamValue::Fact(FactRef::new(&self.name, fact))
    }

    pub fn connection_string(&self) -> ParamValue {
        self.fact(CONNECTION_STRING)
    }

    /// URL of a named endpoint, as reached from the host.
    pub fn endpoint(&self, endpoint: &str) -> ParamValue {
        self.fact(&format!("{}{}", facts::ENDPOINT_FACT_PREFIX, endpoint))
    }

    /// URL of a named endpoint, as reached from another container.
    pub fn internal_endpoint(&self, endpoint: &str) -> ParamValue {
        self.fact(&format!("{}{}", facts::INTERNAL_ENDPOINT_FACT_PREFIX, endpoint))
    }
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub secret: bool,
}

/// Reference to a declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterHandle {
    name: String,
}

impl ParameterHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> ParamValue {
        ParamValue::Secret(self.name.clone())
    }
}

// ============================================================================
// Topology
// ============================================================================

/// A validated, immutable topology.
#[derive(Debug, Clone)]
pub struct Topology {
    graph: DependencyGraph,
    probes: HealthProbeRegistry,
    projections: HashMap<String, UrlProjection>,
    parameters: BTreeMap<String, Parameter>,
}

impl Topology {
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn probes(&self) -> &HealthProbeRegistry {
        &self.probes
    }

    pub fn probe(&self, node: &str) -> &ProbeSpec {
        self.probes.get(node)
    }

    pub fn projection(&self, node: &str) -> UrlProjection {
        self.projections.get(node).cloned().unwrap_or_default()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    /// Display links from declared ports, before anything runs.
    pub fn planned_urls(&self, node: &str) -> Vec<DisplayUrl> {
        match self.graph.node(node) {
            Some(descriptor) => self
                .projection(node)
                .project(&facts::resolved_endpoints(descriptor, None)),
            None => Vec::new(),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

struct Declared {
    descriptor: ResourceDescriptor,
    probe: ProbeSpec,
    projection: Option<UrlProjection>,
    waits: Vec<(String, EdgeKind)>,
    otlp: bool,
}

/// Collects declarations. Mutated only during declaration; `build` consumes it.
pub struct TopologyBuilder {
    resources: Vec<Declared>,
    index: HashMap<String, usize>,
    parameters: BTreeMap<String, Parameter>,
    telemetry: TelemetryConfig,
    /// Declaration errors, reported by `build`.
    errors: Vec<StagehandError>,
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
            index: HashMap::new(),
            parameters: BTreeMap::new(),
            telemetry: TelemetryConfig::default(),
            errors: Vec::new(),
        }
    }

    /// OTLP settings injected into resources declared `with_otlp_exporter`.
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn add_parameter(&mut self, name: &str, secret: bool) -> ParameterHandle {
        self.parameters.insert(
            name.to_string(),
            Parameter {
                name: name.to_string(),
                secret,
            },
        );
        ParameterHandle {
            name: name.to_string(),
        }
    }

    /// Declare a resource from a prepared descriptor.
    pub fn add_resource(&mut self, descriptor: ResourceDescriptor) -> ResourceBuilder<'_> {
        let probe = match descriptor.kind {
            ResourceKind::Engine => ProbeSpec::Native,
            _ => ProbeSpec::None,
        };
        let name = descriptor.name.clone();
        if self.index.contains_key(&name) {
            self.errors.push(StagehandError::DuplicateNode(name));
        } else {
            self.index.insert(name, self.resources.len());
        }
        self.resources.push(Declared {
            descriptor,
            probe,
            projection: None,
            waits: Vec::new(),
            otlp: false,
        });
        let idx = self.resources.len() - 1;
        ResourceBuilder { builder: self, idx }
    }

    /// Declare a database engine.
    ///
    /// The engine reports readiness natively and exports `connection_string`
    /// for the `sa` login using `password`.
    pub fn add_engine(
        &mut self,
        name: &str,
        image: ImageRef,
        password: &ParameterHandle,
    ) -> ResourceBuilder<'_> {
        let mut desc = ResourceDescriptor::new(name, ResourceKind::Engine);
        desc.image = Some(image);
        desc.endpoints.push(Endpoint {
            name: "tds".to_string(),
            protocol: Protocol::Tcp,
            target_port: 1433,
            host_port: None,
        });
        desc.env.insert("ACCEPT_EULA".into(), "Y".into());
        desc.env
            .insert("MSSQL_SA_PASSWORD".into(), password.value());
        desc.params.insert("password".into(), password.value());
        // Dependents run in containers and reach the engine through the host.
        desc.params
            .insert("host".into(), facts::CONTAINER_HOST.into());
        desc.params.insert(
            crate::runtime::docker::PARAM_READINESS_COMMAND.into(),
            format!(r#"{} -Q "SELECT 1""#, SQLCMD).into(),
        );
        desc.exports
            .insert("server".into(), "{param:host},{port:tds}".into());
        desc.exports.insert(
            CONNECTION_STRING.into(),
            "Server={param:host},{port:tds};User ID=sa;Password={param:password};TrustServerCertificate=true"
                .into(),
        );
        self.add_resource(desc)
    }

    /// Declare a database inside an engine. The node is named after the database.
    pub fn add_database(&mut self, engine: &ResourceHandle, database: &str) -> ResourceBuilder<'_> {
        let mut desc = ResourceDescriptor::new(database, ResourceKind::ManagedDatabase);
        desc.parent = Some(engine.name.clone());
        desc.params
            .insert(crate::runtime::docker::PARAM_ENGINE.into(), engine.name.as_str().into());
        desc.params.insert("database".into(), database.into());
        desc.params.insert(
            crate::runtime::docker::PARAM_CREATE_COMMAND.into(),
            format!(
                r#"{} -Q "IF DB_ID(N'{db}') IS NULL CREATE DATABASE [{db}]""#,
                SQLCMD,
                db = database
            )
            .into(),
        );
        desc.params
            .insert("engine_connection".into(), engine.connection_string());
        desc.exports.insert(
            CONNECTION_STRING.into(),
            "{param:engine_connection};Database={param:database}".into(),
        );
        self.add_resource(desc)
    }

    /// Declare a schema deployment job against `database`.
    pub fn add_migration(&mut self, name: &str, database: &ResourceHandle) -> ResourceBuilder<'_> {
        let desc = ResourceDescriptor::new(name, ResourceKind::MigrationJob);
        self.add_resource(desc)
            .with_parent(database)
            .with_reference(database)
    }

    pub fn add_container(&mut self, name: &str, image: &str, tag: &str) -> ResourceBuilder<'_> {
        self.add_image_resource(name, ResourceKind::Container, image, tag)
    }

    pub fn add_completion_job(&mut self, name: &str, image: &str, tag: &str) -> ResourceBuilder<'_> {
        self.add_image_resource(name, ResourceKind::CompletionJob, image, tag)
    }

    pub fn add_sidecar(&mut self, name: &str, image: &str, tag: &str) -> ResourceBuilder<'_> {
        self.add_image_resource(name, ResourceKind::Sidecar, image, tag)
    }

    fn add_image_resource(
        &mut self,
        name: &str,
        kind: ResourceKind,
        image: &str,
        tag: &str,
    ) -> ResourceBuilder<'_> {
        let mut desc = ResourceDescriptor::new(name, kind);
        desc.image = Some(ImageRef::new(image, tag));
        self.add_resource(desc)
    }

    /// Derive edges, validate and freeze.
    ///
    /// Fails on the first declaration error, unknown reference, malformed
    /// export template, cycle or unsatisfiable edge.
    pub fn build(self) -> Result<Topology> {
        let TopologyBuilder {
            mut resources,
            parameters,
            telemetry,
            errors,
            ..
        } = self;

        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }

        let mut graph = DependencyGraph::new();
        for declared in &mut resources {
            if declared.otlp && telemetry.enabled {
                let env = &mut declared.descriptor.env;
                env.entry("OTEL_EXPORTER_OTLP_ENDPOINT".into())
                    .or_insert_with(|| telemetry.otlp_endpoint.as_str().into());
                env.entry("OTEL_EXPORTER_OTLP_PROTOCOL".into())
                    .or_insert_with(|| telemetry.otlp_protocol.as_str().into());
                env.entry("OTEL_SERVICE_NAME".into())
                    .or_insert_with(|| declared.descriptor.name.as_str().into());
            }
            graph.add_node(declared.descriptor.clone())?;
        }

        let mut probes = HealthProbeRegistry::new();
        let mut projections = HashMap::new();

        for declared in resources {
            let desc = &declared.descriptor;

            if let Some(parent) = &desc.parent {
                if graph.node(parent).is_none() {
                    return Err(StagehandError::UnknownNode(parent.clone()));
                }
            }

            for secret in desc.secret_refs() {
                if !parameters.contains_key(secret) {
                    return Err(StagehandError::UnknownParameter(secret.to_string()));
                }
            }

            let endpoint_facts = facts::declared_facts(&ResourceDescriptor {
                exports: BTreeMap::new(),
                ..desc.clone()
            });
            for (fact, template) in &desc.exports {
                if endpoint_facts.contains(fact) {
                    return Err(StagehandError::DuplicateFact {
                        node: desc.name.clone(),
                        fact: fact.clone(),
                    });
                }
                facts::check_template(desc, template)?;
            }

            // Consuming a fact means waiting for its producer to be Ready.
            for reference in desc.fact_refs() {
                let producer = graph
                    .node(&reference.producer)
                    .ok_or_else(|| StagehandError::UnknownNode(reference.producer.clone()))?;
                if !facts::declared_facts(producer).contains(&reference.fact) {
                    return Err(StagehandError::Template(format!(
                        "'{}' references fact '{}' which '{}' never publishes",
                        desc.name, reference, reference.producer
                    )));
                }
                let producer = reference.producer.clone();
                graph.add_edge(&producer, &desc.name, EdgeKind::ReadyDependency)?;
            }

            for (target, kind) in &declared.waits {
                graph.add_edge(target, &desc.name, *kind)?;
            }

            if let ProbeSpec::Http { endpoint, .. } = &declared.probe {
                if desc.endpoint(endpoint).is_none() {
                    return Err(StagehandError::Unsatisfiable(format!(
                        "health check of '{}' uses undeclared endpoint '{}'",
                        desc.name, endpoint
                    )));
                }
            }
            if declared.probe != ProbeSpec::None {
                probes.register(desc.name.clone(), declared.probe.clone());
            }
            if let Some(projection) = declared.projection {
                projections.insert(desc.name.clone(), projection);
            }
        }

        graph.validate()?;

        Ok(Topology {
            graph,
            probes,
            projections,
            parameters,
        })
    }
}

// ============================================================================
// Per-resource configuration
// ============================================================================

/// Configures the resource most recently declared.
pub struct ResourceBuilder<'a> {
    builder: &'a mut TopologyBuilder,
    idx: usize,
}

impl ResourceBuilder<'_> {
    fn declared(&mut self) -> &mut Declared {
        &mut self.builder.resources[self.idx]
    }

    fn desc(&mut self) -> &mut ResourceDescriptor {
        &mut self.declared().descriptor
    }

    pub fn handle(&self) -> ResourceHandle {
        ResourceHandle {
            name: self.builder.resources[self.idx].descriptor.name.clone(),
        }
    }

    /// Set or replace the image the resource runs.
    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.desc().image = Some(image);
        self
    }

    pub fn with_registry(mut self, registry: &str) -> Self {
        if let Some(image) = self.desc().image.as_mut() {
            image.registry = Some(registry.to_string());
        }
        self
    }

    /// Persist the resource's data directory in a named volume.
    pub fn with_data_volume(mut self, volume: &str) -> Self {
        let target = match self.desc().kind {
            ResourceKind::Engine => ENGINE_DATA_DIR,
            _ => "/data",
        };
        self.with_volume(volume, target)
    }

    pub fn with_volume(mut self, volume: &str, target: &str) -> Self {
        self.desc().mounts.push(Mount::Volume {
            name: volume.to_string(),
            target: target.to_string(),
        });
        self
    }

    pub fn with_bind_mount(mut self, source: &str, target: &str, read_only: bool) -> Self {
        self.desc().mounts.push(Mount::Bind {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        });
        self
    }

    /// Expose an HTTP endpoint. `host_port: None` lets the runtime pick one.
    pub fn with_http_endpoint(self, name: &str, target_port: u16, host_port: Option<u16>) -> Self {
        self.with_endpoint(Endpoint {
            name: name.to_string(),
            protocol: Protocol::Http,
            target_port,
            host_port,
        })
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.desc().endpoints.push(endpoint);
        self
    }

    pub fn with_environment(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.desc().env.insert(key.to_string(), value.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.desc().params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.desc().args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Publish an extra fact on Ready, rendered from `template`.
    pub fn with_export(mut self, fact: &str, template: &str) -> Self {
        self.desc()
            .exports
            .insert(fact.to_string(), template.to_string());
        self
    }

    /// Inject `target`'s connection string as `ConnectionStrings__<name>`.
    pub fn with_reference(self, target: &ResourceHandle) -> Self {
        let key = format!("ConnectionStrings__{}", target.name);
        self.with_environment(&key, target.connection_string())
    }

    /// Display-only grouping; adds no edge.
    pub fn with_parent(mut self, parent: &ResourceHandle) -> Self {
        self.desc().parent = Some(parent.name.clone());
        self
    }

    /// Gate readiness on `GET <path>` against the `http` endpoint.
    pub fn with_http_health_check(self, path: &str) -> Self {
        self.with_probe(ProbeSpec::http("http", path))
    }

    pub fn with_probe(mut self, probe: ProbeSpec) -> Self {
        self.declared().probe = probe;
        self
    }

    /// Inject OTLP exporter settings at build time.
    pub fn with_otlp_exporter(mut self) -> Self {
        self.declared().otlp = true;
        self
    }

    pub fn with_urls(mut self, projection: UrlProjection) -> Self {
        self.declared().projection = Some(projection);
        self
    }

    /// Start only once `target` is Ready.
    pub fn wait_for(mut self, target: &ResourceHandle) -> Self {
        let name = target.name.clone();
        self.declared().waits.push((name, EdgeKind::ReadyDependency));
        self
    }

    /// Start only once the one-shot `target` has Completed.
    pub fn wait_for_completion(mut self, target: &ResourceHandle) -> Self {
        let name = target.name.clone();
        self.declared()
            .waits
            .push((name, EdgeKind::CompletionDependency));
        self
    }
}
