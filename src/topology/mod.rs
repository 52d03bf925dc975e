//! Topology model: resource descriptors, the dependency graph between them,
//! display URL projections and the builder that freezes them together.

pub mod builder;
pub mod descriptor;
pub mod graph;
pub mod urls;

pub use builder::{
    Parameter, ParameterHandle, ResourceBuilder, ResourceHandle, Topology, TopologyBuilder,
    CONNECTION_STRING, ENGINE_DATA_DIR,
};
pub use descriptor::{
    Endpoint, FactRef, ImageRef, Mount, ParamValue, Protocol, ResolvedParams, ResourceDescriptor,
    ResourceKind,
};
pub use graph::{DependencyEdge, DependencyGraph, EdgeKind};
pub use urls::{DisplayUrl, ResolvedEndpoint, UrlProjection};
