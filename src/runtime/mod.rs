//! Resource runtime adapters
//!
//! The scheduler starts, probes and stops resources only through the
//! [`ResourceRuntime`] trait. Two adapters exist:
//! - Docker: real containers via the docker CLI
//! - Scripted: nothing touches the host; used for dry runs and tests

pub mod docker;
pub mod factory;
pub mod scripted;
pub mod types;

pub use docker::DockerRuntime;
pub use factory::{create_probe_client, create_runtime, effective_backend};
pub use scripted::{NodeScript, RuntimeCall, ScriptedRuntime};
pub use types::{InstanceHandle, JobStatus, NativeStatus, ResourceRuntime};
