//! Docker runtime implementation
//!
//! Drives the `docker` CLI. Long-running kinds are started detached, managed
//! databases are created inside their engine container, and one-shot jobs
//! run detached and are polled for their exit code.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::RuntimeConfig;
use crate::error::{Result, StagehandError};
use crate::topology::{Mount, ResolvedParams, ResourceDescriptor, ResourceKind};

use super::types::{InstanceHandle, JobStatus, NativeStatus, ResourceRuntime};

/// Param naming the engine container a managed database lives in.
pub const PARAM_ENGINE: &str = "engine";
/// Param holding the shell command that creates a managed database.
pub const PARAM_CREATE_COMMAND: &str = "create_command";
/// Param holding the shell command whose success means "engine ready".
pub const PARAM_READINESS_COMMAND: &str = "readiness_command";

/// Docker runtime that runs each node as a named container
#[derive(Debug)]
pub struct DockerRuntime {
    /// Docker binary to invoke
    binary: String,
    /// Network every container joins
    network: Option<String>,
    /// Pull images before running them
    pull: bool,
    /// Readiness commands by instance id, captured at instantiate time
    readiness: Mutex<HashMap<String, String>>,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            network: None,
            pull: false,
            readiness: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        let runtime = Self::new()
            .with_binary(&config.docker_binary)
            .with_pull(config.pull);
        match config.network {
            Some(ref network) => runtime.with_network(network),
            None => runtime,
        }
    }

    /// Set the docker binary
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    /// Set network
    pub fn with_network(mut self, network: &str) -> Self {
        self.network = Some(network.to_string());
        self
    }

    /// Pull images before running them
    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    async fn docker(&self, node: &str, args: &[String]) -> Result<Output> {
        let rendered = args.join(" ");
        crate::log_component!(debug, "runtime", "docker", node = node, args = rendered.as_str());
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StagehandError::adapter(node, format!("failed to run {}: {}", self.binary, e)))
    }

    /// Run docker and fail unless it exits successfully. Returns stdout.
    async fn docker_ok(&self, node: &str, args: &[String]) -> Result<String> {
        let output = self.docker(node, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StagehandError::adapter(
                node,
                format!(
                    "docker {} exited with {}: {}",
                    args.first().map(String::as_str).unwrap_or(""),
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn remove(&self, container: &str) -> Result<Output> {
        self.docker(
            container,
            &["rm".to_string(), "-f".to_string(), container.to_string()],
        )
        .await
    }

    async fn create_database(
        &self,
        descriptor: &ResourceDescriptor,
        params: &ResolvedParams,
    ) -> Result<InstanceHandle> {
        let node = descriptor.name.as_str();
        let engine = params
            .params
            .get(PARAM_ENGINE)
            .ok_or_else(|| StagehandError::adapter(node, "managed database has no engine"))?;
        let create = params
            .params
            .get(PARAM_CREATE_COMMAND)
            .ok_or_else(|| StagehandError::adapter(node, "managed database has no create command"))?;

        let args = vec![
            "exec".to_string(),
            engine.clone(),
            "sh".to_string(),
            "-c".to_string(),
            create.clone(),
        ];
        self.docker_ok(node, &args).await?;
        Ok(InstanceHandle::new(node, format!("{}/{}", engine, node)))
    }

    async fn run_container(
        &self,
        descriptor: &ResourceDescriptor,
        params: &ResolvedParams,
    ) -> Result<InstanceHandle> {
        let node = descriptor.name.as_str();
        let image = descriptor
            .image
            .as_ref()
            .ok_or_else(|| StagehandError::adapter(node, "no image declared"))?
            .to_string();

        if self.pull {
            self.docker_ok(node, &["pull".to_string(), image.clone()])
                .await?;
        }

        // A stale container from an earlier run would make the name clash.
        let _ = self.remove(node).await;

        let env_file = write_env_file(node, params)?;
        let args = run_args(
            descriptor,
            &image,
            env_file.path(),
            self.network.as_deref(),
        );
        self.docker_ok(node, &args).await?;

        // The container exists from here on; never leave it behind on error.
        match self.published_handle(descriptor, params).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                let _ = self.remove(node).await;
                Err(e)
            }
        }
    }

    /// Handle for a running container, with every endpoint's host port.
    async fn published_handle(
        &self,
        descriptor: &ResourceDescriptor,
        params: &ResolvedParams,
    ) -> Result<InstanceHandle> {
        let node = descriptor.name.as_str();
        let mut handle = InstanceHandle::new(node, node);
        for endpoint in &descriptor.endpoints {
            let port = match endpoint.host_port {
                Some(port) => port,
                None => {
                    let out = self
                        .docker_ok(
                            node,
                            &[
                                "port".to_string(),
                                node.to_string(),
                                format!("{}/tcp", endpoint.target_port),
                            ],
                        )
                        .await?;
                    parse_port_output(&out).ok_or_else(|| {
                        StagehandError::adapter(
                            node,
                            format!("no host port published for '{}'", endpoint.name),
                        )
                    })?
                }
            };
            handle.ports.insert(endpoint.name.clone(), port);
        }

        if let Some(command) = params.params.get(PARAM_READINESS_COMMAND) {
            self.readiness
                .lock()
                .await
                .insert(handle.instance_id.clone(), command.clone());
        }
        Ok(handle)
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn instantiate(
        &self,
        descriptor: &ResourceDescriptor,
        params: &ResolvedParams,
    ) -> Result<InstanceHandle> {
        match descriptor.kind {
            ResourceKind::ManagedDatabase => self.create_database(descriptor, params).await,
            _ => self.run_container(descriptor, params).await,
        }
    }

    async fn probe_native(&self, handle: &InstanceHandle) -> Result<NativeStatus> {
        let command = self
            .readiness
            .lock()
            .await
            .get(&handle.instance_id)
            .cloned();

        let args = match command {
            Some(command) => vec![
                "exec".to_string(),
                handle.instance_id.clone(),
                "sh".to_string(),
                "-c".to_string(),
                command,
            ],
            None => vec![
                "inspect".to_string(),
                "-f".to_string(),
                "{{.State.Running}}".to_string(),
                handle.instance_id.clone(),
            ],
        };
        let output = self.docker(&handle.node, &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && (args[0] == "exec" || stdout.trim() == "true") {
            Ok(NativeStatus::Ready)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(NativeStatus::NotReady(
                stderr.trim().lines().last().unwrap_or("not ready").to_string(),
            ))
        }
    }

    async fn poll_job(&self, handle: &InstanceHandle) -> Result<JobStatus> {
        let out = self
            .docker_ok(
                &handle.node,
                &[
                    "inspect".to_string(),
                    "-f".to_string(),
                    "{{.State.Status}} {{.State.ExitCode}}".to_string(),
                    handle.instance_id.clone(),
                ],
            )
            .await?;
        Ok(parse_job_status(&out))
    }

    async fn adopt(&self, descriptor: &ResourceDescriptor) -> Option<InstanceHandle> {
        match descriptor.kind {
            ResourceKind::ManagedDatabase => None,
            // Containers are named after their node.
            _ => Some(InstanceHandle::new(&descriptor.name, &descriptor.name)),
        }
    }

    async fn terminate(&self, handle: &InstanceHandle) -> Result<()> {
        if handle.instance_id.contains('/') {
            // Managed databases go away with their engine container.
            return Ok(());
        }
        self.docker_ok(
            &handle.node,
            &[
                "rm".to_string(),
                "-f".to_string(),
                handle.instance_id.clone(),
            ],
        )
        .await
        .map(|_| ())
    }
}

/// Write resolved environment to a private env file for `--env-file`.
fn write_env_file(node: &str, params: &ResolvedParams) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    for (key, value) in &params.env {
        if value.contains('\n') || key.contains('=') {
            return Err(StagehandError::adapter(
                node,
                format!("environment entry '{}' cannot be passed to docker", key),
            ));
        }
        writeln!(file, "{}={}", key, value)?;
    }
    file.flush()?;
    Ok(file)
}

/// Build `docker run` arguments for a node.
pub fn run_args(
    descriptor: &ResourceDescriptor,
    image: &str,
    env_file: &Path,
    network: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        descriptor.name.clone(),
        "--label".to_string(),
        format!("stagehand.node={}", descriptor.name),
        "--add-host".to_string(),
        "host.docker.internal:host-gateway".to_string(),
    ];

    if let Some(network) = network {
        args.push("--network".to_string());
        args.push(network.to_string());
    }

    for endpoint in &descriptor.endpoints {
        args.push("-p".to_string());
        args.push(match endpoint.host_port {
            Some(host) => format!("{}:{}", host, endpoint.target_port),
            None => endpoint.target_port.to_string(),
        });
    }

    for mount in &descriptor.mounts {
        args.push("-v".to_string());
        args.push(match mount {
            Mount::Volume { name, target } => format!("{}:{}", name, target),
            Mount::Bind {
                source,
                target,
                read_only,
            } => {
                if *read_only {
                    format!("{}:{}:ro", source, target)
                } else {
                    format!("{}:{}", source, target)
                }
            }
        });
    }

    args.push("--env-file".to_string());
    args.push(env_file.to_string_lossy().to_string());

    args.push(image.to_string());
    args.extend(descriptor.args.iter().cloned());
    args
}

/// Parse `docker port` output such as `0.0.0.0:49153\n[::]:49153`.
pub fn parse_port_output(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}

/// Parse `docker inspect -f '{{.State.Status}} {{.State.ExitCode}}'` output.
pub fn parse_job_status(output: &str) -> JobStatus {
    let mut parts = output.split_whitespace();
    let status = parts.next().unwrap_or("");
    let code = parts.next().and_then(|c| c.parse::<i64>().ok());
    match (status, code) {
        ("exited", Some(0)) => JobStatus::Succeeded,
        ("exited", Some(code)) => JobStatus::Failed(format!("exited with code {}", code)),
        ("dead", _) => JobStatus::Failed("container is dead".to_string()),
        _ => JobStatus::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Endpoint, ImageRef, Protocol};

    fn web() -> ResourceDescriptor {
        let mut desc = ResourceDescriptor::new("web-app", ResourceKind::Container);
        desc.image = Some(ImageRef::new("nginx", "alpine"));
        desc.endpoints.push(Endpoint {
            name: "http".into(),
            protocol: Protocol::Http,
            target_port: 80,
            host_port: Some(5173),
        });
        desc.endpoints.push(Endpoint {
            name: "admin".into(),
            protocol: Protocol::Http,
            target_port: 8080,
            host_port: None,
        });
        desc.mounts.push(Mount::Bind {
            source: "/src/web-app".into(),
            target: "/usr/share/nginx/html".into(),
            read_only: true,
        });
        desc.mounts.push(Mount::Volume {
            name: "cache".into(),
            target: "/var/cache".into(),
        });
        desc.args.push("nginx-debug".into());
        desc
    }

    #[test]
    fn test_docker_runtime_builder() {
        let runtime = DockerRuntime::new()
            .with_binary("podman")
            .with_network("qs4")
            .with_pull(true);
        assert_eq!(runtime.binary, "podman");
        assert_eq!(runtime.network.as_deref(), Some("qs4"));
        assert!(runtime.pull);
        assert_eq!(runtime.name(), "docker");
    }

    #[test]
    fn test_docker_runtime_from_config() {
        let config = RuntimeConfig {
            network: Some("bridge".into()),
            ..RuntimeConfig::default()
        };
        let runtime = DockerRuntime::from_config(&config);
        assert_eq!(runtime.binary, "docker");
        assert_eq!(runtime.network.as_deref(), Some("bridge"));
        assert!(!runtime.pull);
    }

    #[test]
    fn test_run_args() {
        let args = run_args(&web(), "nginx:alpine", Path::new("/tmp/env"), Some("qs4"));
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --name web-app"));
        assert!(joined.contains("--network qs4"));
        assert!(joined.contains("-p 5173:80"));
        assert!(joined.contains("-p 8080"));
        assert!(joined.contains("-v /src/web-app:/usr/share/nginx/html:ro"));
        assert!(joined.contains("-v cache:/var/cache"));
        assert!(joined.contains("--env-file /tmp/env"));
        // Image comes right before the container args.
        assert_eq!(&args[args.len() - 2..], ["nginx:alpine", "nginx-debug"]);
    }

    #[test]
    fn test_run_args_without_network() {
        let args = run_args(&web(), "nginx:alpine", Path::new("/tmp/env"), None);
        assert!(!args.contains(&"--network".to_string()));
    }

    #[test]
    fn test_parse_port_output() {
        assert_eq!(parse_port_output("0.0.0.0:49153\n[::]:49153\n"), Some(49153));
        assert_eq!(parse_port_output("[::]:32768"), Some(32768));
        assert_eq!(parse_port_output(""), None);
        assert_eq!(parse_port_output("garbage"), None);
    }

    #[test]
    fn test_parse_job_status() {
        assert_eq!(parse_job_status("exited 0\n"), JobStatus::Succeeded);
        assert_eq!(
            parse_job_status("exited 3"),
            JobStatus::Failed("exited with code 3".into())
        );
        assert_eq!(parse_job_status("running 0"), JobStatus::Running);
        assert_eq!(parse_job_status("created 0"), JobStatus::Running);
        assert!(matches!(parse_job_status("dead 137"), JobStatus::Failed(_)));
    }

    #[test]
    fn test_env_file_contents() {
        let mut params = ResolvedParams::default();
        params.env.insert("ACCEPT_EULA".into(), "Y".into());
        params.env.insert("MSSQL_SA_PASSWORD".into(), "p=w".into());
        let file = write_env_file("sql", &params).unwrap();
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents, "ACCEPT_EULA=Y\nMSSQL_SA_PASSWORD=p=w\n");
    }

    #[test]
    fn test_env_file_rejects_multiline() {
        let mut params = ResolvedParams::default();
        params.env.insert("BAD".into(), "a\nb".into());
        assert!(matches!(
            write_env_file("api", &params),
            Err(StagehandError::Adapter { .. })
        ));
    }

    #[tokio::test]
    async fn test_database_terminate_is_noop() {
        let runtime = DockerRuntime::new().with_binary("/nonexistent/docker");
        let handle = InstanceHandle::new("TodoDb", "sql/TodoDb");
        assert!(runtime.terminate(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_binary_is_adapter_error() {
        let runtime = DockerRuntime::new().with_binary("/nonexistent/docker");
        assert!(!runtime.is_available().await);
        let err = runtime
            .terminate(&InstanceHandle::new("api", "api"))
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Adapter { .. }));
    }

    #[test]
    fn test_adopt_names_container_after_node() {
        let runtime = DockerRuntime::new();
        let handle = tokio_test::block_on(runtime.adopt(&web())).unwrap();
        assert_eq!(handle.instance_id, "web-app");
        let db = ResourceDescriptor::new("TodoDb", ResourceKind::ManagedDatabase);
        assert!(tokio_test::block_on(runtime.adopt(&db)).is_none());
    }

    /// A docker stand-in that logs each subcommand and fails `docker port`.
    #[cfg(unix)]
    fn fake_docker(dir: &Path) -> (String, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = dir.join("docker");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$1\" >> '{}'\nif [ \"$1\" = port ]; then exit 1; fi\nexit 0\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.to_string_lossy().to_string(), log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_container_removed_when_port_lookup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, log) = fake_docker(dir.path());
        let runtime = DockerRuntime::new().with_binary(&binary);

        let err = runtime
            .instantiate(&web(), &ResolvedParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Adapter { .. }));

        let calls = std::fs::read_to_string(log).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls, vec!["rm", "run", "port", "rm"]);
    }

    // Integration tests (only run if Docker is available)
    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_docker_runtime_available() {
        assert!(DockerRuntime::new().is_available().await);
    }
}
