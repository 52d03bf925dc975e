//! The quickstart topology: a SQL engine with a `TodoDb` database, a schema
//! deployment job, a Data API builder, a SQL console, an nginx frontend and
//! an MCP inspector attached to the API.
//!
//! Resource names carry a per-checkout token so two checkouts on one machine
//! never share containers or volumes.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Result, StagehandError};
use crate::topology::{ImageRef, ParamValue, Topology, TopologyBuilder, UrlProjection};

pub const SQL_PASSWORD: &str = "sql-password";
pub const DATABASE: &str = "TodoDb";
pub const SQL_PROJECT: &str = "qs4-sql-project";
pub const MCP_INSPECTOR: &str = "mcp-inspector";

const DAB_TAG: &str = "1.7.83-rc";
const INSPECTOR_TAG: &str = "0.20.0";
const SQLCMD_TOOLS: &str = "/opt/mssql-tools18/bin/sqlcmd";

/// Names of the token-suffixed resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    pub sql_server: String,
    pub sql_volume: String,
    pub data_api: String,
    pub sql_cmdr: String,
    pub web_app: String,
}

impl Names {
    pub fn new(token: &str) -> Self {
        Self {
            sql_server: format!("qs4-sql-server-{}", token),
            sql_volume: format!("qs4-sql-data-{}", token),
            data_api: format!("qs4-data-api-{}", token),
            sql_cmdr: format!("qs4-sql-cmdr-{}", token),
            web_app: format!("qs4-web-app-{}", token),
        }
    }
}

fn dab_config(root: &Path) -> PathBuf {
    root.join("data-api").join("dab-config.json")
}

fn web_root(root: &Path) -> PathBuf {
    root.join("web-app")
}

fn database_dir(root: &Path) -> PathBuf {
    root.join("database")
}

/// Check the assets the topology mounts exist under `root`.
pub fn verify_setup(root: &Path) -> Result<()> {
    let mut missing = Vec::new();
    if !dab_config(root).is_file() {
        missing.push(dab_config(root));
    }
    if !web_root(root).is_dir() {
        missing.push(web_root(root));
    }
    if !database_dir(root).is_dir() {
        missing.push(database_dir(root));
    }
    if missing.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
    Err(StagehandError::Setup(format!(
        "missing under {}: {}",
        root.display(),
        listed.join(", ")
    )))
}

/// Name suffix for this checkout: the configured token, else the first eight
/// hex digits of the SHA-256 of the canonical root path.
pub fn token(root: &Path, config: &Config) -> Result<String> {
    if let Some(token) = config.topology.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    let canonical = root.canonicalize()?;
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    Ok(hex::encode(digest)[..8].to_string())
}

/// Declare the quickstart topology rooted at `root`.
pub fn declare(root: &Path, token: &str, config: &Config) -> Result<Topology> {
    let names = Names::new(token);
    let path = |p: PathBuf| p.to_string_lossy().into_owned();

    let mut builder = TopologyBuilder::new().with_telemetry(config.telemetry.clone());
    let password = builder.add_parameter(SQL_PASSWORD, true);

    let sql = builder
        .add_engine(
            &names.sql_server,
            ImageRef::new("mssql/server", "2022-latest"),
            &password,
        )
        .with_registry("mcr.microsoft.com")
        .with_data_volume(&names.sql_volume)
        .with_environment("ACCEPT_EULA", "Y")
        .handle();

    let db = builder.add_database(&sql, DATABASE).handle();

    // Deploy every script under database/ in name order; stop on the first error.
    let deploy = format!(
        r#"for f in /database/*.sql; do {} -C -b -i "$f" || exit 1; done"#,
        SQLCMD_TOOLS
    );
    let project = builder
        .add_migration(SQL_PROJECT, &db)
        .with_image(ImageRef::new("mssql/server", "2022-latest"))
        .with_registry("mcr.microsoft.com")
        .with_bind_mount(&path(database_dir(root)), "/database", true)
        .with_environment("SQLCMDSERVER", sql.fact("server"))
        .with_environment("SQLCMDUSER", "sa")
        .with_environment("SQLCMDPASSWORD", password.value())
        .with_environment("SQLCMDDBNAME", DATABASE)
        .with_args(["bash".to_string(), "-c".to_string(), deploy])
        .handle();

    let api = builder
        .add_container(&names.data_api, "azure-databases/data-api-builder", DAB_TAG)
        .with_registry("mcr.microsoft.com")
        .with_bind_mount(&path(dab_config(root)), "/App/dab-config.json", true)
        .with_http_endpoint("http", 5000, Some(5000))
        .with_environment("MSSQL_CONNECTION_STRING", db.connection_string())
        .with_urls(UrlProjection::paths(
            "http",
            &[
                ("/graphql", "GraphQL"),
                ("/swagger", "Swagger"),
                ("/health", "Health"),
            ],
        ))
        .with_otlp_exporter()
        .with_parent(&db)
        .with_http_health_check("/health")
        .wait_for_completion(&project)
        .handle();

    builder
        .add_container(&names.sql_cmdr, "jerrynixon/sql-commander", "latest")
        .with_registry("docker.io")
        .with_http_endpoint("http", 8080, None)
        .with_reference(&db)
        .with_urls(UrlProjection::paths("http", &[("/", "Commander")]))
        .with_parent(&db)
        .with_http_health_check("/health")
        .wait_for_completion(&project);

    // The frontend needs the API up, not finished.
    builder
        .add_container(&names.web_app, "nginx", "alpine")
        .with_registry("docker.io")
        .with_bind_mount(&path(web_root(root)), "/usr/share/nginx/html", true)
        .with_http_endpoint("http", 80, Some(5173))
        .with_urls(UrlProjection::paths("http", &[("/", "Web App")]))
        .wait_for(&api);

    builder
        .add_sidecar(MCP_INSPECTOR, "modelcontextprotocol/inspector", INSPECTOR_TAG)
        .with_registry("ghcr.io")
        .with_http_endpoint("client", 6274, Some(6274))
        .with_http_endpoint("proxy", 6277, Some(6277))
        .with_environment(
            "MCP_SERVER_URL",
            ParamValue::join([api.internal_endpoint("http"), ParamValue::literal("/mcp")]),
        )
        .with_environment("MCP_TRANSPORT", "streamable-http")
        .with_environment("DANGEROUSLY_OMIT_AUTH", "true")
        .with_environment("HOST", "0.0.0.0")
        .with_urls(UrlProjection::paths("client", &[("/", "Inspector")]))
        .with_parent(&api)
        .wait_for(&api);

    builder.build()
}
