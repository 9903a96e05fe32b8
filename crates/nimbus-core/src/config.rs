//! Platform configuration, parsed from the environment once at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which container runtime backend drives builds and invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntimeMode {
    Cli,
    Sidecar,
}

impl std::str::FromStr for ContainerRuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cli" => Ok(ContainerRuntimeMode::Cli),
            "sidecar" => Ok(ContainerRuntimeMode::Sidecar),
            other => Err(format!(
                "invalid CONTAINER_RUNTIME_MODE '{other}', expected 'cli' or 'sidecar'"
            )),
        }
    }
}

/// All environment-driven settings the platform recognizes.
///
/// Assembled once in the composition root and passed to plugins; nothing
/// reads the process environment after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    // Server
    pub port: u16,
    pub database_url: String,
    pub database_ssl: bool,
    pub jwt_secret: Option<String>,

    // Invocation limits
    pub function_timeout_seconds: u64,
    pub function_max_memory_mb: u64,
    pub function_max_concurrent: usize,
    pub function_max_request_size_mb: u64,

    // Optional secondary database projected into function env
    pub function_database_url: Option<String>,
    pub function_db_max_connections: Option<u32>,
    pub function_db_timeout_ms: Option<u64>,

    // Shared volume layout
    pub functions_dir: PathBuf,
    pub functions_data_base_host_dir: PathBuf,
    pub shared_volume_name: String,

    // Container runtime
    pub container_runtime_mode: ContainerRuntimeMode,
    pub container_socket_path: PathBuf,
    pub container_sidecar_path: Option<PathBuf>,
    pub container_base_image: String,
    pub container_registry: Option<String>,
}

impl PlatformConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = require_var("DATABASE_URL")?;

        let functions_dir = var("FUNCTIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/nimbus/functions"));
        let functions_data_base_host_dir = var("FUNCTIONS_DATA_BASE_HOST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| functions_dir.clone());

        Ok(Self {
            port: parse_var("PORT", 8080)?,
            database_url,
            database_ssl: parse_var("DATABASE_SSL", false)?,
            jwt_secret: var("JWT_SECRET"),
            function_timeout_seconds: parse_var("FUNCTION_TIMEOUT_SECONDS", 5)?,
            function_max_memory_mb: parse_var("FUNCTION_MAX_MEMORY_MB", 128)?,
            function_max_concurrent: parse_var("FUNCTION_MAX_CONCURRENT", 10)?,
            function_max_request_size_mb: parse_var("FUNCTION_MAX_REQUEST_SIZE_MB", 5)?,
            function_database_url: var("FUNCTION_DATABASE_URL"),
            function_db_max_connections: optional_parse_var("FUNCTION_DB_MAX_CONNECTIONS")?,
            function_db_timeout_ms: optional_parse_var("FUNCTION_DB_TIMEOUT_MS")?,
            functions_dir,
            functions_data_base_host_dir,
            shared_volume_name: var("SHARED_VOLUME_NAME")
                .unwrap_or_else(|| "functions_data".to_string()),
            container_runtime_mode: var("CONTAINER_RUNTIME_MODE")
                .map(|v| v.parse::<ContainerRuntimeMode>())
                .transpose()
                .map_err(anyhow::Error::msg)?
                .unwrap_or(ContainerRuntimeMode::Cli),
            container_socket_path: var("CONTAINER_SOCKET_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/run/nimbus/container-sidecar.sock")),
            container_sidecar_path: var("CONTAINER_SIDECAR_PATH").map(PathBuf::from),
            container_base_image: var("CONTAINER_BASE_IMAGE")
                .unwrap_or_else(|| "dart:stable".to_string()),
            container_registry: var("CONTAINER_REGISTRY"),
        })
    }

    /// Default invocation timeout in milliseconds.
    pub fn function_timeout_ms(&self) -> u64 {
        self.function_timeout_seconds * 1000
    }

    /// Maximum accepted archive size in bytes.
    pub fn max_request_size_bytes(&self) -> u64 {
        self.function_max_request_size_mb * 1024 * 1024
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn require_var(name: &str) -> anyhow::Result<String> {
    var(name).ok_or_else(|| anyhow::anyhow!("{name} must be set"))
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name} '{raw}': {e}")),
        None => Ok(default),
    }
}

fn optional_parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {name} '{raw}': {e}")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The one test that touches the process environment; nothing else in
    // this crate reads env vars, so there is no cross-test race.
    #[test]
    fn from_env_reads_every_recognized_option() {
        let vars = [
            ("PORT", "9090"),
            ("DATABASE_URL", "postgres://localhost/nimbus"),
            ("DATABASE_SSL", "true"),
            ("JWT_SECRET", "sekrit"),
            ("FUNCTION_TIMEOUT_SECONDS", "7"),
            ("FUNCTION_MAX_MEMORY_MB", "256"),
            ("FUNCTION_MAX_CONCURRENT", "3"),
            ("FUNCTION_MAX_REQUEST_SIZE_MB", "2"),
            ("FUNCTION_DATABASE_URL", "postgres://localhost/fns"),
            ("FUNCTION_DB_MAX_CONNECTIONS", "4"),
            ("FUNCTION_DB_TIMEOUT_MS", "1500"),
            ("FUNCTIONS_DIR", "/srv/nimbus/functions"),
            ("FUNCTIONS_DATA_BASE_HOST_DIR", "/mnt/host/functions"),
            ("SHARED_VOLUME_NAME", "fn_data"),
            ("CONTAINER_RUNTIME_MODE", "sidecar"),
            ("CONTAINER_SOCKET_PATH", "/run/fn.sock"),
            ("CONTAINER_SIDECAR_PATH", "/usr/bin/nimbus-sidecar"),
            ("CONTAINER_BASE_IMAGE", "dart:3.6"),
            ("CONTAINER_REGISTRY", "registry.local"),
        ];
        for (key, value) in vars {
            std::env::set_var(key, value);
        }

        let config = PlatformConfig::from_env().unwrap();
        assert_eq!(config.port, 9090);
        assert!(config.database_ssl);
        assert_eq!(config.jwt_secret.as_deref(), Some("sekrit"));
        assert_eq!(config.function_timeout_seconds, 7);
        assert_eq!(config.function_timeout_ms(), 7000);
        assert_eq!(config.function_max_memory_mb, 256);
        assert_eq!(config.function_max_concurrent, 3);
        assert_eq!(config.max_request_size_bytes(), 2 * 1024 * 1024);
        assert_eq!(
            config.function_database_url.as_deref(),
            Some("postgres://localhost/fns")
        );
        assert_eq!(config.function_db_max_connections, Some(4));
        assert_eq!(config.function_db_timeout_ms, Some(1500));
        assert_eq!(config.functions_dir, PathBuf::from("/srv/nimbus/functions"));
        assert_eq!(
            config.functions_data_base_host_dir,
            PathBuf::from("/mnt/host/functions")
        );
        assert_eq!(config.shared_volume_name, "fn_data");
        assert_eq!(config.container_runtime_mode, ContainerRuntimeMode::Sidecar);
        assert_eq!(config.container_socket_path, PathBuf::from("/run/fn.sock"));
        assert_eq!(
            config.container_sidecar_path,
            Some(PathBuf::from("/usr/bin/nimbus-sidecar"))
        );
        assert_eq!(config.container_base_image, "dart:3.6");
        assert_eq!(config.container_registry.as_deref(), Some("registry.local"));

        for (key, _) in vars {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn runtime_mode_parses_both_backends() {
        assert_eq!(
            "cli".parse::<ContainerRuntimeMode>().unwrap(),
            ContainerRuntimeMode::Cli
        );
        assert_eq!(
            "SIDECAR".parse::<ContainerRuntimeMode>().unwrap(),
            ContainerRuntimeMode::Sidecar
        );
        assert!("docker".parse::<ContainerRuntimeMode>().is_err());
    }

    #[test]
    fn timeout_is_projected_to_milliseconds() {
        let config = PlatformConfig {
            port: 8080,
            database_url: "postgres://localhost/nimbus".into(),
            database_ssl: false,
            jwt_secret: None,
            function_timeout_seconds: 5,
            function_max_memory_mb: 128,
            function_max_concurrent: 10,
            function_max_request_size_mb: 5,
            function_database_url: None,
            function_db_max_connections: None,
            function_db_timeout_ms: None,
            functions_dir: PathBuf::from("/var/lib/nimbus/functions"),
            functions_data_base_host_dir: PathBuf::from("/var/lib/nimbus/functions"),
            shared_volume_name: "functions_data".into(),
            container_runtime_mode: ContainerRuntimeMode::Cli,
            container_socket_path: PathBuf::from("/run/nimbus/container-sidecar.sock"),
            container_sidecar_path: None,
            container_base_image: "dart:stable".into(),
            container_registry: None,
        };
        assert_eq!(config.function_timeout_ms(), 5000);
        assert_eq!(config.max_request_size_bytes(), 5 * 1024 * 1024);
    }
}
