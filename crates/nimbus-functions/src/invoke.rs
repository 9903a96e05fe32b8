//! Per-invocation container engine.
//!
//! Each invocation gets a fresh shared directory, one ephemeral
//! container, and one append-only row. The directory is the unit of
//! isolation: its name carries the invocation uuid and it is removed on
//! every exit path. Admission is a counting semaphore; saturated means
//! fail fast, never queue.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use nimbus_core::fs::{self, ScopedDir};
use nimbus_core::{
    FunctionLogEntry, PlatformConfig, PlatformError, PlatformResult, RequestEnvelope,
    ResponseEnvelope,
};
use nimbus_database::{DeploymentStore, FunctionLogStore, InvocationRecord, InvocationStore};
use nimbus_entities::functions;
use nimbus_entities::invocations::{InvocationLogs, RequestInfo};
use nimbus_entities::types::{DeploymentStatus, FunctionStatus, InvocationStatus};
use nimbus_runtime::{ContainerRuntime, Mount, MountFlags, NetworkMode, RunSpec};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

/// Container-side root the shared volume is mounted at.
const CONTAINER_FUNCTIONS_ROOT: &str = "/functions";

/// Floor for the per-container memory limit.
const MIN_MEMORY_MB: u64 = 20;

/// CPU share per invocation container.
const CPU_LIMIT: f64 = 0.5;

const REQUEST_FILE: &str = "request.json";
const ENV_FILE: &str = ".env.config";
const RESULT_FILE: &str = "result.json";
const LOGS_FILE: &str = "logs.json";

/// What the caller gets back: the function's response plus run metadata.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub invocation_uuid: Uuid,
    pub status: InvocationStatus,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
    pub duration_ms: i64,
    pub logs: Vec<FunctionLogEntry>,
}

pub struct InvocationEngine {
    deployments: Arc<DeploymentStore>,
    invocations: Arc<InvocationStore>,
    function_logs: Arc<FunctionLogStore>,
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<PlatformConfig>,
    /// Global admission control; capacity is FUNCTION_MAX_CONCURRENT.
    slots: Arc<Semaphore>,
}

impl InvocationEngine {
    pub fn new(
        deployments: Arc<DeploymentStore>,
        invocations: Arc<InvocationStore>,
        function_logs: Arc<FunctionLogStore>,
        runtime: Arc<dyn ContainerRuntime>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.function_max_concurrent));
        Self {
            deployments,
            invocations,
            function_logs,
            runtime,
            config,
            slots,
        }
    }

    /// Run one invocation of `function` to completion and record it.
    pub async fn invoke(
        &self,
        function: &functions::Model,
        envelope: RequestEnvelope,
    ) -> PlatformResult<InvocationOutcome> {
        // Admission first: an overloaded engine must answer in
        // milliseconds, before any filesystem work.
        let _permit = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| PlatformError::Overloaded)?;

        if function.status != FunctionStatus::Active {
            return Err(PlatformError::FunctionUnavailable(format!(
                "function {} is {}",
                function.uuid, function.status
            )));
        }

        let deployment = self
            .deployments
            .find_active(function.id)
            .await?
            .filter(|d| d.status == DeploymentStatus::Ready)
            .ok_or_else(|| {
                PlatformError::FunctionUnavailable(format!(
                    "function {} has no active deployment",
                    function.uuid
                ))
            })?;

        let invocation_uuid = Uuid::new_v4();
        let relative_dir = format!(
            "{}/v{}/{}",
            function.uuid, deployment.version, invocation_uuid
        );

        let host_dir = ScopedDir::create(
            self.config
                .functions_data_base_host_dir
                .join(&relative_dir),
        )
        .await
        .map_err(|e| PlatformError::Internal(format!("failed to create shared dir: {e}")))?;

        let container_dir = PathBuf::from(CONTAINER_FUNCTIONS_ROOT).join(&relative_dir);

        self.write_inputs(host_dir.path(), &container_dir, function, &envelope)
            .await?;

        let run_spec = RunSpec {
            image_tag: deployment.image_tag.clone(),
            container_name: format!("nimbus-inv-{}", invocation_uuid.simple()),
            env: BTreeMap::new(),
            mounts: vec![Mount {
                source: self.config.shared_volume_name.clone(),
                target: PathBuf::from(CONTAINER_FUNCTIONS_ROOT),
                flags: MountFlags::shared_volume(),
            }],
            working_dir: container_dir,
            network: NetworkMode::None,
            cpu_limit: CPU_LIMIT,
            memory_limit_mb: self.config.function_max_memory_mb.max(MIN_MEMORY_MB),
            timeout_ms: function.timeout_ms as u64,
        };

        debug!(
            invocation = %invocation_uuid,
            image_tag = %run_spec.image_tag,
            "launching invocation container"
        );

        let started = Instant::now();
        let run = self.runtime.run(run_spec).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (status, response, error, logs) = match run {
            Ok(output) if output.succeeded() => {
                self.harvest_success(host_dir.path()).await
            }
            Ok(output) if output.platform_failure() => (
                InvocationStatus::Timeout,
                ResponseEnvelope::timeout(),
                Some(format!(
                    "function exceeded its {} ms deadline",
                    function.timeout_ms
                )),
                self.read_logs(host_dir.path()).await,
            ),
            Ok(output) => {
                let excerpt = stderr_excerpt(&output.stderr);
                (
                    InvocationStatus::Fail,
                    ResponseEnvelope::internal_error(excerpt.clone()),
                    Some(excerpt),
                    self.read_logs(host_dir.path()).await,
                )
            }
            Err(e) => {
                let platform_error = match e {
                    nimbus_runtime::RuntimeError::Unavailable(msg) => {
                        PlatformError::RuntimeUnavailable(msg)
                    }
                    other => PlatformError::Internal(other.to_string()),
                };
                // The failed attempt is still recorded before surfacing.
                let record = InvocationRecord {
                    uuid: invocation_uuid,
                    function_id: function.id,
                    status: InvocationStatus::Fail,
                    duration_ms,
                    error: Some(platform_error.to_string()),
                    logs: InvocationLogs::default(),
                    request_info: request_info(&envelope),
                    result: None,
                };
                if let Err(store_err) = self.invocations.record(record).await {
                    warn!(error = %store_err, "failed to record failed invocation");
                }
                let _ = host_dir.close().await;
                return Err(platform_error);
            }
        };

        let record = InvocationRecord {
            uuid: invocation_uuid,
            function_id: function.id,
            status,
            duration_ms,
            error: error.clone(),
            logs: InvocationLogs { logs: logs.clone() },
            request_info: request_info(&envelope),
            result: Some(response.body.clone()),
        };
        if let Err(store_err) = self.invocations.record(record).await {
            warn!(error = %store_err, "failed to record invocation");
        }

        // Harvested lines also feed the per-function log stream.
        for entry in &logs {
            if let Err(store_err) = self
                .function_logs
                .append(function.id, &entry.level.to_string(), &entry.message)
                .await
            {
                warn!(error = %store_err, "failed to append function log");
                break;
            }
        }

        // Explicit removal on the normal path; the drop guard covers the
        // rest.
        if let Err(e) = host_dir.close().await {
            warn!(error = %e, "failed to remove shared invocation dir");
        }

        Ok(InvocationOutcome {
            invocation_uuid,
            status,
            status_code: response.status_code,
            headers: response.headers,
            body: response.body,
            duration_ms,
            logs,
        })
    }

    /// Materialize `request.json` and `.env.config` into the shared dir.
    async fn write_inputs(
        &self,
        host_dir: &std::path::Path,
        container_dir: &std::path::Path,
        function: &functions::Model,
        envelope: &RequestEnvelope,
    ) -> PlatformResult<()> {
        let request = serde_json::to_vec(envelope)
            .map_err(|e| PlatformError::Internal(format!("failed to encode request: {e}")))?;
        fs::write_file_atomic(&host_dir.join(REQUEST_FILE), &request)
            .await
            .map_err(|e| PlatformError::Internal(format!("failed to write request: {e}")))?;

        let mut env_lines = vec![
            "DART_CLOUD_RESTRICTED=true".to_string(),
            format!("FUNCTION_TIMEOUT_MS={}", function.timeout_ms),
            format!(
                "FUNCTION_MAX_MEMORY_MB={}",
                self.config.function_max_memory_mb.max(MIN_MEMORY_MB)
            ),
            format!("SHARED_PATH={}", container_dir.display()),
        ];
        if let Some(url) = &self.config.function_database_url {
            env_lines.push(format!("DATABASE_URL={url}"));
            if let Some(max) = self.config.function_db_max_connections {
                env_lines.push(format!("FUNCTION_DB_MAX_CONNECTIONS={max}"));
            }
            if let Some(timeout) = self.config.function_db_timeout_ms {
                env_lines.push(format!("FUNCTION_DB_TIMEOUT_MS={timeout}"));
            }
        }
        let mut env_file = env_lines.join("\n");
        env_file.push('\n');

        fs::write_file_atomic(&host_dir.join(ENV_FILE), env_file.as_bytes())
            .await
            .map_err(|e| PlatformError::Internal(format!("failed to write env config: {e}")))?;

        Ok(())
    }

    /// Read the container's outputs after a zero exit. A missing or
    /// malformed result file is a function failure, not a platform error.
    async fn harvest_success(
        &self,
        host_dir: &std::path::Path,
    ) -> (
        InvocationStatus,
        ResponseEnvelope,
        Option<String>,
        Vec<FunctionLogEntry>,
    ) {
        let logs = self.read_logs(host_dir).await;

        let result = match fs::read_bytes(&host_dir.join(RESULT_FILE)).await {
            Ok(bytes) => serde_json::from_slice::<ResponseEnvelope>(&bytes),
            Err(e) => {
                return (
                    InvocationStatus::Fail,
                    ResponseEnvelope::internal_error("function produced no result"),
                    Some(format!("missing result file: {e}")),
                    logs,
                );
            }
        };

        match result {
            Ok(response) => (InvocationStatus::Ok, response, None, logs),
            Err(e) => (
                InvocationStatus::Fail,
                ResponseEnvelope::internal_error("function produced a malformed result"),
                Some(format!("malformed result file: {e}")),
                logs,
            ),
        }
    }

    async fn read_logs(&self, host_dir: &std::path::Path) -> Vec<FunctionLogEntry> {
        #[derive(serde::Deserialize)]
        struct LogsFile {
            #[serde(default)]
            logs: Vec<FunctionLogEntry>,
        }

        match fs::read_bytes(&host_dir.join(LOGS_FILE)).await {
            Ok(bytes) => serde_json::from_slice::<LogsFile>(&bytes)
                .map(|f| f.logs)
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

/// The persisted request metadata; the body never crosses into it.
fn request_info(envelope: &RequestEnvelope) -> RequestInfo {
    RequestInfo {
        method: envelope.method.clone(),
        path: envelope.path.clone(),
        headers: envelope.headers.clone(),
        query: envelope.query.clone(),
    }
}

fn stderr_excerpt(stderr: &str) -> String {
    const MAX: usize = 2048;
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return "function exited with a non-zero status".to_string();
    }
    let mut end = trimmed.len().min(MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
