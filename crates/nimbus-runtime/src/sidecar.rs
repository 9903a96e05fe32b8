//! Sidecar backend: a long-running helper process that exposes the
//! runtime operations over a unix domain socket.
//!
//! The protocol is one JSON document per line, one request in flight per
//! connection; a small connection pool gives concurrent invocations their
//! own lines. The port owns the helper's lifecycle end to end: spawn on
//! first use, ping to health-check, restart on transport failure, kill on
//! shutdown.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::{
    BuildSpec, ContainerRuntime, RunOutput, RunSpec, RuntimeError,
};

/// Client-side ceiling for build requests; the engine itself has none.
const BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Slack on top of a run's own deadline; the sidecar enforces the real
/// one and reports the platform-failure exit code itself.
const RUN_GRACE: Duration = Duration::from_secs(10);

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the socket after spawning the helper.
const SPAWN_WAIT: Duration = Duration::from_secs(5);

/// One request line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SidecarRequest {
    Ping,
    Build {
        context_dir: PathBuf,
        containerfile: PathBuf,
        image_tag: String,
    },
    Run {
        spec: RunSpec,
    },
    RemoveImage {
        image_tag: String,
    },
    EnsureVolume {
        name: String,
    },
    Shutdown,
}

/// One response line on the wire. `ok: false` means the helper itself
/// failed; engine-level failures travel in `exit_code`/`stderr` with
/// `ok: true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
}

impl SidecarResponse {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
            exit_code: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            exit_code: None,
            stdout: None,
            stderr: None,
        }
    }

    fn into_run_output(self) -> Result<RunOutput, RuntimeError> {
        if !self.ok {
            return Err(RuntimeError::Protocol(
                self.error.unwrap_or_else(|| "sidecar reported failure".to_string()),
            ));
        }
        Ok(RunOutput {
            exit_code: self
                .exit_code
                .ok_or_else(|| RuntimeError::Protocol("response missing exit_code".to_string()))?,
            stdout: self.stdout.unwrap_or_default(),
            stderr: self.stderr.unwrap_or_default(),
        })
    }
}

type PooledConnection = BufReader<UnixStream>;

pub struct SidecarRuntime {
    socket_path: PathBuf,
    sidecar_binary: Option<PathBuf>,
    child: Mutex<Option<Child>>,
    pool: Mutex<Vec<PooledConnection>>,
    slots: Arc<Semaphore>,
}

impl SidecarRuntime {
    /// `sidecar_binary` is optional: when absent the helper is managed
    /// externally (tests, systemd units) and only the socket is used.
    pub fn new(
        socket_path: PathBuf,
        sidecar_binary: Option<PathBuf>,
        max_connections: usize,
    ) -> Self {
        Self {
            socket_path,
            sidecar_binary,
            child: Mutex::new(None),
            pool: Mutex::new(Vec::new()),
            slots: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    /// Spawn the helper if this port owns one and it is not running.
    async fn ensure_sidecar(&self) -> Result<(), RuntimeError> {
        let Some(binary) = &self.sidecar_binary else {
            return Ok(());
        };

        let mut child_slot = self.child.lock().await;
        let running = match child_slot.as_mut() {
            Some(child) => child.try_wait()?.is_none(),
            None => false,
        };
        if running {
            return Ok(());
        }

        info!(binary = %binary.display(), socket = %self.socket_path.display(), "spawning container sidecar");
        let child = Command::new(binary)
            .arg("--socket")
            .arg(&self.socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Unavailable(format!("failed to spawn sidecar: {e}")))?;
        *child_slot = Some(child);
        drop(child_slot);

        // Wait for the socket to come up.
        let deadline = tokio::time::Instant::now() + SPAWN_WAIT;
        loop {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => return Ok(()),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => {
                    return Err(RuntimeError::Unavailable(format!(
                        "sidecar socket never came up: {e}"
                    )));
                }
            }
        }
    }

    async fn checkout(&self) -> Result<PooledConnection, RuntimeError> {
        if let Some(conn) = self.pool.lock().await.pop() {
            return Ok(conn);
        }
        self.ensure_sidecar().await?;
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("sidecar connect failed: {e}")))?;
        Ok(BufReader::new(stream))
    }

    async fn checkin(&self, conn: PooledConnection) {
        self.pool.lock().await.push(conn);
    }

    /// Kill the helper and drop every pooled connection so the next
    /// request starts from a clean spawn.
    async fn restart(&self) {
        warn!("restarting container sidecar after transport failure");
        self.pool.lock().await.clear();
        let mut child_slot = self.child.lock().await;
        if let Some(mut child) = child_slot.take() {
            let _ = child.kill().await;
        }
    }

    async fn exchange_once(
        conn: &mut PooledConnection,
        line: &str,
    ) -> Result<SidecarResponse, RuntimeError> {
        conn.get_mut().write_all(line.as_bytes()).await?;
        conn.get_mut().write_all(b"\n").await?;
        conn.get_mut().flush().await?;

        let mut response_line = String::new();
        let read = conn.read_line(&mut response_line).await?;
        if read == 0 {
            return Err(RuntimeError::Protocol(
                "sidecar closed the connection".to_string(),
            ));
        }
        serde_json::from_str(&response_line)
            .map_err(|e| RuntimeError::Protocol(format!("malformed sidecar response: {e}")))
    }

    /// Send one request and read one response, with a single restart and
    /// retry on transport failure.
    async fn request(
        &self,
        request: &SidecarRequest,
        timeout: Duration,
    ) -> Result<SidecarResponse, RuntimeError> {
        let _permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RuntimeError::Other("sidecar slots closed".to_string()))?;

        let line = serde_json::to_string(request)
            .map_err(|e| RuntimeError::Protocol(format!("failed to encode request: {e}")))?;

        for attempt in 0..2 {
            let mut conn = self.checkout().await?;
            let result = tokio::time::timeout(timeout, Self::exchange_once(&mut conn, &line)).await;
            match result {
                Ok(Ok(response)) => {
                    self.checkin(conn).await;
                    return Ok(response);
                }
                Ok(Err(e)) if attempt == 0 => {
                    debug!(error = %e, "sidecar exchange failed, retrying after restart");
                    self.restart().await;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    // A timed-out connection is mid-exchange; never reuse it.
                    self.restart().await;
                    return Err(RuntimeError::Unavailable(format!(
                        "sidecar did not answer within {} s",
                        timeout.as_secs()
                    )));
                }
            }
        }
        unreachable!("retry loop always returns");
    }

    /// Terminate the helper. Called once at shutdown.
    pub async fn shutdown(&self) {
        let _ = self
            .request(&SidecarRequest::Shutdown, Duration::from_secs(2))
            .await;
        let mut child_slot = self.child.lock().await;
        if let Some(mut child) = child_slot.take() {
            let _ = child.kill().await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for SidecarRuntime {
    async fn build(&self, spec: BuildSpec) -> Result<RunOutput, RuntimeError> {
        let response = self
            .request(
                &SidecarRequest::Build {
                    context_dir: spec.context_dir,
                    containerfile: spec.containerfile,
                    image_tag: spec.image_tag,
                },
                BUILD_TIMEOUT,
            )
            .await?;
        response.into_run_output()
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutput, RuntimeError> {
        let timeout = Duration::from_millis(spec.timeout_ms) + RUN_GRACE;
        let response = self
            .request(&SidecarRequest::Run { spec }, timeout)
            .await?;
        response.into_run_output()
    }

    async fn remove_image(&self, image_tag: &str) -> Result<(), RuntimeError> {
        let response = self
            .request(
                &SidecarRequest::RemoveImage {
                    image_tag: image_tag.to_string(),
                },
                Duration::from_secs(60),
            )
            .await?;
        if response.ok {
            Ok(())
        } else {
            Err(RuntimeError::Other(
                response
                    .error
                    .unwrap_or_else(|| "image removal failed".to_string()),
            ))
        }
    }

    async fn ensure_volume(&self, name: &str) -> Result<(), RuntimeError> {
        let response = self
            .request(
                &SidecarRequest::EnsureVolume {
                    name: name.to_string(),
                },
                Duration::from_secs(30),
            )
            .await?;
        if response.ok {
            Ok(())
        } else {
            Err(RuntimeError::Other(
                response
                    .error
                    .unwrap_or_else(|| "volume creation failed".to_string()),
            ))
        }
    }

    async fn available(&self) -> bool {
        // Probe the existing socket only; availability must stay cheap
        // and must not spawn anything.
        let connect = UnixStream::connect(&self.socket_path);
        let Ok(Ok(stream)) = tokio::time::timeout(PROBE_TIMEOUT, connect).await else {
            return false;
        };
        let mut conn = BufReader::new(stream);
        let line = match serde_json::to_string(&SidecarRequest::Ping) {
            Ok(line) => line,
            Err(_) => return false,
        };
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, Self::exchange_once(&mut conn, &line)).await,
            Ok(Ok(SidecarResponse { ok: true, .. }))
        )
    }
}
