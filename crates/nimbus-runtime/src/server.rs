//! The sidecar helper's server half: serves the line-oriented JSON
//! protocol over a unix socket, delegating every operation to an inner
//! [`ContainerRuntime`] (the CLI backend, in the shipped helper binary).
//!
//! One request/response per line, processed in order per connection;
//! concurrency comes from accepting many connections, matching the
//! client's single-inflight-per-connection contract.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::sidecar::{SidecarRequest, SidecarResponse};
use crate::{BuildSpec, ContainerRuntime, RunOutput, RuntimeError};

pub struct SidecarServer {
    socket_path: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    shutdown: Arc<Notify>,
}

impl SidecarServer {
    pub fn new(socket_path: PathBuf, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            socket_path,
            runtime,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle used to stop a running server from another task.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Bind the socket and serve until a shutdown request arrives on the
    /// wire or through the handle. The socket file is unlinked first so
    /// a stale previous instance never blocks the bind.
    pub async fn serve(&self) -> Result<(), RuntimeError> {
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::remove_file(&self.socket_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RuntimeError::Io(e)),
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| RuntimeError::Unavailable(format!("failed to bind socket: {e}")))?;
        info!(socket = %self.socket_path.display(), "sidecar listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let runtime = self.runtime.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, runtime, shutdown).await {
                            debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                _ = self.shutdown.notified() => {
                    info!("sidecar shutting down");
                    let _ = tokio::fs::remove_file(&self.socket_path).await;
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    runtime: Arc<dyn ContainerRuntime>,
    shutdown: Arc<Notify>,
) -> Result<(), RuntimeError> {
    let mut conn = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let read = conn.read_line(&mut line).await?;
        if read == 0 {
            return Ok(());
        }

        let request: SidecarRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                write_response(&mut conn, &SidecarResponse::failure(format!(
                    "malformed request: {e}"
                )))
                .await?;
                continue;
            }
        };

        if matches!(request, SidecarRequest::Shutdown) {
            write_response(&mut conn, &SidecarResponse::success()).await?;
            shutdown.notify_waiters();
            return Ok(());
        }

        let response = dispatch(&request, runtime.as_ref()).await;
        write_response(&mut conn, &response).await?;
    }
}

async fn dispatch(request: &SidecarRequest, runtime: &dyn ContainerRuntime) -> SidecarResponse {
    match request {
        SidecarRequest::Ping => SidecarResponse::success(),
        SidecarRequest::Build {
            context_dir,
            containerfile,
            image_tag,
        } => into_response(
            runtime
                .build(BuildSpec {
                    context_dir: context_dir.clone(),
                    containerfile: containerfile.clone(),
                    image_tag: image_tag.clone(),
                })
                .await,
        ),
        SidecarRequest::Run { spec } => into_response(runtime.run(spec.clone()).await),
        SidecarRequest::RemoveImage { image_tag } => {
            match runtime.remove_image(image_tag).await {
                Ok(()) => SidecarResponse::success(),
                Err(e) => SidecarResponse::failure(e.to_string()),
            }
        }
        SidecarRequest::EnsureVolume { name } => match runtime.ensure_volume(name).await {
            Ok(()) => SidecarResponse::success(),
            Err(e) => SidecarResponse::failure(e.to_string()),
        },
        SidecarRequest::Shutdown => SidecarResponse::success(),
    }
}

fn into_response(result: Result<RunOutput, RuntimeError>) -> SidecarResponse {
    match result {
        Ok(output) => SidecarResponse {
            ok: true,
            error: None,
            exit_code: Some(output.exit_code),
            stdout: Some(output.stdout),
            stderr: Some(output.stderr),
        },
        Err(e) => SidecarResponse::failure(e.to_string()),
    }
}

async fn write_response(
    conn: &mut BufReader<UnixStream>,
    response: &SidecarResponse,
) -> Result<(), RuntimeError> {
    let mut encoded = serde_json::to_string(response)
        .map_err(|e| RuntimeError::Protocol(format!("failed to encode response: {e}")))?;
    encoded.push('\n');
    conn.get_mut().write_all(encoded.as_bytes()).await?;
    conn.get_mut().flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::SidecarRuntime;
    use crate::{Mount, MountFlags, NetworkMode, RunSpec, PLATFORM_FAILURE_EXIT_CODE};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// An engine that scripts its outputs and counts calls.
    struct RecordingRuntime {
        runs: AtomicU32,
        removed: tokio::sync::Mutex<Vec<String>>,
    }

    impl RecordingRuntime {
        fn new() -> Self {
            Self {
                runs: AtomicU32::new(0),
                removed: tokio::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn build(&self, spec: BuildSpec) -> Result<RunOutput, RuntimeError> {
            Ok(RunOutput {
                exit_code: 0,
                stdout: format!("built {}", spec.image_tag),
                stderr: String::new(),
            })
        }

        async fn run(&self, spec: RunSpec) -> Result<RunOutput, RuntimeError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RunOutput {
                exit_code: if spec.timeout_ms == 0 {
                    PLATFORM_FAILURE_EXIT_CODE
                } else {
                    0
                },
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn remove_image(&self, image_tag: &str) -> Result<(), RuntimeError> {
            self.removed.lock().await.push(image_tag.to_string());
            Ok(())
        }

        async fn ensure_volume(&self, _name: &str) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn available(&self) -> bool {
            true
        }
    }

    fn run_spec(timeout_ms: u64) -> RunSpec {
        RunSpec {
            image_tag: "func-a:v1".to_string(),
            container_name: "nimbus-inv-x".to_string(),
            env: BTreeMap::new(),
            mounts: vec![Mount {
                source: "functions_data".to_string(),
                target: "/functions".into(),
                flags: MountFlags::shared_volume(),
            }],
            working_dir: "/functions".into(),
            network: NetworkMode::None,
            cpu_limit: 0.5,
            memory_limit_mb: 64,
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn client_and_server_speak_the_same_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("sidecar.sock");

        let engine = Arc::new(RecordingRuntime::new());
        let server = SidecarServer::new(socket.clone(), engine.clone());
        let handle = server.shutdown_handle();
        let server_task = tokio::spawn(async move { server.serve().await });

        // Wait for the socket to appear.
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let client = SidecarRuntime::new(socket.clone(), None, 4);
        assert!(client.available().await);

        let build = client
            .build(BuildSpec {
                context_dir: "/tmp/ctx".into(),
                containerfile: "/tmp/ctx/Containerfile".into(),
                image_tag: "func-a:v1".to_string(),
            })
            .await
            .unwrap();
        assert!(build.succeeded());
        assert_eq!(build.stdout, "built func-a:v1");

        let ok = client.run(run_spec(1000)).await.unwrap();
        assert!(ok.succeeded());
        // A zero timeout scripts a platform kill in the fake engine.
        let killed = client.run(run_spec(0)).await.unwrap();
        assert!(killed.platform_failure());

        client.remove_image("func-a:v1").await.unwrap();
        client.ensure_volume("functions_data").await.unwrap();
        assert_eq!(
            engine.removed.lock().await.as_slice(),
            ["func-a:v1".to_string()]
        );
        assert_eq!(engine.runs.load(Ordering::SeqCst), 2);

        handle.notify_waiters();
        tokio::time::timeout(std::time::Duration::from_secs(2), server_task)
            .await
            .expect("server exits on shutdown")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_lines_get_an_error_response_and_keep_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("sidecar.sock");
        let server = SidecarServer::new(socket.clone(), Arc::new(RecordingRuntime::new()));
        let handle = server.shutdown_handle();
        tokio::spawn(async move { server.serve().await });

        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let stream = UnixStream::connect(&socket).await.unwrap();
        let mut conn = BufReader::new(stream);
        conn.get_mut().write_all(b"this is not json\n").await.unwrap();
        let mut line = String::new();
        conn.read_line(&mut line).await.unwrap();
        let response: SidecarResponse = serde_json::from_str(&line).unwrap();
        assert!(!response.ok);
        assert!(response.error.unwrap().contains("malformed request"));

        // The connection survives and still answers pings.
        conn.get_mut()
            .write_all(b"{\"op\":\"ping\"}\n")
            .await
            .unwrap();
        line.clear();
        conn.read_line(&mut line).await.unwrap();
        let response: SidecarResponse = serde_json::from_str(&line).unwrap();
        assert!(response.ok);

        handle.notify_waiters();
    }

    #[test]
    fn helper_response_constructors() {
        assert!(SidecarResponse::success().ok);
        let failure = SidecarResponse::failure("boom");
        assert!(!failure.ok);
        assert_eq!(failure.error.as_deref(), Some("boom"));
    }
}
