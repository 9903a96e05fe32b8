//! CLI backend: every operation spawns the engine's native binary.
//!
//! Runs are watched by a deadline; when it fires the subprocess is
//! terminated and the container is killed by its deterministic name, so a
//! wedged entry point can never outlive its invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{
    BuildSpec, ContainerRuntime, RunOutput, RunSpec, RuntimeError, PLATFORM_FAILURE_EXIT_CODE,
};

/// How long `available()` waits for the engine before reporting it down.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period for the kill sequence after a run deadline fires.
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PodmanCliRuntime {
    binary: PathBuf,
}

impl PodmanCliRuntime {
    pub fn new() -> Self {
        Self::with_binary(PathBuf::from("podman"))
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// The argument vector for a run, kept separate from spawning so the
    /// construction is testable without an engine.
    fn run_args(spec: &RunSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.container_name.clone(),
            "--network".to_string(),
            spec.network.as_str().to_string(),
            "--cpus".to_string(),
            format!("{}", spec.cpu_limit),
            "--memory".to_string(),
            format!("{}m", spec.memory_limit_mb),
            "--workdir".to_string(),
            spec.working_dir.display().to_string(),
        ];
        for mount in &spec.mounts {
            args.push("-v".to_string());
            args.push(mount.to_arg());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image_tag.clone());
        args
    }

    fn build_args(spec: &BuildSpec) -> Vec<String> {
        vec![
            "build".to_string(),
            "-t".to_string(),
            spec.image_tag.clone(),
            "-f".to_string(),
            spec.containerfile.display().to_string(),
            spec.context_dir.display().to_string(),
        ]
    }

    async fn exec(&self, args: &[String]) -> Result<RunOutput, RuntimeError> {
        debug!(binary = %self.binary.display(), ?args, "spawning container engine");
        // kill_on_drop: when the watchdog abandons a run, the engine
        // subprocess must die with the future.
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("failed to spawn engine: {e}")))?;

        Ok(RunOutput {
            exit_code: output
                .status
                .code()
                .map(i64::from)
                .unwrap_or(PLATFORM_FAILURE_EXIT_CODE),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Kill a container by name after its deadline fired. Best effort:
    /// the `--rm` run already tears the container down if it exited on
    /// its own between the deadline and the kill.
    async fn kill_container(&self, name: &str) {
        for subcommand in [vec!["kill", name], vec!["rm", "-f", name]] {
            let result = tokio::time::timeout(
                KILL_TIMEOUT,
                Command::new(&self.binary)
                    .args(&subcommand)
                    .stdin(Stdio::null())
                    .output(),
            )
            .await;
            match result {
                Ok(Ok(output)) if !output.status.success() => {
                    debug!(
                        container = name,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "kill step reported failure"
                    );
                }
                Ok(Err(e)) => warn!(container = name, error = %e, "kill step failed to spawn"),
                Err(_) => warn!(container = name, "kill step timed out"),
                _ => {}
            }
        }
    }
}

impl Default for PodmanCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for PodmanCliRuntime {
    async fn build(&self, spec: BuildSpec) -> Result<RunOutput, RuntimeError> {
        self.exec(&Self::build_args(&spec)).await
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutput, RuntimeError> {
        let deadline = Duration::from_millis(spec.timeout_ms);
        let args = Self::run_args(&spec);

        match tokio::time::timeout(deadline, self.exec(&args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    container = %spec.container_name,
                    timeout_ms = spec.timeout_ms,
                    "run deadline fired, killing container"
                );
                self.kill_container(&spec.container_name).await;
                Ok(RunOutput {
                    exit_code: PLATFORM_FAILURE_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("container killed after {} ms", spec.timeout_ms),
                })
            }
        }
    }

    async fn remove_image(&self, image_tag: &str) -> Result<(), RuntimeError> {
        // --ignore makes removal of a missing image a no-op.
        let output = self
            .exec(&[
                "rmi".to_string(),
                "--ignore".to_string(),
                image_tag.to_string(),
            ])
            .await?;
        if output.succeeded() {
            Ok(())
        } else {
            Err(RuntimeError::Other(format!(
                "failed to remove image {image_tag}: {}",
                output.stderr.trim()
            )))
        }
    }

    async fn ensure_volume(&self, name: &str) -> Result<(), RuntimeError> {
        // --ignore turns "already exists" into success.
        let output = self
            .exec(&[
                "volume".to_string(),
                "create".to_string(),
                "--ignore".to_string(),
                name.to_string(),
            ])
            .await?;
        if output.succeeded() {
            Ok(())
        } else {
            Err(RuntimeError::Other(format!(
                "failed to create volume {name}: {}",
                output.stderr.trim()
            )))
        }
    }

    async fn available(&self) -> bool {
        let probe = Command::new(&self.binary)
            .args(["info", "--format", "{{.Host.Arch}}"])
            .stdin(Stdio::null())
            .output();
        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) => output.status.success(),
            _ => false,
        }
    }
}
