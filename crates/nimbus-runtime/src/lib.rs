//! Container runtime port: the uniform interface Nimbus drives a
//! daemonless container engine through.
//!
//! Two backends implement the port: one spawns the engine's CLI per
//! operation, the other speaks a line-oriented JSON protocol to a
//! long-running sidecar helper over a unix socket. Callers never know
//! which one they hold.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub mod cli;
pub mod gate;
pub mod server;
pub mod sidecar;

pub use cli::PodmanCliRuntime;
pub use gate::GatedRuntime;
pub use server::SidecarServer;
pub use sidecar::SidecarRuntime;

/// The distinguished exit code for platform failures: timeout kills,
/// OOM kills, launcher errors. User code can never produce it.
pub const PLATFORM_FAILURE_EXIT_CODE: i64 = -1;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sidecar protocol error: {0}")]
    Protocol(String),

    #[error("Runtime error: {0}")]
    Other(String),
}

/// Parameters for an image build. Builds run to completion; there is no
/// retry and no concurrency contract beyond distinct image tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    pub context_dir: PathBuf,
    pub containerfile: PathBuf,
    pub image_tag: String,
}

/// Network attachment for a run. Invocations run with `None`; `Host` is
/// for trusted platform probes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    None,
    Host,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::Host => "host",
        }
    }
}

/// Mount propagation and labeling flags.
///
/// The shared invocation volume needs both: sub-mounts made inside the
/// container must be visible on re-entry, and SELinux hosts must relabel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFlags {
    pub relabel: bool,
    pub propagation_shared: bool,
}

impl MountFlags {
    pub fn shared_volume() -> Self {
        Self {
            relabel: true,
            propagation_shared: true,
        }
    }

    /// The `-v` option suffix understood by the engine.
    pub fn to_suffix(&self) -> String {
        let mut parts = Vec::new();
        if self.relabel {
            parts.push("z");
        }
        if self.propagation_shared {
            parts.push("rshared");
        }
        parts.join(",")
    }
}

/// One bind or named-volume mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    /// Host path or named volume.
    pub source: String,
    /// Absolute path inside the container.
    pub target: PathBuf,
    pub flags: MountFlags,
}

impl Mount {
    /// The full `-v` argument value.
    pub fn to_arg(&self) -> String {
        let suffix = self.flags.to_suffix();
        if suffix.is_empty() {
            format!("{}:{}", self.source, self.target.display())
        } else {
            format!("{}:{}:{}", self.source, self.target.display(), suffix)
        }
    }
}

/// Parameters for running one ephemeral container to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub image_tag: String,
    /// Deterministic name; the watchdog kills by it on timeout.
    pub container_name: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub working_dir: PathBuf,
    pub network: NetworkMode,
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    pub timeout_ms: u64,
}

/// Captured result of a build or run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// User failure: the process inside the container exited non-zero.
    pub fn user_failure(&self) -> bool {
        self.exit_code > 0
    }

    /// Platform failure: timeout, OOM kill, or launcher error.
    pub fn platform_failure(&self) -> bool {
        self.exit_code < 0
    }
}

/// The capability set everything above the runtime depends on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from a context directory and recipe. May take
    /// minutes; failures surface through the non-zero exit code and
    /// stderr, never as retries.
    async fn build(&self, spec: BuildSpec) -> Result<RunOutput, RuntimeError>;

    /// Run a container to completion under the given limits. On timeout
    /// the container is killed and the exit code is
    /// [`PLATFORM_FAILURE_EXIT_CODE`].
    async fn run(&self, spec: RunSpec) -> Result<RunOutput, RuntimeError>;

    /// Remove an image. Idempotent: a missing image is not an error.
    async fn remove_image(&self, image_tag: &str) -> Result<(), RuntimeError>;

    /// Create the named volume if it does not exist yet. Idempotent;
    /// called once at startup for the shared invocation volume.
    async fn ensure_volume(&self, name: &str) -> Result<(), RuntimeError>;

    /// Cheap liveness probe. Returns false on any transport error rather
    /// than raising.
    async fn available(&self) -> bool;
}
