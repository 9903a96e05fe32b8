//! Shared fixtures: a scripted container runtime and a test platform
//! configuration rooted in a temp directory.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::{ContainerRuntimeMode, PlatformConfig};
use nimbus_runtime::{
    BuildSpec, ContainerRuntime, RunOutput, RunSpec, RuntimeError, PLATFORM_FAILURE_EXIT_CODE,
};
use tokio::sync::Mutex;

/// What the scripted runtime does when a container runs.
#[derive(Clone)]
pub enum RunScript {
    /// Exit 0 and write `result.json` (+ optional `logs.json`).
    Respond {
        result: serde_json::Value,
        logs: Option<serde_json::Value>,
    },
    /// Exit 0 but write nothing.
    NoResult,
    /// Exit 1 with stderr.
    UserFailure(String),
    /// Platform kill: exit -1.
    Timeout,
    /// Hold the slot for a while, then exit 0 with a result.
    Hold(Duration, serde_json::Value),
}

pub struct ScriptedRuntime {
    /// Host-side functions root, mirrors the container's `/functions`.
    host_root: PathBuf,
    script: Mutex<RunScript>,
    pub builds: AtomicU32,
    pub runs: AtomicU32,
    pub removed_images: Mutex<Vec<String>>,
    pub build_exit_code: AtomicU32,
    pub build_delay_ms: AtomicU32,
}

impl ScriptedRuntime {
    pub fn new(host_root: PathBuf, script: RunScript) -> Self {
        Self {
            host_root,
            script: Mutex::new(script),
            builds: AtomicU32::new(0),
            runs: AtomicU32::new(0),
            removed_images: Mutex::new(Vec::new()),
            build_exit_code: AtomicU32::new(0),
            build_delay_ms: AtomicU32::new(0),
        }
    }

    pub async fn set_script(&self, script: RunScript) {
        *self.script.lock().await = script;
    }

    /// Translate the container-side working dir into the host path.
    fn host_dir(&self, spec: &RunSpec) -> PathBuf {
        let relative = spec
            .working_dir
            .strip_prefix("/functions")
            .expect("working dir under the functions root");
        self.host_root.join(relative)
    }

    fn write_outputs(dir: &Path, result: &serde_json::Value, logs: Option<&serde_json::Value>) {
        std::fs::write(dir.join("result.json"), serde_json::to_vec(result).unwrap()).unwrap();
        if let Some(logs) = logs {
            std::fs::write(dir.join("logs.json"), serde_json::to_vec(logs).unwrap()).unwrap();
        }
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn build(&self, _spec: BuildSpec) -> Result<RunOutput, RuntimeError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let delay = self.build_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let exit_code = self.build_exit_code.load(Ordering::SeqCst) as i64;
        Ok(RunOutput {
            exit_code,
            stdout: "STEP 1/5: FROM dart:stable".to_string(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "Error: lib/handler.dart:3:1: compile error".to_string()
            },
        })
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutput, RuntimeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let dir = self.host_dir(&spec);
        let script = self.script.lock().await.clone();

        match script {
            RunScript::Respond { result, logs } => {
                Self::write_outputs(&dir, &result, logs.as_ref());
                Ok(RunOutput {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            RunScript::NoResult => Ok(RunOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
            RunScript::UserFailure(stderr) => Ok(RunOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr,
            }),
            RunScript::Timeout => Ok(RunOutput {
                exit_code: PLATFORM_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("container killed after {} ms", spec.timeout_ms),
            }),
            RunScript::Hold(duration, result) => {
                tokio::time::sleep(duration).await;
                Self::write_outputs(&dir, &result, None);
                Ok(RunOutput {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }
    }

    async fn remove_image(&self, image_tag: &str) -> Result<(), RuntimeError> {
        self.removed_images.lock().await.push(image_tag.to_string());
        Ok(())
    }

    async fn ensure_volume(&self, _name: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn available(&self) -> bool {
        true
    }
}

/// A config rooted at `root` with tight limits suitable for tests.
pub fn test_config(root: &Path, max_concurrent: usize) -> Arc<PlatformConfig> {
    Arc::new(PlatformConfig {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        database_ssl: false,
        jwt_secret: None,
        function_timeout_seconds: 1,
        function_max_memory_mb: 64,
        function_max_concurrent: max_concurrent,
        function_max_request_size_mb: 1,
        function_database_url: None,
        function_db_max_connections: None,
        function_db_timeout_ms: None,
        functions_dir: root.to_path_buf(),
        functions_data_base_host_dir: root.to_path_buf(),
        shared_volume_name: "functions_data".to_string(),
        container_runtime_mode: ContainerRuntimeMode::Cli,
        container_socket_path: root.join("sidecar.sock"),
        container_sidecar_path: None,
        container_base_image: "dart:stable".to_string(),
        container_registry: None,
    })
}

/// A tar.gz archive from (path, content) pairs.
pub fn make_archive(files: &[(&str, &str)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// A minimal valid function package.
pub fn valid_package() -> Vec<u8> {
    make_archive(&[
        (
            "pubspec.yaml",
            "name: echo\nenvironment:\n  sdk: ^3.0.0\ndependencies:\n  dart_cloud: ^1.0.0\n",
        ),
        (
            "lib/handler.dart",
            r#"
import 'package:dart_cloud/dart_cloud.dart';

@cloudFunction
class EchoFunction extends CloudFunction {
  @override
  Future<CloudResponse> handle(CloudRequest request) async {
    return CloudResponse.json({'echo': request.body['x']});
  }
}
"#,
        ),
    ])
}

pub fn envelope(body: serde_json::Value) -> nimbus_core::RequestEnvelope {
    nimbus_core::RequestEnvelope {
        method: "POST".to_string(),
        path: "/".to_string(),
        headers: BTreeMap::new(),
        query: BTreeMap::new(),
        body,
    }
}
