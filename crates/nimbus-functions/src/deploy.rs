//! Deployment orchestration: archive to activated image.
//!
//! The pipeline is extract, validate, synthesize, recipe, version
//! allocation, build, activate. Only allocation and activation are
//! transactional; the build itself runs outside any transaction and a
//! failed build leaves its row behind as the audit trail.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use nimbus_codegen::{release_containerfile, synthesize_entrypoint, ContainerfileParams};
use nimbus_core::fs;
use nimbus_core::{PlatformConfig, PlatformError, PlatformResult};
use nimbus_database::{DeploymentStore, FunctionLogStore, FunctionStore};
use nimbus_entities::{deployments, functions};
use nimbus_runtime::{BuildSpec, ContainerRuntime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::archive;

const CONTAINERFILE_NAME: &str = "Containerfile";

/// What a successful deployment returns to the caller.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub deployment_uuid: Uuid,
    pub version: i32,
    pub image_tag: String,
}

pub struct DeploymentService {
    functions: Arc<FunctionStore>,
    deployments: Arc<DeploymentStore>,
    logs: Arc<FunctionLogStore>,
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<PlatformConfig>,
    /// Functions with a deployment in flight; one build per function.
    in_flight: Mutex<HashSet<i32>>,
}

/// Releases the single-flight slot on every exit path.
struct FlightGuard<'a> {
    service: &'a DeploymentService,
    function_id: i32,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.service
            .in_flight
            .lock()
            .unwrap()
            .remove(&self.function_id);
    }
}

impl DeploymentService {
    pub fn new(
        functions: Arc<FunctionStore>,
        deployments: Arc<DeploymentStore>,
        logs: Arc<FunctionLogStore>,
        runtime: Arc<dyn ContainerRuntime>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        Self {
            functions,
            deployments,
            logs,
            runtime,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Deploy an uploaded archive as the next version of `function` and
    /// activate it on success.
    pub async fn deploy(
        &self,
        function: &functions::Model,
        archive_bytes: &[u8],
    ) -> PlatformResult<DeployOutcome> {
        let _guard = self.claim_flight(function.id)?;

        // Working directory lives for the whole build and is removed on
        // every exit path.
        let workdir = fs::temp_dir("nimbus-deploy-")
            .map_err(|e| PlatformError::Internal(format!("failed to create workdir: {e}")))?;

        archive::extract_tar_gz(
            archive_bytes,
            workdir.path(),
            self.config.max_request_size_bytes() * 4,
        )?;
        archive::validate_structure(workdir.path())?;

        let (entry_path, entry_content) = synthesize_entrypoint(workdir.path())
            .map_err(|e| PlatformError::InvalidArchive(e.to_string()))?;
        fs::write_file_atomic(&workdir.path().join(entry_path), entry_content.as_bytes())
            .await
            .map_err(|e| PlatformError::Internal(format!("failed to write entry point: {e}")))?;

        let recipe = release_containerfile(&self.containerfile_params());
        let containerfile = workdir.path().join(CONTAINERFILE_NAME);
        fs::write_file_atomic(&containerfile, recipe.as_bytes())
            .await
            .map_err(|e| PlatformError::Internal(format!("failed to write recipe: {e}")))?;

        let archive_key = format!("archives/{}/{}.tar.gz", function.uuid, Uuid::new_v4());
        let deployment = self
            .deployments
            .create_building(function.id, &archive_key)
            .await?;

        info!(
            function = %function.uuid,
            version = deployment.version,
            image_tag = %deployment.image_tag,
            "building function image"
        );

        let build = self
            .runtime
            .build(BuildSpec {
                context_dir: workdir.path().to_path_buf(),
                containerfile,
                image_tag: deployment.image_tag.clone(),
            })
            .await
            .map_err(|e| self.map_runtime_error(e))?;

        if !build.succeeded() {
            let excerpt = tail(&build.stderr, 8 * 1024);
            self.deployments
                .mark_failed(deployment.id, excerpt.clone())
                .await?;
            let _ = self
                .logs
                .append(
                    function.id,
                    "error",
                    &format!("build of v{} failed", deployment.version),
                )
                .await;
            return Err(PlatformError::BuildFailed(excerpt));
        }

        self.deployments
            .mark_ready(deployment.id, Some(tail(&build.stdout, 8 * 1024)))
            .await?;
        let previous = self
            .deployments
            .activate(function.id, deployment.id)
            .await?;

        let _ = self
            .logs
            .append(
                function.id,
                "info",
                &format!("deployed v{} ({})", deployment.version, deployment.image_tag),
            )
            .await;

        // The superseded image is removed out of band; a failure here
        // never fails the deployment.
        if let Some(previous) = previous {
            self.schedule_image_removal(previous.image_tag);
        }

        Ok(DeployOutcome {
            deployment_uuid: deployment.uuid,
            version: deployment.version,
            image_tag: deployment.image_tag,
        })
    }

    /// Atomically repoint the active deployment to an existing ready one.
    pub async fn rollback(
        &self,
        function: &functions::Model,
        deployment_uuid: Uuid,
    ) -> PlatformResult<deployments::Model> {
        let deployment = self
            .deployments
            .find_by_uuid(deployment_uuid)
            .await?
            .filter(|d| d.function_id == function.id)
            .ok_or_else(|| PlatformError::NotFound(format!("deployment {deployment_uuid}")))?;

        self.deployments.activate(function.id, deployment.id).await?;

        let _ = self
            .logs
            .append(
                function.id,
                "info",
                &format!("rolled back to v{}", deployment.version),
            )
            .await;

        self.deployments
            .find_by_id(deployment.id)
            .await?
            .ok_or_else(|| {
                PlatformError::Internal("activated deployment disappeared".to_string())
            })
    }

    /// Soft-delete a function and schedule removal of all its images.
    pub async fn delete_function(&self, function: &functions::Model) -> PlatformResult<()> {
        self.functions.soft_delete(function.uuid).await?;

        let all = self.deployments.list_for_function(function.id).await?;
        for deployment in all {
            self.schedule_image_removal(deployment.image_tag);
        }

        info!(function = %function.uuid, "function deleted");
        Ok(())
    }

    fn claim_flight(&self, function_id: i32) -> PlatformResult<FlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(function_id) {
            return Err(PlatformError::StoreConflict(
                "a deployment for this function is already in progress".to_string(),
            ));
        }
        Ok(FlightGuard {
            service: self,
            function_id,
        })
    }

    fn containerfile_params(&self) -> ContainerfileParams {
        let mut params = ContainerfileParams::with_base_image(&self.config.container_base_image);
        if let Some(registry) = &self.config.container_registry {
            params.build_image = format!("{registry}/{}", params.build_image);
            params.runtime_image = format!("{registry}/{}", params.runtime_image);
        }
        params
    }

    fn schedule_image_removal(&self, image_tag: String) {
        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            if let Err(e) = runtime.remove_image(&image_tag).await {
                warn!(image_tag = %image_tag, error = %e, "failed to remove superseded image");
            }
        });
    }

    fn map_runtime_error(&self, err: nimbus_runtime::RuntimeError) -> PlatformError {
        match err {
            nimbus_runtime::RuntimeError::Unavailable(msg) => {
                error!(error = %msg, "container runtime unavailable during build");
                PlatformError::RuntimeUnavailable(msg)
            }
            other => PlatformError::Internal(other.to_string()),
        }
    }
}

/// Last `max_bytes` of a build log, on a char boundary.
fn tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
