use std::sync::Arc;

use clap::Args;
use nimbus_core::{ContainerRuntimeMode, PlatformConfig};
use nimbus_runtime::{ContainerRuntime, PodmanCliRuntime, SidecarRuntime};

/// Check the platform's external collaborators and report what is broken.
#[derive(Args)]
pub struct DoctorCommand {}

impl DoctorCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let config = PlatformConfig::from_env()?;
        let mut healthy = true;

        match nimbus_database::establish_connection(&config.database_url).await {
            Ok(_) => println!("database: ok"),
            Err(e) => {
                healthy = false;
                println!("database: FAILED ({e})");
            }
        }

        let engine: Arc<dyn ContainerRuntime> = match config.container_runtime_mode {
            ContainerRuntimeMode::Cli => Arc::new(PodmanCliRuntime::new()),
            ContainerRuntimeMode::Sidecar => Arc::new(SidecarRuntime::new(
                config.container_socket_path.clone(),
                None,
                1,
            )),
        };
        if engine.available().await {
            println!(
                "container engine ({:?}): ok",
                config.container_runtime_mode
            );
        } else {
            healthy = false;
            println!(
                "container engine ({:?}): FAILED (probe did not answer)",
                config.container_runtime_mode
            );
        }

        if config.functions_data_base_host_dir.is_dir() {
            println!(
                "functions dir {}: ok",
                config.functions_data_base_host_dir.display()
            );
        } else {
            println!(
                "functions dir {}: missing (will be created on first invocation)",
                config.functions_data_base_host_dir.display()
            );
        }

        if healthy {
            Ok(())
        } else {
            anyhow::bail!("one or more checks failed")
        }
    }
}
