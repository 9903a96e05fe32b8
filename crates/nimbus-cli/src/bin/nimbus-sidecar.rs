//! Container sidecar helper: serves the runtime protocol over a unix
//! socket, driving the engine CLI on behalf of the platform server. The
//! server spawns and supervises this process when
//! `CONTAINER_RUNTIME_MODE=sidecar`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use nimbus_runtime::{PodmanCliRuntime, SidecarServer};

#[derive(Parser)]
#[command(author, version, about = "Nimbus container sidecar", long_about = None)]
struct Cli {
    /// Unix socket to listen on
    #[arg(long, env = "CONTAINER_SOCKET_PATH")]
    socket: PathBuf,

    /// Container engine binary to drive
    #[arg(long, default_value = "podman")]
    engine_binary: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "NIMBUS_LOG_LEVEL")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(format!(
            "nimbus_runtime={level},nimbus_sidecar={level}",
            level = cli.log_level
        )))
        .compact()
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let engine = Arc::new(PodmanCliRuntime::with_binary(cli.engine_binary));
        let server = SidecarServer::new(cli.socket, engine);
        server
            .serve()
            .await
            .map_err(|e| anyhow::anyhow!("sidecar failed: {e}"))
    })
}
