use std::net::SocketAddr;
use std::sync::Arc;

use clap::Args;
use nimbus_auth::ApiKeyPlugin;
use nimbus_core::plugin::PluginManager;
use nimbus_core::{ContainerRuntimeMode, PlatformConfig};
use nimbus_functions::FunctionsPlugin;
use nimbus_runtime::{ContainerRuntime, GatedRuntime, PodmanCliRuntime, SidecarRuntime};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Args)]
pub struct ServeCommand {
    /// Override the PORT environment variable
    #[arg(long)]
    pub port: Option<u16>,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let mut config = PlatformConfig::from_env()?;
        if let Some(port) = self.port {
            config.port = port;
        }
        let config = Arc::new(config);

        info!("Connecting to database");
        let database_url = if config.database_ssl && !config.database_url.contains("sslmode=") {
            let separator = if config.database_url.contains('?') { '&' } else { '?' };
            format!("{}{}sslmode=require", config.database_url, separator)
        } else {
            config.database_url.clone()
        };
        let db = nimbus_database::establish_connection(&database_url).await?;

        // An unreachable container engine at startup is fatal; at runtime
        // the gate degrades it to 503 plus a recovery probe.
        let engine: Arc<dyn ContainerRuntime> = match config.container_runtime_mode {
            ContainerRuntimeMode::Cli => {
                info!("Using CLI container runtime");
                Arc::new(PodmanCliRuntime::new())
            }
            ContainerRuntimeMode::Sidecar => {
                info!(
                    socket = %config.container_socket_path.display(),
                    "Using sidecar container runtime"
                );
                Arc::new(SidecarRuntime::new(
                    config.container_socket_path.clone(),
                    config.container_sidecar_path.clone(),
                    config.function_max_concurrent,
                ))
            }
        };
        // The volume bootstrap doubles as first contact: for a managed
        // sidecar it spawns the helper before anything probes it.
        engine
            .ensure_volume(&config.shared_volume_name)
            .await
            .map_err(|e| anyhow::anyhow!("failed to prepare shared volume: {e}"))?;

        if !engine.available().await {
            warn!("container engine probe failed after volume bootstrap");
            anyhow::bail!("container engine is not available; refusing to start");
        }
        let gated: Arc<dyn ContainerRuntime> = Arc::new(GatedRuntime::new(engine));

        let mut manager = PluginManager::new();
        manager.service_context().register_service(db);
        manager
            .service_context()
            .register_service::<PlatformConfig>(config.clone());
        manager
            .service_context()
            .register_service::<dyn ContainerRuntime>(gated);

        manager.register_plugin(Box::new(ApiKeyPlugin::new()));
        manager.register_plugin(Box::new(FunctionsPlugin::new()));
        manager
            .initialize_plugins()
            .await
            .map_err(|e| anyhow::anyhow!("plugin initialization failed: {e}"))?;

        let openapi = manager
            .build_unified_openapi()
            .map_err(|e| anyhow::anyhow!("openapi assembly failed: {e}"))?;
        let openapi_json = serde_json::to_value(&openapi)?;
        let app = manager
            .build_application()
            .map_err(|e| anyhow::anyhow!("application assembly failed: {e}"))?
            .route(
                "/api/openapi.json",
                axum::routing::get(move || {
                    let document = openapi_json.clone();
                    async move { axum::Json(document) }
                }),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(CatchPanicLayer::new());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        info!(%addr, "Nimbus API listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Shutting down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
