use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, RawPathParams};
use axum::routing::{get, post, put};
use axum::Router;
use nimbus_auth::identity::resolve_identity;
use nimbus_auth::signature::SignatureVerifier;
use nimbus_core::plugin::{
    NimbusPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use nimbus_core::validation::{
    validate_request, FieldSchema, Source, ValidationRule,
};
use nimbus_core::PlatformConfig;
use nimbus_database::{
    DbConnection, DeploymentStore, FunctionLogStore, FunctionStore, InvocationStore, UserStore,
};
use nimbus_runtime::ContainerRuntime;
use utoipa::OpenApi as UtoipaOpenApi;

use crate::deploy::DeploymentService;
use crate::handlers::{self, FunctionsApiDoc, FunctionsState};
use crate::invoke::InvocationEngine;
use crate::janitor::SharedDirJanitor;

/// Stranded invocation dirs older than this are removed.
const JANITOR_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// How often the janitor sweeps.
const JANITOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// Registers the deployment orchestrator, the invocation engine, and the
/// `/functions` routes. Requires the database, config, container runtime,
/// and the api-key plugin's signature verifier.
pub struct FunctionsPlugin;

impl FunctionsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FunctionsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl NimbusPlugin for FunctionsPlugin {
    fn name(&self) -> &'static str {
        "functions"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();
            let config = context.require_service::<PlatformConfig>();
            let runtime = context.require_service::<dyn ContainerRuntime>();

            let functions = Arc::new(FunctionStore::new(db.clone()));
            let deployments = Arc::new(DeploymentStore::new(db.clone()));
            let invocations = Arc::new(InvocationStore::new(db.clone()));
            let logs = Arc::new(FunctionLogStore::new(db.clone()));

            let deploy_service = Arc::new(DeploymentService::new(
                functions.clone(),
                deployments.clone(),
                logs.clone(),
                runtime.clone(),
                config.clone(),
            ));
            let engine = Arc::new(InvocationEngine::new(
                deployments.clone(),
                invocations.clone(),
                logs.clone(),
                runtime,
                config,
            ));

            context.register_service(functions);
            context.register_service(deployments);
            context.register_service(invocations);
            context.register_service(logs);
            context.register_service(deploy_service);
            context.register_service(engine);

            // Sweep stranded invocation dirs left behind by crashes.
            let config = context.require_service::<PlatformConfig>();
            let janitor = Arc::new(SharedDirJanitor::new(
                config.functions_data_base_host_dir.clone(),
                JANITOR_MAX_AGE,
            ));
            janitor.spawn(JANITOR_INTERVAL);

            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let config = context.require_service::<PlatformConfig>();
        let state = Arc::new(FunctionsState {
            functions: context.require_service::<FunctionStore>(),
            deployments: context.require_service::<DeploymentStore>(),
            invocations: context.require_service::<InvocationStore>(),
            logs: context.require_service::<FunctionLogStore>(),
            deploy_service: context.require_service::<DeploymentService>(),
            engine: context.require_service::<InvocationEngine>(),
            verifier: context.require_service::<SignatureVerifier>(),
            config: config.clone(),
        });
        let users = context.require_service::<UserStore>();

        // The archive travels as multipart; allow it plus form overhead.
        let upload_limit = (config.max_request_size_bytes() as usize) + 64 * 1024;

        let management = Router::new()
            .route("/functions/deploy", post(handlers::deploy_function))
            .route("/functions", get(handlers::list_functions))
            .route(
                "/functions/{uuid}",
                get(handlers::get_function).delete(handlers::delete_function),
            )
            .route(
                "/functions/{uuid}/settings",
                put(handlers::update_function_settings),
            )
            .route(
                "/functions/{uuid}/deployments",
                get(handlers::list_deployments),
            )
            .route(
                "/functions/{uuid}/rollback",
                post(handlers::rollback_function).layer(axum::middleware::from_fn({
                    let rules = Arc::new(vec![
                        ValidationRule::required("uuid", Source::Path, FieldSchema::Uuid),
                        ValidationRule::required(
                            "deployment_uuid",
                            Source::Body,
                            FieldSchema::Uuid,
                        ),
                    ]);
                    move |params: RawPathParams, req, next| {
                        validate_request(rules.clone(), params, req, next)
                    }
                })),
            )
            .route(
                "/functions/{uuid}/invocations",
                get(handlers::list_invocations),
            )
            .route("/functions/{uuid}/logs", get(handlers::list_logs))
            .route("/functions/{uuid}/stats", get(handlers::function_stats))
            .layer(axum::middleware::from_fn(move |req, next| {
                resolve_identity(users.clone(), req, next)
            }))
            .layer(DefaultBodyLimit::max(upload_limit));

        let invoke_rules = Arc::new(vec![
            ValidationRule::required("uuid", Source::Path, FieldSchema::Uuid),
            ValidationRule::optional(
                "method",
                Source::Body,
                FieldSchema::OneOf(&["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"]),
            ),
            ValidationRule::optional(
                "path",
                Source::Body,
                FieldSchema::String {
                    min_len: 1,
                    max_len: 2048,
                },
            ),
            ValidationRule::optional("headers", Source::Body, FieldSchema::Object),
            ValidationRule::optional("query", Source::Body, FieldSchema::Object),
        ]);
        let invoke = Router::new()
            .route("/functions/{uuid}/invoke", post(handlers::invoke_function))
            .layer(axum::middleware::from_fn(
                move |params: RawPathParams, req, next| {
                    validate_request(invoke_rules.clone(), params, req, next)
                },
            ))
            .layer(DefaultBodyLimit::max(upload_limit));

        Some(PluginRoutes::new(
            management.merge(invoke).with_state(state),
        ))
    }

    fn openapi_schema(&self) -> Option<utoipa::openapi::OpenApi> {
        Some(FunctionsApiDoc::openapi())
    }
}
