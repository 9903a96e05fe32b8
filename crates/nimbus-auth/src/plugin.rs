use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use nimbus_core::plugin::{
    NimbusPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use nimbus_database::{ApiKeyStore, DbConnection, FunctionStore, UserStore};
use utoipa::OpenApi as UtoipaOpenApi;

use crate::apikey_service::ApiKeyService;
use crate::handlers::{self, ApiKeyApiDoc, ApiKeyState};
use crate::identity::resolve_identity;
use crate::signature::SignatureVerifier;

/// Registers the api-key service, the signature verifier used by the
/// invocation path, and the `/auth/apikey` routes.
pub struct ApiKeyPlugin;

impl ApiKeyPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ApiKeyPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl NimbusPlugin for ApiKeyPlugin {
    fn name(&self) -> &'static str {
        "api-keys"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();

            let key_store = Arc::new(ApiKeyStore::new(db.clone()));
            let user_store = Arc::new(UserStore::new(db.clone()));
            let function_store = Arc::new(FunctionStore::new(db.clone()));

            context.register_service(Arc::new(ApiKeyService::new(key_store.clone())));
            context.register_service(Arc::new(SignatureVerifier::new(key_store.clone())));
            context.register_service(key_store);
            context.register_service(user_store);
            context.register_service(function_store);

            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = Arc::new(ApiKeyState {
            api_key_service: context.require_service::<ApiKeyService>(),
            functions: context.require_service::<FunctionStore>(),
        });
        let users = context.require_service::<UserStore>();

        let router = Router::new()
            .route("/auth/apikey/generate", post(handlers::generate_api_key))
            .route(
                "/auth/apikey/{function_id}/list",
                get(handlers::list_api_keys),
            )
            .route(
                "/auth/apikey/{key_id}/revoke",
                delete(handlers::revoke_api_key),
            )
            .route("/auth/apikey/{key_id}/enable", put(handlers::enable_api_key))
            .layer(axum::middleware::from_fn(move |req, next| {
                resolve_identity(users.clone(), req, next)
            }))
            .with_state(state);

        Some(PluginRoutes::new(router))
    }

    fn openapi_schema(&self) -> Option<utoipa::openapi::OpenApi> {
        Some(ApiKeyApiDoc::openapi())
    }
}
