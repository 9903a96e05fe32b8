//! Plugin system for modular service registration and route configuration.
//!
//! Each feature crate exposes a plugin that registers the services it
//! provides, declares the services it requires, and contributes a router
//! plus an OpenAPI fragment. The `PluginManager` is the composition root:
//! plugins are initialized once, in registration order, and the assembled
//! application holds no global state.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::Router;
use thiserror::Error;
use tracing::debug;
use utoipa::openapi::{ComponentsBuilder, OpenApi};

/// Errors that can occur during plugin operations
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin registration failed for '{plugin_name}': {error}")]
    PluginRegistrationFailed { plugin_name: String, error: String },

    #[error("Service '{service_type}' is required but not registered")]
    ServiceNotFound { service_type: String },

    #[error("Failed to initialize plugin system: {0}")]
    InitializationFailed(String),
}

/// Core plugin trait implemented by every feature crate.
pub trait NimbusPlugin: Send + Sync {
    /// Unique identifier for this plugin
    fn name(&self) -> &'static str;

    /// Register services that this plugin provides.
    ///
    /// Use `context.require_service::<T>()` to get dependencies and
    /// `context.register_service(service)` to provide services for the
    /// plugins registered after this one.
    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;

    /// Configure HTTP routes for this plugin.
    ///
    /// Return None if this plugin doesn't provide HTTP endpoints.
    fn configure_routes(&self, _context: &PluginContext) -> Option<PluginRoutes> {
        None
    }

    /// Provide the OpenAPI fragment for this plugin's endpoints.
    fn openapi_schema(&self) -> Option<OpenApi> {
        None
    }
}

/// Route configuration returned by plugins
pub struct PluginRoutes {
    pub router: Router,
}

impl PluginRoutes {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

/// Type-safe service registry for dependency injection
pub struct ServiceRegistry {
    services: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Register a service for other plugins to use
    pub fn register<T: Send + Sync + 'static + ?Sized>(&self, service: Arc<T>) {
        debug!("Registering service: {}", std::any::type_name::<T>());
        self.services
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), Box::new(service));
    }

    /// Get a service if it's registered
    pub fn get<T: Send + Sync + 'static + ?Sized>(&self) -> Option<Arc<T>> {
        self.services
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|any| any.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Require a service - panics with a helpful error if not available
    pub fn require<T: Send + Sync + 'static + ?Sized>(&self) -> Arc<T> {
        self.get::<T>().unwrap_or_else(|| {
            panic!(
                "Service '{}' is required but not registered. \
                 Register the plugin providing it before the plugins that depend on it.",
                std::any::type_name::<T>()
            )
        })
    }
}

/// Context handed to plugins during service registration.
pub struct ServiceRegistrationContext {
    service_registry: Arc<ServiceRegistry>,
}

impl Default for ServiceRegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistrationContext {
    pub fn new() -> Self {
        Self {
            service_registry: Arc::new(ServiceRegistry::new()),
        }
    }

    pub fn register_service<T: Send + Sync + 'static + ?Sized>(&self, service: Arc<T>) {
        self.service_registry.register(service);
    }

    pub fn get_service<T: Send + Sync + 'static + ?Sized>(&self) -> Option<Arc<T>> {
        self.service_registry.get::<T>()
    }

    pub fn require_service<T: Send + Sync + 'static + ?Sized>(&self) -> Arc<T> {
        self.service_registry.require::<T>()
    }

    /// Create a read-only context for route configuration.
    pub fn create_plugin_context(&self) -> PluginContext {
        PluginContext {
            service_registry: self.service_registry.clone(),
        }
    }
}

/// Read-only service access during route configuration.
pub struct PluginContext {
    service_registry: Arc<ServiceRegistry>,
}

impl PluginContext {
    pub fn get_service<T: Send + Sync + 'static + ?Sized>(&self) -> Option<Arc<T>> {
        self.service_registry.get::<T>()
    }

    pub fn require_service<T: Send + Sync + 'static + ?Sized>(&self) -> Arc<T> {
        self.service_registry.require::<T>()
    }
}

/// Main plugin manager that handles registration, initialization, and
/// application assembly.
pub struct PluginManager {
    plugins: Vec<Box<dyn NimbusPlugin>>,
    context: ServiceRegistrationContext,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            context: ServiceRegistrationContext::new(),
        }
    }

    /// Register a plugin (order matters for dependencies)
    pub fn register_plugin(&mut self, plugin: Box<dyn NimbusPlugin>) {
        debug!("Registering plugin: {}", plugin.name());
        self.plugins.push(plugin);
    }

    /// Access to the registration context for seeding core services
    /// (database handle, config) before plugin initialization.
    pub fn service_context(&self) -> &ServiceRegistrationContext {
        &self.context
    }

    /// Initialize all plugins in registration order
    pub async fn initialize_plugins(&mut self) -> Result<(), PluginError> {
        debug!("Initializing {} plugins", self.plugins.len());
        for plugin in &self.plugins {
            debug!("Initializing plugin: {}", plugin.name());
            plugin.register_services(&self.context).await.map_err(|e| {
                PluginError::PluginRegistrationFailed {
                    plugin_name: plugin.name().to_string(),
                    error: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Build the complete application with routes under `/api`.
    pub fn build_application(&self) -> Result<Router, PluginError> {
        let plugin_context = self.context.create_plugin_context();
        let mut api_router = Router::new();

        for plugin in &self.plugins {
            if let Some(routes) = plugin.configure_routes(&plugin_context) {
                debug!("Adding routes for plugin: {}", plugin.name());
                api_router = api_router.merge(routes.router);
            }
        }

        Ok(Router::new().nest("/api", api_router))
    }

    /// Get the unified OpenAPI schema from all plugins.
    pub fn build_unified_openapi(&self) -> Result<OpenApi, PluginError> {
        use utoipa::openapi::*;

        let mut combined = OpenApiBuilder::new()
            .info(
                InfoBuilder::new()
                    .title("Nimbus")
                    .description(Some(
                        "Self-hosted serverless platform: function deployment and invocation API",
                    ))
                    .version("1.0.0")
                    .build(),
            )
            .servers(Some(vec![ServerBuilder::new()
                .url("/api")
                .description(Some("Base path for all API endpoints"))
                .build()]))
            .components(Some(ComponentsBuilder::new().build()))
            .build();

        for plugin in &self.plugins {
            if let Some(schema) = plugin.openapi_schema() {
                debug!("Merging OpenAPI schema for plugin: {}", plugin.name());
                combined = merge_openapi_schemas(combined, schema);
            }
        }

        Ok(combined)
    }
}

fn merge_openapi_schemas(mut base: OpenApi, plugin_schema: OpenApi) -> OpenApi {
    for (path, path_item) in plugin_schema.paths.paths {
        base.paths.paths.insert(path, path_item);
    }

    if let Some(plugin_components) = plugin_schema.components {
        let base_components = base
            .components
            .get_or_insert_with(|| ComponentsBuilder::new().build());
        for (name, schema) in plugin_components.schemas {
            base_components.schemas.insert(name, schema);
        }
        for (name, response) in plugin_components.responses {
            base_components.responses.insert(name, response);
        }
    }

    if let Some(plugin_tags) = plugin_schema.tags {
        base.tags.get_or_insert_with(Vec::new).extend(plugin_tags);
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter {
        greeting: String,
    }

    struct GreeterPlugin;

    impl NimbusPlugin for GreeterPlugin {
        fn name(&self) -> &'static str {
            "greeter"
        }

        fn register_services<'a>(
            &'a self,
            context: &'a ServiceRegistrationContext,
        ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
            Box::pin(async move {
                context.register_service(Arc::new(Greeter {
                    greeting: "hello".to_string(),
                }));
                Ok(())
            })
        }
    }

    struct ConsumerPlugin;

    impl NimbusPlugin for ConsumerPlugin {
        fn name(&self) -> &'static str {
            "consumer"
        }

        fn register_services<'a>(
            &'a self,
            context: &'a ServiceRegistrationContext,
        ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
            Box::pin(async move {
                let greeter = context.require_service::<Greeter>();
                assert_eq!(greeter.greeting, "hello");
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn plugins_initialize_in_registration_order() {
        let mut manager = PluginManager::new();
        manager.register_plugin(Box::new(GreeterPlugin));
        manager.register_plugin(Box::new(ConsumerPlugin));
        manager.initialize_plugins().await.unwrap();
        manager.build_application().unwrap();
    }

    #[test]
    fn registry_round_trips_trait_objects() {
        trait Port: Send + Sync {
            fn id(&self) -> u32;
        }
        struct Impl;
        impl Port for Impl {
            fn id(&self) -> u32 {
                7
            }
        }

        let registry = ServiceRegistry::new();
        registry.register::<dyn Port>(Arc::new(Impl));
        assert_eq!(registry.require::<dyn Port>().id(), 7);
        assert!(registry.get::<Greeter>().is_none());
    }
}
