//! ZapiBuilder for assembling an application

use super::exposure::RestExposure;
use super::host::{AppParts, AppShell, ZapiApp};
use super::middleware::{Middleware, default_middleware};
use super::router::RequestRouter;
use crate::config::AppConfig;
use crate::core::driver::Driver;
use crate::core::entity::Entity;
use crate::core::error::ZapiResult;
use crate::core::hooks::{HookChain, HookContext, HookEvent, HookFn, HookRegistration};
use crate::plugins::conflicts::check_plugin_conflicts;
use crate::plugins::contract::ZapiPlugin;
use crate::plugins::registry::PluginRegistry;
use crate::plugins::resolver::{apply_route_overrides, merge_resolved_plugins, resolve_plugin};
use anyhow::{Context, Result, anyhow};
use axum::Router;
use indexmap::IndexMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

enum PendingPlugin {
    Instance(ZapiPlugin),
    Factory { id: String, options: Value },
}

/// Builder for a [`ZapiApp`]
///
/// # Example
///
/// ```ignore
/// let app = ZapiBuilder::new()
///     .with_config(AppConfig::from_env())
///     .entity(post)
///     .plugin(auth_plugin)
///     .build()
///     .await?;
/// ```
pub struct ZapiBuilder {
    config: AppConfig,
    driver: Option<Arc<dyn Driver>>,
    registry: Option<Arc<PluginRegistry>>,
    entities: Vec<Entity>,
    plugins: Vec<PendingPlugin>,
    middleware: Vec<Arc<dyn Middleware>>,
    hooks: Vec<HookRegistration>,
}

impl ZapiBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            driver: None,
            registry: None,
            entities: Vec::new(),
            plugins: Vec::new(),
            middleware: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the storage driver. Defaults to [`InMemoryDriver`](crate::storage::InMemoryDriver)
    /// when the `in-memory` feature is enabled.
    pub fn with_driver(mut self, driver: impl Driver + 'static) -> Self {
        self.driver = Some(Arc::new(driver));
        self
    }

    pub fn with_shared_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Use an existing registry, e.g. one already holding plugin factories.
    /// Each app gets a fresh registry otherwise.
    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entities(mut self, entities: impl IntoIterator<Item = Entity>) -> Self {
        self.entities.extend(entities);
        self
    }

    pub fn plugin(mut self, plugin: ZapiPlugin) -> Self {
        self.plugins.push(PendingPlugin::Instance(plugin));
        self
    }

    /// Add a plugin built by a registered factory when the app is built
    pub fn plugin_from_factory(mut self, id: impl Into<String>, options: Value) -> Self {
        self.plugins.push(PendingPlugin::Factory {
            id: id.into(),
            options,
        });
        self
    }

    /// Application middleware, run after the defaults and plugin middleware
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Application hook, run after plugin hooks for the same event
    pub fn hook<F, Fut>(mut self, entity: impl Into<String>, event: HookEvent, f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ZapiResult<HookContext>> + Send + 'static,
    {
        self.hooks
            .push(HookRegistration::new(entity, event, HookFn::new(f)));
        self
    }

    fn take_driver(&mut self) -> Result<Arc<dyn Driver>> {
        if let Some(driver) = self.driver.take() {
            return Ok(driver);
        }
        #[cfg(feature = "in-memory")]
        {
            Ok(Arc::new(crate::storage::InMemoryDriver::new()))
        }
        #[cfg(not(feature = "in-memory"))]
        {
            Err(anyhow!("A driver is required. Call .with_driver()"))
        }
    }

    /// Assemble the application and initialize its plugins.
    ///
    /// Plugins are resolved and merged into the entity map first; route and
    /// middleware factories then run against the assembled [`AppShell`].
    /// Plugin initialization runs last, in dependency order.
    pub async fn build(mut self) -> Result<ZapiApp> {
        let registry = self
            .registry
            .take()
            .unwrap_or_else(|| Arc::new(PluginRegistry::new()));
        let driver = self.take_driver()?;

        let mut plugins = Vec::with_capacity(self.plugins.len());
        for pending in std::mem::take(&mut self.plugins) {
            let plugin = match pending {
                PendingPlugin::Instance(plugin) => plugin,
                PendingPlugin::Factory { id, options } => registry
                    .create_from_factory(&id, options)?
                    .ok_or_else(|| anyhow!("Plugin factory \"{}\" is not registered", id))?,
            };
            if registry.get_instance(plugin.id()).is_none() {
                registry
                    .register_instance(plugin.clone())
                    .with_context(|| format!("Failed to register plugin \"{}\"", plugin.id()))?;
            }
            plugins.push(plugin);
        }

        for conflict in check_plugin_conflicts(&plugins) {
            tracing::warn!("plugin conflict: {}", conflict);
        }

        let merged = merge_resolved_plugins(plugins.iter().map(resolve_plugin).collect());

        let mut entities: IndexMap<String, Entity> = self
            .entities
            .drain(..)
            .map(|e| (e.name.clone(), e))
            .collect();
        for (name, entity) in merged.entities {
            if entities.contains_key(&name) {
                tracing::warn!(entity = %name, "plugin entity replaces application entity");
            }
            entities.insert(name, entity);
        }

        for plugin in &merged.plugins {
            for (target, fields) in &plugin.field_extensions {
                let Some(entity) = entities.get_mut(target) else {
                    tracing::warn!(plugin = %plugin.id, entity = %target, "cannot extend unknown entity, skipping");
                    continue;
                };
                for (field, def) in fields {
                    entity.config.fields.insert(field.clone(), def.clone());
                }
            }
        }

        let shell = AppShell {
            entities,
            entity_meta: merged.entity_meta,
            driver,
            config: self.config,
        };

        let mut routes = Vec::new();
        let mut middleware = default_middleware(&shell.config);
        let mut hooks = HookChain::new();
        for plugin in &merged.plugins {
            routes.extend(apply_route_overrides(
                plugin.routes.materialize(&shell),
                &plugin.route_overrides,
            ));
            middleware.extend(plugin.middleware.materialize(&shell));
            hooks.extend(plugin.hooks.iter().cloned());
        }
        middleware.extend(self.middleware);
        hooks.extend(self.hooks);

        let router = RequestRouter::new(&shell.entities, shell.entity_meta.clone(), routes);

        let plugin_ids: Vec<String> = plugins.iter().map(|p| p.id().to_string()).collect();
        let app = ZapiApp::from_parts(AppParts {
            shell,
            router,
            middleware,
            hooks,
            plugins,
            registry: registry.clone(),
        });

        registry
            .initialize_plugins(&app, &plugin_ids)
            .await
            .context("Plugin initialization failed")?;

        tracing::info!(
            entities = app.entities().len(),
            plugins = app.plugins().len(),
            "application assembled"
        );
        Ok(app)
    }

    /// Build the application and expose it as an axum router
    pub async fn build_router(self) -> Result<Router> {
        let app = self.build().await?;
        Ok(RestExposure::build_router(app))
    }

    /// Build and serve the application with graceful shutdown
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build().await?;
        app.serve(addr).await
    }
}

impl Default for ZapiBuilder {
    fn default() -> Self {
        Self::new()
    }
}
