//! Fluent construction of [`ZapiPlugin`] values

use crate::core::error::{ZapiError, ZapiResult};
use crate::core::field::FieldDef;
use crate::core::hooks::{HookContext, HookEvent, HookFn, HookRegistration};
use crate::plugins::contract::{
    MiddlewareSource, PluginEntityDef, PluginRoute, RouteHandler, RoutesSource, ZapiPlugin,
};
use crate::plugins::extension::PluginExtension;
use crate::server::host::{AppShell, ZapiApp};
use crate::server::middleware::Middleware;
use crate::server::request::ApiRequest;
use axum::http::Method;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Builder for a plugin.
///
/// ```
/// use zapi::prelude::*;
///
/// let audit = PluginBuilder::new("audit", "Audit log", "1.0.0")
///     .depends_on("auth")
///     .entity("auditEntry", PluginEntityDef::new().field("action", string()).internal())
///     .build();
/// assert_eq!(audit.meta.dependencies, vec!["auth"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PluginBuilder {
    plugin: ZapiPlugin,
}

impl PluginBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        let mut plugin = ZapiPlugin::default();
        plugin.meta.id = id.into();
        plugin.meta.name = name.into();
        plugin.meta.version = version.into();
        Self { plugin }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.plugin.meta.description = Some(description.into());
        self
    }

    pub fn depends_on(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin.meta.dependencies.push(plugin_id.into());
        self
    }

    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.plugin.meta.base_path = Some(path.into());
        self
    }

    pub fn entity(mut self, name: impl Into<String>, def: impl Into<PluginEntityDef>) -> Self {
        self.plugin.schema.entities.insert(name.into(), def.into());
        self
    }

    /// Add a field to an entity this plugin does not declare
    pub fn extend_entity(mut self, entity: impl Into<String>, field: impl Into<String>, def: impl Into<FieldDef>) -> Self {
        self.plugin
            .schema
            .extend
            .entry(entity.into())
            .or_default()
            .insert(field.into(), def.into());
        self
    }

    pub fn route(mut self, method: Method, path: impl Into<String>, handler: RouteHandler) -> Self {
        let route = PluginRoute::new(method, path, handler);
        self.plugin.routes = match self.plugin.routes {
            RoutesSource::Static(mut routes) => {
                routes.push(route);
                RoutesSource::Static(routes)
            }
            RoutesSource::Factory(factory) => RoutesSource::Factory(Arc::new(move |shell: &AppShell| {
                let mut routes = factory(shell);
                routes.push(route.clone());
                routes
            })),
        };
        self
    }

    /// Routes built once the application's entities and driver are known.
    ///
    /// Routes added with [`PluginBuilder::route`] before this call are kept in front.
    pub fn routes_from<F>(mut self, factory: F) -> Self
    where
        F: Fn(&AppShell) -> Vec<PluginRoute> + Send + Sync + 'static,
    {
        let previous = self.plugin.routes;
        self.plugin.routes = RoutesSource::Factory(Arc::new(move |shell: &AppShell| {
            let mut routes = previous.materialize(shell);
            routes.extend(factory(shell));
            routes
        }));
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.plugin.middleware = match self.plugin.middleware {
            MiddlewareSource::Static(mut list) => {
                list.push(middleware);
                MiddlewareSource::Static(list)
            }
            MiddlewareSource::Factory(factory) => MiddlewareSource::Factory(Arc::new(move |shell: &AppShell| {
                let mut list = factory(shell);
                list.push(middleware.clone());
                list
            })),
        };
        self
    }

    pub fn middleware_from<F>(mut self, factory: F) -> Self
    where
        F: Fn(&AppShell) -> Vec<Arc<dyn Middleware>> + Send + Sync + 'static,
    {
        let previous = self.plugin.middleware;
        self.plugin.middleware = MiddlewareSource::Factory(Arc::new(move |shell: &AppShell| {
            let mut list = previous.materialize(shell);
            list.extend(factory(shell));
            list
        }));
        self
    }

    /// Register a hook for `entity` (or `"*"` for every entity)
    pub fn hook<F, Fut>(mut self, entity: impl Into<String>, event: HookEvent, f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ZapiResult<HookContext>> + Send + 'static,
    {
        self.plugin
            .hooks
            .push(HookRegistration::new(entity, event, HookFn::new(f)));
        self
    }

    pub fn on_register<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ZapiApp) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.plugin.lifecycle.on_register = Some(Arc::new(move |app| f(app).boxed()));
        self
    }

    pub fn on_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ZapiApp) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.plugin.lifecycle.on_init = Some(Arc::new(move |app| f(app).boxed()));
        self
    }

    pub fn on_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ZapiApp) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.plugin.lifecycle.on_shutdown = Some(Arc::new(move |app| f(app).boxed()));
        self
    }

    pub fn on_request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.plugin.lifecycle.on_request = Some(Arc::new(move |req| f(req).boxed()));
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ZapiError, ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.plugin.lifecycle.on_error = Some(Arc::new(move |err, req| f(err, req).boxed()));
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.plugin.options = options;
        self
    }

    pub fn extension(mut self, extension: PluginExtension) -> Self {
        self.plugin.extension = extension;
        self
    }

    pub fn build(self) -> ZapiPlugin {
        self.plugin
    }
}
