//! The plugin contract
//!
//! A [`ZapiPlugin`] bundles entities, routes, middleware, hooks and lifecycle
//! callbacks. Plugins are usually produced by a factory registered in the
//! [`PluginRegistry`](crate::plugins::registry::PluginRegistry), which turns
//! caller options into a plugin value.

use crate::core::entity::{Entity, EntityConfig, RuleSet};
use crate::core::error::{ZapiError, ZapiResult};
use crate::core::field::FieldDef;
use crate::core::hooks::HookRegistration;
use crate::plugins::extension::PluginExtension;
use crate::server::host::{AppShell, ZapiApp};
use crate::server::middleware::Middleware;
use crate::server::request::{ApiRequest, ApiResponse};
use axum::http::Method;
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    /// Ids of plugins that must initialize first
    pub dependencies: Vec<String>,
    /// Prefix for this plugin's entity routes; defaults to `/<id>`
    pub base_path: Option<String>,
}

/// An entity as declared by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginEntityDef {
    pub fields: IndexMap<String, FieldDef>,
    #[serde(skip)]
    pub rules: RuleSet,
    pub owner_field: Option<String>,
    pub timestamps: bool,
    /// Required entities cannot be removed by an extension
    pub required: bool,
    /// Internal entities get no public CRUD routes
    pub internal: bool,
    pub route_path: Option<String>,
}

impl Default for PluginEntityDef {
    fn default() -> Self {
        Self {
            fields: IndexMap::new(),
            rules: IndexMap::new(),
            owner_field: None,
            timestamps: true,
            required: false,
            internal: false,
            route_path: None,
        }
    }
}

impl PluginEntityDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, def: impl Into<FieldDef>) -> Self {
        self.fields.insert(name.into(), def.into());
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn route_path(mut self, path: impl Into<String>) -> Self {
        self.route_path = Some(path.into());
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }
}

/// Start from a built entity, e.g. one declared with `entity(...).owned_by(...)`
impl From<Entity> for PluginEntityDef {
    fn from(entity: Entity) -> Self {
        Self {
            fields: entity.config.fields,
            rules: entity.config.rules,
            owner_field: entity.config.owner_field,
            timestamps: entity.config.timestamps,
            ..Self::default()
        }
    }
}

/// Convert a declared plugin entity into a plain [`Entity`]
pub fn to_entity(name: &str, def: &PluginEntityDef) -> Entity {
    Entity {
        name: name.to_string(),
        config: EntityConfig {
            fields: def.fields.clone(),
            rules: def.rules.clone(),
            owner_field: def.owner_field.clone(),
            timestamps: def.timestamps,
        },
        plugin: None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginSchema {
    pub entities: IndexMap<String, PluginEntityDef>,
    /// Fields added to entities owned by the application or other plugins
    pub extend: IndexMap<String, IndexMap<String, FieldDef>>,
}

// =============================================================================
// Routes
// =============================================================================

type HandlerFn =
    dyn Fn(ApiRequest, ZapiApp) -> BoxFuture<'static, ZapiResult<ApiResponse>> + Send + Sync;

/// An async handler for a custom route or an overridden entity operation
#[derive(Clone)]
pub struct RouteHandler(Arc<HandlerFn>);

impl RouteHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ApiRequest, ZapiApp) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ZapiResult<ApiResponse>> + Send + 'static,
    {
        Self(Arc::new(move |req, app| f(req, app).boxed()))
    }

    pub async fn call(&self, req: ApiRequest, app: ZapiApp) -> ZapiResult<ApiResponse> {
        (self.0)(req, app).await
    }
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RouteHandler(..)")
    }
}

impl PartialEq for RouteHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A custom route contributed by a plugin
#[derive(Debug, Clone, PartialEq)]
pub struct PluginRoute {
    pub method: Method,
    /// Path pattern; `:name` segments capture parameters
    pub path: String,
    pub handler: RouteHandler,
}

impl PluginRoute {
    pub fn new(method: Method, path: impl Into<String>, handler: RouteHandler) -> Self {
        Self {
            method,
            path: path.into(),
            handler,
        }
    }

    /// `"METHOD /path"`, the key used by route overrides and conflict checks
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

pub type RouteFactory = Arc<dyn Fn(&AppShell) -> Vec<PluginRoute> + Send + Sync>;
pub type MiddlewareFactory = Arc<dyn Fn(&AppShell) -> Vec<Arc<dyn Middleware>> + Send + Sync>;

/// Routes are either known up front or produced from the assembled app
#[derive(Clone)]
pub enum RoutesSource {
    Static(Vec<PluginRoute>),
    Factory(RouteFactory),
}

impl RoutesSource {
    pub fn materialize(&self, shell: &AppShell) -> Vec<PluginRoute> {
        match self {
            RoutesSource::Static(routes) => routes.clone(),
            RoutesSource::Factory(factory) => factory(shell),
        }
    }

    /// Routes visible before assembly; factories contribute none
    pub fn declared(&self) -> &[PluginRoute] {
        match self {
            RoutesSource::Static(routes) => routes,
            RoutesSource::Factory(_) => &[],
        }
    }
}

impl Default for RoutesSource {
    fn default() -> Self {
        RoutesSource::Static(Vec::new())
    }
}

impl fmt::Debug for RoutesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutesSource::Static(routes) => f.debug_tuple("Static").field(routes).finish(),
            RoutesSource::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

#[derive(Clone)]
pub enum MiddlewareSource {
    Static(Vec<Arc<dyn Middleware>>),
    Factory(MiddlewareFactory),
}

impl MiddlewareSource {
    pub fn materialize(&self, shell: &AppShell) -> Vec<Arc<dyn Middleware>> {
        match self {
            MiddlewareSource::Static(list) => list.clone(),
            MiddlewareSource::Factory(factory) => factory(shell),
        }
    }

    pub fn declared(&self) -> &[Arc<dyn Middleware>] {
        match self {
            MiddlewareSource::Static(list) => list,
            MiddlewareSource::Factory(_) => &[],
        }
    }
}

impl Default for MiddlewareSource {
    fn default() -> Self {
        MiddlewareSource::Static(Vec::new())
    }
}

impl fmt::Debug for MiddlewareSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareSource::Static(list) => {
                let names: Vec<_> = list.iter().map(|m| m.name()).collect();
                f.debug_tuple("Static").field(&names).finish()
            }
            MiddlewareSource::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

pub type LifecycleFn = Arc<dyn Fn(ZapiApp) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type RequestObserver = Arc<dyn Fn(ApiRequest) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorObserver = Arc<dyn Fn(ZapiError, ApiRequest) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PluginLifecycle {
    pub on_register: Option<LifecycleFn>,
    pub on_init: Option<LifecycleFn>,
    pub on_request: Option<RequestObserver>,
    pub on_error: Option<ErrorObserver>,
    pub on_shutdown: Option<LifecycleFn>,
}

impl fmt::Debug for PluginLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLifecycle")
            .field("on_register", &self.on_register.is_some())
            .field("on_init", &self.on_init.is_some())
            .field("on_request", &self.on_request.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish()
    }
}

// =============================================================================
// Plugin
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct ZapiPlugin {
    pub meta: PluginMeta,
    pub schema: PluginSchema,
    pub routes: RoutesSource,
    pub middleware: MiddlewareSource,
    pub hooks: Vec<HookRegistration>,
    pub lifecycle: PluginLifecycle,
    /// Options the plugin was created with
    pub options: Value,
    /// Caller customization applied at resolution time
    pub extension: PluginExtension,
}

impl ZapiPlugin {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn with_extension(mut self, extension: PluginExtension) -> Self {
        self.extension = extension;
        self
    }
}

/// Turns caller options into a plugin
pub type PluginFactory = Arc<dyn Fn(Value) -> anyhow::Result<ZapiPlugin> + Send + Sync>;
