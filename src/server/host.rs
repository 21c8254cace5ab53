//! Application host
//!
//! [`ZapiApp`] is the assembled, transport-agnostic application: entities,
//! driver, routing table, middleware chain, hooks and plugins. Adapters call
//! [`ZapiApp::handle_request`] with an [`ApiRequest`] and write the returned
//! [`ApiResponse`] back to their transport.
//!
//! [`AppShell`] is the partially assembled state handed to plugin route and
//! middleware factories before the app itself exists.

use crate::config::AppConfig;
use crate::core::driver::Driver;
use crate::core::entity::Entity;
use crate::core::error::{ZapiError, ZapiResult};
use crate::core::hooks::HookChain;
use crate::plugins::contract::ZapiPlugin;
use crate::plugins::registry::PluginRegistry;
use crate::plugins::resolver::ResolvedEntityMeta;
use crate::server::middleware::{Flow, Middleware};
use crate::server::pipeline::EntityPipeline;
use crate::server::request::{ApiRequest, ApiResponse};
use crate::server::router::{RequestRouter, RouteInfo, RouteMatch};
use axum::http::HeaderMap;
use indexmap::IndexMap;
use serde_json::json;
use std::fmt;
use std::sync::Arc;

/// Entities, driver and config, available to plugin factories during assembly
#[derive(Clone)]
pub struct AppShell {
    pub entities: IndexMap<String, Entity>,
    /// Routing metadata for plugin-owned entities
    pub entity_meta: IndexMap<String, ResolvedEntityMeta>,
    pub driver: Arc<dyn Driver>,
    pub config: AppConfig,
}

impl fmt::Debug for AppShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppShell")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("entity_meta", &self.entity_meta)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Everything [`ZapiApp`] is assembled from
pub(crate) struct AppParts {
    pub shell: AppShell,
    pub router: RequestRouter,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub hooks: HookChain,
    pub plugins: Vec<ZapiPlugin>,
    pub registry: Arc<PluginRegistry>,
}

/// An assembled application. Cloning is cheap.
#[derive(Clone)]
pub struct ZapiApp {
    inner: Arc<AppParts>,
}

impl fmt::Debug for ZapiApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZapiApp")
            .field("shell", &self.inner.shell)
            .field("plugins", &self.plugin_ids())
            .finish_non_exhaustive()
    }
}

impl ZapiApp {
    pub(crate) fn from_parts(parts: AppParts) -> Self {
        Self {
            inner: Arc::new(parts),
        }
    }

    pub fn entities(&self) -> &IndexMap<String, Entity> {
        &self.inner.shell.entities
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.inner.shell.entities.get(name)
    }

    pub fn entity_meta(&self) -> &IndexMap<String, ResolvedEntityMeta> {
        &self.inner.shell.entity_meta
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.inner.shell.driver.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.shell.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    pub fn plugins(&self) -> &[ZapiPlugin] {
        &self.inner.plugins
    }

    pub fn plugin_ids(&self) -> Vec<&str> {
        self.inner.plugins.iter().map(ZapiPlugin::id).collect()
    }

    pub fn router(&self) -> &RequestRouter {
        &self.inner.router
    }

    /// Every exposed entity route
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.inner.router.entity_routes()
    }

    /// Run a request through middleware, routing and the CRUD pipeline.
    ///
    /// Never fails: errors are rendered into the response, with internal
    /// messages hidden in production.
    pub async fn handle_request(&self, mut req: ApiRequest) -> ApiResponse {
        for plugin in &self.inner.plugins {
            if let Some(observer) = &plugin.lifecycle.on_request {
                observer(req.clone()).await;
            }
        }

        let mut staged = ApiResponse::default();
        for middleware in &self.inner.middleware {
            match middleware.handle(&mut req, &mut staged).await {
                Ok(Flow::Next) => {}
                Ok(Flow::End) => {
                    tracing::debug!(middleware = %middleware.name(), path = %req.path, "middleware ended request");
                    return staged;
                }
                Err(err) => return self.error_response(err, &req, staged.headers).await,
            }
        }

        match self.dispatch(req.clone()).await {
            Ok(mut res) => {
                merge_headers(&mut res.headers, staged.headers);
                res
            }
            Err(err) => self.error_response(err, &req, staged.headers).await,
        }
    }

    async fn dispatch(&self, mut req: ApiRequest) -> ZapiResult<ApiResponse> {
        match self.inner.router.match_route(&req.method, &req.path) {
            RouteMatch::Health => Ok(ApiResponse::ok(json!({
                "status": "ok",
                "service": self.config().service_name,
            }))),
            RouteMatch::Plugin { route, params } => {
                tracing::debug!(route = %route.key(), "dispatching plugin route");
                req.params = params;
                route.handler.call(req, self.clone()).await
            }
            RouteMatch::Entity(m) => {
                if let Some(handler) = m.custom_handler {
                    if let Some(id) = m.id {
                        req.params.insert("id".to_string(), id);
                    }
                    return handler.call(req, self.clone()).await;
                }

                let entity = self
                    .entity(&m.entity)
                    .ok_or_else(|| ZapiError::not_found("Route not found"))?;
                EntityPipeline::new(entity, self.driver(), &self.inner.hooks)
                    .execute(m.operation, m.id.as_deref(), &req)
                    .await
            }
            RouteMatch::Disabled | RouteMatch::NotFound => {
                Err(ZapiError::not_found("Route not found"))
            }
        }
    }

    async fn error_response(&self, err: ZapiError, req: &ApiRequest, staged: HeaderMap) -> ApiResponse {
        if let ZapiError::Internal(message) = &err {
            tracing::error!(method = %req.method, path = %req.path, error = %message, "request failed");
        }

        for plugin in &self.inner.plugins {
            if let Some(observer) = &plugin.lifecycle.on_error {
                observer(err.clone(), req.clone()).await;
            }
        }

        let mut res = ApiResponse::from_error(&err, self.config().is_production());
        merge_headers(&mut res.headers, staged);
        res
    }

    /// Call every plugin's `on_shutdown`, dependents before their dependencies.
    ///
    /// All hooks run even if one fails; the first failure is returned.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let ids: Vec<String> = self.plugin_ids().into_iter().map(String::from).collect();
        let order = self
            .registry()
            .initialization_order_for(&ids)
            .unwrap_or(ids);

        let mut first_error = None;
        for id in order.iter().rev() {
            let Some(plugin) = self.inner.plugins.iter().find(|p| p.id() == id.as_str()) else {
                continue;
            };
            let Some(on_shutdown) = &plugin.lifecycle.on_shutdown else {
                continue;
            };
            if let Err(err) = on_shutdown(self.clone()).await {
                tracing::warn!(plugin = %id, error = %err, "plugin shutdown failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Copy middleware-staged headers that the handler did not set itself
fn merge_headers(target: &mut HeaderMap, staged: HeaderMap) {
    let mut copying = None;
    for (name, value) in staged {
        if let Some(name) = name {
            copying = (!target.contains_key(&name)).then_some(name);
        }
        if let Some(name) = &copying {
            target.append(name.clone(), value);
        }
    }
}
