//! Request routing
//!
//! [`RequestRouter`] maps a method and path to one of:
//!
//! - the health endpoint (`/health` or `/_health`)
//! - a plugin's custom route, first declared match wins
//! - a plugin entity under `<basePath>/<routePath or plural>`
//! - an application entity under `/<plural or name>`
//!
//! Plugin entities are only reachable through their namespaced path.

use crate::core::entity::{Entity, Operation};
use crate::core::pluralize::Pluralizer;
use crate::plugins::contract::{PluginRoute, RouteHandler};
use crate::plugins::extension::RouteDecision;
use crate::plugins::resolver::ResolvedEntityMeta;
use crate::server::request::path_segments;
use axum::http::Method;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

/// Deepest path prefix tried when matching plugin entity routes
const MAX_PREFIX_DEPTH: usize = 3;

/// A routed entity operation
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub entity: String,
    pub operation: Operation,
    pub id: Option<String>,
    pub plugin_id: Option<String>,
    /// Replaces the default CRUD handling when set
    pub custom_handler: Option<RouteHandler>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteMatch {
    Health,
    Plugin {
        route: PluginRoute,
        params: IndexMap<String, String>,
    },
    Entity(EntityMatch),
    /// The path names an internal entity or a disabled operation
    Disabled,
    NotFound,
}

/// One exposed entity route, for documentation and introspection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    pub path: String,
    pub entity: String,
    pub operation: Operation,
    pub plugin_id: Option<String>,
}

fn serialize_method<S: serde::Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(method.as_str())
}

/// Operation implied by a method and the presence of a trailing id
pub fn infer_operation(method: &Method, has_id: bool) -> Option<Operation> {
    match (method.as_str(), has_id) {
        ("GET", false) => Some(Operation::List),
        ("GET", true) => Some(Operation::Read),
        ("POST", false) => Some(Operation::Create),
        ("PUT" | "PATCH", true) => Some(Operation::Update),
        ("DELETE", true) => Some(Operation::Delete),
        _ => None,
    }
}

/// Match a `:param` pattern against a path, returning captured parameters
pub fn match_path_pattern(pattern: &str, path: &str) -> Option<IndexMap<String, String>> {
    let expected = path_segments(pattern);
    let actual = path_segments(path);
    if expected.len() != actual.len() {
        return None;
    }

    let mut params = IndexMap::new();
    for (want, got) in expected.iter().zip(&actual) {
        match want.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), got.to_string());
            }
            None if want == got => {}
            None => return None,
        }
    }
    Some(params)
}

/// Public collection path of an entity, e.g. `/auth/users` or `/posts`
pub fn entity_route_path(name: &str, meta: Option<&ResolvedEntityMeta>) -> String {
    let Some(meta) = meta else {
        return format!("/{}", Pluralizer::pluralize(name));
    };

    let route = meta
        .route_path
        .as_deref()
        .map(|p| p.trim_matches('/').to_string())
        .unwrap_or_else(|| Pluralizer::pluralize(name));
    match &meta.base_path {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), route),
        None => format!("/{}", route),
    }
}

fn index_key(path: &str) -> String {
    path_segments(path).join("/").to_lowercase()
}

/// Routing table for one application
#[derive(Debug, Clone, Default)]
pub struct RequestRouter {
    /// Application entity names (plugin entities excluded) in declaration order
    app_entities: Vec<String>,
    plugin_routes: Vec<PluginRoute>,
    entity_meta: IndexMap<String, ResolvedEntityMeta>,
    /// Lowercased `base/route` path to plugin entity name
    plugin_index: HashMap<String, String>,
}

impl RequestRouter {
    pub fn new(
        entities: &IndexMap<String, Entity>,
        entity_meta: IndexMap<String, ResolvedEntityMeta>,
        plugin_routes: Vec<PluginRoute>,
    ) -> Self {
        let app_entities = entities
            .keys()
            .filter(|name| !entity_meta.contains_key(*name))
            .cloned()
            .collect();

        let mut plugin_index = HashMap::new();
        for (name, meta) in &entity_meta {
            let key = index_key(&entity_route_path(name, Some(meta)));
            if let Some(previous) = plugin_index.insert(key.clone(), name.clone()) {
                tracing::warn!(path = %key, entity = %name, shadowed = %previous, "duplicate plugin entity path");
            }
        }

        Self {
            app_entities,
            plugin_routes,
            entity_meta,
            plugin_index,
        }
    }

    pub fn plugin_routes(&self) -> &[PluginRoute] {
        &self.plugin_routes
    }

    pub fn match_route(&self, method: &Method, path: &str) -> RouteMatch {
        let trimmed = path.trim_end_matches('/');
        if trimmed == "/health" || trimmed == "/_health" {
            return RouteMatch::Health;
        }

        let segments = path_segments(path);
        if segments.is_empty() {
            return RouteMatch::NotFound;
        }

        for route in &self.plugin_routes {
            if route.method != *method {
                continue;
            }
            if let Some(params) = match_path_pattern(&route.path, path) {
                return RouteMatch::Plugin {
                    route: route.clone(),
                    params,
                };
            }
        }

        if !self.plugin_index.is_empty()
            && let Some(found) = self.match_plugin_entity(method, &segments)
        {
            return found;
        }

        self.match_app_entity(method, &segments)
    }

    fn match_plugin_entity(&self, method: &Method, segments: &[&str]) -> Option<RouteMatch> {
        for depth in 1..=segments.len().min(MAX_PREFIX_DEPTH) {
            let key = segments[..depth].join("/").to_lowercase();
            let Some(name) = self.plugin_index.get(&key) else {
                continue;
            };
            let rest = &segments[depth..];
            if rest.len() > 1 {
                continue;
            }
            let meta = &self.entity_meta[name];

            let id = rest.first().map(|s| s.to_string());
            let Some(operation) = infer_operation(method, id.is_some()) else {
                return Some(RouteMatch::NotFound);
            };
            if meta.internal {
                return Some(RouteMatch::Disabled);
            }

            let custom_handler = match meta.route_config.as_ref().map(|c| c.decision(operation)) {
                Some(RouteDecision::Disable) => return Some(RouteMatch::Disabled),
                Some(RouteDecision::Custom(handler)) => Some(handler.clone()),
                _ => None,
            };

            return Some(RouteMatch::Entity(EntityMatch {
                entity: name.clone(),
                operation,
                id,
                plugin_id: Some(meta.plugin_id.clone()),
                custom_handler,
            }));
        }
        None
    }

    fn match_app_entity(&self, method: &Method, segments: &[&str]) -> RouteMatch {
        if segments.len() > 2 {
            return RouteMatch::NotFound;
        }

        let head = segments[0].to_lowercase();
        let Some(name) = self.app_entities.iter().find(|name| {
            Pluralizer::pluralize(name).to_lowercase() == head || name.to_lowercase() == head
        }) else {
            return RouteMatch::NotFound;
        };

        let id = segments.get(1).map(|s| s.to_string());
        match infer_operation(method, id.is_some()) {
            Some(operation) => RouteMatch::Entity(EntityMatch {
                entity: name.clone(),
                operation,
                id,
                plugin_id: None,
                custom_handler: None,
            }),
            None => RouteMatch::NotFound,
        }
    }

    /// Every exposed entity route, application entities first
    pub fn entity_routes(&self) -> Vec<RouteInfo> {
        let app = self.app_entities.iter().map(|name| (name, None));
        let plugin = self
            .entity_meta
            .iter()
            .filter(|(_, meta)| !meta.internal)
            .map(|(name, meta)| (name, Some(meta)));

        let mut routes = Vec::new();
        for (name, meta) in app.chain(plugin) {
            let collection = entity_route_path(name, meta);
            for operation in Operation::ALL {
                let disabled = meta
                    .and_then(|m| m.route_config.as_ref())
                    .is_some_and(|c| c.decision(operation) == &RouteDecision::Disable);
                if disabled {
                    continue;
                }
                let (method, path) = match operation {
                    Operation::List => (Method::GET, collection.clone()),
                    Operation::Create => (Method::POST, collection.clone()),
                    Operation::Read => (Method::GET, format!("{}/:id", collection)),
                    Operation::Update => (Method::PATCH, format!("{}/:id", collection)),
                    Operation::Delete => (Method::DELETE, format!("{}/:id", collection)),
                };
                routes.push(RouteInfo {
                    method,
                    path,
                    entity: name.clone(),
                    operation,
                    plugin_id: meta.map(|m| m.plugin_id.clone()),
                });
            }
        }
        routes
    }
}
