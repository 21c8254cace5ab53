//! Plugin registry and dependency initializer
//!
//! The registry keeps three tables: plugin factories, registered plugin
//! instances, and the cache of cross-plugin entity references. Each
//! application builds its own registry by default so independent apps (and
//! tests) do not share state; [`PluginRegistry::global`] exists for code that
//! wants a process-wide singleton.

use crate::core::entity::Entity;
use crate::core::error::PluginError;
use crate::plugins::contract::{PluginFactory, ZapiPlugin};
use crate::server::host::ZapiApp;
use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A registered plugin and its initialization state
#[derive(Debug, Clone)]
pub struct PluginInstance {
    pub plugin: ZapiPlugin,
    pub initialized: bool,
    /// Message of the error that aborted this plugin's initialization
    pub error: Option<String>,
}

#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<IndexMap<String, PluginFactory>>,
    instances: RwLock<IndexMap<String, PluginInstance>>,
    entity_refs: RwLock<HashMap<String, Entity>>,
}

// Registry state stays consistent across a panicking writer, so poisoned
// locks are recovered rather than propagated.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Arc<PluginRegistry> {
        static GLOBAL: OnceLock<Arc<PluginRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(PluginRegistry::new())).clone()
    }

    // -------------------------------------------------------------------------
    // Factories
    // -------------------------------------------------------------------------

    /// Register a factory. Fails if the id is already taken.
    pub fn register_factory<F>(&self, id: impl Into<String>, factory: F) -> Result<(), PluginError>
    where
        F: Fn(Value) -> anyhow::Result<ZapiPlugin> + Send + Sync + 'static,
    {
        let id = id.into();
        let mut factories = write(&self.factories);
        if factories.contains_key(&id) {
            return Err(PluginError::DuplicateFactory { id });
        }
        tracing::debug!(plugin = %id, "plugin factory registered");
        factories.insert(id, Arc::new(factory));
        Ok(())
    }

    /// Register a factory over typed options. `null` options use `O::default()`.
    pub fn register_typed_factory<O, F>(&self, id: impl Into<String>, factory: F) -> Result<(), PluginError>
    where
        O: DeserializeOwned + Default,
        F: Fn(O) -> ZapiPlugin + Send + Sync + 'static,
    {
        self.register_factory(id, move |options: Value| {
            let options = if options.is_null() {
                O::default()
            } else {
                serde_json::from_value(options)?
            };
            Ok(factory(options))
        })
    }

    pub fn has_factory(&self, id: &str) -> bool {
        read(&self.factories).contains_key(id)
    }

    /// Build a plugin from a registered factory. `Ok(None)` when no factory has this id.
    pub fn create_from_factory(&self, id: &str, options: Value) -> Result<Option<ZapiPlugin>, PluginError> {
        let Some(factory) = read(&self.factories).get(id).cloned() else {
            return Ok(None);
        };

        let mut plugin = factory(options.clone()).map_err(|source| PluginError::FactoryFailed {
            id: id.to_string(),
            source,
        })?;
        if plugin.options.is_null() {
            plugin.options = options;
        }
        Ok(Some(plugin))
    }

    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    /// Register a plugin instance. Fails if the id is already taken.
    pub fn register_instance(&self, plugin: ZapiPlugin) -> Result<(), PluginError> {
        let id = plugin.id().to_string();
        let mut instances = write(&self.instances);
        if instances.contains_key(&id) {
            return Err(PluginError::DuplicateInstance { id });
        }
        instances.insert(
            id,
            PluginInstance {
                plugin,
                initialized: false,
                error: None,
            },
        );
        Ok(())
    }

    pub fn get_instance(&self, id: &str) -> Option<ZapiPlugin> {
        read(&self.instances).get(id).map(|i| i.plugin.clone())
    }

    pub fn instance_state(&self, id: &str) -> Option<PluginInstance> {
        read(&self.instances).get(id).cloned()
    }

    /// Registered plugin ids in registration order
    pub fn instance_ids(&self) -> Vec<String> {
        read(&self.instances).keys().cloned().collect()
    }

    pub fn is_initialized(&self, id: &str) -> bool {
        read(&self.instances)
            .get(id)
            .is_some_and(|i| i.initialized)
    }

    fn set_state(&self, id: &str, initialized: bool, error: Option<String>) {
        if let Some(instance) = write(&self.instances).get_mut(id) {
            instance.initialized = initialized;
            instance.error = error;
        }
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    /// Registered plugins ordered so that dependencies come before dependents
    pub fn initialization_order(&self) -> Result<Vec<String>, PluginError> {
        let ids: Vec<String> = read(&self.instances).keys().cloned().collect();
        self.initialization_order_for(&ids)
    }

    /// Dependency order of `ids` alone. Dependencies outside `ids` must be
    /// registered but are left out of the result.
    pub fn initialization_order_for(&self, ids: &[String]) -> Result<Vec<String>, PluginError> {
        let instances = read(&self.instances);
        let graph: IndexMap<&str, &[String]> = instances
            .iter()
            .map(|(id, i)| (id.as_str(), i.plugin.meta.dependencies.as_slice()))
            .collect();

        let mut order = Vec::with_capacity(ids.len());
        let mut visited = IndexSet::new();
        let mut visiting = IndexSet::new();
        for id in ids {
            if !graph.contains_key(id.as_str()) {
                return Err(PluginError::PluginNotFound { id: id.clone() });
            }
            visit(id, &graph, &mut visiting, &mut visited, &mut order)?;
        }
        order.retain(|id| ids.contains(id));
        Ok(order)
    }

    /// Run `on_register` then `on_init` for every registered plugin, in dependency order.
    pub async fn initialize_all(&self, app: &ZapiApp) -> Result<(), PluginError> {
        let ids: Vec<String> = read(&self.instances).keys().cloned().collect();
        self.initialize_plugins(app, &ids).await
    }

    /// Run `on_register` then `on_init` for `ids`, in dependency order.
    ///
    /// Stops at the first failure. Plugins initialized before the failure stay
    /// initialized; the failing plugin records the error message.
    pub async fn initialize_plugins(&self, app: &ZapiApp, ids: &[String]) -> Result<(), PluginError> {
        for id in self.initialization_order_for(ids)? {
            if self.is_initialized(&id) {
                continue;
            }
            let Some(plugin) = self.get_instance(&id) else {
                continue;
            };

            let lifecycle = &plugin.lifecycle;
            let result = async {
                if let Some(on_register) = &lifecycle.on_register {
                    on_register(app.clone()).await?;
                }
                if let Some(on_init) = &lifecycle.on_init {
                    on_init(app.clone()).await?;
                }
                anyhow::Ok(())
            }
            .await;

            match result {
                Ok(()) => {
                    self.set_state(&id, true, None);
                    tracing::info!(plugin = %id, version = %plugin.meta.version, "plugin initialized");
                }
                Err(source) => {
                    tracing::error!(plugin = %id, error = %source, "plugin initialization failed");
                    self.set_state(&id, false, Some(source.to_string()));
                    return Err(PluginError::InitFailed {
                        plugin_id: id,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Entity reference cache
    // -------------------------------------------------------------------------

    /// Cached entity for `key`, inserting the result of `make` on first access
    pub fn cached_entity_ref(&self, key: &str, make: impl FnOnce() -> Entity) -> Entity {
        if let Some(entity) = read(&self.entity_refs).get(key) {
            return entity.clone();
        }
        write(&self.entity_refs)
            .entry(key.to_string())
            .or_insert_with(make)
            .clone()
    }

    pub fn clear_entity_refs(&self) {
        write(&self.entity_refs).clear();
    }

    /// Drop every factory, instance and cached reference
    pub fn reset(&self) {
        write(&self.factories).clear();
        write(&self.instances).clear();
        self.clear_entity_refs();
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("factories", &read(&self.factories).keys().collect::<Vec<_>>())
            .field("instances", &read(&self.instances).keys().collect::<Vec<_>>())
            .finish()
    }
}

fn visit(
    id: &str,
    graph: &IndexMap<&str, &[String]>,
    visiting: &mut IndexSet<String>,
    visited: &mut IndexSet<String>,
    order: &mut Vec<String>,
) -> Result<(), PluginError> {
    if visited.contains(id) {
        return Ok(());
    }
    if !visiting.insert(id.to_string()) {
        return Err(PluginError::CircularDependency {
            plugin_id: id.to_string(),
        });
    }

    for dependency in graph.get(id).copied().unwrap_or_default() {
        if !graph.contains_key(dependency.as_str()) {
            return Err(PluginError::MissingDependency {
                plugin_id: id.to_string(),
                dependency: dependency.clone(),
            });
        }
        visit(dependency, graph, visiting, visited, order)?;
    }

    visiting.shift_remove(id);
    visited.insert(id.to_string());
    order.push(id.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builder::PluginBuilder;
    use crate::plugins::contract::PluginEntityDef;
    use crate::core::field::string;
    use crate::server::builder::ZapiBuilder;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    fn plugin(id: &str, deps: &[&str]) -> ZapiPlugin {
        let mut builder = PluginBuilder::new(id, id, "1.0.0");
        for dep in deps {
            builder = builder.depends_on(*dep);
        }
        builder.build()
    }

    #[test]
    fn test_duplicate_factory_is_rejected() {
        let registry = PluginRegistry::new();
        registry
            .register_factory("auth", |_| Ok(plugin("auth", &[])))
            .unwrap();
        let err = registry
            .register_factory("auth", |_| Ok(plugin("auth", &[])))
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicateFactory { .. }));
        assert!(registry.has_factory("auth"));
    }

    #[test]
    fn test_create_from_unknown_factory_is_none() {
        let registry = PluginRegistry::new();
        assert!(registry.create_from_factory("nope", Value::Null).unwrap().is_none());
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct AuthOptions {
        session_ttl: Option<u64>,
    }

    #[test]
    fn test_typed_factory() {
        let registry = PluginRegistry::new();
        registry
            .register_typed_factory("auth", |options: AuthOptions| {
                let mut p = plugin("auth", &[]);
                p.meta.description = options.session_ttl.map(|ttl| format!("ttl={}", ttl));
                p
            })
            .unwrap();

        let p = registry
            .create_from_factory("auth", json!({ "sessionTtl": 60 }))
            .unwrap()
            .unwrap();
        assert_eq!(p.meta.description.as_deref(), Some("ttl=60"));
        assert_eq!(p.options, json!({ "sessionTtl": 60 }));

        let defaulted = registry.create_from_factory("auth", Value::Null).unwrap().unwrap();
        assert!(defaulted.meta.description.is_none());

        let err = registry
            .create_from_factory("auth", json!({ "sessionTtl": "soon" }))
            .unwrap_err();
        assert!(matches!(err, PluginError::FactoryFailed { .. }));
    }

    #[test]
    fn test_duplicate_instance_is_rejected() {
        let registry = PluginRegistry::new();
        registry.register_instance(plugin("auth", &[])).unwrap();
        let err = registry.register_instance(plugin("auth", &[])).unwrap_err();
        assert_eq!(err.to_string(), "Plugin \"auth\" is already registered");
    }

    #[test]
    fn test_dependencies_come_first() {
        let registry = PluginRegistry::new();
        registry.register_instance(plugin("billing", &["auth", "audit"])).unwrap();
        registry.register_instance(plugin("audit", &["auth"])).unwrap();
        registry.register_instance(plugin("auth", &[])).unwrap();

        assert_eq!(
            registry.initialization_order().unwrap(),
            vec!["auth", "audit", "billing"]
        );
    }

    #[test]
    fn test_cycle_is_detected() {
        let registry = PluginRegistry::new();
        registry.register_instance(plugin("a", &["b"])).unwrap();
        registry.register_instance(plugin("b", &["a"])).unwrap();

        let err = registry.initialization_order().unwrap_err();
        assert!(matches!(err, PluginError::CircularDependency { .. }));
    }

    #[test]
    fn test_missing_dependency() {
        let registry = PluginRegistry::new();
        registry.register_instance(plugin("billing", &["auth"])).unwrap();

        let err = registry.initialization_order().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Plugin \"billing\" depends on missing plugin \"auth\""
        );
    }

    #[tokio::test]
    async fn test_initialize_all_runs_in_order_and_stops_on_failure() {
        let app = ZapiBuilder::new().build().await.unwrap();
        let registry = PluginRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let recorder = |id: &'static str, fail: bool, calls: Arc<Mutex<Vec<String>>>| {
            let register_calls = calls.clone();
            PluginBuilder::new(id, id, "1.0.0")
                .on_register(move |_app| {
                    let calls = register_calls.clone();
                    async move {
                        calls.lock().unwrap().push(format!("{}:register", id));
                        Ok(())
                    }
                })
                .on_init(move |_app| {
                    let calls = calls.clone();
                    async move {
                        calls.lock().unwrap().push(format!("{}:init", id));
                        if fail {
                            anyhow::bail!("database unavailable");
                        }
                        Ok(())
                    }
                })
        };

        registry
            .register_instance(recorder("billing", false, calls.clone()).depends_on("auth").build())
            .unwrap();
        registry
            .register_instance(recorder("auth", false, calls.clone()).build())
            .unwrap();
        registry
            .register_instance(recorder("search", true, calls.clone()).depends_on("billing").build())
            .unwrap();

        let err = registry.initialize_all(&app).await.unwrap_err();
        assert!(matches!(err, PluginError::InitFailed { ref plugin_id, .. } if plugin_id == "search"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "auth:register",
                "auth:init",
                "billing:register",
                "billing:init",
                "search:register",
                "search:init",
            ]
        );
        assert!(registry.is_initialized("auth"));
        assert!(registry.is_initialized("billing"));
        let search = registry.instance_state("search").unwrap();
        assert!(!search.initialized);
        assert_eq!(search.error.as_deref(), Some("database unavailable"));
    }

    #[test]
    fn test_entity_ref_cache_and_reset() {
        let registry = PluginRegistry::new();
        registry
            .register_instance(
                PluginBuilder::new("auth", "Auth", "1.0.0")
                    .entity("user", PluginEntityDef::new().field("email", string()))
                    .build(),
            )
            .unwrap();

        let first = registry.cached_entity_ref("auth.user", || Entity::placeholder("user"));
        let second = registry.cached_entity_ref("auth.user", || Entity::placeholder("other"));
        assert_eq!(first, second);

        registry.reset();
        assert!(registry.instance_ids().is_empty());
        let fresh = registry.cached_entity_ref("auth.user", || Entity::placeholder("other"));
        assert_eq!(fresh.name, "other");
    }
}
