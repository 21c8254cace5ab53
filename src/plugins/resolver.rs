//! Plugin resolution
//!
//! [`resolve_plugin`] applies a plugin's [`PluginExtension`] to a copy of its
//! declared schema and produces concrete entities plus the routing facts
//! ([`ResolvedEntityMeta`]) the router needs. Resolution never touches the
//! transport or persistence layers, and it never mutates the plugin itself,
//! so one plugin value can be resolved any number of times.
//!
//! Extension constraint violations (removing a locked field or a required
//! entity, targeting an entity or field that does not exist) are logged and
//! skipped rather than failing boot.

use crate::core::entity::{Entity, PluginEntityTag};
use crate::core::field::FieldDef;
use crate::core::hooks::HookRegistration;
use crate::plugins::contract::{
    MiddlewareSource, PluginEntityDef, PluginMeta, PluginRoute, RoutesSource, ZapiPlugin, to_entity,
};
use crate::plugins::extension::{
    BasePath, EntityExtension, EntityRouteConfig, PluginExtension, RouteOverride,
};
use indexmap::IndexMap;
use serde::Serialize;

/// Routing facts for one resolved plugin entity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntityMeta {
    /// Name as declared by the plugin, before any rename
    pub original_name: String,
    pub plugin_id: String,
    /// `None` means the entity routes sit at the root
    pub base_path: Option<String>,
    pub route_path: Option<String>,
    pub internal: bool,
    #[serde(skip)]
    pub route_config: Option<EntityRouteConfig>,
}

/// A plugin after its extension has been applied
#[derive(Debug, Clone)]
pub struct ResolvedPlugin {
    pub id: String,
    pub base_path: Option<String>,
    pub entities: Vec<Entity>,
    pub entity_meta: IndexMap<String, ResolvedEntityMeta>,
    pub routes: RoutesSource,
    pub route_overrides: IndexMap<String, RouteOverride>,
    pub middleware: MiddlewareSource,
    pub hooks: Vec<HookRegistration>,
    /// Fields this plugin adds to entities it does not own
    pub field_extensions: IndexMap<String, IndexMap<String, FieldDef>>,
}

/// Ensure a leading slash and strip trailing ones
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// The extension's base path wins over the plugin's, which defaults to `/<id>`
pub fn effective_base_path(meta: &PluginMeta, extension: &PluginExtension) -> Option<String> {
    let raw = match &extension.base_path {
        Some(BasePath::Root) => return None,
        Some(BasePath::Path(path)) => path.clone(),
        None => meta
            .base_path
            .clone()
            .unwrap_or_else(|| format!("/{}", meta.id)),
    };
    let normalized = normalize_path(&raw);
    (!normalized.is_empty()).then_some(normalized)
}

/// Move `key` to `new_key` in place, keeping its position
fn rename_key<V>(map: &mut IndexMap<String, V>, key: &str, new_key: &str) -> bool {
    let Some((index, _, value)) = map.shift_remove_full(key) else {
        return false;
    };
    if map.shift_remove(new_key).is_some() {
        tracing::warn!(from = %key, to = %new_key, "rename overwrites an existing entry");
    }
    let index = index.min(map.len());
    map.shift_insert(index, new_key.to_string(), value);
    true
}

fn apply_entity_extension(
    plugin_id: &str,
    name: &str,
    entities: &mut IndexMap<String, PluginEntityDef>,
    instruction: &EntityExtension,
    renames: &mut IndexMap<String, String>,
) {
    if !entities.contains_key(name) {
        tracing::warn!(plugin = %plugin_id, entity = %name, "extension targets unknown entity, skipping");
        return;
    }

    if instruction.remove {
        if entities[name].required {
            tracing::warn!(plugin = %plugin_id, entity = %name, "cannot remove required entity");
        } else {
            entities.shift_remove(name);
            return;
        }
    }

    let mut current = name.to_string();
    if let Some(new_name) = &instruction.rename
        && new_name != name
        && rename_key(entities, name, new_name)
    {
        renames.insert(new_name.clone(), name.to_string());
        current = new_name.clone();
    }

    let Some(def) = entities.get_mut(&current) else {
        return;
    };

    for (field, field_def) in &instruction.add_fields {
        def.fields.insert(field.clone(), field_def.clone());
    }

    for (field, op) in &instruction.fields {
        if let Some(added) = &op.add {
            def.fields.insert(field.clone(), added.clone());
            continue;
        }

        if !def.fields.contains_key(field) {
            tracing::warn!(plugin = %plugin_id, entity = %current, field = %field, "extension targets unknown field, skipping");
            continue;
        }

        if op.remove {
            if def.fields[field].locked {
                tracing::warn!(plugin = %plugin_id, entity = %current, field = %field, "cannot remove locked field");
            } else {
                def.fields.shift_remove(field);
                continue;
            }
        }

        let mut field_name = field.clone();
        if let Some(new_name) = &op.rename {
            if def.fields[field].locked {
                tracing::warn!(plugin = %plugin_id, entity = %current, field = %field, "cannot rename locked field");
            } else if rename_key(&mut def.fields, field, new_name) {
                field_name = new_name.clone();
            }
        }

        if let Some(patch) = &op.override_with
            && let Some(target) = def.fields.get_mut(&field_name)
        {
            patch.apply(target);
        }
    }
}

/// Apply entity instructions to a schema copy. Returns the rename map (new name to original).
pub fn apply_extension(
    plugin_id: &str,
    entities: &mut IndexMap<String, PluginEntityDef>,
    extension: &PluginExtension,
) -> IndexMap<String, String> {
    let mut renames = IndexMap::new();
    for (name, instruction) in &extension.entities {
        apply_entity_extension(plugin_id, name, entities, instruction, &mut renames);
    }
    renames
}

/// Resolve a plugin using its own extension
pub fn resolve_plugin(plugin: &ZapiPlugin) -> ResolvedPlugin {
    resolve_plugin_with(plugin, &plugin.extension)
}

/// Resolve a plugin against an explicit extension
pub fn resolve_plugin_with(plugin: &ZapiPlugin, extension: &PluginExtension) -> ResolvedPlugin {
    let plugin_id = plugin.meta.id.as_str();
    let base_path = effective_base_path(&plugin.meta, extension);

    let mut declared = plugin.schema.entities.clone();
    let renames = apply_extension(plugin_id, &mut declared, extension);

    // hooks are declared against plugin-local names
    let mut local_names: IndexMap<String, String> = renames
        .iter()
        .map(|(new, original)| (original.clone(), new.clone()))
        .collect();
    for (name, def) in &extension.add_entities {
        let prefixed = format!("{}_{}", plugin_id, name);
        if !plugin.schema.entities.contains_key(name) {
            local_names.insert(name.clone(), prefixed.clone());
        }
        declared.insert(prefixed, def.clone());
    }

    let mut entities = Vec::with_capacity(declared.len());
    let mut entity_meta = IndexMap::with_capacity(declared.len());

    for (name, def) in &declared {
        let original_name = renames.get(name).cloned().unwrap_or_else(|| name.clone());
        let instruction = extension
            .entities
            .get(&original_name)
            .or_else(|| extension.entities.get(name));

        let route_path = instruction
            .and_then(|i| i.route_path.clone())
            .or_else(|| def.route_path.clone());

        let mut internal = def.internal;
        match instruction.and_then(|i| i.internal) {
            Some(true) => internal = true,
            Some(false) if def.internal => tracing::warn!(
                plugin = %plugin_id,
                entity = %name,
                "extension cannot make an internal entity public, keeping it internal"
            ),
            _ => {}
        }

        let route_config = extension
            .entity_routes
            .get(&original_name)
            .or_else(|| extension.entity_routes.get(name))
            .cloned();

        let mut entity = to_entity(name, def);
        entity.plugin = Some(PluginEntityTag {
            id: plugin_id.to_string(),
            base_path: base_path.clone(),
            route_path: route_path.clone(),
            internal,
        });
        entities.push(entity);

        entity_meta.insert(
            name.clone(),
            ResolvedEntityMeta {
                original_name,
                plugin_id: plugin_id.to_string(),
                base_path: base_path.clone(),
                route_path,
                internal,
                route_config,
            },
        );
    }

    tracing::debug!(plugin = %plugin_id, entities = entities.len(), "plugin resolved");

    ResolvedPlugin {
        id: plugin_id.to_string(),
        base_path,
        entities,
        entity_meta,
        routes: plugin.routes.clone(),
        route_overrides: extension.routes.clone(),
        middleware: plugin.middleware.clone(),
        hooks: retarget_hooks(&plugin.hooks, &local_names),
        field_extensions: plugin.schema.extend.clone(),
    }
}

/// Point hook registrations at the resolved names of the entities they were declared for
pub fn retarget_hooks(
    hooks: &[HookRegistration],
    local_names: &IndexMap<String, String>,
) -> Vec<HookRegistration> {
    hooks
        .iter()
        .map(|hook| match local_names.get(&hook.entity) {
            Some(resolved) => HookRegistration {
                entity: resolved.clone(),
                ..hook.clone()
            },
            None => hook.clone(),
        })
        .collect()
}

/// Resolved plugins concatenated in registration order
#[derive(Debug, Clone, Default)]
pub struct MergedPlugins {
    pub entities: IndexMap<String, Entity>,
    pub entity_meta: IndexMap<String, ResolvedEntityMeta>,
    pub plugins: Vec<ResolvedPlugin>,
}

/// Merge resolved plugins. Later plugins overwrite earlier ones on name collision.
pub fn merge_resolved_plugins(plugins: Vec<ResolvedPlugin>) -> MergedPlugins {
    let mut merged = MergedPlugins::default();
    for plugin in &plugins {
        for entity in &plugin.entities {
            merged.entities.insert(entity.name.clone(), entity.clone());
        }
        merged
            .entity_meta
            .extend(plugin.entity_meta.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged.plugins = plugins;
    merged
}

/// Apply route overrides to materialized routes.
///
/// A key is either `"METHOD /path"` or a bare `/path` covering every method.
pub fn apply_route_overrides(
    routes: Vec<PluginRoute>,
    overrides: &IndexMap<String, RouteOverride>,
) -> Vec<PluginRoute> {
    if overrides.is_empty() {
        return routes;
    }

    routes
        .into_iter()
        .filter_map(|mut route| {
            let decision = overrides
                .get(&route.key())
                .or_else(|| overrides.get(&route.path));
            match decision {
                None => Some(route),
                Some(RouteOverride::Disable) => {
                    tracing::debug!(route = %route.key(), "plugin route disabled");
                    None
                }
                Some(RouteOverride::Replace(handler)) => {
                    route.handler = handler.clone();
                    Some(route)
                }
            }
        })
        .collect()
}
