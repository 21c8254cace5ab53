//! Cross-plugin entity references
//!
//! Relations can point at entities owned by another plugin without that
//! plugin existing yet:
//!
//! ```
//! use std::sync::Arc;
//! use zapi::prelude::*;
//!
//! let registry = Arc::new(PluginRegistry::new());
//! // The auth plugin may be registered later; the reference resolves on build.
//! let author = belongs_to(plugin_entity(&registry, "auth", "user"));
//!
//! registry
//!     .register_instance(
//!         PluginBuilder::new("auth", "Auth", "1.0.0")
//!             .entity("user", PluginEntityDef::new().field("email", string()))
//!             .build(),
//!     )
//!     .unwrap();
//!
//! let post = entity("post", fields! { title: string(), author: author })
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! assert_eq!(post.config.fields["author"].relation.as_ref().unwrap().target_name, "user");
//! ```
//!
//! Lookups use the plugin's declared schema, so a target renamed by an
//! extension is still referenced by its declared name.

use crate::core::entity::Entity;
use crate::core::error::PluginError;
use crate::core::field::{EntityRef, EntityTarget};
use crate::plugins::registry::PluginRegistry;
use indexmap::IndexMap;
use std::sync::Arc;

/// A parsed `"pluginId.entityName"` or bare `"entityName"` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityReference {
    Plugin { plugin_id: String, entity: String },
    Local(String),
}

/// Look up a declared plugin entity, returning its cached placeholder
pub fn resolve_plugin_entity(
    registry: &PluginRegistry,
    plugin_id: &str,
    entity: &str,
) -> Result<Entity, PluginError> {
    let plugin = registry
        .get_instance(plugin_id)
        .ok_or_else(|| PluginError::PluginNotFound {
            id: plugin_id.to_string(),
        })?;

    if !plugin.schema.entities.contains_key(entity) {
        return Err(PluginError::EntityNotFound {
            plugin_id: plugin_id.to_string(),
            entity: entity.to_string(),
        });
    }

    let key = format!("{}.{}", plugin_id, entity);
    Ok(registry.cached_entity_ref(&key, || Entity::placeholder(entity)))
}

/// A deferred reference to an entity declared by another plugin.
///
/// Nothing is looked up until the reference is resolved, usually when the
/// owning entity is built.
pub fn plugin_entity(
    registry: &Arc<PluginRegistry>,
    plugin_id: impl Into<String>,
    entity: impl Into<String>,
) -> EntityRef {
    let registry = Arc::clone(registry);
    let plugin_id = plugin_id.into();
    let entity = entity.into();
    EntityRef::fallible(move || {
        resolve_plugin_entity(&registry, &plugin_id, &entity).map(EntityTarget::Entity)
    })
}

pub fn parse_entity_ref(reference: &str) -> Result<EntityReference, PluginError> {
    let invalid = || PluginError::InvalidReference {
        reference: reference.to_string(),
    };

    match reference.split_once('.') {
        Some((plugin_id, entity)) => {
            if plugin_id.is_empty() || entity.is_empty() || entity.contains('.') {
                return Err(invalid());
            }
            Ok(EntityReference::Plugin {
                plugin_id: plugin_id.to_string(),
                entity: entity.to_string(),
            })
        }
        None if !reference.trim().is_empty() => Ok(EntityReference::Local(reference.to_string())),
        None => Err(invalid()),
    }
}

/// Resolve a string reference against the registry or the local entity map
pub fn resolve_entity_ref(
    registry: &PluginRegistry,
    reference: &str,
    local: &IndexMap<String, Entity>,
) -> Result<Entity, PluginError> {
    match parse_entity_ref(reference)? {
        EntityReference::Plugin { plugin_id, entity } => {
            resolve_plugin_entity(registry, &plugin_id, &entity)
        }
        EntityReference::Local(name) => {
            local
                .get(&name)
                .cloned()
                .ok_or(PluginError::LocalEntityNotFound { entity: name })
        }
    }
}

/// A deferred reference from a string. Bare names resolve against the application's entities.
pub fn entity_ref(registry: &Arc<PluginRegistry>, reference: &str) -> EntityRef {
    let registry = Arc::clone(registry);
    let reference = reference.to_string();
    EntityRef::fallible(move || match parse_entity_ref(&reference)? {
        EntityReference::Plugin { plugin_id, entity } => {
            resolve_plugin_entity(&registry, &plugin_id, &entity).map(EntityTarget::Entity)
        }
        EntityReference::Local(name) => Ok(EntityTarget::Named(name)),
    })
}
