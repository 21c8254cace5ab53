//! Caller customization of a plugin's schema and routes
//!
//! A [`PluginExtension`] can be written by hand, built with
//! [`ExtensionBuilder`], or loaded from YAML:
//!
//! ```yaml
//! basePath: /accounts
//! entities:
//!   user:
//!     rename: member
//!     routePath: people
//!     fields:
//!       nickname:
//!         add: { type: string, optional: true }
//!       legacyId:
//!         remove: true
//! addEntities:
//!   apiKey:
//!     fields:
//!       token: { type: string, unique: true }
//! routes:
//!   "POST /auth/register": disable
//! entityRoutes:
//!   user:
//!     delete: disable
//! ```

use crate::core::entity::Operation;
use crate::core::field::{FieldDef, FieldType};
use crate::plugins::contract::{PluginEntityDef, RouteHandler};
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Shallow patch applied by a field `override`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldPatch {
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    pub optional: Option<bool>,
    pub unique: Option<bool>,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub is_email: Option<bool>,
}

impl FieldPatch {
    pub fn apply(&self, def: &mut FieldDef) {
        if let Some(field_type) = self.field_type {
            def.field_type = field_type;
        }
        if let Some(optional) = self.optional {
            def.optional = optional;
        }
        if let Some(unique) = self.unique {
            def.unique = unique;
        }
        if let Some(default) = &self.default {
            def.default = Some(default.clone());
        }
        if let Some(min) = self.min {
            def.min = Some(min);
        }
        if let Some(max) = self.max {
            def.max = Some(max);
        }
        if let Some(is_email) = self.is_email {
            def.is_email = is_email;
        }
    }
}

/// One per-field instruction. When `add` is set the other keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldOp {
    pub add: Option<FieldDef>,
    pub remove: bool,
    pub rename: Option<String>,
    #[serde(rename = "override")]
    pub override_with: Option<FieldPatch>,
}

/// Instructions for one declared entity
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntityExtension {
    pub fields: IndexMap<String, FieldOp>,
    /// Inserted as-is, overwriting same-named fields
    pub add_fields: IndexMap<String, FieldDef>,
    pub remove: bool,
    pub rename: Option<String>,
    pub route_path: Option<String>,
    pub internal: Option<bool>,
}

/// Replacement for a plugin route
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteOverride {
    Disable,
    #[serde(skip)]
    Replace(RouteHandler),
}

/// How one CRUD operation of a plugin entity is routed
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteDecision {
    #[default]
    Default,
    #[serde(alias = "disabled")]
    Disable,
    #[serde(skip)]
    Custom(RouteHandler),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EntityRouteConfig {
    pub create: RouteDecision,
    pub read: RouteDecision,
    pub update: RouteDecision,
    pub delete: RouteDecision,
    pub list: RouteDecision,
}

impl EntityRouteConfig {
    pub fn decision(&self, operation: Operation) -> &RouteDecision {
        match operation {
            Operation::Create => &self.create,
            Operation::Read => &self.read,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
            Operation::List => &self.list,
        }
    }

    pub fn set(&mut self, operation: Operation, decision: RouteDecision) {
        let slot = match operation {
            Operation::Create => &mut self.create,
            Operation::Read => &mut self.read,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
            Operation::List => &mut self.list,
        };
        *slot = decision;
    }

    /// Every operation disabled
    pub fn disabled() -> Self {
        let mut config = Self::default();
        for op in Operation::ALL {
            config.set(op, RouteDecision::Disable);
        }
        config
    }
}

/// Base path override. `false` in YAML means "no prefix".
#[derive(Debug, Clone, PartialEq)]
pub enum BasePath {
    Path(String),
    Root,
}

impl<'de> Deserialize<'de> for BasePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Path(String),
            Flag(bool),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Path(path) => Ok(BasePath::Path(path)),
            Raw::Flag(false) => Ok(BasePath::Root),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "basePath must be a path string or false",
            )),
        }
    }
}

/// Caller customization applied to a plugin at resolution time
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginExtension {
    pub entities: IndexMap<String, EntityExtension>,
    /// New entities, namespaced as `<pluginId>_<name>`
    pub add_entities: IndexMap<String, PluginEntityDef>,
    /// Keyed by `"METHOD /path"` or `/path` (all methods)
    pub routes: IndexMap<String, RouteOverride>,
    pub base_path: Option<BasePath>,
    pub entity_routes: IndexMap<String, EntityRouteConfig>,
}

impl PluginExtension {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let extension: Self = serde_yaml::from_str(yaml)?;
        Ok(extension)
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Fluent builder for [`PluginExtension`]
#[derive(Debug, Clone, Default)]
pub struct ExtensionBuilder {
    extension: PluginExtension,
}

impl ExtensionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entity(&mut self, name: &str) -> &mut EntityExtension {
        self.extension.entities.entry(name.to_string()).or_default()
    }

    fn field(&mut self, entity: &str, field: &str) -> &mut FieldOp {
        self.entity(entity)
            .fields
            .entry(field.to_string())
            .or_default()
    }

    pub fn remove_entity(mut self, entity: &str) -> Self {
        self.entity(entity).remove = true;
        self
    }

    pub fn rename_entity(mut self, entity: &str, new_name: impl Into<String>) -> Self {
        self.entity(entity).rename = Some(new_name.into());
        self
    }

    pub fn route_path(mut self, entity: &str, path: impl Into<String>) -> Self {
        self.entity(entity).route_path = Some(path.into());
        self
    }

    pub fn internal(mut self, entity: &str, internal: bool) -> Self {
        self.entity(entity).internal = Some(internal);
        self
    }

    /// Insert a field directly, replacing any field with the same name
    pub fn insert_field(mut self, entity: &str, field: &str, def: impl Into<FieldDef>) -> Self {
        self.entity(entity)
            .add_fields
            .insert(field.to_string(), def.into());
        self
    }

    pub fn add_field(mut self, entity: &str, field: &str, def: impl Into<FieldDef>) -> Self {
        self.field(entity, field).add = Some(def.into());
        self
    }

    pub fn remove_field(mut self, entity: &str, field: &str) -> Self {
        self.field(entity, field).remove = true;
        self
    }

    pub fn rename_field(mut self, entity: &str, field: &str, new_name: impl Into<String>) -> Self {
        self.field(entity, field).rename = Some(new_name.into());
        self
    }

    pub fn override_field(mut self, entity: &str, field: &str, patch: FieldPatch) -> Self {
        self.field(entity, field).override_with = Some(patch);
        self
    }

    pub fn add_entity(mut self, name: impl Into<String>, def: PluginEntityDef) -> Self {
        self.extension.add_entities.insert(name.into(), def);
        self
    }

    pub fn disable_route(mut self, key: impl Into<String>) -> Self {
        self.extension.routes.insert(key.into(), RouteOverride::Disable);
        self
    }

    pub fn replace_route(mut self, key: impl Into<String>, handler: RouteHandler) -> Self {
        self.extension
            .routes
            .insert(key.into(), RouteOverride::Replace(handler));
        self
    }

    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.extension.base_path = Some(BasePath::Path(path.into()));
        self
    }

    pub fn no_base_path(mut self) -> Self {
        self.extension.base_path = Some(BasePath::Root);
        self
    }

    pub fn disable_operation(mut self, entity: &str, operation: Operation) -> Self {
        self.extension
            .entity_routes
            .entry(entity.to_string())
            .or_default()
            .set(operation, RouteDecision::Disable);
        self
    }

    pub fn custom_operation(mut self, entity: &str, operation: Operation, handler: RouteHandler) -> Self {
        self.extension
            .entity_routes
            .entry(entity.to_string())
            .or_default()
            .set(operation, RouteDecision::Custom(handler));
        self
    }

    pub fn build(self) -> PluginExtension {
        self.extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::string;

    #[test]
    fn test_yaml_extension() {
        let yaml = r#"
basePath: /accounts
entities:
  user:
    rename: member
    routePath: people
    fields:
      nickname:
        add: { type: string, optional: true }
      legacyId:
        remove: true
      email:
        override: { unique: true }
addEntities:
  apiKey:
    fields:
      token: { type: string, unique: true }
routes:
  "POST /auth/register": disable
entityRoutes:
  user:
    delete: disable
"#;
        let ext = PluginExtension::from_yaml_str(yaml).unwrap();
        assert_eq!(ext.base_path, Some(BasePath::Path("/accounts".into())));

        let user = &ext.entities["user"];
        assert_eq!(user.rename.as_deref(), Some("member"));
        assert!(user.fields["nickname"].add.as_ref().unwrap().optional);
        assert!(user.fields["legacyId"].remove);
        assert_eq!(
            user.fields["email"].override_with.as_ref().unwrap().unique,
            Some(true)
        );

        assert!(ext.add_entities["apiKey"].fields["token"].unique);
        assert_eq!(ext.routes["POST /auth/register"], RouteOverride::Disable);
        assert_eq!(ext.entity_routes["user"].delete, RouteDecision::Disable);
        assert_eq!(ext.entity_routes["user"].read, RouteDecision::Default);
    }

    #[test]
    fn test_base_path_false_means_root() {
        let ext = PluginExtension::from_yaml_str("basePath: false").unwrap();
        assert_eq!(ext.base_path, Some(BasePath::Root));
        assert!(PluginExtension::from_yaml_str("basePath: true").is_err());
    }

    #[test]
    fn test_builder_matches_yaml_shape() {
        let built = ExtensionBuilder::new()
            .rename_entity("user", "member")
            .add_field("user", "nickname", string().optional())
            .remove_field("user", "legacyId")
            .disable_operation("user", Operation::Delete)
            .build();

        let user = &built.entities["user"];
        assert_eq!(user.rename.as_deref(), Some("member"));
        assert_eq!(user.fields.len(), 2);
        assert_eq!(
            built.entity_routes["user"].decision(Operation::Delete),
            &RouteDecision::Disable
        );
        assert!(!built.is_empty());
        assert!(ExtensionBuilder::new().build().is_empty());
    }

    #[test]
    fn test_patch_is_shallow() {
        let mut def = string().min(3.0).build();
        FieldPatch {
            optional: Some(true),
            ..FieldPatch::default()
        }
        .apply(&mut def);
        assert!(def.optional);
        assert_eq!(def.min, Some(3.0));
    }
}
