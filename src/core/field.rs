//! Field definitions and their copy-on-write builders
//!
//! A field is either a scalar column ([`FieldBuilder`]) or a relation to
//! another entity ([`RelationBuilder`]). Every modifier returns a new builder
//! and leaves the receiver untouched, so a shared base builder can be reused:
//!
//! ```
//! use zapi::core::field::string;
//!
//! let base = string();
//! let email = base.email().unique();
//! assert!(!base.build().unique);
//! assert!(email.build().is_email);
//! ```

use crate::core::entity::{Entity, EntityBuilder};
use crate::core::error::{EntityError, PluginError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Scalar field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Text,
    Int,
    Float,
    Boolean,
    Datetime,
    Json,
}

/// Relation kinds between entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasMany,
    HasOne,
}

/// Referential action applied when the referenced record is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

// =============================================================================
// Entity references
// =============================================================================

/// The value an [`EntityRef`] evaluates to
#[derive(Clone)]
pub enum EntityTarget {
    Entity(Entity),
    Builder(EntityBuilder),
    /// Reference by entity name, resolved against the application's entity map
    Named(String),
}

impl EntityTarget {
    pub fn name(&self) -> &str {
        match self {
            EntityTarget::Entity(entity) => &entity.name,
            EntityTarget::Builder(builder) => builder.name(),
            EntityTarget::Named(name) => name,
        }
    }
}

type EntityThunk = dyn Fn() -> Result<EntityTarget, PluginError> + Send + Sync;

/// A lazily evaluated reference to a relation target.
///
/// The thunk runs when the owning entity is built, which lets two entities
/// reference each other without either needing to exist first.
#[derive(Clone)]
pub struct EntityRef {
    thunk: Arc<EntityThunk>,
}

impl EntityRef {
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> EntityTarget + Send + Sync + 'static,
    {
        Self {
            thunk: Arc::new(move || Ok(f())),
        }
    }

    /// A reference whose evaluation may fail (e.g. a cross-plugin lookup)
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn() -> Result<EntityTarget, PluginError> + Send + Sync + 'static,
    {
        Self { thunk: Arc::new(f) }
    }

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::lazy(move || EntityTarget::Named(name.clone()))
    }

    pub fn resolve(&self) -> Result<EntityTarget, PluginError> {
        (self.thunk)()
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntityRef(..)")
    }
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        let entity = entity.clone();
        Self::lazy(move || EntityTarget::Entity(entity.clone()))
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        Self::from(&entity)
    }
}

impl From<&EntityBuilder> for EntityRef {
    fn from(builder: &EntityBuilder) -> Self {
        let builder = builder.clone();
        Self::lazy(move || EntityTarget::Builder(builder.clone()))
    }
}

impl From<&str> for EntityRef {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

// =============================================================================
// Field definitions
// =============================================================================

/// A resolved relation on a built entity
#[derive(Clone)]
pub struct RelationDef {
    pub kind: RelationKind,
    pub target: EntityRef,
    /// Name of the target entity, captured when the owner was built
    pub target_name: String,
    pub foreign_key: String,
    pub references: String,
    pub on_delete: Option<OnDelete>,
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("kind", &self.kind)
            .field("target_name", &self.target_name)
            .field("foreign_key", &self.foreign_key)
            .field("references", &self.references)
            .field("on_delete", &self.on_delete)
            .finish()
    }
}

impl PartialEq for RelationDef {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.target_name == other.target_name
            && self.foreign_key == other.foreign_key
            && self.references == other.references
            && self.on_delete == other.on_delete
    }
}

/// The frozen definition of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub optional: bool,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub is_email: bool,
    /// Locked fields cannot be removed by plugin extensions
    pub locked: bool,
    #[serde(skip)]
    pub relation: Option<RelationDef>,
}

impl FieldDef {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Default::default()
        }
    }

    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    pub fn relation_kind(&self) -> Option<RelationKind> {
        self.relation.as_ref().map(|r| r.kind)
    }

    /// The foreign-key column this field contributes to records, if any.
    ///
    /// Only belongsTo relations store a key on the owning record.
    pub fn belongs_to_key(&self) -> Option<&str> {
        match &self.relation {
            Some(rel) if rel.kind == RelationKind::BelongsTo => Some(&rel.foreign_key),
            _ => None,
        }
    }
}

// =============================================================================
// Scalar builder
// =============================================================================

/// Copy-on-write builder for scalar fields
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBuilder {
    def: FieldDef,
}

impl FieldBuilder {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            def: FieldDef::new(field_type),
        }
    }

    fn with(&self, f: impl FnOnce(&mut FieldDef)) -> Self {
        let mut def = self.def.clone();
        f(&mut def);
        Self { def }
    }

    pub fn optional(&self) -> Self {
        self.with(|d| d.optional = true)
    }

    pub fn unique(&self) -> Self {
        self.with(|d| d.unique = true)
    }

    pub fn default(&self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.with(|d| d.default = Some(value))
    }

    /// Minimum length for strings, minimum value for numbers
    pub fn min(&self, min: f64) -> Self {
        self.with(|d| d.min = Some(min))
    }

    /// Maximum length for strings, maximum value for numbers
    pub fn max(&self, max: f64) -> Self {
        self.with(|d| d.max = Some(max))
    }

    pub fn email(&self) -> Self {
        self.with(|d| d.is_email = true)
    }

    pub fn locked(&self) -> Self {
        self.with(|d| d.locked = true)
    }

    pub fn build(&self) -> FieldDef {
        self.def.clone()
    }
}

impl From<FieldBuilder> for FieldDef {
    fn from(builder: FieldBuilder) -> Self {
        builder.def
    }
}

impl From<&FieldBuilder> for FieldDef {
    fn from(builder: &FieldBuilder) -> Self {
        builder.build()
    }
}

pub fn string() -> FieldBuilder {
    FieldBuilder::new(FieldType::String)
}

pub fn text() -> FieldBuilder {
    FieldBuilder::new(FieldType::Text)
}

pub fn int() -> FieldBuilder {
    FieldBuilder::new(FieldType::Int)
}

pub fn float() -> FieldBuilder {
    FieldBuilder::new(FieldType::Float)
}

pub fn boolean() -> FieldBuilder {
    FieldBuilder::new(FieldType::Boolean)
}

pub fn datetime() -> FieldBuilder {
    FieldBuilder::new(FieldType::Datetime)
}

pub fn json() -> FieldBuilder {
    FieldBuilder::new(FieldType::Json)
}

// =============================================================================
// Relation builder
// =============================================================================

/// Copy-on-write builder for relation fields
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    kind: RelationKind,
    target: EntityRef,
    foreign_key: Option<String>,
    references: Option<String>,
    on_delete: Option<OnDelete>,
    optional: bool,
}

impl RelationBuilder {
    pub fn new(kind: RelationKind, target: impl Into<EntityRef>) -> Self {
        Self {
            kind,
            target: target.into(),
            foreign_key: None,
            references: None,
            on_delete: None,
            optional: false,
        }
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn foreign_key(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.foreign_key = Some(key.into());
        next
    }

    pub fn references(&self, column: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.references = Some(column.into());
        next
    }

    pub fn on_delete(&self, action: OnDelete) -> Self {
        let mut next = self.clone();
        next.on_delete = Some(action);
        next
    }

    pub fn optional(&self) -> Self {
        let mut next = self.clone();
        next.optional = true;
        next
    }

    /// Foreign key name this relation will use once attached to `field` on `owner`
    pub fn resolved_foreign_key(&self, field: &str, owner: &str) -> String {
        match (&self.foreign_key, self.kind) {
            (Some(key), _) => key.clone(),
            (None, RelationKind::BelongsTo) => format!("{}Id", field),
            (None, _) => format!("{}Id", owner),
        }
    }

    /// Evaluate the target thunk and freeze the relation
    pub fn build(&self, field: &str, owner: &str) -> Result<FieldDef, EntityError> {
        let target = self
            .target
            .resolve()
            .map_err(|source| EntityError::UnresolvedRelation {
                entity: owner.to_string(),
                field: field.to_string(),
                source,
            })?;

        Ok(FieldDef {
            optional: self.optional,
            relation: Some(RelationDef {
                kind: self.kind,
                target: self.target.clone(),
                target_name: target.name().to_string(),
                foreign_key: self.resolved_foreign_key(field, owner),
                references: self.references.clone().unwrap_or_else(|| "id".to_string()),
                on_delete: self.on_delete,
            }),
            ..Default::default()
        })
    }
}

pub fn belongs_to(target: impl Into<EntityRef>) -> RelationBuilder {
    RelationBuilder::new(RelationKind::BelongsTo, target)
}

pub fn has_many(target: impl Into<EntityRef>) -> RelationBuilder {
    RelationBuilder::new(RelationKind::HasMany, target)
}

pub fn has_one(target: impl Into<EntityRef>) -> RelationBuilder {
    RelationBuilder::new(RelationKind::HasOne, target)
}

/// Anything that can appear in an entity's field list
#[derive(Debug, Clone)]
pub enum FieldSpec {
    Scalar(FieldBuilder),
    Relation(RelationBuilder),
    Def(FieldDef),
}

impl FieldSpec {
    pub fn build(&self, field: &str, owner: &str) -> Result<FieldDef, EntityError> {
        match self {
            FieldSpec::Scalar(builder) => Ok(builder.build()),
            FieldSpec::Relation(builder) => builder.build(field, owner),
            FieldSpec::Def(def) => Ok(def.clone()),
        }
    }
}

impl From<FieldBuilder> for FieldSpec {
    fn from(builder: FieldBuilder) -> Self {
        FieldSpec::Scalar(builder)
    }
}

impl From<&FieldBuilder> for FieldSpec {
    fn from(builder: &FieldBuilder) -> Self {
        FieldSpec::Scalar(builder.clone())
    }
}

impl From<RelationBuilder> for FieldSpec {
    fn from(builder: RelationBuilder) -> Self {
        FieldSpec::Relation(builder)
    }
}

impl From<FieldDef> for FieldSpec {
    fn from(def: FieldDef) -> Self {
        FieldSpec::Def(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_modifiers_do_not_mutate_receiver() {
        let base = string();
        let unique = base.unique();
        let optional = base.optional().default("x");

        assert!(!base.build().unique);
        assert!(!base.build().optional);
        assert!(unique.build().unique);
        assert!(!unique.build().optional);
        assert!(optional.build().optional);
        assert_eq!(optional.build().default, Some(json!("x")));
    }

    #[test]
    fn test_min_max_email() {
        let def = string().min(3.0).max(10.0).email().build();
        assert_eq!(def.min, Some(3.0));
        assert_eq!(def.max, Some(10.0));
        assert!(def.is_email);
        assert_eq!(def.field_type, FieldType::String);
    }

    #[test]
    fn test_belongs_to_default_foreign_key() {
        let def = belongs_to("user").build("author", "post").unwrap();
        let rel = def.relation.unwrap();
        assert_eq!(rel.kind, RelationKind::BelongsTo);
        assert_eq!(rel.foreign_key, "authorId");
        assert_eq!(rel.references, "id");
        assert_eq!(rel.target_name, "user");
    }

    #[test]
    fn test_has_many_default_foreign_key_uses_owner() {
        let rel = has_many("post").build("posts", "user").unwrap().relation.unwrap();
        assert_eq!(rel.foreign_key, "userId");

        let rel = has_one("profile").build("profile", "user").unwrap().relation.unwrap();
        assert_eq!(rel.foreign_key, "userId");
    }

    #[test]
    fn test_explicit_foreign_key_and_references() {
        let builder = belongs_to("user")
            .foreign_key("writerId")
            .references("uuid")
            .on_delete(OnDelete::Cascade);
        let rel = builder.build("author", "post").unwrap().relation.unwrap();
        assert_eq!(rel.foreign_key, "writerId");
        assert_eq!(rel.references, "uuid");
        assert_eq!(rel.on_delete, Some(OnDelete::Cascade));
    }

    #[test]
    fn test_lazy_ref_evaluated_at_build() {
        let target = EntityRef::lazy(|| EntityTarget::Named("comment".to_string()));
        let def = has_many(target).build("comments", "post").unwrap();
        assert_eq!(def.relation.unwrap().target_name, "comment");
    }

    #[test]
    fn test_failing_ref_surfaces_entity_error() {
        let target = EntityRef::fallible(|| {
            Err(PluginError::PluginNotFound {
                id: "auth".to_string(),
            })
        });
        let err = belongs_to(target).build("owner", "doc").unwrap_err();
        assert!(err.to_string().contains("Plugin \"auth\" not found"));
    }

    #[test]
    fn test_field_def_yaml_shape() {
        let def: FieldDef =
            serde_yaml::from_str("type: int\noptional: true\nmin: 0\nmax: 120\n").unwrap();
        assert_eq!(def.field_type, FieldType::Int);
        assert!(def.optional);
        assert_eq!(def.max, Some(120.0));
        assert!(def.relation.is_none());
    }
}
