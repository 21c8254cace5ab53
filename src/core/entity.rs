//! Entity definitions and the entity builder

use crate::core::error::EntityError;
use crate::core::field::{FieldDef, FieldSpec, RelationKind};
use crate::core::rules::RuleDef;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// The five CRUD operations exposed for every entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    List,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
        Operation::List,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::List => "list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-operation rule lists. Absence of an operation means "allow".
pub type RuleSet = IndexMap<Operation, Vec<RuleDef>>;

/// Plugin provenance attached to entities contributed by plugins
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntityTag {
    pub id: String,
    pub base_path: Option<String>,
    pub route_path: Option<String>,
    pub internal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityConfig {
    pub fields: IndexMap<String, FieldDef>,
    pub rules: RuleSet,
    /// Foreign-key name of the owning belongsTo relation
    pub owner_field: Option<String>,
    pub timestamps: bool,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            fields: IndexMap::new(),
            rules: IndexMap::new(),
            owner_field: None,
            timestamps: true,
        }
    }
}

/// A frozen entity definition
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub config: EntityConfig,
    pub plugin: Option<PluginEntityTag>,
}

impl Entity {
    /// An entity with no fields, used where only the name is known
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: EntityConfig::default(),
            plugin: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.config.fields.get(name)
    }

    pub fn rules_for(&self, operation: Operation) -> Option<&[RuleDef]> {
        self.config.rules.get(&operation).map(Vec::as_slice)
    }

    pub fn is_internal(&self) -> bool {
        self.plugin.as_ref().is_some_and(|p| p.internal)
    }

    /// Fields as clients see them on input.
    ///
    /// belongsTo relations are keyed by their foreign key, hasMany/hasOne are
    /// omitted because they store nothing on this record.
    pub fn input_fields(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.config
            .fields
            .iter()
            .filter_map(|(name, def)| match &def.relation {
                None => Some((name.as_str(), def)),
                Some(rel) if rel.kind == RelationKind::BelongsTo => {
                    Some((rel.foreign_key.as_str(), def))
                }
                Some(_) => None,
            })
    }

    /// Fields carrying the unique flag
    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.config
            .fields
            .iter()
            .filter(|(_, def)| def.unique && !def.is_relation())
            .map(|(name, _)| name.as_str())
    }
}

pub fn is_valid_entity_name(name: &str) -> bool {
    static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = NAME_REGEX.get_or_init(|| Regex::new(r"^[a-z][a-zA-Z0-9]*$").unwrap());
    regex.is_match(name)
}

/// Builder returned by [`entity`]
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    name: String,
    fields: Vec<(String, FieldSpec)>,
    rules: RuleSet,
    default_rules: RuleSet,
    owner_field: Option<String>,
    timestamps: bool,
}

/// Start an entity definition. Fails if `name` is not a lower-camel identifier.
pub fn entity<I, K>(name: &str, fields: I) -> Result<EntityBuilder, EntityError>
where
    I: IntoIterator<Item = (K, FieldSpec)>,
    K: Into<String>,
{
    if !is_valid_entity_name(name) {
        return Err(EntityError::InvalidName {
            name: name.to_string(),
        });
    }

    let mut declared = IndexMap::new();
    for (field, spec) in fields {
        let field = field.into();
        if declared.contains_key(&field) {
            return Err(EntityError::DuplicateField {
                entity: name.to_string(),
                field,
            });
        }
        declared.insert(field, spec);
    }

    Ok(EntityBuilder {
        name: name.to_string(),
        fields: declared.into_iter().collect(),
        rules: IndexMap::new(),
        default_rules: IndexMap::new(),
        owner_field: None,
        timestamps: true,
    })
}

impl EntityBuilder {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge rules, replacing any existing list for the same operation
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn rule(mut self, operation: Operation, rules: Vec<RuleDef>) -> Self {
        self.rules.insert(operation, rules);
        self
    }

    /// Mark a belongsTo field as the record owner.
    ///
    /// Installs the owner defaults: create requires authentication, read and
    /// list are public, update and delete are owner-only. Rules set through
    /// [`EntityBuilder::rules`] take precedence per operation.
    pub fn owned_by(mut self, field: &str) -> Result<Self, EntityError> {
        let relation = self.fields.iter().find_map(|(name, spec)| match spec {
            FieldSpec::Relation(rel) if name == field && rel.kind() == RelationKind::BelongsTo => {
                Some(rel.clone())
            }
            _ => None,
        });

        let Some(relation) = relation else {
            return Err(EntityError::NotBelongsTo {
                entity: self.name.clone(),
                field: field.to_string(),
            });
        };

        let foreign_key = relation.resolved_foreign_key(field, &self.name);
        self.default_rules = IndexMap::from([
            (Operation::Create, vec![RuleDef::Authenticated]),
            (Operation::Read, vec![RuleDef::Everyone]),
            (Operation::Update, vec![RuleDef::owner(&foreign_key)]),
            (Operation::Delete, vec![RuleDef::owner(&foreign_key)]),
            (Operation::List, vec![RuleDef::Everyone]),
        ]);
        self.owner_field = Some(foreign_key);
        Ok(self)
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Freeze the entity, evaluating every relation target
    pub fn build(&self) -> Result<Entity, EntityError> {
        let mut fields = IndexMap::with_capacity(self.fields.len());
        for (name, spec) in &self.fields {
            fields.insert(name.clone(), spec.build(name, &self.name)?);
        }

        let mut rules = self.default_rules.clone();
        rules.extend(self.rules.clone());

        Ok(Entity {
            name: self.name.clone(),
            config: EntityConfig {
                fields,
                rules,
                owner_field: self.owner_field.clone(),
                timestamps: self.timestamps,
            },
            plugin: None,
        })
    }
}
