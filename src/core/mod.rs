//! Core module containing the entity model, rules, validation and the driver contract

pub mod driver;
pub mod entity;
pub mod error;
pub mod field;
pub mod hooks;
pub mod pluralize;
pub mod query;
pub mod rules;
pub mod validation;

pub use driver::{Driver, FindManyArgs};
pub use entity::{Entity, EntityBuilder, Operation, RuleSet, entity};
pub use error::{DriverError, EntityError, PluginError, ZapiError, ZapiResult};
pub use field::{EntityRef, FieldDef, FieldType, RelationKind};
pub use hooks::{HookChain, HookContext, HookEvent};
pub use pluralize::Pluralizer;
pub use query::{Condition, ParsedQuery, Where, validate_query_params};
pub use rules::{RuleContext, RuleDef, User, check_rules};
pub use validation::{ValidationResult, validate_input};
