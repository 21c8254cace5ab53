//! Authorization rules for entity operations
//!
//! Each entity carries an ordered rule list per [`Operation`]. All rules in
//! the list must pass. An operation with no rules is open.

use crate::core::entity::{Entity, Operation};
use crate::core::error::ZapiError;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The authenticated caller, as supplied by the transport adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
            extra: Map::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

/// Everything a rule may inspect
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub entity: String,
    pub operation: Operation,
    pub user: Option<User>,
    /// The stored record, absent on create and list
    pub resource: Option<Value>,
    pub input: Option<Value>,
}

impl RuleContext {
    pub fn new(entity: impl Into<String>, operation: Operation) -> Self {
        Self {
            entity: entity.into(),
            operation,
            user: None,
            resource: None,
            input: None,
        }
    }

    pub fn with_user(mut self, user: Option<User>) -> Self {
        self.user = user;
        self
    }

    pub fn with_resource(mut self, resource: Option<Value>) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_input(mut self, input: Option<Value>) -> Self {
        self.input = input;
        self
    }
}

/// A custom rule. `Err(message)` fails the check and surfaces the message.
pub type RulePredicate =
    Arc<dyn Fn(RuleContext) -> BoxFuture<'static, Result<bool, String>> + Send + Sync>;

/// A single authorization rule
#[derive(Clone)]
pub enum RuleDef {
    Everyone,
    Authenticated,
    /// Owner check against a foreign-key field; `None` uses the entity's owner field
    Owner(Option<String>),
    Admin,
    Custom(RulePredicate),
}

impl RuleDef {
    pub fn owner(field: impl Into<String>) -> Self {
        RuleDef::Owner(Some(field.into()))
    }

    pub fn custom<F, Fut>(f: F) -> Self
    where
        F: Fn(RuleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, String>> + Send + 'static,
    {
        RuleDef::Custom(Arc::new(move |ctx| f(ctx).boxed()))
    }

    /// Parse a built-in rule name (for YAML config)
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "everyone" => Some(RuleDef::Everyone),
            "authenticated" => Some(RuleDef::Authenticated),
            "admin" => Some(RuleDef::Admin),
            "owner" => Some(RuleDef::Owner(None)),
            other => other.strip_prefix("owner:").map(RuleDef::owner),
        }
    }

    async fn evaluate(&self, entity: &Entity, ctx: &RuleContext) -> Result<bool, String> {
        match self {
            RuleDef::Everyone => Ok(true),
            RuleDef::Authenticated => Ok(ctx.user.is_some()),
            RuleDef::Admin => Ok(ctx.user.as_ref().is_some_and(User::is_admin)),
            RuleDef::Owner(field) => {
                let Some(user) = &ctx.user else {
                    return Ok(false);
                };
                let Some(resource) = &ctx.resource else {
                    return Ok(true);
                };
                let field = field
                    .as_deref()
                    .or(entity.config.owner_field.as_deref())
                    .unwrap_or("userId");
                Ok(resource
                    .get(field)
                    .is_some_and(|owner| id_matches(owner, &user.id)))
            }
            RuleDef::Custom(predicate) => predicate(ctx.clone()).await,
        }
    }
}

fn id_matches(value: &Value, id: &str) -> bool {
    match value {
        Value::String(s) => s == id,
        Value::Number(n) => n.to_string() == id,
        _ => false,
    }
}

impl fmt::Debug for RuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleDef::Everyone => f.write_str("Everyone"),
            RuleDef::Authenticated => f.write_str("Authenticated"),
            RuleDef::Owner(field) => f.debug_tuple("Owner").field(field).finish(),
            RuleDef::Admin => f.write_str("Admin"),
            RuleDef::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for RuleDef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuleDef::Everyone, RuleDef::Everyone)
            | (RuleDef::Authenticated, RuleDef::Authenticated)
            | (RuleDef::Admin, RuleDef::Admin) => true,
            (RuleDef::Owner(a), RuleDef::Owner(b)) => a == b,
            (RuleDef::Custom(a), RuleDef::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Why a rule check failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleDenial {
    /// No user was present
    Unauthenticated(String),
    /// A user was present but not allowed
    Forbidden(String),
}

impl RuleDenial {
    pub fn message(&self) -> &str {
        match self {
            RuleDenial::Unauthenticated(m) | RuleDenial::Forbidden(m) => m,
        }
    }
}

impl From<RuleDenial> for ZapiError {
    fn from(denial: RuleDenial) -> Self {
        match denial {
            RuleDenial::Unauthenticated(m) => ZapiError::Unauthorized(m),
            RuleDenial::Forbidden(m) => ZapiError::Forbidden(m),
        }
    }
}

/// Evaluate the rules declared for `operation`, stopping at the first failure
pub async fn check_rules(
    entity: &Entity,
    operation: Operation,
    ctx: &RuleContext,
) -> Result<(), RuleDenial> {
    let Some(rules) = entity.rules_for(operation) else {
        return Ok(());
    };

    for rule in rules {
        let outcome = rule.evaluate(entity, ctx).await;
        let custom_message = match outcome {
            Ok(true) => continue,
            Ok(false) => None,
            Err(message) => Some(message),
        };

        tracing::debug!(
            entity = %entity.name,
            operation = %operation,
            rule = ?rule,
            "authorization rule failed"
        );

        return Err(match (custom_message, &ctx.user) {
            (Some(message), None) => RuleDenial::Unauthenticated(message),
            (Some(message), Some(_)) => RuleDenial::Forbidden(message),
            (None, None) => RuleDenial::Unauthenticated("Authentication required".to_string()),
            (None, Some(_)) => RuleDenial::Forbidden("Permission denied".to_string()),
        });
    }

    Ok(())
}
