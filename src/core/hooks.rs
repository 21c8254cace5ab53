//! Entity lifecycle hooks
//!
//! Hooks run around driver calls in the request pipeline. Each hook receives
//! the [`HookContext`] by value and hands back the (possibly modified)
//! context, so a hook can rewrite input, tighten the filter, or stop the
//! operation with a prepared result.

use crate::core::driver::Driver;
use crate::core::entity::Operation;
use crate::core::error::ZapiResult;
use crate::core::query::Where;
use crate::core::rules::User;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Matches every entity in a hook registration
pub const ANY_ENTITY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEvent {
    BeforeCreate,
    AfterCreate,
    BeforeRead,
    AfterRead,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeList,
    AfterList,
}

impl HookEvent {
    pub fn before(operation: Operation) -> Self {
        match operation {
            Operation::Create => HookEvent::BeforeCreate,
            Operation::Read => HookEvent::BeforeRead,
            Operation::Update => HookEvent::BeforeUpdate,
            Operation::Delete => HookEvent::BeforeDelete,
            Operation::List => HookEvent::BeforeList,
        }
    }

    pub fn after(operation: Operation) -> Self {
        match operation {
            Operation::Create => HookEvent::AfterCreate,
            Operation::Read => HookEvent::AfterRead,
            Operation::Update => HookEvent::AfterUpdate,
            Operation::Delete => HookEvent::AfterDelete,
            Operation::List => HookEvent::AfterList,
        }
    }
}

/// State threaded through hooks for one operation
#[derive(Clone)]
pub struct HookContext {
    pub entity: String,
    pub operation: Operation,
    pub user: Option<User>,
    /// Validated write data
    pub input: Map<String, Value>,
    /// The record being read/updated/deleted, or the operation result in after-hooks
    pub resource: Option<Value>,
    pub filter: Where,
    pub stopped: bool,
    pub driver: Arc<dyn Driver>,
}

impl HookContext {
    pub fn new(entity: impl Into<String>, operation: Operation, driver: Arc<dyn Driver>) -> Self {
        Self {
            entity: entity.into(),
            operation,
            user: None,
            input: Map::new(),
            resource: None,
            filter: Where::new(),
            stopped: false,
            driver,
        }
    }

    /// Skip the driver call and remaining hooks, responding with `resource`
    pub fn stop_with(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self.stopped = true;
        self
    }
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("entity", &self.entity)
            .field("operation", &self.operation)
            .field("user", &self.user)
            .field("input", &self.input)
            .field("resource", &self.resource)
            .field("filter", &self.filter)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

/// An async hook callback
#[derive(Clone)]
pub struct HookFn(Arc<dyn Fn(HookContext) -> BoxFuture<'static, ZapiResult<HookContext>> + Send + Sync>);

impl HookFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ZapiResult<HookContext>> + Send + 'static,
    {
        Self(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub async fn call(&self, ctx: HookContext) -> ZapiResult<HookContext> {
        (self.0)(ctx).await
    }
}

impl fmt::Debug for HookFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HookFn(..)")
    }
}

/// A hook bound to an entity (or [`ANY_ENTITY`]) and an event
#[derive(Debug, Clone)]
pub struct HookRegistration {
    pub entity: String,
    pub event: HookEvent,
    pub handler: HookFn,
}

impl HookRegistration {
    pub fn new(entity: impl Into<String>, event: HookEvent, handler: HookFn) -> Self {
        Self {
            entity: entity.into(),
            event,
            handler,
        }
    }

    pub fn applies_to(&self, entity: &str, event: HookEvent) -> bool {
        self.event == event && (self.entity == ANY_ENTITY || self.entity == entity)
    }
}

/// Ordered hook registrations for an application
#[derive(Debug, Clone, Default)]
pub struct HookChain {
    registrations: Vec<HookRegistration>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, registration: HookRegistration) {
        self.registrations.push(registration);
    }

    pub fn extend(&mut self, registrations: impl IntoIterator<Item = HookRegistration>) {
        self.registrations.extend(registrations);
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Run matching hooks in registration order. A stopped context ends the chain.
    pub async fn run(&self, event: HookEvent, mut ctx: HookContext) -> ZapiResult<HookContext> {
        for registration in &self.registrations {
            if ctx.stopped {
                break;
            }
            if registration.applies_to(&ctx.entity, event) {
                ctx = registration.handler.call(ctx).await?;
            }
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ZapiError;
    use crate::storage::InMemoryDriver;
    use serde_json::json;

    fn ctx(entity: &str) -> HookContext {
        HookContext::new(entity, Operation::Create, Arc::new(InMemoryDriver::new()))
    }

    fn tag(label: &'static str) -> HookFn {
        HookFn::new(move |mut ctx: HookContext| async move {
            let seen = ctx.input.entry("seen").or_insert_with(|| json!([]));
            if let Value::Array(items) = seen {
                items.push(json!(label));
            }
            Ok(ctx)
        })
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_filter_by_entity() {
        let mut chain = HookChain::new();
        chain.push(HookRegistration::new("user", HookEvent::BeforeCreate, tag("a")));
        chain.push(HookRegistration::new("post", HookEvent::BeforeCreate, tag("skip")));
        chain.push(HookRegistration::new(ANY_ENTITY, HookEvent::BeforeCreate, tag("b")));
        chain.push(HookRegistration::new("user", HookEvent::AfterCreate, tag("after")));

        let out = chain.run(HookEvent::BeforeCreate, ctx("user")).await.unwrap();
        assert_eq!(out.input["seen"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_stopped_context_ends_chain() {
        let mut chain = HookChain::new();
        chain.push(HookRegistration::new(
            "user",
            HookEvent::BeforeCreate,
            HookFn::new(|ctx: HookContext| async move { Ok(ctx.stop_with(json!({"id": "cached"}))) }),
        ));
        chain.push(HookRegistration::new("user", HookEvent::BeforeCreate, tag("late")));

        let out = chain.run(HookEvent::BeforeCreate, ctx("user")).await.unwrap();
        assert!(out.stopped);
        assert_eq!(out.resource, Some(json!({"id": "cached"})));
        assert!(!out.input.contains_key("seen"));
    }

    #[tokio::test]
    async fn test_hook_error_propagates() {
        let mut chain = HookChain::new();
        chain.push(HookRegistration::new(
            ANY_ENTITY,
            HookEvent::BeforeCreate,
            HookFn::new(|_ctx: HookContext| async move {
                Err(ZapiError::Forbidden("Signups are closed".into()))
            }),
        ));
        let err = chain.run(HookEvent::BeforeCreate, ctx("user")).await.unwrap_err();
        assert_eq!(err, ZapiError::Forbidden("Signups are closed".into()));
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(HookEvent::before(Operation::List), HookEvent::BeforeList);
        assert_eq!(HookEvent::after(Operation::Delete), HookEvent::AfterDelete);
    }
}
