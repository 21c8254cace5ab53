//! Persistence driver contract
//!
//! The pipeline never talks to storage directly. It calls a [`Driver`] with
//! the entity definition and a backend-neutral [`Where`] filter, and the
//! driver translates that to whatever its backend understands.

use crate::core::entity::Entity;
use crate::core::error::DriverError;
use crate::core::query::{SortOrder, Where};
use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Arguments for [`Driver::find_many`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindManyArgs {
    pub filter: Where,
    pub order_by: IndexMap<String, SortOrder>,
    pub take: Option<usize>,
    pub skip: Option<usize>,
    /// Relation field names to embed in each record
    pub include: Vec<String>,
}

/// Work run inside [`Driver::transaction`]. The closure receives a driver
/// handle scoped to the transaction.
pub type TransactionFn =
    Box<dyn FnOnce(Arc<dyn Driver>) -> BoxFuture<'static, Result<Value, DriverError>> + Send>;

/// Storage backend used by the request pipeline
#[async_trait]
pub trait Driver: Send + Sync {
    async fn find_one(&self, entity: &Entity, filter: &Where) -> Result<Option<Value>, DriverError>;

    /// Like [`Driver::find_one`], embedding the named relations
    async fn find_one_with(
        &self,
        entity: &Entity,
        filter: &Where,
        include: &[String],
    ) -> Result<Option<Value>, DriverError> {
        let _ = include;
        self.find_one(entity, filter).await
    }

    async fn find_many(&self, entity: &Entity, args: &FindManyArgs)
    -> Result<Vec<Value>, DriverError>;

    async fn create(&self, entity: &Entity, data: Map<String, Value>) -> Result<Value, DriverError>;

    /// Update the first record matching `filter`; errors with
    /// [`DriverError::RecordNotFound`] if none matches
    async fn update(
        &self,
        entity: &Entity,
        filter: &Where,
        data: Map<String, Value>,
    ) -> Result<Value, DriverError>;

    async fn delete(&self, entity: &Entity, filter: &Where) -> Result<(), DriverError>;

    async fn count(&self, entity: &Entity, filter: Option<&Where>) -> Result<usize, DriverError>;

    async fn transaction(&self, work: TransactionFn) -> Result<Value, DriverError> {
        let _ = work;
        Err(DriverError::Unsupported("transactions".to_string()))
    }
}
