//! CRUD request pipeline
//!
//! Each operation follows a fixed order of validation, authorization, hooks
//! and driver calls:
//!
//! | operation | order |
//! |-----------|-------|
//! | list   | rules, `beforeList`, parse query, `find_many` + `count`, `afterList` |
//! | create | validate, rules, owner field, `beforeCreate`, `create`, `afterCreate` |
//! | read   | `beforeRead`, `find_one`, rules on the record, `afterRead` |
//! | update | `find_one`, validate, rules on the record, `beforeUpdate`, `update`, `afterUpdate` |
//! | delete | `find_one`, rules on the record, `beforeDelete`, `delete`, `afterDelete` |
//!
//! A before-hook that stops the context skips the driver call; the response
//! carries whatever resource the hook set.

use crate::core::driver::{Driver, FindManyArgs};
use crate::core::entity::{Entity, Operation};
use crate::core::error::{ZapiError, ZapiResult};
use crate::core::hooks::{HookChain, HookContext, HookEvent};
use crate::core::query::{ListResponse, PaginationMeta, where_id};
use crate::core::rules::{RuleContext, check_rules};
use crate::core::validation::{validate_input, validate_query_params};
use crate::server::request::{ApiRequest, ApiResponse};
use axum::http::StatusCode;
use serde_json::Value;
use std::sync::Arc;

/// Runs one entity operation against a driver
pub struct EntityPipeline<'a> {
    entity: &'a Entity,
    driver: Arc<dyn Driver>,
    hooks: &'a HookChain,
}

impl<'a> EntityPipeline<'a> {
    pub fn new(entity: &'a Entity, driver: Arc<dyn Driver>, hooks: &'a HookChain) -> Self {
        Self {
            entity,
            driver,
            hooks,
        }
    }

    pub async fn execute(
        &self,
        operation: Operation,
        id: Option<&str>,
        req: &ApiRequest,
    ) -> ZapiResult<ApiResponse> {
        tracing::debug!(entity = %self.entity.name, operation = %operation, id = ?id, "dispatching entity operation");

        match (operation, id) {
            (Operation::List, _) => self.list(req).await,
            (Operation::Create, _) => self.create(req).await,
            (Operation::Read, Some(id)) => self.read(id, req).await,
            (Operation::Update, Some(id)) => self.update(id, req).await,
            (Operation::Delete, Some(id)) => self.delete(id, req).await,
            (_, None) => Err(ZapiError::not_found("Route not found")),
        }
    }

    fn context(&self, operation: Operation, req: &ApiRequest) -> HookContext {
        let mut ctx = HookContext::new(&self.entity.name, operation, self.driver.clone());
        ctx.user = req.user.clone();
        ctx
    }

    fn not_found(&self) -> ZapiError {
        ZapiError::not_found(format!("{} not found", self.entity.name))
    }

    async fn authorize(
        &self,
        operation: Operation,
        req: &ApiRequest,
        resource: Option<&Value>,
        input: Option<Value>,
    ) -> ZapiResult<()> {
        let rule_ctx = RuleContext::new(&self.entity.name, operation)
            .with_user(req.user.clone())
            .with_resource(resource.cloned())
            .with_input(input);
        check_rules(self.entity, operation, &rule_ctx).await?;
        Ok(())
    }

    async fn list(&self, req: &ApiRequest) -> ZapiResult<ApiResponse> {
        self.authorize(Operation::List, req, None, None).await?;

        let ctx = self.context(Operation::List, req);
        let mut ctx = self.hooks.run(HookEvent::BeforeList, ctx).await?;
        if ctx.stopped {
            return Ok(ApiResponse::ok(ctx.resource.unwrap_or(Value::Null)));
        }

        let query = validate_query_params(&req.query);
        let mut filter = query.filter.clone();
        filter.extend(std::mem::take(&mut ctx.filter));

        let args = FindManyArgs {
            filter,
            order_by: query.sort.clone(),
            take: Some(query.take),
            skip: Some(query.skip),
            include: query.include_names(),
        };
        let data = self.driver.find_many(self.entity, &args).await?;
        let total = self.driver.count(self.entity, Some(&args.filter)).await?;

        let body = serde_json::to_value(ListResponse {
            data,
            pagination: PaginationMeta {
                total,
                limit: query.take,
                offset: query.skip,
            },
        })
        .map_err(|e| ZapiError::internal(e.to_string()))?;

        ctx.filter = args.filter;
        ctx.resource = Some(body);
        let ctx = self.hooks.run(HookEvent::AfterList, ctx).await?;
        Ok(ApiResponse::ok(ctx.resource.unwrap_or(Value::Null)))
    }

    async fn create(&self, req: &ApiRequest) -> ZapiResult<ApiResponse> {
        let data = validate_input(self.entity, &req.body, Operation::Create).into_result()?;
        self.authorize(Operation::Create, req, None, Some(Value::Object(data.clone())))
            .await?;

        let mut ctx = self.context(Operation::Create, req);
        ctx.input = data;
        if let (Some(owner_field), Some(user)) = (&self.entity.config.owner_field, &req.user) {
            ctx.input
                .insert(owner_field.clone(), Value::String(user.id.clone()));
        }

        let mut ctx = self.hooks.run(HookEvent::BeforeCreate, ctx).await?;
        if ctx.stopped {
            return Ok(ApiResponse::created(ctx.resource.unwrap_or(Value::Null)));
        }

        let created = self.driver.create(self.entity, ctx.input.clone()).await?;
        ctx.resource = Some(created);
        let ctx = self.hooks.run(HookEvent::AfterCreate, ctx).await?;
        Ok(ApiResponse::created(ctx.resource.unwrap_or(Value::Null)))
    }

    async fn read(&self, id: &str, req: &ApiRequest) -> ZapiResult<ApiResponse> {
        let mut ctx = self.context(Operation::Read, req);
        ctx.filter = where_id(id);
        let mut ctx = self.hooks.run(HookEvent::BeforeRead, ctx).await?;
        if ctx.stopped {
            return Ok(ApiResponse::ok(ctx.resource.unwrap_or(Value::Null)));
        }

        let record = self
            .driver
            .find_one(self.entity, &ctx.filter)
            .await?
            .ok_or_else(|| self.not_found())?;
        self.authorize(Operation::Read, req, Some(&record), None).await?;

        let include = validate_query_params(&req.query).include_names();
        let record = if include.is_empty() {
            record
        } else {
            self.driver
                .find_one_with(self.entity, &ctx.filter, &include)
                .await?
                .ok_or_else(|| self.not_found())?
        };

        ctx.resource = Some(record);
        let ctx = self.hooks.run(HookEvent::AfterRead, ctx).await?;
        Ok(ApiResponse::ok(ctx.resource.unwrap_or(Value::Null)))
    }

    async fn update(&self, id: &str, req: &ApiRequest) -> ZapiResult<ApiResponse> {
        let filter = where_id(id);
        let existing = self
            .driver
            .find_one(self.entity, &filter)
            .await?
            .ok_or_else(|| self.not_found())?;

        let data = validate_input(self.entity, &req.body, Operation::Update).into_result()?;
        self.authorize(
            Operation::Update,
            req,
            Some(&existing),
            Some(Value::Object(data.clone())),
        )
        .await?;

        let mut ctx = self.context(Operation::Update, req);
        ctx.input = data;
        ctx.resource = Some(existing);
        ctx.filter = filter;
        let mut ctx = self.hooks.run(HookEvent::BeforeUpdate, ctx).await?;
        if ctx.stopped {
            return Ok(ApiResponse::ok(ctx.resource.unwrap_or(Value::Null)));
        }

        let updated = self
            .driver
            .update(self.entity, &ctx.filter, ctx.input.clone())
            .await?;
        ctx.resource = Some(updated);
        let ctx = self.hooks.run(HookEvent::AfterUpdate, ctx).await?;
        Ok(ApiResponse::ok(ctx.resource.unwrap_or(Value::Null)))
    }

    async fn delete(&self, id: &str, req: &ApiRequest) -> ZapiResult<ApiResponse> {
        let filter = where_id(id);
        let existing = self
            .driver
            .find_one(self.entity, &filter)
            .await?
            .ok_or_else(|| self.not_found())?;
        self.authorize(Operation::Delete, req, Some(&existing), None)
            .await?;

        let mut ctx = self.context(Operation::Delete, req);
        ctx.resource = Some(existing);
        ctx.filter = filter;
        let ctx = self.hooks.run(HookEvent::BeforeDelete, ctx).await?;
        if !ctx.stopped {
            self.driver.delete(self.entity, &ctx.filter).await?;
            self.hooks.run(HookEvent::AfterDelete, ctx).await?;
        }
        Ok(ApiResponse::new(StatusCode::NO_CONTENT, Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::entity;
    use crate::core::field::{belongs_to, string};
    use crate::core::hooks::{HookFn, HookRegistration};
    use crate::core::query::Condition;
    use crate::core::rules::{RuleDef, User};
    use crate::fields;
    use crate::storage::InMemoryDriver;
    use serde_json::json;

    fn post() -> Entity {
        entity(
            "post",
            fields! { title: string().min(3.0), author: belongs_to("user") },
        )
        .unwrap()
        .owned_by("author")
        .unwrap()
        .build()
        .unwrap()
    }

    fn driver() -> Arc<dyn Driver> {
        Arc::new(InMemoryDriver::new())
    }

    #[tokio::test]
    async fn test_create_sets_owner_and_requires_auth() {
        let post = post();
        let hooks = HookChain::new();
        let pipeline = EntityPipeline::new(&post, driver(), &hooks);

        let anonymous = ApiRequest::post("/posts", json!({ "title": "Hello" }));
        let err = pipeline
            .execute(Operation::Create, None, &anonymous)
            .await
            .unwrap_err();
        assert!(matches!(err, ZapiError::Unauthorized(_)));

        let req = anonymous.with_user(User::new("u1"));
        let res = pipeline.execute(Operation::Create, None, &req).await.unwrap();
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["authorId"], "u1");
        assert!(res.body["id"].is_string());
    }

    #[tokio::test]
    async fn test_validation_runs_before_rules() {
        let post = post();
        let hooks = HookChain::new();
        let pipeline = EntityPipeline::new(&post, driver(), &hooks);

        let req = ApiRequest::post("/posts", json!({ "title": "Hi" }));
        let err = pipeline.execute(Operation::Create, None, &req).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_owner_rules_on_update_and_delete() {
        let post = post();
        let hooks = HookChain::new();
        let pipeline = EntityPipeline::new(&post, driver(), &hooks);

        let owner = User::new("u1");
        let created = pipeline
            .execute(
                Operation::Create,
                None,
                &ApiRequest::post("/posts", json!({ "title": "Hello" })).with_user(owner.clone()),
            )
            .await
            .unwrap();
        let id = created.body["id"].as_str().unwrap().to_string();

        let intruder = ApiRequest::patch("/posts", json!({ "title": "Hacked" })).with_user(User::new("u2"));
        let err = pipeline
            .execute(Operation::Update, Some(&id), &intruder)
            .await
            .unwrap_err();
        assert!(matches!(err, ZapiError::Forbidden(_)));

        let res = pipeline
            .execute(
                Operation::Update,
                Some(&id),
                &ApiRequest::patch("/posts", json!({ "title": "Edited" })).with_user(owner.clone()),
            )
            .await
            .unwrap();
        assert_eq!(res.body["title"], "Edited");

        let res = pipeline
            .execute(Operation::Delete, Some(&id), &ApiRequest::delete("/posts").with_user(owner))
            .await
            .unwrap();
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        assert_eq!(res.body, Value::Null);

        let err = pipeline
            .execute(Operation::Read, Some(&id), &ApiRequest::get("/posts"))
            .await
            .unwrap_err();
        assert_eq!(err, ZapiError::NotFound("post not found".into()));
    }

    #[tokio::test]
    async fn test_before_create_can_stop() {
        let post = post();
        let mut hooks = HookChain::new();
        hooks.push(HookRegistration::new(
            "post",
            HookEvent::BeforeCreate,
            HookFn::new(|ctx: HookContext| async move { Ok(ctx.stop_with(json!({ "queued": true }))) }),
        ));
        let driver = driver();
        let pipeline = EntityPipeline::new(&post, driver.clone(), &hooks);

        let req = ApiRequest::post("/posts", json!({ "title": "Hello" })).with_user(User::new("u1"));
        let res = pipeline.execute(Operation::Create, None, &req).await.unwrap();
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body, json!({ "queued": true }));
        assert_eq!(driver.count(&post, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_hook_filter_wins() {
        let note = entity("note", fields! { tag: string() }).unwrap().build().unwrap();
        let driver = driver();
        for tag in ["a", "b", "b"] {
            driver
                .create(&note, json!({ "tag": tag }).as_object().unwrap().clone())
                .await
                .unwrap();
        }

        let mut hooks = HookChain::new();
        hooks.push(HookRegistration::new(
            "*",
            HookEvent::BeforeList,
            HookFn::new(|mut ctx: HookContext| async move {
                ctx.filter
                    .insert("tag".to_string(), Condition::Literal(json!("b")));
                Ok(ctx)
            }),
        ));
        let pipeline = EntityPipeline::new(&note, driver, &hooks);

        let req = ApiRequest::get("/notes")
            .with_query("filter[tag]", "a")
            .with_query("limit", "1");
        let res = pipeline.execute(Operation::List, None, &req).await.unwrap();
        assert_eq!(res.body["data"].as_array().unwrap().len(), 1);
        assert_eq!(res.body["data"][0]["tag"], "b");
        assert_eq!(res.body["pagination"], json!({ "total": 2, "limit": 1, "offset": 0 }));
    }

    #[tokio::test]
    async fn test_list_rules_checked() {
        let secret = entity("secret", fields! { value: string() })
            .unwrap()
            .rule(Operation::List, vec![RuleDef::Admin])
            .build()
            .unwrap();
        let hooks = HookChain::new();
        let pipeline = EntityPipeline::new(&secret, driver(), &hooks);

        let err = pipeline
            .execute(Operation::List, None, &ApiRequest::get("/secrets").with_user(User::new("u1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ZapiError::Forbidden(_)));

        let admin = User::new("root").with_role("admin");
        let res = pipeline
            .execute(Operation::List, None, &ApiRequest::get("/secrets").with_user(admin))
            .await
            .unwrap();
        assert_eq!(res.body["pagination"]["total"], 0);
    }
}
