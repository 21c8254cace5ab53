//! # zapi
//!
//! A declarative entity-to-REST framework. Describe entities with typed
//! fields, relations and authorization rules; zapi derives CRUD routes,
//! input validation and driver calls. Plugins contribute entities, routes,
//! middleware and hooks into the same schema, and the application can rename,
//! hide, reshape or disable any of them.
//!
//! ## Features
//!
//! - **Declarative entities**: field builders, relations and per-operation rules
//! - **Validation**: request bodies and query strings checked before the driver is called
//! - **Rules**: `everyone`, `authenticated`, `owner`, `admin` and custom async predicates
//! - **Plugins**: dependency-ordered initialization, lifecycle hooks, schema extension
//! - **Extensions**: rename, remove, hide or reroute plugin entities and routes
//! - **Swappable edges**: any [`Driver`](core::driver::Driver) for storage, any transport over [`ZapiApp::handle_request`](server::host::ZapiApp::handle_request)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zapi::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let user = entity("user", fields! {
//!     name: string(),
//!     email: string().email().unique(),
//! })?
//! .build()?;
//!
//! let post = entity("post", fields! {
//!     title: string(),
//!     author: belongs_to(&user),
//! })?
//! .owned_by("author")?
//! .rules(rules! {
//!     create: [RuleDef::Authenticated],
//!     update: [RuleDef::owner("authorId")],
//! })
//! .build()?;
//!
//! ZapiBuilder::new()
//!     .entity(user)
//!     .entity(post)
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod entities;
pub mod plugins;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Entity model ===
    pub use crate::core::{
        entity::{Entity, EntityBuilder, Operation, RuleSet, entity},
        field::{
            EntityRef, FieldDef, FieldType, OnDelete, RelationKind, belongs_to, boolean,
            datetime, float, has_many, has_one, int, json, string, text,
        },
        pluralize::Pluralizer,
    };

    // === Rules, hooks, validation ===
    pub use crate::core::{
        hooks::{HookContext, HookEvent},
        query::{Condition, FilterOp, ParsedQuery, Where},
        rules::{RuleContext, RuleDef, User},
        validation::{ValidationResult, validate_input},
    };

    // === Errors ===
    pub use crate::core::error::{
        DriverError, EntityError, ErrorCode, FieldValidationError, PluginError, ZapiError,
        ZapiResult,
    };

    // === Driver ===
    pub use crate::core::driver::{Driver, FindManyArgs};
    #[cfg(feature = "in-memory")]
    pub use crate::storage::InMemoryDriver;

    // === Macros ===
    pub use crate::{fields, rules};

    // === Plugins ===
    pub use crate::plugins::{
        BasePath, EntityRouteConfig, ExtensionBuilder, FieldPatch, PluginBuilder,
        PluginEntityDef, PluginExtension, PluginRegistry, PluginRoute, RouteDecision,
        RouteHandler, RouteOverride, ZapiPlugin, entity_ref, plugin_entity,
    };

    // === Config ===
    pub use crate::config::{AppConfig, CorsConfig, Environment};

    // === Server ===
    pub use crate::server::{
        ApiRequest, ApiResponse, AppShell, Flow, Middleware, RouteInfo, ZapiApp, ZapiBuilder,
        exposure::{RestExposure, UserExtractor, header_user_extractor},
        middleware_fn,
    };

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use axum::http::{Method, StatusCode};
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}
