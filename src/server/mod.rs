//! Application assembly and request handling
//!
//! [`ZapiBuilder`] assembles entities and plugins into a [`ZapiApp`], which
//! handles transport-neutral requests. [`exposure::rest`] serves it over axum.

pub mod builder;
pub mod exposure;
pub mod host;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod router;

pub use builder::ZapiBuilder;
pub use host::{AppShell, ZapiApp};
pub use middleware::{Flow, Middleware, middleware_fn};
pub use request::{ApiRequest, ApiResponse};
pub use router::{RequestRouter, RouteInfo, RouteMatch};
