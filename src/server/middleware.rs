//! Request middleware
//!
//! Middleware run in order before routing. Each may edit the request, stage
//! response headers, or end the request early by returning [`Flow::End`].

use crate::config::CorsConfig;
use crate::core::error::ZapiResult;
use crate::server::request::{ApiRequest, ApiResponse};
use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use std::sync::Arc;

/// Whether the chain continues after a middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    /// Skip remaining middleware and routing; respond with the staged response
    End,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used for conflict detection and logging
    fn name(&self) -> &str;

    async fn handle(&self, req: &mut ApiRequest, res: &mut ApiResponse) -> ZapiResult<Flow>;
}

type MiddlewareClosure =
    dyn Fn(&mut ApiRequest, &mut ApiResponse) -> ZapiResult<Flow> + Send + Sync;

/// Middleware built from a synchronous closure
pub struct FnMiddleware {
    name: String,
    f: Box<MiddlewareClosure>,
}

#[async_trait]
impl Middleware for FnMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, req: &mut ApiRequest, res: &mut ApiResponse) -> ZapiResult<Flow> {
        (self.f)(req, res)
    }
}

pub fn middleware_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut ApiRequest, &mut ApiResponse) -> ZapiResult<Flow> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f: Box::new(f),
    })
}

/// Adds CORS headers and answers preflight requests
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn allowed_origin(&self, origin: Option<&str>) -> Option<String> {
        let origins = &self.config.allowed_origins;
        if origins.iter().any(|o| o == "*") {
            return Some("*".to_string());
        }
        origin
            .filter(|o| origins.iter().any(|allowed| allowed == o))
            .map(str::to_string)
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        "cors"
    }

    async fn handle(&self, req: &mut ApiRequest, res: &mut ApiResponse) -> ZapiResult<Flow> {
        let origin = self.allowed_origin(req.header("origin"));
        if let Some(value) = origin.and_then(|o| HeaderValue::from_str(&o).ok()) {
            res.headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            if let Ok(methods) = HeaderValue::from_str(&self.config.allowed_methods.join(", ")) {
                res.headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods);
            }
            if let Ok(headers) = HeaderValue::from_str(&self.config.allowed_headers.join(", ")) {
                res.headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, headers);
            }
            if let Some(max_age) = self.config.max_age {
                res.headers
                    .insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
            }
        }

        if req.method == Method::OPTIONS {
            res.status = StatusCode::NO_CONTENT;
            res.body = serde_json::Value::Null;
            return Ok(Flow::End);
        }
        Ok(Flow::Next)
    }
}

/// Adds a conservative set of security headers to every response
#[derive(Default)]
pub struct SecurityHeadersMiddleware;

#[async_trait]
impl Middleware for SecurityHeadersMiddleware {
    fn name(&self) -> &str {
        "security-headers"
    }

    async fn handle(&self, _req: &mut ApiRequest, res: &mut ApiResponse) -> ZapiResult<Flow> {
        let headers = [
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::X_FRAME_OPTIONS, "DENY"),
            (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
            (HeaderName::from_static("x-xss-protection"), "0"),
        ];
        for (name, value) in headers {
            res.headers.insert(name, HeaderValue::from_static(value));
        }
        Ok(Flow::Next)
    }
}

/// Default middleware installed ahead of plugin and app middleware
pub fn default_middleware(config: &crate::config::AppConfig) -> Vec<Arc<dyn Middleware>> {
    let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
    if config.cors.enabled {
        chain.push(Arc::new(CorsMiddleware::new(config.cors.clone())));
    }
    if config.security_headers {
        chain.push(Arc::new(SecurityHeadersMiddleware));
    }
    chain
}
