//! Transport-neutral request and response types
//!
//! Adapters translate their native request into an [`ApiRequest`], call
//! [`ZapiApp::handle_request`](crate::server::host::ZapiApp::handle_request)
//! and write the returned [`ApiResponse`] back out.

use crate::core::error::ZapiError;
use crate::core::rules::User;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use indexmap::IndexMap;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// Path parameters captured from `:param` segments
    pub params: IndexMap<String, String>,
    pub query: IndexMap<String, String>,
    pub body: Value,
    pub headers: HeaderMap,
    pub user: Option<User>,
    /// Free-form per-request state shared between middleware and handlers
    pub context: Map<String, Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: IndexMap::new(),
            query: IndexMap::new(),
            body: Value::Null,
            headers: HeaderMap::new(),
            user: None,
            context: Map::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path split on `/` with empty segments removed
    pub fn segments(&self) -> Vec<&str> {
        path_segments(&self.path)
    }
}

pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
    pub headers: HeaderMap,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body,
            headers: HeaderMap::new(),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn created(body: Value) -> Self {
        Self::new(StatusCode::CREATED, body)
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, Value::Null)
    }

    pub fn from_error(err: &ZapiError, production: bool) -> Self {
        let body = serde_json::to_value(err.to_body(production)).unwrap_or(Value::Null);
        Self::new(err.status_code(), body)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Default for ApiResponse {
    fn default() -> Self {
        Self::ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_segments_ignore_slashes() {
        assert_eq!(path_segments("/api//users/42/"), vec!["api", "users", "42"]);
        assert!(path_segments("/").is_empty());
    }

    #[test]
    fn test_error_response() {
        let res = ApiResponse::from_error(&ZapiError::Conflict("taken".into()), false);
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body, json!({"error": {"code": "CONFLICT", "message": "taken"}}));
    }
}
