//! REST exposure over axum
//!
//! Every request goes to a single fallback handler that translates it into an
//! [`ApiRequest`], runs it through [`ZapiApp::handle_request`] and writes the
//! [`ApiResponse`] back, including headers staged by middleware. Routing is
//! done by the application, not by axum.

use crate::core::error::{FieldValidationError, ZapiError};
use crate::core::rules::User;
use crate::server::host::ZapiApp;
use crate::server::request::{ApiRequest, ApiResponse};
use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Pulls the authenticated user out of request headers
pub type UserExtractor = Arc<dyn Fn(&HeaderMap) -> Option<User> + Send + Sync>;

/// Trusts `x-user-id` and `x-user-role` headers set by an upstream gateway
pub fn header_user_extractor() -> UserExtractor {
    Arc::new(|headers: &HeaderMap| {
        let id = headers.get("x-user-id")?.to_str().ok()?;
        if id.is_empty() {
            return None;
        }
        let mut user = User::new(id);
        if let Some(role) = headers.get("x-user-role").and_then(|v| v.to_str().ok()) {
            user = user.with_role(role);
        }
        Some(user)
    })
}

#[derive(Clone)]
struct RestState {
    app: ZapiApp,
    extract_user: Option<UserExtractor>,
}

pub struct RestExposure;

impl RestExposure {
    /// Router for an app whose requests carry no user
    pub fn build_router(app: ZapiApp) -> Router {
        Self::router(RestState {
            app,
            extract_user: None,
        })
    }

    /// Router that resolves the request user with `extract_user`
    pub fn build_router_with_user(app: ZapiApp, extract_user: UserExtractor) -> Router {
        Self::router(RestState {
            app,
            extract_user: Some(extract_user),
        })
    }

    fn router(state: RestState) -> Router {
        Router::new()
            .fallback(handle)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }
}

async fn handle(
    State(state): State<RestState>,
    method: Method,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(err) => {
            return ApiResponse::from_error(&err, state.app.config().is_production()).into_response();
        }
    };

    let mut req = ApiRequest::new(method, uri.path()).with_body(body);
    req.query = query.into_iter().collect();
    req.user = state.extract_user.as_ref().and_then(|extract| extract(&headers));
    req.headers = headers;

    state.app.handle_request(req).await.into_response()
}

fn parse_body(bytes: &Bytes) -> Result<Value, ZapiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| {
        ZapiError::validation(vec![FieldValidationError::new(
            "body",
            format!("Invalid JSON: {}", e),
        )])
    })
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut response = if self.status == StatusCode::NO_CONTENT || self.body.is_null() {
            Response::new(Body::empty())
        } else {
            let mut res = Response::new(Body::from(self.body.to_string()));
            res.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
            res
        };
        *response.status_mut() = self.status;
        for (name, value) in self.headers.iter() {
            response.headers_mut().append(name.clone(), value.clone());
        }
        response
    }
}

impl ZapiApp {
    /// Serve over HTTP until Ctrl+C or SIGTERM, then run plugin shutdown hooks
    pub async fn serve(&self, addr: &str) -> Result<()> {
        serve_router(self, RestExposure::build_router(self.clone()), addr).await
    }

    pub async fn serve_with_user(&self, addr: &str, extract_user: UserExtractor) -> Result<()> {
        let router = RestExposure::build_router_with_user(self.clone(), extract_user);
        serve_router(self, router, addr).await
    }
}

async fn serve_router(app: &ZapiApp, router: Router, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::new()).unwrap(), Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(b"  \n")).unwrap(), Value::Null);
        assert_eq!(
            parse_body(&Bytes::from_static(br#"{"a":1}"#)).unwrap(),
            json!({ "a": 1 })
        );

        let err = parse_body(&Bytes::from_static(b"{oops")).unwrap_err();
        assert!(matches!(err, ZapiError::Validation { ref details, .. } if details[0].field == "body"));
    }

    #[test]
    fn test_header_user_extractor() {
        let extract = header_user_extractor();
        let mut headers = HeaderMap::new();
        assert!(extract(&headers).is_none());

        headers.insert("x-user-id", HeaderValue::from_static("u1"));
        headers.insert("x-user-role", HeaderValue::from_static("admin"));
        let user = extract(&headers).unwrap();
        assert_eq!(user.id, "u1");
        assert!(user.is_admin());
    }

    #[test]
    fn test_no_content_has_empty_body() {
        let res = ApiResponse::no_content().into_response();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.headers().get(header::CONTENT_TYPE).is_none());
    }
}
