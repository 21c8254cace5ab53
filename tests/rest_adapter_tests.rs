//! axum adapter round-trips

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use std::io::Write;
use zapi::prelude::*;

async fn create_test_server() -> TestServer {
    let note = entity("note", fields! {
        text: string(),
        pinned: boolean().default(false),
    })
    .unwrap()
    .rules(rules! {
        create: [RuleDef::Authenticated],
        delete: [RuleDef::Admin],
    })
    .build()
    .unwrap();

    let whoami = PluginBuilder::new("whoami", "Who am I", "1.0.0")
        .route(
            Method::GET,
            "/whoami/:field",
            RouteHandler::new(|req, _app| async move {
                let user = req
                    .user
                    .ok_or_else(|| ZapiError::Unauthorized("Authentication required".into()))?;
                let field = req.params.get("field").cloned().unwrap_or_default();
                let value = match field.as_str() {
                    "id" => json!(user.id),
                    "role" => json!(user.role),
                    _ => return Err(ZapiError::not_found("Unknown field")),
                };
                let mut body = serde_json::Map::new();
                body.insert(field, value);
                Ok(ApiResponse::ok(Value::Object(body)))
            }),
        )
        .build();

    let app = ZapiBuilder::new()
        .entity(note)
        .plugin(whoami)
        .build()
        .await
        .expect("Failed to build app");

    let router = RestExposure::build_router_with_user(app, header_user_extractor());
    TestServer::new(router).expect("Failed to create test server")
}

fn user_header(id: &'static str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static("x-user-id"), HeaderValue::from_static(id))
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoints() {
        let server = create_test_server().await;

        for path in ["/health", "/_health"] {
            let response = server.get(path).await;
            response.assert_status_ok();
            let body: Value = response.json();
            assert_eq!(body["status"], "ok");
            assert_eq!(body["service"], "zapi");
        }
    }
}

mod entity_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_list_notes() {
        let server = create_test_server().await;
        let (name, value) = user_header("u1");

        let response = server
            .post("/notes")
            .add_header(name, value)
            .json(&json!({ "text": "remember the milk" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: Value = response.json();
        assert_eq!(created["text"], "remember the milk");
        assert_eq!(created["pinned"], false);

        let response = server.get("/notes").add_query_param("sort", "-createdAt").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["id"], created["id"]);
    }

    #[tokio::test]
    async fn test_anonymous_create_is_unauthorized() {
        let server = create_test_server().await;
        let response = server.post("/notes").json(&json!({ "text": "x" })).await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_delete_requires_admin_and_returns_empty_body() {
        let server = create_test_server().await;
        let (name, value) = user_header("u1");
        let created: Value = server
            .post("/notes")
            .add_header(name, value)
            .json(&json!({ "text": "temp" }))
            .await
            .json();
        let path = format!("/notes/{}", created["id"].as_str().unwrap());

        let (name, value) = user_header("u1");
        let response = server.delete(&path).add_header(name, value).await;
        response.assert_status(StatusCode::FORBIDDEN);

        let (name, value) = user_header("root");
        let response = server
            .delete(&path)
            .add_header(name, value)
            .add_header(
                HeaderName::from_static("x-user-role"),
                HeaderValue::from_static("admin"),
            )
            .await;
        response.assert_status(StatusCode::NO_CONTENT);
        assert!(response.as_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_validation_error() {
        let server = create_test_server().await;
        let (name, value) = user_header("u1");
        let response = server
            .post("/notes")
            .add_header(name, value)
            .text("{not json")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["details"][0]["field"], "body");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let server = create_test_server().await;
        let response = server.get("/widgets").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"]["message"], "Route not found");
    }
}

mod plugin_route_tests {
    use super::*;

    #[tokio::test]
    async fn test_path_params_and_user_reach_plugin_handler() {
        let server = create_test_server().await;
        let (name, value) = user_header("u42");
        let response = server.get("/whoami/id").add_header(name, value).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["id"], "u42");
    }

    #[tokio::test]
    async fn test_plugin_handler_errors_are_rendered() {
        let server = create_test_server().await;
        let response = server.get("/whoami/id").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}

mod middleware_tests {
    use super::*;

    #[tokio::test]
    async fn test_security_headers_are_written() {
        let server = create_test_server().await;
        let response = server.get("/notes").await;
        assert_eq!(response.header("x-content-type-options"), "nosniff");
        assert_eq!(response.header("x-frame-options"), "DENY");
    }

    #[tokio::test]
    async fn test_preflight_is_answered_by_cors() {
        let server = create_test_server().await;
        let response = server
            .method(Method::OPTIONS, "/notes")
            .add_header(
                HeaderName::from_static("origin"),
                HeaderValue::from_static("https://app.example.com"),
            )
            .await;
        response.assert_status(StatusCode::NO_CONTENT);
        assert_eq!(response.header("access-control-allow-origin"), "*");
    }
}

mod config_tests {
    use super::*;

    #[tokio::test]
    async fn test_yaml_config_drives_the_app() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "environment: production\nserviceName: notes-api\nsecurityHeaders: false\ncors:\n  enabled: false"
        )
        .unwrap();

        let config = AppConfig::from_yaml_file(file.path()).unwrap();
        assert!(config.is_production());

        let app = ZapiBuilder::new().with_config(config).build().await.unwrap();
        let server = TestServer::new(RestExposure::build_router(app)).unwrap();

        let response = server.get("/health").await;
        let body: Value = response.json();
        assert_eq!(body["service"], "notes-api");
        assert!(response.maybe_header("x-frame-options").is_none());
        assert!(response.maybe_header("access-control-allow-origin").is_none());
    }
}
