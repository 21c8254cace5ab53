//! Plugin registry: factories, dependency ordering, lifecycle and references

use serde::Deserialize;
use std::sync::{Arc, Mutex};
use zapi::prelude::*;

type Log = Arc<Mutex<Vec<String>>>;

fn tracked(id: &str, deps: &[&str], log: &Log) -> ZapiPlugin {
    let mut builder = PluginBuilder::new(id, id, "1.0.0");
    for dep in deps {
        builder = builder.depends_on(*dep);
    }

    let init_log = log.clone();
    let init_id = id.to_string();
    let shutdown_log = log.clone();
    let shutdown_id = id.to_string();
    builder
        .on_init(move |_app| {
            let log = init_log.clone();
            let id = init_id.clone();
            async move {
                log.lock().unwrap().push(format!("init:{}", id));
                Ok(())
            }
        })
        .on_shutdown(move |_app| {
            let log = shutdown_log.clone();
            let id = shutdown_id.clone();
            async move {
                log.lock().unwrap().push(format!("shutdown:{}", id));
                Ok(())
            }
        })
        .build()
}

mod initialization {
    use super::*;

    #[tokio::test]
    async fn test_dependencies_initialize_first_in_any_registration_order() {
        for reversed in [false, true] {
            let log = Log::default();
            let a = tracked("a", &["b"], &log);
            let b = tracked("b", &[], &log);
            let plugins = if reversed { vec![b, a] } else { vec![a, b] };

            let mut builder = ZapiBuilder::new();
            for plugin in plugins {
                builder = builder.plugin(plugin);
            }
            builder.build().await.unwrap();

            assert_eq!(*log.lock().unwrap(), vec!["init:b", "init:a"]);
        }
    }

    #[tokio::test]
    async fn test_cycle_fails_build_without_initializing() {
        let log = Log::default();
        let registry = Arc::new(PluginRegistry::new());
        let err = ZapiBuilder::new()
            .with_registry(registry.clone())
            .plugin(tracked("a", &["b"], &log))
            .plugin(tracked("b", &["a"], &log))
            .build()
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Circular dependency"));
        assert!(log.lock().unwrap().is_empty());
        assert!(!registry.is_initialized("a"));
        assert!(!registry.is_initialized("b"));
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_build() {
        let log = Log::default();
        let err = ZapiBuilder::new()
            .plugin(tracked("billing", &["auth"], &log))
            .build()
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("depends on missing plugin \"auth\""));
    }

    #[tokio::test]
    async fn test_failing_init_records_error() {
        let registry = Arc::new(PluginRegistry::new());
        let broken = PluginBuilder::new("broken", "Broken", "0.1.0")
            .on_init(|_app| async { anyhow::bail!("database unreachable") })
            .build();

        let err = ZapiBuilder::new()
            .with_registry(registry.clone())
            .plugin(broken)
            .build()
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("database unreachable"));
        let state = registry.instance_state("broken").unwrap();
        assert!(!state.initialized);
        assert_eq!(state.error.as_deref(), Some("database unreachable"));
    }

    #[tokio::test]
    async fn test_shared_registry_initializes_only_own_plugins() {
        let log = Log::default();
        let registry = Arc::new(PluginRegistry::new());
        registry.register_instance(tracked("other", &[], &log)).unwrap();

        ZapiBuilder::new()
            .with_registry(registry.clone())
            .plugin(tracked("mine", &[], &log))
            .build()
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["init:mine"]);
        assert!(registry.is_initialized("mine"));
        assert!(!registry.is_initialized("other"));
    }

    #[tokio::test]
    async fn test_shutdown_runs_in_reverse_order() {
        let log = Log::default();
        let app = ZapiBuilder::new()
            .plugin(tracked("a", &["b"], &log))
            .plugin(tracked("b", &[], &log))
            .build()
            .await
            .unwrap();

        log.lock().unwrap().clear();
        app.shutdown().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["shutdown:a", "shutdown:b"]);
    }
}

mod factories {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RateLimitOptions {
        #[serde(default)]
        max_requests: u32,
    }

    fn rate_limit(options: RateLimitOptions) -> ZapiPlugin {
        let max = options.max_requests;
        PluginBuilder::new("rateLimit", "Rate limit", "1.0.0")
            .route(
                Method::GET,
                "/rate-limit",
                RouteHandler::new(move |_req, _app| async move {
                    Ok(ApiResponse::ok(json!({ "max": max })))
                }),
            )
            .build()
    }

    #[tokio::test]
    async fn test_typed_factory_receives_options() {
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register_typed_factory("rateLimit", rate_limit)
            .unwrap();

        let app = ZapiBuilder::new()
            .with_registry(registry.clone())
            .plugin_from_factory("rateLimit", json!({ "maxRequests": 50 }))
            .build()
            .await
            .unwrap();

        let res = app.handle_request(ApiRequest::get("/rate-limit")).await;
        assert_eq!(res.body["max"], 50);
        assert_eq!(app.plugin_ids(), vec!["rateLimit"]);
    }

    #[test]
    fn test_duplicate_factory_is_rejected() {
        let registry = PluginRegistry::new();
        registry
            .register_typed_factory("rateLimit", rate_limit)
            .unwrap();
        let err = registry
            .register_typed_factory("rateLimit", rate_limit)
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicateFactory { .. }));
    }

    #[test]
    fn test_null_options_use_defaults() {
        let registry = PluginRegistry::new();
        registry
            .register_typed_factory("rateLimit", rate_limit)
            .unwrap();
        let plugin = registry
            .create_from_factory("rateLimit", Value::Null)
            .unwrap()
            .unwrap();
        assert_eq!(plugin.id(), "rateLimit");
        assert!(registry.create_from_factory("unknown", Value::Null).unwrap().is_none());
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(Arc::ptr_eq(&PluginRegistry::global(), &PluginRegistry::global()));
    }
}

mod references {
    use super::*;

    fn auth() -> ZapiPlugin {
        PluginBuilder::new("auth", "Auth", "1.0.0")
            .entity("user", PluginEntityDef::new().field("email", string()))
            .build()
    }

    #[tokio::test]
    async fn test_relation_to_plugin_entity() {
        let registry = Arc::new(PluginRegistry::new());
        let author = belongs_to(plugin_entity(&registry, "auth", "user"));
        registry.register_instance(auth()).unwrap();

        let post = entity("post", fields! { title: string(), author: author })
            .unwrap()
            .owned_by("author")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(post.config.owner_field.as_deref(), Some("authorId"));

        let app = ZapiBuilder::new()
            .with_registry(registry.clone())
            .entity(post)
            .plugin(auth())
            .build()
            .await
            .unwrap();
        assert!(registry.is_initialized("auth"));

        let res = app
            .handle_request(
                ApiRequest::post("/posts", json!({ "title": "Hello" }))
                    .with_user(User::new("u1")),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["authorId"], "u1");
    }

    #[test]
    fn test_unknown_plugin_entity_fails_entity_build() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register_instance(auth()).unwrap();

        let result = entity("post", fields! {
            owner: belongs_to(plugin_entity(&registry, "auth", "account")),
        })
        .unwrap()
        .build();
        assert!(matches!(result, Err(EntityError::UnresolvedRelation { .. })));
    }

    #[test]
    fn test_string_references() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register_instance(auth()).unwrap();

        let local = entity("comment", fields! { author: belongs_to(entity_ref(&registry, "profile")) })
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(local.config.fields["author"].relation.as_ref().unwrap().target_name, "profile");

        let remote = entity("comment", fields! { author: belongs_to(entity_ref(&registry, "auth.user")) })
            .unwrap()
            .build()
            .unwrap();
        let relation = remote.config.fields["author"].relation.as_ref().unwrap();
        assert_eq!(relation.target_name, "user");
        assert_eq!(relation.foreign_key, "authorId");
    }
}
