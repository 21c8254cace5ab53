//! Blog API example
//!
//! This example demonstrates:
//! - Declaring entities with relations and ownership rules
//! - An audit plugin with an internal entity filled from hooks
//! - An auth plugin whose entity is renamed and rerouted by the application
//! - Serving over axum with users taken from `x-user-id` / `x-user-role`
//!
//! ```text
//! curl -X POST localhost:3000/users -H 'content-type: application/json' \
//!      -d '{"name":"Ada","email":"ada@example.com"}'
//! curl -X POST localhost:3000/posts -H 'x-user-id: <id>' \
//!      -H 'content-type: application/json' -d '{"title":"Hello"}'
//! curl localhost:3000/posts?sort=-createdAt&limit=5
//! curl localhost:3000/accounts/sessions
//! ```

use zapi::prelude::*;

fn audit_plugin() -> Result<ZapiPlugin> {
    let audit_entry = entity("auditEntry", fields! {
        entity: string(),
        action: string(),
        actor: string().optional(),
    })?
    .timestamps(true)
    .build()?;

    let plugin = PluginBuilder::new("audit", "Audit log", "1.0.0")
        .description("Records every write")
        .entity("auditEntry", PluginEntityDef::from(audit_entry.clone()).internal())
        .hook("*", HookEvent::AfterCreate, move |ctx| {
            let audit_entry = audit_entry.clone();
            async move {
                let mut record = serde_json::Map::new();
                record.insert("entity".into(), json!(ctx.entity));
                record.insert("action".into(), json!("create"));
                if let Some(user) = &ctx.user {
                    record.insert("actor".into(), json!(user.id));
                }
                ctx.driver.create(&audit_entry, record).await?;
                Ok(ctx)
            }
        })
        .on_init(|app| async move {
            tracing::info!(entities = app.entities().len(), "audit log ready");
            Ok(())
        })
        .build();
    Ok(plugin)
}

fn auth_plugin() -> ZapiPlugin {
    PluginBuilder::new("auth", "Auth", "1.0.0")
        .entity(
            "session",
            PluginEntityDef::new()
                .field("userId", string())
                .field("expiresAt", datetime()),
        )
        .route(
            Method::GET,
            "/auth/me",
            RouteHandler::new(|req, _app| async move {
                match req.user {
                    Some(user) => Ok(ApiResponse::ok(json!(user))),
                    None => Err(ZapiError::Unauthorized("Authentication required".into())),
                }
            }),
        )
        .depends_on("audit")
        .build()
        .with_extension(
            ExtensionBuilder::new()
                .base_path("/accounts")
                .disable_operation("session", Operation::Delete)
                .build(),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog_api=info,zapi=debug,tower_http=info".into()),
        )
        .init();

    let user = entity("user", fields! {
        name: string(),
        email: string().email().unique(),
        bio: text().optional(),
    })?
    .build()?;

    let post = entity("post", fields! {
        title: string().max(200.0),
        body: text().optional(),
        published: boolean().default(false),
        author: belongs_to(&user),
    })?
    .owned_by("author")?
    .build()?;

    let comment = entity("comment", fields! {
        text: text(),
        post: belongs_to(&post),
    })?
    .rules(rules! {
        create: [RuleDef::Authenticated],
        delete: [RuleDef::Admin],
    })
    .build()?;

    let app = ZapiBuilder::new()
        .with_config(AppConfig::from_env())
        .entity(user)
        .entity(post)
        .entity(comment)
        .plugin(audit_plugin()?)
        .plugin(auth_plugin())
        .build()
        .await?;

    for route in app.routes() {
        println!("{:<6} {:<24} {}", route.method.as_str(), route.path, route.entity);
    }

    app.serve_with_user("127.0.0.1:3000", header_user_extractor())
        .await
}
