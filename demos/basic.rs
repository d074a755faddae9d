//! A small API with login, a protected route and a collection.
//!
//! ```sh
//! RUST_LOG=waypost=debug cargo run --example basic
//! curl -s -XPOST localhost:3000/api/v1/login -d 'username=demo&password=demo'
//! curl -s localhost:3000/api/v1/me -H "X-Auth-Token: <authToken>"
//! curl -s -XPOST localhost:3000/api/v1/articles -H 'content-type: application/json' -d '{"title":"hi"}'
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;
use waypost::rate_limit::RateLimitPolicy;
use waypost::services::Services;
use waypost::services::memory::{MemoryCollection, MemoryUsers};
use waypost::{
    Api, ApiConfig, CollectionEndpoint, CollectionOptions, EndpointDef, EndpointOptions, Endpoints,
    RequestContext, RouteOptions, Server, StatusResponse,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let users = Arc::new(MemoryUsers::new());
    let demo = users.add_user("demo", Some("demo@example.com"), "demo").await?;
    users.set_roles(&demo, &["admin"]).await?;

    let config = ApiConfig::from_env().version("v1").default_auth(true);
    let dispatcher = Api::new(config, Services::new(users.clone(), users.clone()))
        .on_logged_in(|ctx: &RequestContext| Ok(Some(json!({ "welcome": ctx.user_id }))))
        .add_route(
            "me",
            RouteOptions::new().auth_required(true),
            Endpoints::new().get(EndpointDef::new(me)),
        )
        .add_collection_routes(
            Arc::new(MemoryCollection::new("articles")),
            CollectionOptions::new()
                .configure(CollectionEndpoint::Post, EndpointOptions::new().rate_limit(RateLimitPolicy::new(5, Duration::from_secs(60))))
                .configure(CollectionEndpoint::Delete, EndpointOptions::new().roles(["admin"])),
        )
        .add_collection_routes(users.collection(), CollectionOptions::new().exclude(CollectionEndpoint::Delete))
        .build();

    Server::bind(([0, 0, 0, 0], 3000).into()).serve(dispatcher).await?;
    Ok(())
}

async fn me(ctx: RequestContext) -> StatusResponse {
    let username = ctx.user.as_ref().and_then(|u| u.record.get("username").cloned());
    StatusResponse::ok(json!({ "_id": ctx.user_id, "username": username }))
}
