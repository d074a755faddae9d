//! # waypost
//!
//! Declarative REST routes on hyper, with token login, role checks and rate
//! limiting.
//!
//! ## The pipeline
//!
//! Every request goes through the same fixed sequence:
//!
//! - **Route match**: registration-ordered, first match wins; 404 or 405
//! - **Rate limit**: per-route or global points-per-window; 429
//! - **Authenticate**: token from `X-Auth-Token` (or a custom extractor); 401
//! - **Authorize**: any-of roles, then any-of scopes; 403
//! - **Handle**: the endpoint's action; a failure or panic is a 500
//!
//! Every response body, success or failure, is the same JSON envelope:
//! `{"status": "success" | "fail" | "error", "data": ..., "extra"?: ...}`.
//!
//! Users, passwords and documents live outside the crate, behind the traits
//! in [`services`]. [`services::memory`] has process-local implementations.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waypost::{Api, ApiConfig, EndpointDef, Endpoints, RequestContext, RouteOptions, Server, StatusResponse};
//! use waypost::services::Services;
//! use waypost::services::memory::MemoryUsers;
//!
//! #[tokio::main]
//! async fn main() {
//!     let users = Arc::new(MemoryUsers::new());
//!     let api = Api::new(ApiConfig::new().version("v1").default_auth(true), Services::new(users.clone(), users))
//!         .add_route(
//!             "me",
//!             RouteOptions::new().auth_required(true),
//!             Endpoints::new().get(EndpointDef::new(me)),
//!         );
//!
//!     Server::bind(([0, 0, 0, 0], 3000).into()).serve(api.build()).await.unwrap();
//! }
//!
//! async fn me(ctx: RequestContext) -> StatusResponse {
//!     StatusResponse::ok(serde_json::json!({ "id": ctx.user_id }))
//! }
//! ```

mod api;
mod config;
mod context;
mod dispatcher;
mod envelope;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod server;
mod status;

pub mod auth;
pub mod rate_limit;
pub mod router;
pub mod services;

pub use api::{
    Api, AuthHook, CollectionEndpoint, CollectionOptions, EndpointDef, EndpointOptions, Endpoints,
    RouteOptions,
};
pub use config::ApiConfig;
pub use context::RequestContext;
pub use dispatcher::Dispatcher;
pub use envelope::{IntoReply, Payload, Reply, StatusResponse};
pub use error::{BoxError, Error};
pub use handler::Handler;
pub use method::Method;
pub use request::Request;
pub use response::{Response, ResponseBuilder};
pub use server::Server;
pub use status::{Status, envelope_status};
