//! Route declaration: the public entry point.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waypost::{Api, ApiConfig, EndpointDef, Endpoints, RequestContext, RouteOptions, Server, StatusResponse};
//! use waypost::services::Services;
//! use waypost::services::memory::{MemoryCollection, MemoryUsers};
//!
//! #[tokio::main]
//! async fn main() {
//!     let users = Arc::new(MemoryUsers::new());
//!     let services = Services::new(users.clone(), users.clone());
//!
//!     let dispatcher = Api::new(ApiConfig::new().version("v1").default_auth(true), services)
//!         .add_route(
//!             "articles/:id",
//!             RouteOptions::new().auth_required(true),
//!             Endpoints::new()
//!                 .get(EndpointDef::new(show_article))
//!                 .delete(EndpointDef::new(show_article).roles(["admin"])),
//!         )
//!         .add_collection_routes(Arc::new(MemoryCollection::new("comments")), Default::default())
//!         .build();
//!
//!     Server::bind("0.0.0.0:3000".parse().unwrap()).serve(dispatcher).await.unwrap();
//! }
//!
//! async fn show_article(ctx: RequestContext) -> StatusResponse {
//!     StatusResponse::ok(serde_json::json!({ "id": ctx.url_param("id") }))
//! }
//! ```

mod collection;
mod login;

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::warn;

use crate::auth::{AuthGate, CredentialExtractor, HeaderTokenExtractor};
use crate::config::ApiConfig;
use crate::context::RequestContext;
use crate::dispatcher::{Dispatcher, NO_SUCH_ENDPOINT};
use crate::envelope::StatusResponse;
use crate::error::{BoxError, Error};
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::rate_limit::{KeyFn, MemoryRateLimitStore, RateLimitPolicy, RateLimitStore, RateLimiter};
use crate::request::Request;
use crate::router::{Endpoint, RouteTable, normalize_path};
use crate::services::{Collection, Services};
use crate::status::Status;

pub use collection::{CollectionEndpoint, CollectionOptions};

/// Called after a successful login or logout. A returned value is sent back
/// under the envelope's `extra` field; an error is logged and `extra` omitted.
pub type AuthHook = Arc<dyn Fn(&RequestContext) -> Result<Option<Value>, BoxError> + Send + Sync>;

#[derive(Default)]
pub(crate) struct AuthHooks {
    on_logged_in: OnceLock<AuthHook>,
    on_logged_out: OnceLock<AuthHook>,
}

impl AuthHooks {
    fn run(hook: Option<&AuthHook>, ctx: &RequestContext) -> Option<Value> {
        let hook = hook?;
        match hook(ctx) {
            Ok(extra) => extra,
            Err(e) => {
                warn!(error = %e, "auth hook failed; omitting extra");
                None
            }
        }
    }
}

/// Per-endpoint configuration. Unset fields fall back to the route's
/// [`RouteOptions`].
#[derive(Clone, Debug, Default)]
pub struct EndpointOptions {
    pub auth_required: Option<bool>,
    pub role_required: Option<Vec<String>>,
    pub scope_required: Option<Vec<String>>,
    pub rate_limit: Option<RateLimitPolicy>,
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth_required(mut self, required: bool) -> Self {
        self.auth_required = Some(required);
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_required = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_required = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }

    /// `self` where set, `defaults` otherwise.
    fn over(&self, defaults: &EndpointOptions) -> EndpointOptions {
        EndpointOptions {
            auth_required: self.auth_required.or(defaults.auth_required),
            role_required: self.role_required.clone().or_else(|| defaults.role_required.clone()),
            scope_required: self.scope_required.clone().or_else(|| defaults.scope_required.clone()),
            rate_limit: self.rate_limit.or(defaults.rate_limit),
        }
    }
}

/// Route-level defaults plus where the route is mounted.
#[derive(Clone, Debug, Default)]
pub struct RouteOptions {
    pub defaults: EndpointOptions,
    /// Mount at the server root instead of under the API path.
    pub on_root: bool,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth_required(mut self, required: bool) -> Self {
        self.defaults = self.defaults.auth_required(required);
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defaults = self.defaults.roles(roles);
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defaults = self.defaults.scopes(scopes);
        self
    }

    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.defaults = self.defaults.rate_limit(policy);
        self
    }

    pub fn on_root(mut self) -> Self {
        self.on_root = true;
        self
    }
}

/// An endpoint declaration: the action plus optional configuration.
#[derive(Clone)]
pub struct EndpointDef {
    handler: BoxedHandler,
    options: EndpointOptions,
}

impl EndpointDef {
    pub fn new(handler: impl Handler) -> Self {
        Self { handler: handler.into_boxed_handler(), options: EndpointOptions::default() }
    }

    pub fn options(mut self, options: EndpointOptions) -> Self {
        self.options = options;
        self
    }

    pub fn auth_required(mut self, required: bool) -> Self {
        self.options = self.options.auth_required(required);
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.roles(roles);
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.scopes(scopes);
        self
    }

    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.options = self.options.rate_limit(policy);
        self
    }
}

/// The endpoints of one route, by method, in declaration order.
#[derive(Clone, Default)]
pub struct Endpoints {
    entries: Vec<(Method, EndpointDef)>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, method: Method, endpoint: EndpointDef) -> Self {
        self.entries.push((method, endpoint));
        self
    }

    pub fn get(self, endpoint: EndpointDef) -> Self { self.on(Method::Get, endpoint) }
    pub fn post(self, endpoint: EndpointDef) -> Self { self.on(Method::Post, endpoint) }
    pub fn put(self, endpoint: EndpointDef) -> Self { self.on(Method::Put, endpoint) }
    pub fn patch(self, endpoint: EndpointDef) -> Self { self.on(Method::Patch, endpoint) }
    pub fn delete(self, endpoint: EndpointDef) -> Self { self.on(Method::Delete, endpoint) }
    pub fn options(self, endpoint: EndpointDef) -> Self { self.on(Method::Options, endpoint) }
}

/// Builds the route table and the [`Dispatcher`] that serves it.
///
/// Routes are matched in the order they are added. Registration mistakes
/// (duplicate method and path, malformed pattern) panic: they are startup
/// bugs, not runtime conditions.
pub struct Api {
    config: ApiConfig,
    services: Services,
    table: RouteTable,
    extractor: Arc<dyn CredentialExtractor>,
    key_fn: Option<KeyFn>,
    limit_store: Arc<dyn RateLimitStore>,
    options_handler: BoxedHandler,
    hooks: Arc<AuthHooks>,
}

impl Api {
    /// Starts an API. With `config.use_default_auth`, `login`, `logout` and
    /// `logoutAll` are registered immediately so they precede every other route.
    pub fn new(config: ApiConfig, services: Services) -> Self {
        let mut api = Self {
            config,
            services,
            table: RouteTable::new(),
            extractor: Arc::new(HeaderTokenExtractor),
            key_fn: None,
            limit_store: Arc::new(MemoryRateLimitStore::new()),
            options_handler: default_options.into_boxed_handler(),
            hooks: Arc::new(AuthHooks::default()),
        };
        if api.config.use_default_auth {
            api = login::install(api);
        }
        api
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Replaces the `X-Auth-Token` header extractor.
    pub fn credential_extractor(mut self, extractor: impl CredentialExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Store backing every limiter, global and per-route. The store set last
    /// before [`build`](Api::build) wins.
    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.limit_store = store;
        self
    }

    /// Custom rate-limit key, tried before the caller's address.
    pub fn rate_limit_key(mut self, key_fn: impl Fn(&Request) -> Option<String> + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Responder for `OPTIONS` on routes without their own OPTIONS endpoint.
    pub fn options_responder(mut self, handler: impl Handler) -> Self {
        self.options_handler = handler.into_boxed_handler();
        self
    }

    pub fn on_logged_in(
        self,
        hook: impl Fn(&RequestContext) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        if self.hooks.on_logged_in.set(Arc::new(hook)).is_err() {
            warn!("on_logged_in hook already set; keeping the first");
        }
        self
    }

    pub fn on_logged_out(
        self,
        hook: impl Fn(&RequestContext) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        if self.hooks.on_logged_out.set(Arc::new(hook)).is_err() {
            warn!("on_logged_out hook already set; keeping the first");
        }
        self
    }

    /// Registers `endpoints` at `path`, below the API root unless
    /// `options.on_root`.
    ///
    /// # Panics
    ///
    /// Panics if a method is already registered at the same path or the path
    /// is not a valid pattern.
    pub fn add_route(mut self, path: &str, options: RouteOptions, endpoints: Endpoints) -> Self {
        if let Err(e) = self.try_add_route(path, &options, endpoints) {
            panic!("invalid route `{path}`: {e}");
        }
        self
    }

    /// Fallible form of [`add_route`](Api::add_route).
    pub fn try_add_route(&mut self, path: &str, options: &RouteOptions, endpoints: Endpoints) -> Result<(), Error> {
        let full_path = self.qualify(path, options.on_root);
        for (method, def) in endpoints.entries {
            let endpoint = self.resolve(method, &full_path, &options.defaults, def);
            self.table.register(method, &full_path, endpoint)?;
        }
        Ok(())
    }

    /// Registers the generated CRUD endpoints for `collection`.
    ///
    /// # Panics
    ///
    /// Same conditions as [`add_route`](Api::add_route).
    pub fn add_collection_routes(mut self, collection: Arc<dyn Collection>, options: CollectionOptions) -> Self {
        let routes = collection::routes(collection, Arc::clone(&self.services.accounts), options);
        for (path, route_options, endpoints) in routes {
            self = self.add_route(&path, route_options, endpoints);
        }
        self
    }

    /// Appends the catch-all 404 routes and freezes the table.
    pub fn build(mut self) -> Dispatcher {
        let fallback = || {
            [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete]
                .into_iter()
                .fold(Endpoints::new(), |e, m| e.on(m, EndpointDef::new(endpoint_missing)))
        };
        // At the API root and at the server root; identical when the API is mounted at `/`.
        self = self.add_route("*", RouteOptions::new(), fallback());
        self = self.add_route("*", RouteOptions::new().on_root(), fallback());

        for endpoint in self.table.endpoints_mut() {
            if let Some(limiter) = endpoint.limiter.as_mut() {
                limiter.use_store(Arc::clone(&self.limit_store));
            }
        }
        let global_limiter = self.config.rate_limit
            .map(|policy| RateLimiter::new(Arc::clone(&self.limit_store), policy, "global"));

        Dispatcher {
            table: Arc::new(self.table),
            auth: AuthGate::new(
                self.extractor,
                self.config.token_path.clone(),
                self.services.users,
                self.services.accounts,
            ),
            global_limiter,
            key_fn: self.key_fn,
            options_handler: self.options_handler,
            headers: self.config.response_headers(),
            pretty: self.config.pretty_json,
        }
    }

    fn qualify(&self, path: &str, on_root: bool) -> String {
        let path = path.trim_matches('/');
        if on_root {
            return normalize_path(path);
        }
        normalize_path(&format!("{}/{path}", self.config.base_path()))
    }

    /// Merges endpoint options over route defaults. A non-empty role
    /// requirement always implies authentication.
    fn resolve(&self, method: Method, full_path: &str, defaults: &EndpointOptions, def: EndpointDef) -> Endpoint {
        let options = def.options.over(defaults);
        let role_required = options.role_required.unwrap_or_default();
        let scope_required = options.scope_required.unwrap_or_default();

        let mut endpoint = Endpoint::new(def.handler);
        endpoint.auth_required = options.auth_required.unwrap_or(false) || !role_required.is_empty();
        endpoint.role_required = role_required;
        endpoint.scope_required = scope_required;
        // Rebound to the final store in `build`.
        endpoint.limiter = options.rate_limit.map(|policy| {
            RateLimiter::new(Arc::clone(&self.limit_store), policy, format!("route:{method} {full_path}"))
        });
        endpoint
    }
}

async fn default_options(_ctx: RequestContext) -> StatusResponse {
    StatusResponse::text(Status::Ok, "")
}

async fn endpoint_missing(_ctx: RequestContext) -> StatusResponse {
    StatusResponse::not_found(NO_SUCH_ENDPOINT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::Consumed;
    use crate::router::RouteMatch;
    use crate::services::memory::MemoryUsers;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn services() -> Services {
        let users = Arc::new(MemoryUsers::new());
        Services::new(users.clone(), users)
    }

    async fn noop(_ctx: RequestContext) -> StatusResponse {
        StatusResponse::ok(Value::Null)
    }

    fn endpoint_at<'a>(d: &'a Dispatcher, method: Method, path: &str) -> &'a Endpoint {
        match d.routes().lookup(method, path) {
            RouteMatch::Found { endpoint, .. } => endpoint,
            other => panic!("expected {method} {path} to match, got {other:?}"),
        }
    }

    #[test]
    fn roles_imply_auth() {
        let d = Api::new(ApiConfig::new().version("v1"), services())
            .add_route(
                "reports",
                RouteOptions::new(),
                Endpoints::new()
                    .get(EndpointDef::new(noop).roles(["admin"]))
                    .post(EndpointDef::new(noop)),
            )
            .build();

        let get = endpoint_at(&d, Method::Get, "/api/v1/reports");
        assert!(get.auth_required);
        assert_eq!(get.role_required, ["admin"]);
        assert!(!endpoint_at(&d, Method::Post, "/api/v1/reports").auth_required);
    }

    #[test]
    fn endpoint_options_override_route_defaults() {
        let d = Api::new(ApiConfig::new(), services())
            .add_route(
                "notes",
                RouteOptions::new().auth_required(true).roles(["editor"]).rate_limit(
                    RateLimitPolicy::new(5, std::time::Duration::from_secs(1)),
                ),
                Endpoints::new()
                    .get(EndpointDef::new(noop).roles(["reader", "editor"]))
                    .delete(EndpointDef::new(noop)),
            )
            .build();

        let get = endpoint_at(&d, Method::Get, "/api/notes");
        assert_eq!(get.role_required, ["reader", "editor"]);
        assert!(get.limiter.is_some());

        let delete = endpoint_at(&d, Method::Delete, "/api/notes");
        assert_eq!(delete.role_required, ["editor"]);
        assert!(delete.auth_required);
    }

    #[test]
    fn on_root_routes_skip_the_api_path() {
        let d = Api::new(ApiConfig::new().version("v2"), services())
            .add_route("health", RouteOptions::new().on_root(), Endpoints::new().get(EndpointDef::new(noop)))
            .build();
        endpoint_at(&d, Method::Get, "/health");
        match d.routes().lookup(Method::Get, "/api/v2/health") {
            RouteMatch::Found { pattern, .. } => assert_eq!(pattern.as_str(), "/api/v2/*"),
            other => panic!("expected the api fallback, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_routes_fail_fast() {
        let _ = Api::new(ApiConfig::new(), services())
            .add_route("a", RouteOptions::new(), Endpoints::new().get(EndpointDef::new(noop)))
            .add_route("/a/", RouteOptions::new(), Endpoints::new().get(EndpointDef::new(noop)));
    }

    #[test]
    fn api_mounted_at_root_keeps_one_fallback() {
        let d = Api::new(ApiConfig::new().api_path(""), services()).build();
        assert_eq!(d.routes().len(), 1);
    }

    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RateLimitStore for CountingStore {
        async fn consume(&self, _key: &str, _policy: RateLimitPolicy) -> Result<Consumed, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Consumed::Allowed { remaining: 0 })
        }
    }

    #[tokio::test]
    async fn route_limiters_use_the_store_set_last() {
        let store = Arc::new(CountingStore::default());
        let d = Api::new(ApiConfig::new(), services())
            .add_route(
                "ping",
                RouteOptions::new().rate_limit(RateLimitPolicy::new(1, Duration::from_secs(60))),
                Endpoints::new().get(EndpointDef::new(noop)),
            )
            .rate_limit_store(store.clone())
            .build();

        let req = http::Request::builder().uri("/api/ping").body(bytes::Bytes::new()).unwrap();
        let res = d.handle(Request::from_http(req, Some("10.0.0.1:1000".parse().unwrap()))).await;
        assert_eq!(res.code(), 200);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_auth_routes_come_first() {
        let d = Api::new(ApiConfig::new().version("v1").default_auth(true), services()).build();
        let patterns: Vec<_> = d.routes().routes().iter().map(|r| r.pattern().as_str()).collect();
        assert_eq!(
            patterns,
            ["/api/v1/login", "/api/v1/logout", "/api/v1/logoutAll", "/api/v1/*", "/*"]
        );
        assert!(endpoint_at(&d, Method::Post, "/api/v1/logout").auth_required);
        assert!(!endpoint_at(&d, Method::Post, "/api/v1/login").auth_required);
    }
}
