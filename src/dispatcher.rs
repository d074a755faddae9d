//! Per-request pipeline.
//!
//! ```text
//! match route ─► OPTIONS default? ─► rate limit ─► authenticate ─► authorize ─► parse body ─► handler ─► write
//!     404/405                           429            401             403           400          500
//! ```
//!
//! Every stage either passes the request on or produces the final response;
//! nothing loops back. Collaborator calls are awaited without holding any
//! lock, and handlers run in their own task so a panic becomes a 500 rather
//! than a dropped connection.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::auth::{AuthGate, AuthResult};
use crate::context::RequestContext;
use crate::envelope::{Reply, StatusResponse};
use crate::handler::BoxedHandler;
use crate::method::{Method, allow_header};
use crate::rate_limit::{Consumed, KeyFn, RateLimiter, resolve_key};
use crate::request::Request;
use crate::response::Response;
use crate::router::{RouteMatch, RouteTable};
use crate::status::Status;

const NOT_LOGGED_IN: &str = "You must be logged in to do this.";
const NOT_PERMITTED: &str = "You do not have permission to do this.";
pub(crate) const NO_SUCH_ENDPOINT: &str = "API endpoint does not exist";

/// Routes requests through the pipeline. Built by [`Api::build`](crate::Api::build).
pub struct Dispatcher {
    pub(crate) table: Arc<RouteTable>,
    pub(crate) auth: AuthGate,
    pub(crate) global_limiter: Option<RateLimiter>,
    pub(crate) key_fn: Option<KeyFn>,
    pub(crate) options_handler: BoxedHandler,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) pretty: bool,
}

impl Dispatcher {
    pub fn routes(&self) -> &RouteTable {
        &self.table
    }

    /// Produces the response for one request. Never fails: every error is
    /// mapped to an enveloped status.
    pub async fn handle(&self, req: Request) -> Response {
        let method = req.method().to_owned();
        let path = req.path().to_owned();
        let response = self.run(req).await;
        debug!(%method, %path, status = response.code(), "request handled");
        response
    }

    async fn run(&self, req: Request) -> Response {
        let Ok(method) = req.method().parse::<Method>() else {
            return self.render(
                StatusResponse::failure(Status::MethodNotAllowed, "Method not allowed")
                    .header("Allow", &allow_header(&Method::ALL)),
            );
        };

        let (endpoint, params) = match self.table.lookup(method, req.path()) {
            RouteMatch::Found { endpoint, params, .. } => (endpoint, params),
            RouteMatch::Options { allowed } => return self.default_options(req, &allowed).await,
            RouteMatch::MethodNotAllowed { allowed } => {
                return self.render(
                    StatusResponse::failure(Status::MethodNotAllowed, "Method not allowed")
                        .header("Allow", &allow_header(&allowed)),
                );
            }
            RouteMatch::NotFound => return self.render(StatusResponse::not_found(NO_SUCH_ENDPOINT)),
        };

        if let Some(limiter) = endpoint.limiter.as_ref().or(self.global_limiter.as_ref()) {
            let key = resolve_key(self.key_fn.as_ref(), &req);
            match limiter.consume(&key).await {
                Ok(Consumed::Allowed { .. }) => {}
                Ok(Consumed::Exhausted { retry_after }) => {
                    warn!(%key, path = req.path(), "rate limit exceeded");
                    let secs = retry_after.as_secs_f64().ceil() as u64;
                    return self.render(
                        StatusResponse::failure(Status::TooManyRequests, "Too many requests")
                            .header("Retry-After", &secs.max(1).to_string()),
                    );
                }
                Err(e) => return self.internal_error(&e),
            }
        }

        let mut ctx = RequestContext::new(req, params, None);

        match self.auth.authenticate(&ctx.request, endpoint).await {
            Ok(AuthResult::Anonymous) => {}
            Ok(AuthResult::Authenticated(identity)) => {
                ctx.user_id = Some(identity.user.id.clone());
                ctx.user = Some(identity.user);
                ctx.auth_token = Some(identity.token);
            }
            Ok(AuthResult::Rejected { detail }) => {
                let res = match detail {
                    Some(detail) => StatusResponse::new(Status::Unauthorized, detail),
                    None => StatusResponse::unauthorized(NOT_LOGGED_IN),
                };
                return self.render(res);
            }
            Err(e) => return self.internal_error(&e),
        }

        if !self.auth.authorize(&ctx, endpoint) {
            return self.render(StatusResponse::forbidden(NOT_PERMITTED));
        }

        ctx.body_params = match parse_body(&ctx.request) {
            Ok(body) => body,
            Err(message) => return self.render(StatusResponse::bad_request(message)),
        };

        let reply = tokio::spawn(endpoint.handler.call(ctx)).await;
        match reply {
            Ok(reply) => self.write(reply),
            Err(e) => self.internal_error(&e),
        }
    }

    async fn default_options(&self, req: Request, allowed: &[Method]) -> Response {
        let ctx = RequestContext::new(req, HashMap::new(), None);
        let allow = allow_header(allowed);
        match self.options_handler.call(ctx).await {
            Reply::Envelope(res) => self.render(
                res.header("Allow", &allow)
                    .header("Access-Control-Allow-Methods", &allow),
            ),
            other => self.write(other),
        }
    }

    fn write(&self, reply: Reply) -> Response {
        match reply {
            Reply::Envelope(res) => self.render(res),
            Reply::Handled(res) => res,
            Reply::Failed(detail) => self.internal_error(&detail),
        }
    }

    fn render(&self, res: StatusResponse) -> Response {
        res.render(&self.headers, self.pretty)
    }

    fn internal_error(&self, detail: &dyn std::fmt::Display) -> Response {
        error!(error = %detail, "request failed");
        self.render(StatusResponse::internal_error())
    }
}

/// JSON bodies (and bodies without a content type) are parsed as JSON; urlencoded
/// forms become an object of strings; anything else is left to the handler.
fn parse_body(req: &Request) -> Result<Option<Value>, &'static str> {
    if req.body().is_empty() {
        return Ok(None);
    }
    if req.content_type_is("application/x-www-form-urlencoded") {
        let fields: Map<String, Value> = url::form_urlencoded::parse(req.body())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Ok(Some(Value::Object(fields)));
    }
    if req.header("content-type").is_none() || req.content_type_is("application/json") {
        return serde_json::from_slice(req.body())
            .map(Some)
            .map_err(|_| "Invalid JSON body");
    }
    Ok(None)
}
