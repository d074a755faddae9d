//! Per-request context handed to every endpoint handler.

use std::collections::HashMap;

use serde_json::Value;

use crate::auth::User;
use crate::request::Request;

/// Everything a handler knows about the request it is serving.
///
/// Built by the dispatcher after route matching and discarded once the
/// response is written. `user`, `user_id` and `auth_token` are only populated
/// on endpoints that require authentication.
#[derive(Debug)]
pub struct RequestContext {
    pub url_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body_params: Option<Value>,
    pub request: Request,
    pub user: Option<User>,
    pub user_id: Option<String>,
    pub auth_token: Option<String>,
}

impl RequestContext {
    pub(crate) fn new(
        request: Request,
        url_params: HashMap<String, String>,
        body_params: Option<Value>,
    ) -> Self {
        let query_params = request.query_params();
        Self {
            url_params,
            query_params,
            body_params,
            request,
            user: None,
            user_id: None,
            auth_token: None,
        }
    }

    /// Returns a named path parameter.
    ///
    /// For a route `articles/:id`, `ctx.url_param("id")` on `/articles/42` returns `Some("42")`.
    pub fn url_param(&self, key: &str) -> Option<&str> {
        self.url_params.get(key).map(String::as_str)
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }
}
