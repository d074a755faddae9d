//! Caller authentication and role/scope authorization.
//!
//! Missing or unknown credentials are a 401; a known caller without the
//! required role or scope is a 403. The two are never conflated.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::context::RequestContext;
use crate::error::Error;
use crate::request::Request;
use crate::router::Endpoint;
use crate::services::{Accounts, Selector, UserStore};

/// Dotted path of the hashed login tokens on a user record.
pub const DEFAULT_TOKEN_PATH: &str = "services.resume.loginTokens.hashedToken";

/// Header read by the default credential extractor.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// An authenticated user record.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub record: Value,
}

impl User {
    /// Wraps a store record. `None` when the record has no string `_id`.
    pub fn from_record(record: Value) -> Option<Self> {
        let id = record.get("_id")?.as_str()?.to_owned();
        Some(Self { id, record })
    }

    pub fn roles(&self) -> Vec<&str> {
        string_array(&self.record, "roles")
    }

    pub fn scopes(&self) -> Vec<&str> {
        string_array(&self.record, "scopes")
    }

    pub fn has_any_role(&self, required: &[String]) -> bool {
        let roles = self.roles();
        required.iter().any(|r| roles.contains(&r.as_str()))
    }

    pub fn has_any_scope(&self, required: &[String]) -> bool {
        let scopes = self.scopes();
        required.iter().any(|s| scopes.contains(&s.as_str()))
    }
}

fn string_array<'a>(record: &'a Value, key: &str) -> Vec<&'a str> {
    record.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// What a credential extractor found on a request.
#[derive(Clone, Debug, PartialEq)]
pub enum Credential {
    Token(String),
    /// Nothing usable; the caller gets a generic 401.
    Missing,
    /// The extractor refused the request; `detail` is returned verbatim as
    /// the 401 body data.
    Rejected(Value),
}

/// Derives the caller's login token from a raw request.
pub trait CredentialExtractor: Send + Sync {
    fn extract(&self, req: &Request) -> Credential;
}

impl<F> CredentialExtractor for F
where
    F: Fn(&Request) -> Credential + Send + Sync,
{
    fn extract(&self, req: &Request) -> Credential {
        self(req)
    }
}

/// Reads `X-Auth-Token`, case-insensitively.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderTokenExtractor;

impl CredentialExtractor for HeaderTokenExtractor {
    fn extract(&self, req: &Request) -> Credential {
        match req.header(AUTH_TOKEN_HEADER).map(str::trim) {
            Some(token) if !token.is_empty() => Credential::Token(token.to_owned()),
            _ => Credential::Rejected(json!({ "message": "No auth token provided" })),
        }
    }
}

/// The caller resolved by [`AuthGate::authenticate`].
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub user: User,
    pub token: String,
}

/// Outcome of authentication.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthResult {
    /// The endpoint does not require authentication.
    Anonymous,
    Authenticated(Identity),
    Rejected { detail: Option<Value> },
}

/// Resolves callers against the user store and checks role requirements.
#[derive(Clone)]
pub struct AuthGate {
    extractor: Arc<dyn CredentialExtractor>,
    token_path: String,
    users: Arc<dyn UserStore>,
    accounts: Arc<dyn Accounts>,
}

impl AuthGate {
    pub fn new(
        extractor: Arc<dyn CredentialExtractor>,
        token_path: impl Into<String>,
        users: Arc<dyn UserStore>,
        accounts: Arc<dyn Accounts>,
    ) -> Self {
        Self { extractor, token_path: token_path.into(), users, accounts }
    }

    pub fn token_path(&self) -> &str {
        &self.token_path
    }

    /// Resolves the caller of `req` when `endpoint` requires authentication.
    ///
    /// Store failures are returned as `Err`; every other failure is a
    /// structured [`AuthResult::Rejected`].
    pub async fn authenticate(&self, req: &Request, endpoint: &Endpoint) -> Result<AuthResult, Error> {
        if !endpoint.auth_required {
            return Ok(AuthResult::Anonymous);
        }

        let token = match self.extractor.extract(req) {
            Credential::Token(token) => token,
            Credential::Missing => return Ok(AuthResult::Rejected { detail: None }),
            Credential::Rejected(detail) => return Ok(AuthResult::Rejected { detail: Some(detail) }),
        };

        let selector = Selector::new(self.token_path.as_str(), self.accounts.hash_login_token(&token));
        let record = self.users.find_one(&selector).await.map_err(Error::service)?;

        Ok(match record.and_then(User::from_record) {
            Some(user) => AuthResult::Authenticated(Identity { user, token }),
            None => AuthResult::Rejected { detail: None },
        })
    }

    /// Checks `endpoint`'s role and scope requirements against the attached user.
    ///
    /// Passes when no role is required or no user is attached: a
    /// role-requiring endpoint always requires authentication, so the latter
    /// only happens on open endpoints.
    pub fn authorize(&self, ctx: &RequestContext, endpoint: &Endpoint) -> bool {
        let Some(user) = ctx.user.as_ref() else { return true };
        if endpoint.role_required.is_empty() {
            return true;
        }
        let mut allowed = user.has_any_role(&endpoint.role_required);
        if !endpoint.scope_required.is_empty() {
            allowed = allowed && user.has_any_scope(&endpoint.scope_required);
        }
        allowed
    }
}
