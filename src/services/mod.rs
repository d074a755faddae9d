//! External collaborators.
//!
//! waypost does not own users, passwords, sessions or documents. It reaches
//! them through the narrow async traits below, which an application
//! implements over its real database and accounts service. The [`memory`]
//! module ships process-local implementations used by the tests and demos.

pub mod document;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::BoxError;

/// Name of the built-in user-account collection. Collection routes over a
/// collection with this name get the restricted user endpoint set.
pub const USERS_COLLECTION: &str = "users";

/// Equality selector on a dotted field path.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    pub path: String,
    pub value: Value,
}

impl Selector {
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { path: path.into(), value: value.into() }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        document::path_matches(doc, &self.path, &self.value)
    }
}

/// A password as supplied by a client.
#[derive(Clone, Debug, PartialEq)]
pub enum Password {
    Plain(String),
    /// Lowercase hex SHA-256 digest computed by the client.
    Sha256(String),
}

impl Password {
    /// The SHA-256 hex digest, hashing plain passwords first.
    pub fn digest(&self) -> String {
        match self {
            Self::Plain(p) => sha256_hex(p),
            Self::Sha256(d) => d.to_ascii_lowercase(),
        }
    }
}

/// A freshly issued login token. `token` is only ever shown to the client;
/// stores keep its hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StampedToken {
    pub token: String,
    pub when: DateTime<Utc>,
}

/// Lookup and update of user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// The one record matching `selector`, if any.
    async fn find_one(&self, selector: &Selector) -> Result<Option<Value>, BoxError>;

    /// Removes entries of the array at `array_path` whose `field` equals `value`.
    async fn pull(&self, user_id: &str, array_path: &str, field: &str, value: &Value) -> Result<(), BoxError>;

    /// Sets the field at `path`.
    async fn set(&self, user_id: &str, path: &str, value: Value) -> Result<(), BoxError>;
}

/// Account creation, password verification and session-token issuance.
#[async_trait]
pub trait Accounts: Send + Sync {
    /// Creates an account from client-supplied fields and returns its id.
    async fn create_user(&self, fields: &Value) -> Result<String, BoxError>;

    async fn check_password(&self, user: &Value, password: &Password) -> Result<bool, BoxError>;

    /// Generates a token, stores its hash on the user and returns the token.
    async fn issue_login_token(&self, user_id: &str) -> Result<StampedToken, BoxError>;

    /// The stored form of a login token.
    fn hash_login_token(&self, token: &str) -> String {
        hash_login_token(token)
    }
}

/// CRUD over one document collection.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn find_all(&self) -> Result<Vec<Value>, BoxError>;

    async fn find_one(&self, id: &str) -> Result<Option<Value>, BoxError>;

    /// Inserts `doc` and returns the new id.
    async fn insert(&self, doc: Value) -> Result<String, BoxError>;

    /// Replaces the document body, keeping its id. Returns `false` if absent.
    async fn replace(&self, id: &str, doc: Value) -> Result<bool, BoxError>;

    /// Sets each top-level field of `fields`. Returns `false` if absent.
    async fn set_fields(&self, id: &str, fields: Value) -> Result<bool, BoxError>;

    /// Returns `false` if absent.
    async fn remove(&self, id: &str) -> Result<bool, BoxError>;
}

/// The collaborators an [`Api`](crate::Api) talks to for authentication.
#[derive(Clone)]
pub struct Services {
    pub users: Arc<dyn UserStore>,
    pub accounts: Arc<dyn Accounts>,
}

impl Services {
    pub fn new(users: Arc<dyn UserStore>, accounts: Arc<dyn Accounts>) -> Self {
        Self { users, accounts }
    }
}

/// A random, URL-safe 43-character login token.
pub fn generate_login_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base64 of the SHA-256 of the token: the form stored under the token path.
pub fn hash_login_token(token: &str) -> String {
    STANDARD.encode(Sha256::digest(token.as_bytes()))
}

pub(crate) fn sha256_hex(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
