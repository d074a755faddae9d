//! Process-local collaborators.
//!
//! Good enough for tests, demos and single-process tools. Data is lost on
//! restart and passwords are kept as unsalted SHA-256 digests, so production
//! deployments implement the traits over their real stores instead.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};

use super::document::{pull_path, push_path, set_path};
use super::{
    Accounts, BoxError, Collection, Password, Selector, StampedToken, USERS_COLLECTION,
    UserStore, generate_login_token, hash_login_token, sha256_hex,
};

const LOGIN_TOKENS_PATH: &str = "services.resume.loginTokens";
const PASSWORD_PATH: &str = "services.password.sha256";

/// A named, ordered collection of JSON documents keyed by `_id`.
pub struct MemoryCollection {
    name: String,
    docs: RwLock<Vec<Value>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), docs: RwLock::new(Vec::new()) }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Value>>, BoxError> {
        self.docs.read().map_err(|_| "collection lock poisoned".into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Value>>, BoxError> {
        self.docs.write().map_err(|_| "collection lock poisoned".into())
    }

    /// Applies `f` to the document with `id`. Returns `None` if absent.
    fn update<T>(&self, id: &str, f: impl FnOnce(&mut Value) -> T) -> Result<Option<T>, BoxError> {
        let mut docs = self.write()?;
        Ok(docs.iter_mut().find(|d| d["_id"] == id).map(f))
    }

    fn find_by(&self, selector: &Selector) -> Result<Option<Value>, BoxError> {
        Ok(self.read()?.iter().find(|d| selector.matches(d)).cloned())
    }
}

/// Assigns an `_id` when missing and appends `doc` under an already held lock.
fn insert_into(docs: &mut Vec<Value>, doc: Value) -> Result<String, BoxError> {
    let Value::Object(mut fields) = doc else {
        return Err("documents must be JSON objects".into());
    };
    let id = match fields.get("_id").and_then(Value::as_str) {
        Some(id) => id.to_owned(),
        None => uuid::Uuid::new_v4().simple().to_string(),
    };
    fields.insert("_id".to_owned(), Value::String(id.clone()));

    if docs.iter().any(|d| d["_id"] == id.as_str()) {
        return Err(format!("duplicate _id `{id}`").into());
    }
    docs.push(Value::Object(fields));
    Ok(id)
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_all(&self) -> Result<Vec<Value>, BoxError> {
        Ok(self.read()?.clone())
    }

    async fn find_one(&self, id: &str) -> Result<Option<Value>, BoxError> {
        self.find_by(&Selector::new("_id", id))
    }

    async fn insert(&self, doc: Value) -> Result<String, BoxError> {
        insert_into(&mut *self.write()?, doc)
    }

    async fn replace(&self, id: &str, doc: Value) -> Result<bool, BoxError> {
        let Value::Object(mut fields) = doc else {
            return Err("documents must be JSON objects".into());
        };
        fields.insert("_id".to_owned(), Value::String(id.to_owned()));
        let replaced = self.update(id, |d| *d = Value::Object(fields))?;
        Ok(replaced.is_some())
    }

    async fn set_fields(&self, id: &str, fields: Value) -> Result<bool, BoxError> {
        let Value::Object(fields) = fields else {
            return Err("update must be a JSON object".into());
        };
        let updated = self.update(id, |d| {
            for (k, v) in fields {
                if k != "_id" {
                    set_path(d, &k, v);
                }
            }
        })?;
        Ok(updated.is_some())
    }

    async fn remove(&self, id: &str) -> Result<bool, BoxError> {
        let mut docs = self.write()?;
        let before = docs.len();
        docs.retain(|d| d["_id"] != id);
        Ok(docs.len() != before)
    }
}

/// User accounts kept in a [`MemoryCollection`] named `users`.
///
/// Implements both [`UserStore`] and [`Accounts`], and exposes the underlying
/// collection so collection routes and authentication see the same records.
#[derive(Clone)]
pub struct MemoryUsers {
    collection: Arc<MemoryCollection>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self { collection: Arc::new(MemoryCollection::new(USERS_COLLECTION)) }
    }

    pub fn collection(&self) -> Arc<MemoryCollection> {
        Arc::clone(&self.collection)
    }

    /// Seeds an account with a username and plain password. Returns its id.
    pub async fn add_user(&self, username: &str, email: Option<&str>, password: &str) -> Result<String, BoxError> {
        let mut fields = json!({ "username": username, "password": password });
        if let Some(email) = email {
            fields["email"] = json!(email);
        }
        self.create_user(&fields).await
    }

    /// Replaces the roles array of a user.
    pub async fn set_roles(&self, user_id: &str, roles: &[&str]) -> Result<(), BoxError> {
        self.set(user_id, "roles", json!(roles)).await
    }

    /// Replaces the scopes array of a user.
    pub async fn set_scopes(&self, user_id: &str, scopes: &[&str]) -> Result<(), BoxError> {
        self.set(user_id, "scopes", json!(scopes)).await
    }
}

impl Default for MemoryUsers {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn find_one(&self, selector: &Selector) -> Result<Option<Value>, BoxError> {
        self.collection.find_by(selector)
    }

    async fn pull(&self, user_id: &str, array_path: &str, field: &str, value: &Value) -> Result<(), BoxError> {
        self.collection.update(user_id, |d| pull_path(d, array_path, field, value))?;
        Ok(())
    }

    async fn set(&self, user_id: &str, path: &str, value: Value) -> Result<(), BoxError> {
        self.collection.update(user_id, |d| set_path(d, path, value))?;
        Ok(())
    }
}

#[async_trait]
impl Accounts for MemoryUsers {
    async fn create_user(&self, fields: &Value) -> Result<String, BoxError> {
        let username = fields.get("username").and_then(Value::as_str);
        let email = fields.get("email").and_then(Value::as_str);
        if username.is_none() && email.is_none() {
            return Err("need to set a username or email".into());
        }
        let mut user = Value::Object(Map::new());
        if let Some(username) = username {
            user["username"] = json!(username);
        }
        if let Some(email) = email {
            user["emails"] = json!([{ "address": email, "verified": false }]);
        }
        user["profile"] = fields.get("profile").cloned().unwrap_or_else(|| json!({}));
        user["createdAt"] = json!(Utc::now());
        if let Some(password) = fields.get("password").and_then(Value::as_str) {
            set_path(&mut user, PASSWORD_PATH, json!(sha256_hex(password)));
        }
        set_path(&mut user, LOGIN_TOKENS_PATH, json!([]));

        // Uniqueness check and insert under one guard.
        let mut docs = self.collection.write()?;
        let taken = |selector: Selector| docs.iter().any(|d| selector.matches(d));
        if let Some(username) = username.filter(|u| taken(Selector::new("username", *u))) {
            return Err(format!("username `{username}` already exists").into());
        }
        if let Some(email) = email.filter(|e| taken(Selector::new("emails.address", *e))) {
            return Err(format!("email `{email}` already exists").into());
        }
        insert_into(&mut docs, user)
    }

    async fn check_password(&self, user: &Value, password: &Password) -> Result<bool, BoxError> {
        let stored = user.pointer("/services/password/sha256").and_then(Value::as_str);
        Ok(stored.is_some_and(|s| s == password.digest()))
    }

    async fn issue_login_token(&self, user_id: &str) -> Result<StampedToken, BoxError> {
        let stamped = StampedToken { token: generate_login_token(), when: Utc::now() };
        let hashed = json!({ "hashedToken": hash_login_token(&stamped.token), "when": stamped.when });
        self.collection
            .update(user_id, |d| push_path(d, LOGIN_TOKENS_PATH, hashed))?
            .ok_or_else(|| BoxError::from(format!("no user `{user_id}`")))?;
        Ok(stamped)
    }
}
