//! Generated CRUD endpoints over a [`Collection`].
//!
//! ```text
//! GET    {path}       getAll   200 [docs]
//! POST   {path}       post     201 doc          400 No item added
//! GET    {path}/:id   get      200 doc          404 Item not found
//! PUT    {path}/:id   put      200 doc          404 Item not found
//! PATCH  {path}/:id   patch    200 doc          404 Item not found
//! DELETE {path}/:id   delete   200 {message}    404 Item not found
//! ```
//!
//! A collection named [`USERS_COLLECTION`] only ever exposes `_id` and
//! `profile`, creates accounts through [`Accounts::create_user`] and writes
//! nothing but `profile`.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::debug;

use super::{EndpointDef, EndpointOptions, Endpoints, RouteOptions};
use crate::context::RequestContext;
use crate::envelope::StatusResponse;
use crate::error::BoxError;
use crate::services::document::project;
use crate::services::{Accounts, Collection, USERS_COLLECTION};

const ITEM_NOT_FOUND: &str = "Item not found";
const NOT_AN_OBJECT: &str = "Request body must be a JSON object";

/// The six generated endpoints.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CollectionEndpoint {
    GetAll,
    Post,
    Get,
    Put,
    Patch,
    Delete,
}

/// How [`Api::add_collection_routes`](super::Api::add_collection_routes)
/// lays out a collection.
#[derive(Clone, Default)]
pub struct CollectionOptions {
    /// Route path; the collection name when unset.
    pub path: Option<String>,
    pub route_options: RouteOptions,
    pub excluded: Vec<CollectionEndpoint>,
    configured: Vec<(CollectionEndpoint, EndpointOptions)>,
    replaced: Vec<(CollectionEndpoint, EndpointDef)>,
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn route_options(mut self, options: RouteOptions) -> Self {
        self.route_options = options;
        self
    }

    pub fn exclude(mut self, endpoint: CollectionEndpoint) -> Self {
        self.excluded.push(endpoint);
        self
    }

    /// Overrides the options of one generated endpoint.
    pub fn configure(mut self, endpoint: CollectionEndpoint, options: EndpointOptions) -> Self {
        self.configured.push((endpoint, options));
        self
    }

    /// Replaces one generated endpoint, action included.
    pub fn replace(mut self, endpoint: CollectionEndpoint, def: EndpointDef) -> Self {
        self.replaced.push((endpoint, def));
        self
    }

    fn finish(&self, which: CollectionEndpoint, generated: EndpointDef) -> Option<EndpointDef> {
        if self.excluded.contains(&which) {
            return None;
        }
        let mut def = self.replaced.iter()
            .rfind(|(e, _)| *e == which)
            .map(|(_, def)| def.clone())
            .unwrap_or(generated);
        if let Some((_, options)) = self.configured.iter().rfind(|(e, _)| *e == which) {
            def.options = options.over(&def.options);
        }
        Some(def)
    }
}

/// The collection-level and item-level routes, skipping any left empty by
/// exclusions.
pub(super) fn routes(
    items: Arc<dyn Collection>,
    accounts: Arc<dyn Accounts>,
    options: CollectionOptions,
) -> Vec<(String, RouteOptions, Endpoints)> {
    let path = options.path.clone().unwrap_or_else(|| items.name().to_owned());
    let path = path.trim_matches('/').to_owned();
    let users = items.name() == USERS_COLLECTION;

    let generated = [
        (CollectionEndpoint::GetAll, get_all(Arc::clone(&items), users)),
        (CollectionEndpoint::Post, if users { post_user(Arc::clone(&items), accounts) } else { post(Arc::clone(&items)) }),
        (CollectionEndpoint::Get, get(Arc::clone(&items), users)),
        (CollectionEndpoint::Put, put(Arc::clone(&items), users)),
        (CollectionEndpoint::Patch, patch(Arc::clone(&items), users)),
        (CollectionEndpoint::Delete, delete(items, users)),
    ];

    let mut collection_level = Endpoints::new();
    let mut item_level = Endpoints::new();
    for (which, def) in generated {
        let Some(def) = options.finish(which, def) else { continue };
        match which {
            CollectionEndpoint::GetAll => collection_level = collection_level.get(def),
            CollectionEndpoint::Post => collection_level = collection_level.post(def),
            CollectionEndpoint::Get => item_level = item_level.get(def),
            CollectionEndpoint::Put => item_level = item_level.put(def),
            CollectionEndpoint::Patch => item_level = item_level.patch(def),
            CollectionEndpoint::Delete => item_level = item_level.delete(def),
        }
    }

    [(path.clone(), collection_level), (format!("{path}/:id"), item_level)]
        .into_iter()
        .filter(|(_, endpoints)| !endpoints.entries.is_empty())
        .map(|(path, endpoints)| (path, options.route_options.clone(), endpoints))
        .collect()
}

fn visible(doc: Value, users: bool) -> Value {
    if users { project(&doc, &["profile"]) } else { doc }
}

fn item_id(ctx: &RequestContext) -> String {
    ctx.url_param("id").unwrap_or_default().to_owned()
}

/// The request body when it is a JSON object.
fn object_body(ctx: RequestContext) -> Option<Map<String, Value>> {
    match ctx.body_params {
        Some(Value::Object(fields)) => Some(fields),
        _ => None,
    }
}

async fn reload(items: &dyn Collection, id: &str, users: bool) -> Result<StatusResponse, BoxError> {
    Ok(match items.find_one(id).await? {
        Some(doc) => StatusResponse::ok(visible(doc, users)),
        None => StatusResponse::not_found(ITEM_NOT_FOUND),
    })
}

/// Wraps a collection operation as an endpoint, handing it its own clone of
/// the collaborators on each request.
macro_rules! endpoint {
    ($op:ident, $items:expr, $($arg:expr),*) => {{
        let items = $items;
        EndpointDef::new(move |ctx: RequestContext| $op(Arc::clone(&items), ctx, $($arg.clone()),*))
    }};
}

fn get_all(items: Arc<dyn Collection>, users: bool) -> EndpointDef {
    endpoint!(find_all, items, users)
}

fn get(items: Arc<dyn Collection>, users: bool) -> EndpointDef {
    endpoint!(find_one, items, users)
}

fn post(items: Arc<dyn Collection>) -> EndpointDef {
    endpoint!(insert, items,)
}

fn post_user(items: Arc<dyn Collection>, accounts: Arc<dyn Accounts>) -> EndpointDef {
    endpoint!(create_user, items, accounts)
}

fn put(items: Arc<dyn Collection>, users: bool) -> EndpointDef {
    endpoint!(replace, items, users)
}

fn patch(items: Arc<dyn Collection>, users: bool) -> EndpointDef {
    endpoint!(update, items, users)
}

fn delete(items: Arc<dyn Collection>, users: bool) -> EndpointDef {
    endpoint!(remove, items, users)
}

async fn find_all(items: Arc<dyn Collection>, _ctx: RequestContext, users: bool) -> Result<StatusResponse, BoxError> {
    let docs = items.find_all().await?;
    let docs = docs.into_iter().map(|d| visible(d, users)).collect();
    Ok(StatusResponse::ok(Value::Array(docs)))
}

async fn find_one(items: Arc<dyn Collection>, ctx: RequestContext, users: bool) -> Result<StatusResponse, BoxError> {
    reload(items.as_ref(), &item_id(&ctx), users).await
}

async fn insert(items: Arc<dyn Collection>, ctx: RequestContext) -> Result<StatusResponse, BoxError> {
    let Some(fields) = object_body(ctx) else {
        return Ok(StatusResponse::bad_request("No item added"));
    };
    let id = items.insert(Value::Object(fields)).await?;
    Ok(match items.find_one(&id).await? {
        Some(doc) => StatusResponse::created(doc),
        None => StatusResponse::bad_request("No item added"),
    })
}

async fn create_user(
    items: Arc<dyn Collection>,
    ctx: RequestContext,
    accounts: Arc<dyn Accounts>,
) -> Result<StatusResponse, BoxError> {
    let Some(fields) = object_body(ctx) else {
        return Ok(StatusResponse::bad_request("No user added"));
    };
    let id = match accounts.create_user(&Value::Object(fields)).await {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "user creation refused");
            return Ok(StatusResponse::bad_request("No user added"));
        }
    };
    Ok(match items.find_one(&id).await? {
        Some(doc) => StatusResponse::created(visible(doc, true)),
        None => StatusResponse::bad_request("No user added"),
    })
}

async fn replace(items: Arc<dyn Collection>, ctx: RequestContext, users: bool) -> Result<StatusResponse, BoxError> {
    let id = item_id(&ctx);
    let Some(fields) = object_body(ctx) else {
        return Ok(StatusResponse::bad_request(NOT_AN_OBJECT));
    };
    let found = if users {
        items.set_fields(&id, json!({ "profile": fields })).await?
    } else {
        items.replace(&id, Value::Object(fields)).await?
    };
    if !found {
        return Ok(StatusResponse::not_found(ITEM_NOT_FOUND));
    }
    reload(items.as_ref(), &id, users).await
}

async fn update(items: Arc<dyn Collection>, ctx: RequestContext, users: bool) -> Result<StatusResponse, BoxError> {
    let id = item_id(&ctx);
    let Some(fields) = object_body(ctx) else {
        return Ok(StatusResponse::bad_request(NOT_AN_OBJECT));
    };
    let fields: Map<String, Value> = if users {
        fields.into_iter().map(|(k, v)| (format!("profile.{k}"), v)).collect()
    } else {
        fields
    };
    if !items.set_fields(&id, Value::Object(fields)).await? {
        return Ok(StatusResponse::not_found(ITEM_NOT_FOUND));
    }
    reload(items.as_ref(), &id, users).await
}

async fn remove(items: Arc<dyn Collection>, ctx: RequestContext, users: bool) -> Result<StatusResponse, BoxError> {
    if !items.remove(&item_id(&ctx)).await? {
        return Ok(StatusResponse::not_found(ITEM_NOT_FOUND));
    }
    let message = if users { "User removed" } else { "Item removed" };
    Ok(StatusResponse::ok(json!({ "message": message })))
}
