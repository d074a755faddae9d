//! Token login and logout endpoints.
//!
//! `POST login` trades a username or email plus password for a fresh token.
//! `POST logout` forgets the token the request was made with; `POST
//! logoutAll` forgets every token of the caller.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use super::{Api, AuthHooks, EndpointDef, Endpoints, RouteOptions};
use crate::auth::User;
use crate::context::RequestContext;
use crate::envelope::StatusResponse;
use crate::error::BoxError;
use crate::services::{Password, Selector, Services};

const BAD_CREDENTIALS: &str = "Unauthorized";

/// Registers the three endpoints under the API root.
pub(super) fn install(api: Api) -> Api {
    let services = api.services.clone();
    let hooks = Arc::clone(&api.hooks);
    let tokens = TokenField::split(&api.config.token_path);

    let login_ep = {
        let (services, hooks) = (services.clone(), Arc::clone(&hooks));
        EndpointDef::new(move |ctx: RequestContext| login(services.clone(), Arc::clone(&hooks), ctx))
    };
    let logout_ep = {
        let (services, hooks, tokens) = (services.clone(), Arc::clone(&hooks), tokens.clone());
        EndpointDef::new(move |ctx: RequestContext| {
            logout(services.clone(), Arc::clone(&hooks), tokens.clone(), ctx)
        })
    };
    let logout_all_ep = EndpointDef::new(move |ctx: RequestContext| {
        logout_all(services.clone(), Arc::clone(&hooks), tokens.clone(), ctx)
    });

    api.add_route("login", RouteOptions::new(), Endpoints::new().post(login_ep))
        .add_route("logout", RouteOptions::new().auth_required(true), Endpoints::new().post(logout_ep))
        .add_route("logoutAll", RouteOptions::new().auth_required(true), Endpoints::new().post(logout_all_ep))
}

/// The token path split into the array holding tokens and the field of each
/// entry that stores the hash: `services.resume.loginTokens` + `hashedToken`.
#[derive(Clone, Debug, PartialEq)]
struct TokenField {
    array: String,
    field: Option<String>,
}

impl TokenField {
    fn split(token_path: &str) -> Self {
        match token_path.rsplit_once('.') {
            Some((array, field)) => Self { array: array.to_owned(), field: Some(field.to_owned()) },
            None => Self { array: token_path.to_owned(), field: None },
        }
    }
}

/// What the login body identifies the user by.
fn login_selector(body: &Value) -> Option<Selector> {
    if let Some(username) = body.get("username").and_then(Value::as_str) {
        return Some(Selector::new("username", username));
    }
    body.get("email")
        .and_then(Value::as_str)
        .map(|email| Selector::new("emails.address", email))
}

fn login_password(body: &Value) -> Option<Password> {
    let password = body.get("password")?.as_str()?.to_owned();
    // urlencoded bodies carry the flag as a string
    let hashed = matches!(body.get("hashed"), Some(Value::Bool(true)))
        || body.get("hashed").and_then(Value::as_str) == Some("true");
    Some(if hashed { Password::Sha256(password) } else { Password::Plain(password) })
}

async fn login(services: Services, hooks: Arc<AuthHooks>, mut ctx: RequestContext) -> Result<StatusResponse, BoxError> {
    let body = ctx.body_params.take().unwrap_or(Value::Null);
    let Some(selector) = login_selector(&body) else {
        return Ok(StatusResponse::bad_request("Unable to login: specify a username or an email address"));
    };
    let Some(password) = login_password(&body) else {
        return Ok(StatusResponse::bad_request("Unable to login: a password is required"));
    };

    let user = match services.users.find_one(&selector).await?.and_then(User::from_record) {
        Some(user) => user,
        None => {
            debug!(path = %selector.path, "login for unknown user");
            return Ok(StatusResponse::unauthorized(BAD_CREDENTIALS));
        }
    };
    if !services.accounts.check_password(&user.record, &password).await? {
        debug!(user_id = %user.id, "login with wrong password");
        return Ok(StatusResponse::unauthorized(BAD_CREDENTIALS));
    }

    let stamped = services.accounts.issue_login_token(&user.id).await?;
    ctx.user_id = Some(user.id.clone());
    ctx.auth_token = Some(stamped.token.clone());
    ctx.user = Some(user);

    let res = StatusResponse::ok(json!({
        "authToken": stamped.token,
        "userId": ctx.user_id,
        "when": stamped.when,
    }));
    Ok(with_extra(res, AuthHooks::run(hooks.on_logged_in.get(), &ctx)))
}

async fn logout(
    services: Services,
    hooks: Arc<AuthHooks>,
    tokens: TokenField,
    ctx: RequestContext,
) -> Result<StatusResponse, BoxError> {
    let (Some(user_id), Some(token)) = (ctx.user_id.as_deref(), ctx.auth_token.as_deref()) else {
        return Ok(StatusResponse::unauthorized(BAD_CREDENTIALS));
    };
    let hashed = services.accounts.hash_login_token(token);
    match &tokens.field {
        Some(field) => services.users.pull(user_id, &tokens.array, field, &json!(hashed)).await?,
        None => services.users.set(user_id, &tokens.array, Value::Null).await?,
    }

    let res = StatusResponse::ok(json!({ "message": "You've been logged out!" }));
    Ok(with_extra(res, AuthHooks::run(hooks.on_logged_out.get(), &ctx)))
}

async fn logout_all(
    services: Services,
    hooks: Arc<AuthHooks>,
    tokens: TokenField,
    ctx: RequestContext,
) -> Result<StatusResponse, BoxError> {
    let Some(user_id) = ctx.user_id.as_deref() else {
        return Ok(StatusResponse::unauthorized(BAD_CREDENTIALS));
    };
    let cleared = if tokens.field.is_some() { json!([]) } else { Value::Null };
    services.users.set(user_id, &tokens.array, cleared).await?;

    let res = StatusResponse::ok(json!({ "message": "You've been logged out of all sessions!" }));
    Ok(with_extra(res, AuthHooks::run(hooks.on_logged_out.get(), &ctx)))
}

fn with_extra(res: StatusResponse, extra: Option<Value>) -> StatusResponse {
    match extra {
        Some(extra) => res.extra(extra),
        None => res,
    }
}
