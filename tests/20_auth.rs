mod common;

use std::sync::Arc;

use serde_json::json;
use waypost::auth::Credential;
use waypost::services::memory::MemoryUsers;
use waypost::{Api, ApiConfig, Dispatcher, EndpointDef, Endpoints, Request, RequestContext, RouteOptions, StatusResponse};

use common::{TestRequest, login, seeded_users, services};

const BASE: &str = "/api/v1";

async fn whoami(ctx: RequestContext) -> StatusResponse {
    StatusResponse::ok(json!({ "userId": ctx.user_id }))
}

fn api(users: &Arc<MemoryUsers>) -> Api {
    common::init_tracing();
    Api::new(ApiConfig::new().version("v1").default_auth(true), services(users))
}

fn dispatcher(users: &Arc<MemoryUsers>) -> Dispatcher {
    api(users)
        .add_route("me", RouteOptions::new().auth_required(true), Endpoints::new().get(EndpointDef::new(whoami)))
        .add_route(
            "admin",
            RouteOptions::new(),
            Endpoints::new()
                .get(EndpointDef::new(whoami).roles(["admin"]))
                .post(EndpointDef::new(whoami).roles(["admin"]).scopes(["write"])),
        )
        .build()
}

#[tokio::test]
async fn login_returns_token_and_timestamp() {
    let (users, alice, _) = seeded_users().await;
    let d = dispatcher(&users);

    let (code, body) = TestRequest::post(&format!("{BASE}/login"))
        .json(json!({ "username": "alice", "password": "correct" }))
        .call(&d)
        .await;
    assert_eq!(code, 200);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["userId"], alice.as_str());
    assert_eq!(body["data"]["authToken"].as_str().map(str::len), Some(43));
    assert!(body["data"]["when"].is_string());

    let token = body["data"]["authToken"].as_str().unwrap();
    let (code, body) = TestRequest::get(&format!("{BASE}/me")).token(token).call(&d).await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["userId"], alice.as_str());
}

#[tokio::test]
async fn login_by_email_form_and_prehashed_password() {
    let (users, _, bob) = seeded_users().await;
    let d = dispatcher(&users);

    let (code, body) = TestRequest::post(&format!("{BASE}/login"))
        .form("email=bob%40example.com&password=hunter2")
        .call(&d)
        .await;
    assert_eq!(code, 200, "{body}");
    assert_eq!(body["data"]["userId"], bob.as_str());

    // sha256("hunter2")
    let digest = "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7";
    let (code, _) = TestRequest::post(&format!("{BASE}/login"))
        .json(json!({ "username": "bob", "password": digest, "hashed": true }))
        .call(&d)
        .await;
    assert_eq!(code, 200);
}

#[tokio::test]
async fn bad_credentials_are_401() {
    let (users, _, _) = seeded_users().await;
    let d = dispatcher(&users);

    for body in [
        json!({ "username": "alice", "password": "wrong" }),
        json!({ "username": "nobody", "password": "correct" }),
    ] {
        let (code, res) = TestRequest::post(&format!("{BASE}/login")).json(body).call(&d).await;
        assert_eq!(code, 401);
        assert_eq!(res["status"], "fail");
        assert!(res["data"].get("authToken").is_none());
    }
}

#[tokio::test]
async fn incomplete_login_bodies_are_400() {
    let (users, _, _) = seeded_users().await;
    let d = dispatcher(&users);

    for body in [
        json!({ "password": "correct" }),
        json!({ "username": "alice" }),
        json!({ "user": "alice", "password": "correct" }),
    ] {
        let (code, res) = TestRequest::post(&format!("{BASE}/login")).json(body).call(&d).await;
        assert_eq!(code, 400);
        assert_eq!(res["status"], "fail");
    }
    assert_eq!(TestRequest::post(&format!("{BASE}/login")).call(&d).await.0, 400);
}

#[tokio::test]
async fn logout_without_token_is_401() {
    let (users, _, _) = seeded_users().await;
    let d = dispatcher(&users);

    let (code, body) = TestRequest::post(&format!("{BASE}/logout")).call(&d).await;
    assert_eq!(code, 401);
    assert_eq!(body, json!({ "status": "fail", "data": { "message": "No auth token provided" } }));
}

#[tokio::test]
async fn malformed_body_without_token_is_still_401() {
    let (users, _, _) = seeded_users().await;
    let d = dispatcher(&users);

    let (code, body) = TestRequest::post(&format!("{BASE}/logout"))
        .header("content-type", "application/json")
        .call_raw(&d, "{not json")
        .await;
    assert_eq!(code, 401);
    assert_eq!(body["data"]["message"], "No auth token provided");

    // Authenticated callers get the body error.
    let token = login(&d, BASE, "alice", "correct").await;
    let (code, body) = TestRequest::post(&format!("{BASE}/logout"))
        .token(&token)
        .header("content-type", "application/json")
        .call_raw(&d, "{not json")
        .await;
    assert_eq!(code, 400);
    assert_eq!(body["data"]["message"], "Invalid JSON body");
}

#[tokio::test]
async fn logout_revokes_only_the_current_token() {
    let (users, _, _) = seeded_users().await;
    let d = dispatcher(&users);
    let first = login(&d, BASE, "alice", "correct").await;
    let second = login(&d, BASE, "alice", "correct").await;

    let (code, body) = TestRequest::post(&format!("{BASE}/logout")).token(&first).call(&d).await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["message"], "You've been logged out!");

    let (code, body) = TestRequest::get(&format!("{BASE}/me")).token(&first).call(&d).await;
    assert_eq!(code, 401);
    assert_eq!(body["data"]["message"], "You must be logged in to do this.");
    assert_eq!(TestRequest::get(&format!("{BASE}/me")).token(&second).call(&d).await.0, 200);
}

#[tokio::test]
async fn logout_all_revokes_every_token() {
    let (users, _, _) = seeded_users().await;
    let d = dispatcher(&users);
    let token = login(&d, BASE, "alice", "correct").await;
    let other = login(&d, BASE, "alice", "correct").await;

    let (code, body) = TestRequest::post(&format!("{BASE}/logoutAll")).token(&token).call(&d).await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["message"], "You've been logged out of all sessions!");
    assert_eq!(TestRequest::get(&format!("{BASE}/me")).token(&token).call(&d).await.0, 401);
    assert_eq!(TestRequest::get(&format!("{BASE}/me")).token(&other).call(&d).await.0, 401);

    let fresh = login(&d, BASE, "alice", "correct").await;
    assert_eq!(TestRequest::post(&format!("{BASE}/logoutAll")).token(&fresh).call(&d).await.0, 200);
}

#[tokio::test]
async fn roles_distinguish_401_from_403() {
    let (users, alice, bob) = seeded_users().await;
    users.set_roles(&alice, &["admin"]).await.unwrap();
    users.set_roles(&bob, &["editor"]).await.unwrap();
    let d = dispatcher(&users);

    let (code, _) = TestRequest::get(&format!("{BASE}/admin")).call(&d).await;
    assert_eq!(code, 401, "roles imply authentication");

    let bob_token = login(&d, BASE, "bob", "hunter2").await;
    let (code, body) = TestRequest::get(&format!("{BASE}/admin")).token(&bob_token).call(&d).await;
    assert_eq!(code, 403);
    assert_eq!(body["data"]["message"], "You do not have permission to do this.");

    let alice_token = login(&d, BASE, "alice", "correct").await;
    assert_eq!(TestRequest::get(&format!("{BASE}/admin")).token(&alice_token).call(&d).await.0, 200);

    // Role alone is not enough once scopes are required.
    assert_eq!(TestRequest::post(&format!("{BASE}/admin")).token(&alice_token).call(&d).await.0, 403);
    users.set_scopes(&alice, &["read", "write"]).await.unwrap();
    assert_eq!(TestRequest::post(&format!("{BASE}/admin")).token(&alice_token).call(&d).await.0, 200);
}

#[tokio::test]
async fn hooks_fill_extra() {
    let (users, _, _) = seeded_users().await;
    let d = api(&users)
        .on_logged_in(|ctx: &RequestContext| Ok(Some(json!({ "greeting": format!("hi {}", ctx.user_id.as_deref().unwrap_or("?")) }))))
        .on_logged_out(|_ctx: &RequestContext| Err("audit log offline".into()))
        .build();

    let (code, body) = TestRequest::post(&format!("{BASE}/login"))
        .json(json!({ "username": "alice", "password": "correct" }))
        .call(&d)
        .await;
    assert_eq!(code, 200);
    let user_id = body["data"]["userId"].as_str().unwrap();
    assert_eq!(body["extra"]["greeting"], format!("hi {user_id}"));

    let token = body["data"]["authToken"].as_str().unwrap();
    let (code, body) = TestRequest::post(&format!("{BASE}/logout")).token(token).call(&d).await;
    assert_eq!(code, 200);
    assert!(body.get("extra").is_none(), "a failing hook omits extra: {body}");
}

#[tokio::test]
async fn custom_extractor_detail_is_returned_verbatim() {
    let (users, _, _) = seeded_users().await;
    let d = api(&users)
        .credential_extractor(|req: &Request| match req.header("authorization") {
            Some(value) => match value.strip_prefix("Bearer ") {
                Some(token) => Credential::Token(token.to_owned()),
                None => Credential::Rejected(json!({ "message": "Bearer scheme required", "code": 17 })),
            },
            None => Credential::Missing,
        })
        .add_route("me", RouteOptions::new().auth_required(true), Endpoints::new().get(EndpointDef::new(whoami)))
        .build();

    let (code, body) = TestRequest::get(&format!("{BASE}/me")).header("authorization", "Basic x").call(&d).await;
    assert_eq!(code, 401);
    assert_eq!(body["data"], json!({ "message": "Bearer scheme required", "code": 17 }));

    let (code, body) = TestRequest::get(&format!("{BASE}/me")).call(&d).await;
    assert_eq!(code, 401);
    assert_eq!(body["data"]["message"], "You must be logged in to do this.");

    let token = login(&d, BASE, "alice", "correct").await;
    let (code, _) = TestRequest::get(&format!("{BASE}/me"))
        .header("authorization", &format!("Bearer {token}"))
        .call(&d)
        .await;
    assert_eq!(code, 200);
}

#[tokio::test]
async fn default_auth_advertises_token_header() {
    let (users, _, _) = seeded_users().await;
    let d = dispatcher(&users);
    let res = TestRequest::get(&format!("{BASE}/nothing")).send(&d).await;
    assert!(res.header("access-control-allow-headers").unwrap().contains("X-Auth-Token"));
}
