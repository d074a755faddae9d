mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use waypost::rate_limit::{Consumed, RateLimitPolicy, RateLimitStore};
use waypost::services::memory::MemoryUsers;
use waypost::{Api, ApiConfig, BoxError, EndpointDef, Endpoints, Request, RequestContext, RouteOptions, StatusResponse};

use common::{TestRequest, services};

async fn ping(_ctx: RequestContext) -> StatusResponse {
    StatusResponse::ok(json!("pong"))
}

fn api(config: ApiConfig) -> Api {
    common::init_tracing();
    Api::new(config, services(&Arc::new(MemoryUsers::new())))
}

#[tokio::test]
async fn global_limit_applies_per_caller() {
    let d = api(ApiConfig::new().rate_limit(RateLimitPolicy::new(2, Duration::from_secs(60))))
        .add_route("ping", RouteOptions::new(), Endpoints::new().get(EndpointDef::new(ping)))
        .build();

    let mut codes = Vec::new();
    for _ in 0..3 {
        codes.push(TestRequest::get("/api/ping").send(&d).await.code());
    }
    assert_eq!(codes, [200, 200, 429]);

    let res = TestRequest::get("/api/ping").send(&d).await;
    assert_eq!(res.code(), 429);
    assert_eq!(res.json().unwrap()["status"], "fail");
    let retry_after: u64 = res.header("retry-after").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn route_limits_have_their_own_buckets() {
    let d = api(ApiConfig::new())
        .add_route(
            "scarce",
            RouteOptions::new().rate_limit(RateLimitPolicy::new(1, Duration::from_secs(60))),
            Endpoints::new().get(EndpointDef::new(ping)).post(EndpointDef::new(ping)),
        )
        .add_route("plenty", RouteOptions::new(), Endpoints::new().get(EndpointDef::new(ping)))
        .build();

    assert_eq!(TestRequest::get("/api/scarce").send(&d).await.code(), 200);
    assert_eq!(TestRequest::get("/api/scarce").send(&d).await.code(), 429);
    assert_eq!(TestRequest::post("/api/scarce").send(&d).await.code(), 200);
    for _ in 0..5 {
        assert_eq!(TestRequest::get("/api/plenty").send(&d).await.code(), 200);
    }
}

#[tokio::test]
async fn malformed_bodies_still_consume_points() {
    let d = api(ApiConfig::new())
        .add_route(
            "scarce",
            RouteOptions::new().rate_limit(RateLimitPolicy::new(1, Duration::from_secs(60))),
            Endpoints::new().post(EndpointDef::new(ping)),
        )
        .build();

    let mut codes = Vec::new();
    for _ in 0..3 {
        let (code, _) = TestRequest::post("/api/scarce")
            .header("content-type", "application/json")
            .call_raw(&d, "{not json")
            .await;
        codes.push(code);
    }
    assert_eq!(codes, [400, 429, 429]);
}

#[tokio::test]
async fn custom_key_function() {
    let d = api(ApiConfig::new().rate_limit(RateLimitPolicy::new(1, Duration::from_secs(60))))
        .rate_limit_key(|req: &Request| req.header("x-api-key").map(|k| format!("key:{k}")))
        .add_route("ping", RouteOptions::new(), Endpoints::new().get(EndpointDef::new(ping)))
        .build();

    assert_eq!(TestRequest::get("/api/ping").header("x-api-key", "a").send(&d).await.code(), 200);
    assert_eq!(TestRequest::get("/api/ping").header("x-api-key", "b").send(&d).await.code(), 200);
    assert_eq!(TestRequest::get("/api/ping").header("x-api-key", "a").send(&d).await.code(), 429);
    // Falls back to the address when the function has no key.
    assert_eq!(TestRequest::get("/api/ping").send(&d).await.code(), 200);
}

/// Counts calls and fails every one after the first.
#[derive(Default)]
struct FlakyStore {
    calls: AtomicUsize,
}

#[async_trait]
impl RateLimitStore for FlakyStore {
    async fn consume(&self, _key: &str, policy: RateLimitPolicy) -> Result<Consumed, BoxError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Consumed::Allowed { remaining: policy.points - 1 })
        } else {
            Err("limit store unreachable".into())
        }
    }
}

#[tokio::test]
async fn store_failures_are_500() {
    let store = Arc::new(FlakyStore::default());
    let d = api(ApiConfig::new().rate_limit(RateLimitPolicy::new(10, Duration::from_secs(60))))
        .rate_limit_store(store.clone())
        .add_route("ping", RouteOptions::new(), Endpoints::new().get(EndpointDef::new(ping)))
        .build();

    assert_eq!(TestRequest::get("/api/ping").send(&d).await.code(), 200);
    assert_eq!(TestRequest::get("/api/ping").send(&d).await.code(), 500);
    assert_eq!(store.calls.load(Ordering::SeqCst), 2);
}
