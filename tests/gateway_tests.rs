//! Black-box HTTP-surface tests driving the router directly with
//! `tower::ServiceExt::oneshot`, no bound socket and no real upstream calls.

use std::collections::HashMap;
use std::sync::Arc;

use aipipe_gateway::config::Config;
use aipipe_gateway::gateway::{AppState, create_router};
use aipipe_gateway::ledger::CostLedger;
use aipipe_gateway::provider::ProviderRegistry;
use aipipe_gateway::token::{JwksCache, TokenService};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "test-signing-secret";
const ADMIN: &str = "admin@example.com";

async fn test_router() -> (Router, TokenService) {
    let config = Config {
        aipipe_secret: SECRET.to_string(),
        openrouter_api_key: None,
        openai_api_key: None,
        gemini_api_key: None,
        admin_emails: ADMIN.to_string(),
        bind_host: "127.0.0.1".to_string(),
        bind_port: 0,
        ledger_database_url: "sqlite::memory:".to_string(),
        oidc_jwks_uri: "https://example.invalid/certs".to_string(),
    };

    let tokens = TokenService::new(config.aipipe_secret.clone());
    let ledger = CostLedger::connect(&config.ledger_database_url).await.unwrap();
    let providers = ProviderRegistry::with_defaults();
    let jwks = JwksCache::new();
    let http = reqwest::Client::new();

    let state = Arc::new(AppState {
        config,
        tokens: tokens.clone(),
        ledger,
        providers,
        jwks,
        http,
    });

    (create_router(state), tokens)
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_is_public_and_ok() {
    let (app, _) = test_router().await;

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unrecognized_provider_is_not_found() {
    let (app, _) = test_router().await;

    let resp = app
        .oneshot(Request::builder().uri("/not-a-provider/anything").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn provider_route_without_bearer_is_unauthorized() {
    let (app, _) = test_router().await;

    let resp = app
        .oneshot(Request::builder().uri("/openai/v1/chat/completions").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn usage_requires_identity_token_not_a_native_key() {
    let (app, _) = test_router().await;

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/usage")
                .header("Authorization", bearer("sk-a-native-openai-key"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_route_rejects_non_admin_identity() {
    let (app, tokens) = test_router().await;
    let token = tokens.mint("nobody@example.com", &HashMap::new()).unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/admin/usage")
                .header("Authorization", bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_cost_wrong_method_is_method_not_allowed() {
    let (app, tokens) = test_router().await;
    let token = tokens.mint(ADMIN, &HashMap::new()).unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/admin/cost")
                .header("Authorization", bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn admin_set_cost_is_reflected_in_usage() {
    let (app, tokens) = test_router().await;
    let admin_token = tokens.mint(ADMIN, &HashMap::new()).unwrap();
    let user_token = tokens.mint("carol@example.com", &HashMap::new()).unwrap();
    let today = chrono::Utc::now().date_naive().to_string();

    let set_resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/cost")
                .header("Authorization", bearer(&admin_token))
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "email": "carol@example.com", "date": today, "cost": 0.42 }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(set_resp.status(), StatusCode::OK);

    let usage_resp = app
        .oneshot(
            Request::builder()
                .uri("/usage")
                .header("Authorization", bearer(&user_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(usage_resp.status(), StatusCode::OK);

    let body = body_json(usage_resp).await;
    assert_eq!(body["email"], "carol@example.com");
    let cost = body["cost"].as_f64().unwrap();
    assert!((cost - 0.42).abs() < 1e-9, "expected 0.42, got {cost}");
}

#[tokio::test]
async fn budget_exceeded_blocks_provider_route_before_any_upstream_call() {
    let (app, tokens) = test_router().await;
    let admin_token = tokens.mint(ADMIN, &HashMap::new()).unwrap();
    let user_token = tokens.mint("dana@example.com", &HashMap::new()).unwrap();
    let today = chrono::Utc::now().date_naive().to_string();

    // Push dana over the wildcard policy's $1.00/day limit. If this reached
    // the real OpenAI API it would fail in this sandboxed test environment;
    // instead it must be rejected at the budget-admission step.
    let set_resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/cost")
                .header("Authorization", bearer(&admin_token))
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "email": "dana@example.com", "date": today, "cost": 5.0 }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(set_resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/openai/v1/chat/completions")
                .header("Authorization", bearer(&user_token))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "model": "gpt-4o-mini" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn proxy_rejects_non_absolute_targets() {
    let (app, _) = test_router().await;

    let resp = app
        .oneshot(Request::builder().uri("/proxy/not-a-url").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bare_provider_route_without_path_suffix_is_reachable() {
    let (app, _) = test_router().await;

    // No `/v1/...` suffix at all — this must match `/{provider}`, not fall
    // through to the 404 catch-all, and reach the adapter far enough to
    // fail on the empty `docs` array rather than on an unknown route.
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/similarity")
                .header("Authorization", bearer("sk-a-native-openai-key"))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "docs": [] }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn token_endpoint_requires_a_credential_query_param() {
    let (app, _) = test_router().await;

    let resp = app
        .oneshot(Request::builder().uri("/token").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
