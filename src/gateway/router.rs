//! HTTP router and handlers — the gateway pipeline itself: route, resolve
//! identity, admit against budget, rewrite via the matched adapter, forward
//! upstream, extract cost from the response, meter, and return the
//! upstream bytes unmodified.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use super::auth::{self, Credential};
use super::cors;
use crate::budget;
use crate::config::{Config, SALT_MAP};
use crate::error::{Error, Result};
use crate::ledger::CostLedger;
use crate::provider::{
    CostContext, IncomingRequest, ProviderAdapter, ProviderRegistry, ProxySpec, TransformOutcome, strip_hop_by_hop,
    strip_response_headers,
};
use crate::sse::SseSplitter;
use crate::token::{JwksCache, TokenService};

/// Shared application state — everything read-only after process start
/// (the token service, provider registry, server config) plus the one
/// mutable/concurrent collaborator, the cost ledger.
pub struct AppState {
    /// Process configuration.
    pub config: Config,
    /// HS256 identity-token mint/verify.
    pub tokens: TokenService,
    /// The single-writer cost ledger.
    pub ledger: CostLedger,
    /// Registered provider adapters.
    pub providers: ProviderRegistry,
    /// JWKS cache for inbound OIDC credential verification.
    pub jwks: JwksCache,
    /// Shared upstream HTTP client.
    pub http: reqwest::Client,
}

/// Build the router: CORS on every route (including errors and `OPTIONS`
/// preflight, handled as middleware so it applies before any handler
/// runs), tracing, and the gateway's full route table.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/token", get(token_handler))
        .route("/usage", get(usage_handler))
        .route("/admin/usage", get(admin_usage_handler))
        .route("/admin/token", get(admin_token_handler))
        .route(
            "/admin/cost",
            axum::routing::post(admin_cost_handler).fallback(admin_cost_wrong_method),
        )
        .route("/proxy/{*url}", any(proxy_handler))
        .route("/{provider}", any(provider_handler))
        .route("/{provider}/{*path}", any(provider_handler))
        .fallback(unknown_route_handler)
        .layer(axum::middleware::from_fn(cors::middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn unknown_route_handler() -> Result<Response> {
    Err(Error::NotFound("Unknown provider".to_string()))
}

async fn admin_cost_wrong_method() -> Result<Response> {
    Err(Error::MethodNotAllowed("POST /admin/cost".to_string()))
}

// ---------------------------------------------------------------------
// /token — mint-from-credential
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenQuery {
    credential: Option<String>,
}

async fn token_handler(State(state): State<Arc<AppState>>, Query(q): Query<TokenQuery>) -> Result<Response> {
    let credential = q
        .credential
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::BadRequest("missing credential".to_string()))?;

    let verified = crate::token::oidc::verify(&state.jwks, &credential, &state.config.oidc_jwks_uri)
        .await
        .map_err(|e| Error::Unauthorized(e.to_string()))?;

    let token = state
        .tokens
        .mint(&verified.email, &SALT_MAP)
        .map_err(|e| Error::Internal(format!("failed to mint token: {e}")))?;

    Ok(Json(json!({ "token": token, "email": verified.email })).into_response())
}

// ---------------------------------------------------------------------
// /usage — self-usage query for the bearer identity
// ---------------------------------------------------------------------

async fn usage_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let claims = identity_from_headers(&headers, &state)?;
    let policy = budget::resolve(&claims.email);
    let report = state.ledger.usage(&claims.email, policy.days).await?;

    Ok(Json(json!({
        "email": report.email,
        "days": report.days,
        "cost": report.cost,
        "limit": policy.limit,
        "usage": report.usage.iter().map(|d| json!({ "date": d.date, "cost": d.cost })).collect::<Vec<_>>(),
    }))
    .into_response())
}

// ---------------------------------------------------------------------
// /admin/* — identity-token-only, caller's email must be in the admin set
// ---------------------------------------------------------------------

fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<String> {
    let claims = identity_from_headers(headers, state)?;
    if !state.config.is_admin(&claims.email) {
        return Err(Error::Forbidden("admin access required".to_string()));
    }
    Ok(claims.email)
}

async fn admin_usage_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    require_admin(&headers, &state)?;
    let rows = state.ledger.all_usage().await?;
    let data: Vec<Value> = rows
        .into_iter()
        .map(|r| json!({ "email": r.email, "date": r.date, "cost": r.cost }))
        .collect();
    Ok(Json(json!({ "data": data })).into_response())
}

#[derive(Deserialize)]
struct AdminTokenQuery {
    email: Option<String>,
}

async fn admin_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<AdminTokenQuery>,
) -> Result<Response> {
    require_admin(&headers, &state)?;
    let email = q.email.filter(|e| !e.is_empty()).ok_or_else(|| Error::BadRequest("missing email".to_string()))?;

    let token = state
        .tokens
        .mint(&email, &SALT_MAP)
        .map_err(|e| Error::Internal(format!("failed to mint token: {e}")))?;

    Ok(Json(json!({ "token": token, "email": email })).into_response())
}

#[derive(Deserialize)]
struct AdminCostBody {
    email: String,
    date: String,
    cost: f64,
}

async fn admin_cost_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AdminCostBody>,
) -> Result<Response> {
    require_admin(&headers, &state)?;
    state.ledger.set_cost(&body.email, &body.date, body.cost).await?;
    Ok(Json(json!({ "email": body.email, "date": body.date, "cost": body.cost })).into_response())
}

/// Extract and verify the bearer as an identity token, rejecting native
/// keys — shared by `/usage` and every `/admin/*` route.
fn identity_from_headers(headers: &HeaderMap, state: &AppState) -> Result<crate::token::Claims> {
    let bearer = auth::extract_bearer(headers)?;
    let credential = auth::classify(bearer, &state.tokens)?;
    auth::require_identity(credential)
}

// ---------------------------------------------------------------------
// /proxy/<absolute-url> — unauthenticated URL pass-through
// ---------------------------------------------------------------------

const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<Response> {
    let raw = uri.path_and_query().map(axum::http::uri::PathAndQuery::as_str).unwrap_or_else(|| uri.path());
    let target = raw.strip_prefix("/proxy/").unwrap_or(raw);

    if !target.starts_with("http") {
        return Err(Error::BadRequest("URL must begin with http".to_string()));
    }

    let req_headers = strip_hop_by_hop(&headers);
    let request = state
        .http
        .request(method, target)
        .headers(req_headers)
        .body(body)
        .timeout(PROXY_TIMEOUT);

    let resp = match request.send().await {
        Ok(r) => r,
        Err(e) if e.is_timeout() => return Err(Error::UpstreamTimeout(format!("{target} timed out"))),
        Err(e) => return Err(Error::Internal(format!("proxy request failed: {e}"))),
    };

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let resp_headers = strip_response_headers(resp.headers());

    let mut builder = Response::builder().status(status);
    for (name, value) in &resp_headers {
        builder = builder.header(name, value);
    }
    builder = builder.header(
        "X-Proxy-URL",
        HeaderValue::from_str(target).unwrap_or_else(|_| HeaderValue::from_static("")),
    );

    let body = Body::from_stream(resp.bytes_stream());
    builder
        .body(body)
        .map_err(|e| Error::Internal(format!("failed to build proxy response: {e}")))
}

// ---------------------------------------------------------------------
// /<provider>/... — the gateway pipeline proper
// ---------------------------------------------------------------------

/// Matches both `/{provider}` (bare, e.g. `/similarity`) and
/// `/{provider}/{*path}` — the wildcard segment, when present, is ignored
/// here and recovered from `OriginalUri` instead via `provider_suffix`.
#[derive(Deserialize)]
struct ProviderParam {
    provider: String,
}

async fn provider_handler(
    State(state): State<Arc<AppState>>,
    Path(ProviderParam { provider }): Path<ProviderParam>,
    method: Method,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<Response> {
    let Some(adapter) = state.providers.get(&provider) else {
        return Err(Error::NotFound("Unknown provider".to_string()));
    };

    // Steps 1-2: extract and classify the bearer credential.
    let bearer = auth::extract_bearer(&headers)?;
    let credential = auth::classify(bearer, &state.tokens)?;
    let native = credential.is_native();
    let native_key = match &credential {
        Credential::Native(k) => Some(k.clone()),
        Credential::Identity(_) => None,
    };
    let email = match &credential {
        Credential::Identity(claims) => Some(claims.email.clone()),
        Credential::Native(_) => None,
    };

    // Step 3: budget admission, identity-token requests only.
    if let Some(email) = &email {
        let policy = budget::resolve(email);
        let sum = state.ledger.sum(email, policy.days).await?;
        if sum >= policy.limit {
            return Err(Error::BudgetExceeded(format!(
                "Usage ${sum:.4} / ${:.4} in {} days",
                policy.limit, policy.days
            )));
        }
    }

    // Step 4: adapter transform.
    let suffix = provider_suffix(&provider, &uri);
    let incoming = IncomingRequest {
        path: &suffix,
        method: method.clone(),
        headers: &headers,
        body: &body,
        native,
        native_key: native_key.as_deref(),
    };
    let outcome = adapter.transform(&incoming, &state.config).await?;

    match outcome {
        TransformOutcome::Direct(direct) => {
            if let Some(email) = &email {
                let cost = adapter.cost(direct.model.as_deref(), direct.usage.as_ref());
                if cost > 0.0 {
                    if let Err(e) = state.ledger.add(email, cost).await {
                        tracing::error!(error = %e, email, "failed to meter direct-result cost");
                    }
                }
            }
            Ok(Json(direct.body).into_response())
        }
        TransformOutcome::Proxy(spec) => {
            forward_upstream(Arc::clone(&state), adapter, spec, method, suffix, body, email).await
        }
    }
}

/// The path suffix an adapter sees: everything after `/{provider}`,
/// including the query string.
fn provider_suffix(provider: &str, uri: &axum::http::Uri) -> String {
    let raw = uri.path_and_query().map(axum::http::uri::PathAndQuery::as_str).unwrap_or_else(|| uri.path());
    let prefix = format!("/{provider}");
    raw.strip_prefix(&prefix).unwrap_or(raw).to_string()
}

async fn forward_upstream(
    state: Arc<AppState>,
    adapter: Arc<dyn ProviderAdapter>,
    spec: ProxySpec,
    method: Method,
    req_path: String,
    req_body: Bytes,
    email: Option<String>,
) -> Result<Response> {
    let req_headers = strip_hop_by_hop(&spec.headers);

    // Step 6: upstream fetch, preserving method and body.
    let resp = state
        .http
        .request(method, &spec.url)
        .headers(req_headers)
        .body(spec.body)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, provider = adapter.name(), "upstream request failed");
            Error::Internal(format!("upstream request failed: {e}"))
        })?;

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let resp_headers = strip_response_headers(resp.headers());

    let mut builder = Response::builder().status(status);
    for (name, value) in &resp_headers {
        builder = builder.header(name, value);
    }

    if content_type.contains("application/json") {
        // Step 7 (json branch): buffer, parse, cost, meter, forward verbatim.
        let full = resp.bytes().await.map_err(|e| Error::Internal(format!("failed to read upstream body: {e}")))?;

        if let Ok(event) = serde_json::from_slice::<Value>(&full) {
            let parsed = adapter.parse(&event);
            if let Some(email) = &email {
                let ctx = CostContext { req_path: &req_path, req_body: &req_body, env: &state.config };
                let cost = adapter.cost_async(parsed.model.as_deref(), parsed.usage.as_ref(), &ctx).await;
                if cost > 0.0 {
                    if let Err(e) = state.ledger.add(email, cost).await {
                        tracing::error!(error = %e, email, "failed to meter JSON response cost");
                    }
                }
            }
        }
        return builder.body(Body::from(full)).map_err(|e| Error::Internal(format!("failed to build response: {e}")));
    }

    if content_type.contains("text/event-stream") {
        // Step 7 (sse branch): interpose the splitter; meter once at stream end,
        // after the client has already received every byte.
        let (tx, rx) = oneshot::channel();
        let splitter = SseSplitter::new(resp.bytes_stream(), Arc::clone(&adapter), tx);

        if let Some(email) = email {
            let meter_state = Arc::clone(&state);
            tokio::spawn(async move {
                let Ok((model, usage)) = rx.await else { return };
                let ctx = CostContext { req_path: &req_path, req_body: &req_body, env: &meter_state.config };
                let cost = adapter.cost_async(model.as_deref(), usage.as_ref(), &ctx).await;
                if cost > 0.0 {
                    if let Err(e) = meter_state.ledger.add(&email, cost).await {
                        tracing::error!(error = %e, email, "failed to meter SSE stream cost");
                    }
                }
            });
        }

        return builder
            .body(Body::from_stream(splitter))
            .map_err(|e| Error::Internal(format!("failed to build streaming response: {e}")));
    }

    // Step 7 (other branch): forward as-is, no metering — binary media
    // currently accrues zero cost, a known gap.
    let full = resp.bytes().await.map_err(|e| Error::Internal(format!("failed to read upstream body: {e}")))?;
    builder.body(Body::from(full)).map_err(|e| Error::Internal(format!("failed to build response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_suffix_strips_prefix_and_keeps_query() {
        let uri: axum::http::Uri = "/openai/v1/chat/completions?x=1".parse().unwrap();
        assert_eq!(provider_suffix("openai", &uri), "/v1/chat/completions?x=1");
    }

    #[test]
    fn provider_suffix_root_is_empty() {
        let uri: axum::http::Uri = "/openai/".parse().unwrap();
        assert_eq!(provider_suffix("openai", &uri), "/");
    }

    #[test]
    fn provider_suffix_with_no_trailing_segment_is_empty() {
        let uri: axum::http::Uri = "/gemini".parse().unwrap();
        assert_eq!(provider_suffix("gemini", &uri), "");
    }
}
