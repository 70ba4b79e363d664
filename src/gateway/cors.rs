//! CORS — every route, including every error response, carries the same
//! permissive header set. Implemented as middleware rather than a library
//! layer because the header set is unconditional: even a `404` or `500`
//! produced deep in a handler must carry it, and `OPTIONS` must short-circuit
//! before a handler ever runs.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET, POST";
const DEFAULT_ALLOW_HEADERS: &str = "Authorization, Content-Type";
const EXPOSE_HEADERS: &str = "*";
const MAX_AGE: &str = "86400";

/// Answer `OPTIONS` preflight requests directly and stamp CORS headers onto
/// every other response.
pub async fn middleware(req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let requested_headers = req.headers().get("access-control-request-headers").cloned();
        let mut response = StatusCode::OK.into_response();
        apply(response.headers_mut(), requested_headers);
        return response;
    }

    let mut response = next.run(req).await;
    apply(response.headers_mut(), None);
    response
}

fn apply(headers: &mut HeaderMap, echo_requested_headers: Option<HeaderValue>) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static(ALLOW_ORIGIN));
    headers.insert("access-control-allow-methods", HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(
        "access-control-allow-headers",
        echo_requested_headers.unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOW_HEADERS)),
    );
    headers.insert("access-control-expose-headers", HeaderValue::from_static(EXPOSE_HEADERS));
    headers.insert("access-control-max-age", HeaderValue::from_static(MAX_AGE));
}
