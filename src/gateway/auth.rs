//! Bearer extraction and credential classification — the first two steps
//! of the gateway pipeline, shared by the provider routes, `/usage`, and the
//! admin routes.

use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::config::SALT_MAP;
use crate::error::{Error, Result};
use crate::token::{Claims, TokenService, VerifyError};

/// A classified bearer credential.
pub enum Credential {
    /// A client-supplied upstream-native key. Carries no identity.
    Native(String),
    /// A verified AIPipe identity token.
    Identity(Claims),
}

impl Credential {
    /// `true` for a native key — the pipeline skips budget admission and
    /// metering for these.
    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

/// Pull the bearer token out of `Authorization: Bearer <t>`.
///
/// # Errors
///
/// `401` if the header is absent or not a bearer scheme.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))
}

/// Recognize a client-supplied upstream-native key by prefix. Returns the
/// adapter name it belongs to, purely for logging — route selection is
/// driven by the URL path, not by the credential.
#[must_use]
pub fn native_provider(token: &str) -> Option<&'static str> {
    if token.starts_with("sk-or-") {
        Some("openrouter")
    } else if token.starts_with("sk-") {
        Some("openai")
    } else if token.starts_with("AIza") {
        Some("gemini")
    } else {
        None
    }
}

/// Classify `token`: a native-prefixed key, or else an AIPipe identity
/// token verified against `tokens`/the salt map.
///
/// # Errors
///
/// `401` distinguishing an invalid signature from a revoked (salt-rotated)
/// token, per the token service's own error taxonomy.
pub fn classify(token: &str, tokens: &TokenService) -> Result<Credential> {
    if native_provider(token).is_some() {
        return Ok(Credential::Native(token.to_string()));
    }

    classify_against(token, tokens, &SALT_MAP)
}

fn classify_against(token: &str, tokens: &TokenService, salt_map: &HashMap<String, String>) -> Result<Credential> {
    tokens.verify(token, salt_map).map(Credential::Identity).map_err(|e| match e {
        VerifyError::Invalid => Error::Unauthorized("invalid token".to_string()),
        VerifyError::Revoked => Error::Unauthorized("token no longer valid".to_string()),
    })
}

/// Require an [`Credential::Identity`], rejecting native keys — used by
/// `/usage` and the admin routes, which are identity-token-only.
///
/// # Errors
///
/// `401` if `credential` is a native key.
pub fn require_identity(credential: Credential) -> Result<Claims> {
    match credential {
        Credential::Identity(claims) => Ok(claims),
        Credential::Native(_) => Err(Error::Unauthorized("requires AIPipe JWT token".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openrouter_prefix_takes_priority_over_generic_sk() {
        assert_eq!(native_provider("sk-or-abc123"), Some("openrouter"));
    }

    #[test]
    fn plain_sk_prefix_is_openai() {
        assert_eq!(native_provider("sk-abc123"), Some("openai"));
    }

    #[test]
    fn aiza_prefix_is_gemini() {
        assert_eq!(native_provider("AIzaSyAbc"), Some("gemini"));
    }

    #[test]
    fn unrecognized_prefix_is_not_native() {
        assert_eq!(native_provider("eyJhbGciOiJIUzI1NiJ9.whatever"), None);
    }

    #[test]
    fn native_key_classifies_without_touching_the_token_service() {
        let tokens = TokenService::new("secret");
        let credential = classify("sk-test-key", &tokens).unwrap();
        assert!(credential.is_native());
    }

    #[test]
    fn identity_token_classifies_as_identity() {
        let tokens = TokenService::new("secret");
        let salts = HashMap::new();
        let token = tokens.mint("alice@example.com", &salts).unwrap();

        let credential = classify_against(&token, &tokens, &salts).unwrap();
        match credential {
            Credential::Identity(claims) => assert_eq!(claims.email, "alice@example.com"),
            Credential::Native(_) => panic!("expected identity credential"),
        }
    }

    #[test]
    fn require_identity_rejects_native_keys() {
        let err = require_identity(Credential::Native("sk-x".to_string()));
        assert!(err.is_err());
    }
}
