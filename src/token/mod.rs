//! Token service — mints and verifies the gateway's own HS256 identity
//! tokens, and verifies the third-party OIDC credential exchanged for one.
//!
//! There is no token store: the token *is* the state. Revocation works by
//! rotating a per-email entry in the server's salt map (see
//! [`crate::config::SALT_MAP`]) rather than by tracking issued tokens —
//! deliberately, so an operator can revoke one user without a keyserver.

pub mod oidc;

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub use oidc::{JwksCache, OidcError};

/// Payload carried by an identity token: a verified email, plus the salt
/// value (if any) that was current for that email at mint time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Verified email address.
    pub email: String,
    /// Revocation salt captured at mint time, if the server had one for
    /// this email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// Why a presented token was rejected.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Signature or structural validation failed — the token was never
    /// valid or has been tampered with.
    #[error("invalid token")]
    Invalid,
    /// The signature is valid but the email's salt has since been
    /// rotated — this token is no longer valid.
    #[error("token revoked")]
    Revoked,
}

/// Mints and verifies HS256 identity tokens against one shared secret.
#[derive(Clone)]
pub struct TokenService {
    secret: String,
}

impl TokenService {
    /// Build a service bound to `secret` (the process's `AIPIPE_SECRET`).
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Mint an identity token for `email`, consulting `salt_map` for a
    /// current revocation salt to embed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the `jsonwebtoken` encoder itself fails
    /// (it does not, for HS256 with a non-empty key, in practice).
    pub fn mint(&self, email: &str, salt_map: &HashMap<String, String>) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            email: email.to_string(),
            salt: salt_map.get(email).cloned(),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    /// Verify `token`, then check it against `salt_map` for revocation.
    ///
    /// Acceptable iff the signature validates AND (the salt map has no
    /// entry for this email OR the token's `salt` equals the map's current
    /// value).
    ///
    /// # Errors
    ///
    /// [`VerifyError::Invalid`] if the signature or structure is wrong,
    /// [`VerifyError::Revoked`] if the signature is fine but the salt no
    /// longer matches.
    pub fn verify(&self, token: &str, salt_map: &HashMap<String, String>) -> Result<Claims, VerifyError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|_| VerifyError::Invalid)?;

        let claims = data.claims;
        if let Some(current_salt) = salt_map.get(&claims.email) {
            if claims.salt.as_deref() != Some(current_salt.as_str()) {
                return Err(VerifyError::Revoked);
            }
        }

        Ok(claims)
    }
}
