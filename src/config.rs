//! Process configuration — environment variables plus the two editable
//! configuration constants (`budget`, `salt`) the design calls out as
//! operational levers rather than request-time data.

use std::collections::HashMap;
use std::sync::LazyLock;

use figment::{Figment, providers::Env};
use serde::{Deserialize, Serialize};

use crate::budget::BudgetRule;
use crate::{Error, Result};

/// Process configuration, assembled once at startup from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared HS256 signing secret for identity tokens. Required.
    #[serde(rename = "AIPIPE_SECRET")]
    pub aipipe_secret: String,

    /// Server-held OpenRouter API key, used for identity-token requests.
    #[serde(rename = "OPENROUTER_API_KEY", default)]
    pub openrouter_api_key: Option<String>,

    /// Server-held OpenAI API key.
    #[serde(rename = "OPENAI_API_KEY", default)]
    pub openai_api_key: Option<String>,

    /// Server-held Gemini API key.
    #[serde(rename = "GEMINI_API_KEY", default)]
    pub gemini_api_key: Option<String>,

    /// Comma/whitespace-separated list of admin email addresses.
    #[serde(rename = "ADMIN_EMAILS", default = "String::new")]
    pub admin_emails: String,

    /// Bind address (ambient — not part of the core contract).
    #[serde(rename = "BIND_HOST", default = "default_bind_host")]
    pub bind_host: String,

    /// Bind port (ambient).
    #[serde(rename = "BIND_PORT", default = "default_bind_port")]
    pub bind_port: u16,

    /// Connection string for the ledger's embedded SQLite database.
    #[serde(rename = "LEDGER_DATABASE_URL", default = "default_ledger_url")]
    pub ledger_database_url: String,

    /// JWKS endpoint of the OIDC identity provider whose credentials
    /// `Mint-from-credential` accepts. The identity provider itself is an
    /// external collaborator with no fixed endpoint; a real deployment
    /// still needs one configured.
    #[serde(rename = "OIDC_JWKS_URI", default = "default_jwks_uri")]
    pub oidc_jwks_uri: String,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_ledger_url() -> String {
    "sqlite://aipipe-ledger.db?mode=rwc".to_string()
}

fn default_jwks_uri() -> String {
    "https://www.googleapis.com/oauth2/v3/certs".to_string()
}

impl Config {
    /// Load configuration from the process environment, loading a local
    /// `.env` file first if one is present (development convenience only;
    /// absence is not an error).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] wrapped as [`Error::BadRequest`]-shaped text
    /// when a required variable (`AIPIPE_SECRET`) is missing or a present
    /// value fails to parse.
    pub fn load() -> Result<Self> {
        if dotenvy::dotenv().is_ok() {
            tracing::info!("loaded environment overrides from .env");
        }

        Figment::new()
            .merge(Env::raw())
            .extract()
            .map_err(|e| Error::Internal(format!("configuration error: {e}")))
    }

    /// Parsed admin email set.
    #[must_use]
    pub fn admin_emails(&self) -> Vec<String> {
        self.admin_emails
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Whether `email` is an administrator.
    #[must_use]
    pub fn is_admin(&self, email: &str) -> bool {
        let email = email.to_lowercase();
        self.admin_emails().iter().any(|e| e == &email)
    }
}

/// The budget policy table: an ordered list of rules, evaluated top to
/// bottom, first match wins. Edit this to change spend limits; the
/// pipeline never mutates it.
pub static BUDGET_POLICY: LazyLock<Vec<BudgetRule>> = LazyLock::new(|| {
    vec![
        // Example per-email override:
        // BudgetRule::email("alice@example.com", 25.0, 30),
        // Example per-domain override:
        // BudgetRule::domain("example.com", 5.0, 30),
        BudgetRule::wildcard(1.0, 1),
    ]
});

/// The per-email revocation salt map. A token is accepted only if it either
/// carries no `salt` claim entry for this server's map, or its `salt`
/// matches the current value here. Bumping an email's entry (or adding one)
/// revokes every outstanding token for that email without touching the
/// ledger.
pub static SALT_MAP: LazyLock<HashMap<String, String>> = LazyLock::new(HashMap::new);
