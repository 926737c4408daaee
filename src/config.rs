use serde::{Deserialize, Serialize};

pub const DEFAULT_STALE_AFTER_MINUTES: u64 = 90;
pub const DEFAULT_DEDUP_TTL_SECONDS: u64 = 300;
pub const DEFAULT_QUOTA_LIMIT: i64 = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Origins echoed back in CORS headers. Anything else gets no
    /// `access-control-allow-origin` at all; a wildcard is never sent.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Shared secret for the server-to-server endpoints (completion webhook
    /// and supplier-match ingestion). Unset means those endpoints trust the
    /// network, which matches the legacy deployment behind a private mesh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_secret: Option<String>,
    /// Pending searches older than this are reconciled by the sweep.
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u64,
    #[serde(default = "default_dedup_ttl_seconds")]
    pub dedup_ttl_seconds: u64,
    /// Ledger limit seeded for users who have never launched a search.
    #[serde(default = "default_quota_limit")]
    pub default_quota_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_endpoint: Option<String>,
    #[serde(default)]
    pub api_tokens: Vec<ApiTokenConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            allowed_origins: Vec::new(),
            callback_secret: None,
            stale_after_minutes: default_stale_after_minutes(),
            dedup_ttl_seconds: default_dedup_ttl_seconds(),
            default_quota_limit: default_quota_limit(),
            analytics_endpoint: None,
            api_tokens: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn user_for_token(&self, token: &str) -> Option<&str> {
        self.api_tokens
            .iter()
            .find(|binding| binding.enabled && binding.token == token)
            .map(|binding| binding.user_id.as_str())
    }
}

/// Maps a bearer token to a user. Stands in for the managed auth provider
/// the hosted product delegates sessions to.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiTokenConfig {
    pub user_id: String,
    pub token: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl std::fmt::Debug for ApiTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenConfig")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ApiTokenConfig {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
            enabled: true,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_stale_after_minutes() -> u64 {
    DEFAULT_STALE_AFTER_MINUTES
}

fn default_dedup_ttl_seconds() -> u64 {
    DEFAULT_DEDUP_TTL_SECONDS
}

fn default_quota_limit() -> i64 {
    DEFAULT_QUOTA_LIMIT
}

fn default_enabled() -> bool {
    true
}
