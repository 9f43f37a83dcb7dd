/// Latch configuration components module.
///
/// This module defines user-facing configuration structures and enums for the
/// provider. It provides the building blocks for the root `ToolConfig` in
/// `mod.rs`.
use super::defaults;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Reserved routes owned by the provider. Every other path falls through to
/// the launch state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Landing page and OIDC callback target.
    #[serde(default = "defaults::default_app_route")]
    pub app: String,

    /// OIDC third-party-initiated login entry.
    #[serde(default = "defaults::default_login_route")]
    pub login: String,

    /// Where expired sessions are sent.
    #[serde(default = "defaults::default_session_timeout_route")]
    pub session_timeout: String,

    /// Where rejected tokens are sent.
    #[serde(default = "defaults::default_invalid_token_route")]
    pub invalid_token: String,

    /// Public JWKS of the tool.
    #[serde(default = "defaults::default_keyset_route")]
    pub keyset: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            app: defaults::default_app_route(),
            login: defaults::default_login_route(),
            session_timeout: defaults::default_session_timeout_route(),
            invalid_token: defaults::default_invalid_token_route(),
            keyset: defaults::default_keyset_route(),
        }
    }
}

/// SameSite policy applied to the cookies the provider sets.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    #[default]
    Lax,
    /// Cross-site launches; forces the Secure attribute.
    None,
}

impl SameSitePolicy {
    pub fn as_same_site(self) -> cookie::SameSite {
        match self {
            SameSitePolicy::Strict => cookie::SameSite::Strict,
            SameSitePolicy::Lax => cookie::SameSite::Lax,
            SameSitePolicy::None => cookie::SameSite::None,
        }
    }
}

/// Cookie attributes for the state and session cookies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CookieOptions {
    #[serde(default = "defaults::default_same_site")]
    pub same_site: SameSitePolicy,

    #[serde(default = "defaults::default_false")]
    pub secure: bool,
}

impl CookieOptions {
    /// The effective Secure attribute. `SameSite=None` is only honored by
    /// browsers on secure cookies, so it forces the flag on.
    pub fn effective_secure(&self) -> bool {
        self.secure || self.same_site == SameSitePolicy::None
    }
}

impl Default for CookieOptions {
    fn default() -> Self {
        defaults::default_cookies()
    }
}

/// TLS key material for serving over HTTPS.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SslConfig {
    /// PEM private key path.
    pub key: Option<String>,
    /// PEM certificate chain path.
    pub cert: Option<String>,
}

/// Store backing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        defaults::default_database()
    }
}

/// Session continuation hardening knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// When set, minted continuation tokens carry an issue timestamp and are
    /// rejected once older than this many seconds. Off by default.
    #[serde(default)]
    pub ltik_max_age_secs: Option<u64>,
}
