/// Latch configuration defaults module.
///
/// This module provides default value helpers for serde deserialization
/// in config structs. These functions ensure consistent defaulting across
/// `components.rs` and `mod.rs`, and handle cases where entire config blocks
/// are missing from the configuration file.
use super::components::{CookieOptions, DatabaseConfig, RouteConfig, SameSitePolicy};
use std::path::PathBuf;

/// Default bind address for the provider.
pub(crate) fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

/// Default SQLite database path.
pub(crate) fn default_database() -> DatabaseConfig {
    DatabaseConfig {
        path: PathBuf::from("latch.sqlite"),
    }
}

/// Default reserved routes.
pub(crate) fn default_routes() -> RouteConfig {
    RouteConfig::default()
}

pub(crate) fn default_app_route() -> String {
    "/".to_string()
}

pub(crate) fn default_login_route() -> String {
    "/login".to_string()
}

pub(crate) fn default_session_timeout_route() -> String {
    "/sessionTimeout".to_string()
}

pub(crate) fn default_invalid_token_route() -> String {
    "/invalidToken".to_string()
}

pub(crate) fn default_keyset_route() -> String {
    "/keys".to_string()
}

/// Default cookie options: Lax, not forced Secure.
pub(crate) fn default_cookies() -> CookieOptions {
    CookieOptions {
        same_site: SameSitePolicy::Lax,
        secure: false,
    }
}

pub(crate) fn default_same_site() -> SameSitePolicy {
    SameSitePolicy::Lax
}

/// CORS is enabled unless switched off.
pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_false() -> bool {
    false
}

/// Maximum accepted age of an inbound id_token, in seconds.
/// `null` in the configuration file disables the check entirely.
pub(crate) fn default_token_max_age() -> Option<u64> {
    Some(10)
}
