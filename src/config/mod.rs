use serde::{Deserialize, Serialize};
/**
 * Latch configuration root module.
 *
 * - Defines the root configuration struct (`ToolConfig`) and its defaults.
 * - Provides config file loading, CLI/env override logic, and error reporting.
 * - Uses `components.rs` for types/enums and `defaults.rs` for default helpers.
 */
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use components::{
    CookieOptions, DatabaseConfig, RouteConfig, SameSitePolicy, SessionConfig, SslConfig,
};

pub mod components;
pub mod defaults;

// Root configuration for the tool provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolConfig {
    /// Master secret: signs continuation tokens and cookies, and keys the
    /// at-rest cipher for private keys. Required.
    #[serde(default)]
    pub encryption_key: String,

    /// Address the provider listens on.
    #[serde(default = "defaults::default_bind_address")]
    pub bind_address: String,

    /// Store backing configuration.
    #[serde(default = "defaults::default_database")]
    pub database: DatabaseConfig,

    /// Reserved routes.
    #[serde(default = "defaults::default_routes")]
    pub routes: RouteConfig,

    /// Serve over HTTPS. Requires both `ssl.key` and `ssl.cert`.
    #[serde(default = "defaults::default_false")]
    pub https: bool,

    /// TLS key material, used when `https` is set.
    #[serde(default)]
    pub ssl: Option<SslConfig>,

    /// Whether the permissive CORS layer is applied.
    #[serde(default = "defaults::default_true")]
    pub cors: bool,

    /// Cookie attributes.
    #[serde(default = "defaults::default_cookies")]
    pub cookies: CookieOptions,

    /// Tolerate missing state/session cookies (cookie-less local testing).
    /// Validation still runs when cookies are present.
    #[serde(default = "defaults::default_false")]
    pub dev_mode: bool,

    /// Maximum accepted id_token age in seconds; `null` disables the check.
    #[serde(default = "defaults::default_token_max_age")]
    pub token_max_age: Option<u64>,

    /// Continuation-token hardening.
    #[serde(default)]
    pub session: SessionConfig,

    /// Static asset root, served under `/static` when set.
    #[serde(default)]
    pub static_path: Option<PathBuf>,
}

impl ToolConfig {
    /// Load config from file and apply CLI overrides.
    ///
    /// Loads configuration from a YAML file if one is given, otherwise uses
    /// defaults. Then applies command-line/env overrides with highest
    /// precedence.
    pub fn load_with_overrides(
        config_path: Option<PathBuf>,
        encryption_key: Option<String>,
        bind_address: Option<String>,
        database_path: Option<PathBuf>,
        dev_mode: Option<bool>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = match config_path {
            Some(path) => {
                tracing::debug!("Reading from configuration file {:?}", path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::Parse(path.clone(), format!("I/O error: {}", e)))?;
                Self::parse_yaml_with_path(&path, &text)?
            }
            None => {
                tracing::debug!("No configuration file given, initializing with defaults");
                Self {
                    bind_address: defaults::default_bind_address(),
                    database: defaults::default_database(),
                    routes: defaults::default_routes(),
                    cors: defaults::default_true(),
                    cookies: defaults::default_cookies(),
                    token_max_age: defaults::default_token_max_age(),
                    ..Self::default()
                }
            }
        };

        // Apply CLI/env overrides (highest precedence)
        if let Some(key) = encryption_key {
            cfg.encryption_key = key;
        }
        if let Some(addr) = bind_address {
            cfg.bind_address = addr;
        }
        if let Some(path) = database_path {
            cfg.database.path = path;
        }
        if let Some(dev) = dev_mode {
            cfg.dev_mode = dev;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse YAML configuration with enhanced error reporting.
    ///
    /// Includes line/column information in error messages for better
    /// debugging.
    fn parse_yaml_with_path(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str::<Self>(text).map_err(|e| {
            let msg = if let Some(loc) = e.location() {
                format!(
                    "yaml error at line {}, column {}: {}",
                    loc.line(),
                    loc.column(),
                    e
                )
            } else {
                format!("yaml error: {}", e)
            };

            ConfigError::Parse(path.to_path_buf(), msg)
        })
    }

    /// Reject configurations that must not reach the listener.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encryption_key.is_empty() {
            return Err(ConfigError::Invalid(
                "encryption_key is required".to_string(),
            ));
        }
        for route in [
            &self.routes.app,
            &self.routes.login,
            &self.routes.session_timeout,
            &self.routes.invalid_token,
            &self.routes.keyset,
        ] {
            if !route.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "route '{}' must start with '/'",
                    route
                )));
            }
        }
        if self.https {
            let ssl = self.ssl.as_ref().ok_or_else(|| {
                ConfigError::Invalid("https requires an ssl section".to_string())
            })?;
            if ssl.key.as_deref().unwrap_or_default().is_empty()
                || ssl.cert.as_deref().unwrap_or_default().is_empty()
            {
                return Err(ConfigError::Invalid(
                    "https requires both ssl.key and ssl.cert".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// Errors during configuration loading/parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration content.
    ///
    /// Tuple fields:
    /// - 0: Path to the configuration file that failed to parse
    /// - 1: Error message from the underlying parser
    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, String),

    /// The configuration parsed but cannot be served.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
