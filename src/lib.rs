//! LTI 1.3 tool provider.
//!
//! Implements the launch side of the IMS LTI 1.3 protocol: the OIDC
//! third-party-initiated login redirect, validation of platform-signed
//! id_tokens, and the materialization of one-shot launches into durable
//! sessions carried by a signed cookie plus a continuation token.
//!
//! The provider is an explicitly constructed value: build a [`ToolConfig`],
//! pass your [`Callbacks`] to [`ToolState::setup`], and [`AppState::deploy`]
//! serves until shutdown.

pub mod config;
pub mod errors;
pub mod server;
pub mod state;

pub use config::ToolConfig;
pub use errors::StartupError;
pub use server::launch::{LaunchRequest, LaunchSession, Whitelist, WhitelistEntry};
pub use server::persist::{AuthMethod, PlatformRegistration};
pub use server::redirect::{RedirectOptions, redirect};
pub use state::{AppState, Callbacks, ToolState};
