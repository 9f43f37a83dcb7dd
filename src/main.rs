//! Latch server entry point.
//!
//! Parses CLI arguments and environment variables, loads configuration,
//! initializes logging, and deploys the tool provider with a default
//! connect callback that echoes the launch identity as JSON. Embedders that
//! need real callbacks use the library crate directly.

use axum::Json;
use axum::response::{IntoResponse, Response};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, fmt};

use latch::{Callbacks, LaunchRequest, ToolConfig, ToolState, Whitelist};

/// CLI arguments definition for the latch server.
///
/// Field documentation is used by Clap to generate help text, so keep them
/// in rustdoc format.
#[derive(Parser, Debug, Clone)]
#[command(name = "latch", version, about = "LTI 1.3 tool provider", long_about = None)]
struct Args {
    /// Config file path
    #[arg(long = "config-file", value_name = "FILE", env = "LATCH_CONFIG_PATH")]
    config_file: Option<std::path::PathBuf>,

    /// Master secret for token/cookie signing and key encryption
    #[arg(
        long = "encryption-key",
        value_name = "KEY",
        env = "LATCH_ENCRYPTION_KEY",
        hide_env_values = true
    )]
    encryption_key: Option<String>,

    /// Bind address override (optional)
    #[arg(
        long = "bind-address",
        value_name = "BIND_ADDRESS",
        env = "LATCH_BIND_ADDRESS",
        required = false
    )]
    bind_address: Option<String>,

    /// SQLite database path override (optional)
    #[arg(
        long = "database",
        value_name = "DATABASE",
        env = "LATCH_DATABASE",
        required = false
    )]
    database: Option<std::path::PathBuf>,

    /// Tolerate missing launch cookies (local development only)
    #[arg(
        long = "dev-mode",
        value_name = "DEV_MODE",
        env = "LATCH_DEV_MODE",
        required = false
    )]
    dev_mode: Option<bool>,
}

/// Default connect callback for the standalone binary: a JSON echo of the
/// launch identity so a deployment can be smoke-tested end to end.
async fn echo_launch(request: LaunchRequest) -> Response {
    match request.session {
        Some(session) => Json(json!({
            "status": "ok",
            "user": session.token.user,
            "name": session.token.user_info.name,
            "roles": session.token.roles,
            "platform": session.token.iss,
            "deployment": session.token.deployment_id,
            "message_type": session.context.message_type,
            "context": session.context.context,
        }))
        .into_response(),
        None => Json(json!({ "status": "ok", "user": null })).into_response(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::new(env_filter))
        .init();

    // Load configuration from file, environment, and CLI overrides
    let config = ToolConfig::load_with_overrides(
        args.config_file,
        args.encryption_key,
        args.bind_address,
        args.database,
        args.dev_mode,
    )?;

    let callbacks = Callbacks::new(echo_launch);
    let app = ToolState::setup(config, callbacks, Whitelist::default()).await?;

    app.deploy().await
}
