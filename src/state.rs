/// The provider state is an explicitly constructed value carrying the
/// store, key ring, platform registry, validator, continuation codec and
/// the user callbacks. There is no process-wide singleton; everything a
/// request needs hangs off this struct.
use axum::extract::FromRef;
use axum::response::Response;
use axum_extra::extract::cookie::Key;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::config::ToolConfig;
use crate::errors::StartupError;
use crate::server::crypto::{Cipher, cookie_key_from_secret};
use crate::server::keys::KeyRing;
use crate::server::launch::{LaunchRequest, Whitelist};
use crate::server::ltik::LtikCodec;
use crate::server::persist::{SqliteStore, Store};
use crate::server::registry::PlatformRegistry;
use crate::server::validate::TokenValidator;

/// Async callback invoked for authenticated (or whitelisted) requests.
pub type LaunchHandler = Arc<dyn Fn(LaunchRequest) -> BoxFuture<'static, Response> + Send + Sync>;

/// Async callback invoked on the session-timeout / invalid-token routes.
pub type ErrorHandler = Arc<dyn Fn() -> BoxFuture<'static, Response> + Send + Sync>;

/// User callbacks, fixed at construction time so none can be unset when a
/// launch arrives.
#[derive(Clone)]
pub struct Callbacks {
    pub on_connect: LaunchHandler,
    /// Invoked for deep-linking launches; falls back to `on_connect` when
    /// absent.
    pub on_deep_linking: Option<LaunchHandler>,
    pub on_session_timeout: Option<ErrorHandler>,
    pub on_invalid_token: Option<ErrorHandler>,
}

impl Callbacks {
    pub fn new<F, Fut>(on_connect: F) -> Self
    where
        F: Fn(LaunchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self {
            on_connect: Arc::new(move |request| Box::pin(on_connect(request))),
            on_deep_linking: None,
            on_session_timeout: None,
            on_invalid_token: None,
        }
    }

    pub fn with_deep_linking<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(LaunchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.on_deep_linking = Some(Arc::new(move |request| Box::pin(handler(request))));
        self
    }

    pub fn with_session_timeout<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.on_session_timeout = Some(Arc::new(move || Box::pin(handler())));
        self
    }

    pub fn with_invalid_token<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.on_invalid_token = Some(Arc::new(move || Box::pin(handler())));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_deep_linking", &self.on_deep_linking.is_some())
            .field("on_session_timeout", &self.on_session_timeout.is_some())
            .field("on_invalid_token", &self.on_invalid_token.is_some())
            .finish()
    }
}

/// Everything the provider holds for its lifetime.
pub struct ToolState {
    pub config: ToolConfig,
    pub store: Arc<dyn Store>,
    pub keys: KeyRing,
    pub registry: PlatformRegistry,
    pub validator: TokenValidator,
    pub ltik: LtikCodec,
    pub whitelist: Whitelist,
    pub callbacks: Callbacks,
    cookie_key: Key,
}

impl ToolState {
    /// Build the provider: validate configuration, prepare the store, and
    /// wire up the collaborators. Fails before anything listens.
    pub async fn setup(
        config: ToolConfig,
        callbacks: Callbacks,
        whitelist: Whitelist,
    ) -> Result<AppState, StartupError> {
        let cipher = Cipher::from_secret(&config.encryption_key);
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(&config.database.path, cipher));
        Self::setup_with_store(config, store, callbacks, whitelist).await
    }

    /// Same as [`ToolState::setup`] but over a caller-provided store
    /// implementation.
    pub async fn setup_with_store(
        config: ToolConfig,
        store: Arc<dyn Store>,
        callbacks: Callbacks,
        whitelist: Whitelist,
    ) -> Result<AppState, StartupError> {
        config.validate()?;
        store.setup().await?;

        let keys = KeyRing::new(store.clone());
        let registry = PlatformRegistry::new(store.clone(), keys.clone());
        let validator = TokenValidator::new(config.token_max_age)
            .map_err(|e| StartupError::ConfigError(format!("HTTP client setup failed: {}", e)))?;
        let ltik = LtikCodec::new(&config.encryption_key, config.session.ltik_max_age_secs);
        let cookie_key = cookie_key_from_secret(&config.encryption_key);

        Ok(AppState(Arc::new(ToolState {
            config,
            store,
            keys,
            registry,
            validator,
            ltik,
            whitelist,
            callbacks,
            cookie_key,
        })))
    }
}

/// Cheap handle shared across request handlers.
#[derive(Clone)]
pub struct AppState(pub Arc<ToolState>);

impl AppState {
    /// Serve until shutdown is requested. Graceful ctrl-c exits cleanly;
    /// bind or TLS failures surface as errors.
    pub async fn deploy(self) -> anyhow::Result<()> {
        crate::server::service::serve(self).await
    }
}

// Signed cookie jars pull their key straight from the shared state.
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Key {
        state.0.cookie_key.clone()
    }
}
