//! Platform registry: trust anchors for the issuers allowed to launch into
//! the tool, plus the lifecycle of the key pairs minted for them.

use std::sync::Arc;
use thiserror::Error;

use crate::server::keys::{KeyError, KeyRing};
use crate::server::persist::{
    Collection, Platform, PlatformRegistration, Scope, Store, StoreError, get_typed, put_typed,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct PlatformRegistry {
    store: Arc<dyn Store>,
    keys: KeyRing,
}

impl PlatformRegistry {
    pub fn new(store: Arc<dyn Store>, keys: KeyRing) -> Self {
        Self { store, keys }
    }

    /// Register a platform or merge into an existing registration.
    ///
    /// An existing record (matched by `platform_url`) absorbs the supplied
    /// fields and keeps its key pair. A new registration requires every
    /// field, gets a freshly generated key pair, and is rolled back in full
    /// (both key halves and any partial row) if a later step fails.
    pub async fn register(
        &self,
        registration: PlatformRegistration,
    ) -> Result<Platform, RegistryError> {
        if registration.platform_url.is_empty() {
            return Err(RegistryError::MissingArgument("platform_url"));
        }

        if let Some(mut existing) = self.get(&registration.platform_url).await? {
            if let Some(name) = registration.platform_name {
                existing.platform_name = name;
            }
            if let Some(client_id) = registration.client_id {
                existing.client_id = client_id;
            }
            if let Some(auth_endpoint) = registration.auth_endpoint {
                existing.auth_endpoint = auth_endpoint;
            }
            if let Some(accesstoken_endpoint) = registration.accesstoken_endpoint {
                existing.accesstoken_endpoint = accesstoken_endpoint;
            }
            if let Some(auth_config) = registration.auth_config {
                existing.auth_config = auth_config;
            }
            put_typed(
                self.store.as_ref(),
                Scope::Plain,
                Collection::Platform,
                &existing.key(),
                &existing,
            )
            .await?;
            tracing::debug!(platform = %existing.platform_url, "merged platform registration");
            return Ok(existing);
        }

        let platform_name = registration
            .platform_name
            .ok_or(RegistryError::MissingArgument("platform_name"))?;
        let client_id = registration
            .client_id
            .ok_or(RegistryError::MissingArgument("client_id"))?;
        let auth_endpoint = registration
            .auth_endpoint
            .ok_or(RegistryError::MissingArgument("auth_endpoint"))?;
        let accesstoken_endpoint = registration
            .accesstoken_endpoint
            .ok_or(RegistryError::MissingArgument("accesstoken_endpoint"))?;
        let auth_config = registration
            .auth_config
            .ok_or(RegistryError::MissingArgument("auth_config"))?;

        let kid = self.keys.generate(&registration.platform_url).await?;

        let platform = Platform {
            platform_name,
            platform_url: registration.platform_url,
            client_id,
            auth_endpoint,
            accesstoken_endpoint,
            kid: kid.clone(),
            auth_config,
        };

        if let Err(e) = put_typed(
            self.store.as_ref(),
            Scope::Plain,
            Collection::Platform,
            &platform.key(),
            &platform,
        )
        .await
        {
            // Keys were already minted; undo everything attributable to this
            // registration before surfacing the failure.
            self.rollback(&platform.platform_url, &kid).await;
            return Err(e.into());
        }

        tracing::info!(platform = %platform.platform_url, kid = %kid, "registered platform");
        Ok(platform)
    }

    pub async fn get(&self, platform_url: &str) -> Result<Option<Platform>, RegistryError> {
        if platform_url.is_empty() {
            return Err(RegistryError::MissingArgument("platform_url"));
        }
        Ok(get_typed(
            self.store.as_ref(),
            Scope::Plain,
            Collection::Platform,
            &Platform::key_for(platform_url),
        )
        .await?)
    }

    pub async fn get_all(&self) -> Result<Vec<Platform>, RegistryError> {
        let rows = self.store.list(Collection::Platform).await?;
        let mut platforms = Vec::with_capacity(rows.len());
        for row in rows {
            platforms.push(
                serde_json::from_value(row).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            );
        }
        Ok(platforms)
    }

    /// Delete a platform and cascade to its key pair.
    pub async fn delete(&self, platform_url: &str) -> Result<(), RegistryError> {
        let Some(platform) = self.get(platform_url).await? else {
            return Ok(());
        };
        self.store
            .delete(Collection::Platform, &platform.key())
            .await?;
        self.keys.remove(&platform.kid).await?;
        tracing::info!(platform = %platform_url, "deleted platform and key pair");
        Ok(())
    }

    async fn rollback(&self, platform_url: &str, kid: &str) {
        if let Err(e) = self.keys.remove(kid).await {
            tracing::warn!(kid = %kid, "rollback failed to remove key pair: {}", e);
        }
        if let Err(e) = self
            .store
            .delete(Collection::Platform, &Platform::key_for(platform_url))
            .await
        {
            tracing::warn!(platform = %platform_url, "rollback failed to remove platform row: {}", e);
        }
    }
}
