//! The tool's own key ring: one RSA key pair per registered platform,
//! private halves encrypted at rest, public halves served as a JWKS.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_ENGINE;
use jsonwebtoken::EncodingKey;
use rand_core::OsRng;
use rsa::pkcs1::EncodeRsaPublicKey as _;
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::traits::PublicKeyParts as _;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tokio::task;

use crate::server::persist::{
    Collection, PrivateKeyRecord, PublicKeyRecord, Scope, Store, StoreError, get_typed, put_typed,
};

const RSA_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    Generate(String),

    #[error("no key pair with kid '{0}'")]
    UnknownKid(String),

    #[error("key material rejected: {0}")]
    Material(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct KeyRing {
    store: Arc<dyn Store>,
}

impl KeyRing {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Generate a fresh RSA key pair for `platform_url` and return its kid.
    ///
    /// The private key is persisted through the encrypted store scope; the
    /// public key is stored in clear together with its JWK form. Rotation is
    /// a new `generate` call plus updating the platform record's kid.
    pub async fn generate(&self, platform_url: &str) -> Result<String, KeyError> {
        type Generated = (String, String, String, serde_json::Value);
        let (private_pem, public_pem, kid, jwk) =
            task::spawn_blocking(|| -> Result<Generated, KeyError> {
                let mut rng = OsRng;
                let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
                    .map_err(|e| KeyError::Generate(e.to_string()))?;
                let public = RsaPublicKey::from(&private);

                let private_pem = private
                    .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
                    .map_err(|e| KeyError::Generate(e.to_string()))?
                    .to_string();
                let public_pem = public
                    .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
                    .map_err(|e| KeyError::Generate(e.to_string()))?;

                let n_bytes = public.n().to_bytes_be();
                let e_bytes = public.e().to_bytes_be();

                // kid derived from the public material so rotation always
                // yields a new identifier.
                let mut hasher = Sha256::new();
                hasher.update(&n_bytes);
                hasher.update(&e_bytes);
                let kid = hex::encode(hasher.finalize());

                let jwk = serde_json::json!({
                    "kty": "RSA",
                    "use": "sig",
                    "alg": "RS256",
                    "kid": kid,
                    "n": BASE64_ENGINE.encode(&n_bytes),
                    "e": BASE64_ENGINE.encode(&e_bytes),
                });

                Ok((private_pem, public_pem, kid, jwk))
            })
            .await
            .map_err(|e| KeyError::Generate(e.to_string()))??;

        let private_record = PrivateKeyRecord {
            kid: kid.clone(),
            platform_url: platform_url.to_string(),
            pem: private_pem,
        };
        put_typed(
            self.store.as_ref(),
            Scope::Encrypted,
            Collection::PrivateKey,
            &private_record.key(),
            &private_record,
        )
        .await?;

        let public_record = PublicKeyRecord {
            kid: kid.clone(),
            platform_url: platform_url.to_string(),
            pem: public_pem,
            jwk,
        };
        put_typed(
            self.store.as_ref(),
            Scope::Plain,
            Collection::PublicKey,
            &public_record.key(),
            &public_record,
        )
        .await?;

        tracing::debug!(kid = %kid, platform = %platform_url, "generated tool key pair");
        Ok(kid)
    }

    /// The public JWKS document: every stored public key, by kid.
    pub async fn jwks(&self) -> Result<serde_json::Value, KeyError> {
        let rows = self.store.list(Collection::PublicKey).await?;
        let keys: Vec<serde_json::Value> = rows
            .into_iter()
            .filter_map(|mut row| row.get_mut("jwk").map(serde_json::Value::take))
            .collect();
        Ok(serde_json::json!({ "keys": keys }))
    }

    /// The signing key for outbound requests to the platform that owns `kid`.
    pub async fn signing_key(&self, kid: &str) -> Result<EncodingKey, KeyError> {
        let record: PrivateKeyRecord = get_typed(
            self.store.as_ref(),
            Scope::Encrypted,
            Collection::PrivateKey,
            &crate::server::persist::models::composite_key(&[kid]),
        )
        .await?
        .ok_or_else(|| KeyError::UnknownKid(kid.to_string()))?;

        EncodingKey::from_rsa_pem(record.pem.as_bytes())
            .map_err(|e| KeyError::Material(e.to_string()))
    }

    /// Drop both halves of a key pair. Used by the platform delete cascade
    /// and by registration rollback.
    pub async fn remove(&self, kid: &str) -> Result<(), KeyError> {
        let key = crate::server::persist::models::composite_key(&[kid]);
        self.store.delete(Collection::PublicKey, &key).await?;
        self.store.delete(Collection::PrivateKey, &key).await?;
        Ok(())
    }
}
