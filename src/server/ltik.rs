//! Launch continuation token ("ltik") codec.
//!
//! A short HS256-signed token carried in the query string or Authorization
//! header that ties a steady-state request back to the stored launch state.
//! Its lifetime is bounded by the session cookie and the stored token rows,
//! so it carries no expiry by default; an optional max-age knob stamps `iat`
//! and bounds it explicitly.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtikClaims {
    pub platform_url: String,
    pub deployment_id: String,
    /// Name of the session cookie backing this continuation.
    pub platform_code: String,
    pub context_id: String,
    /// The `sub` claim of the launch.
    pub user: String,
    /// Login state nonce the launch was bound to.
    pub s: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

#[derive(Debug, Error)]
pub enum LtikError {
    #[error("signing failed: {0}")]
    Encode(String),

    #[error("verification failed: {0}")]
    Verify(String),

    #[error("continuation token expired")]
    Expired,
}

#[derive(Clone)]
pub struct LtikCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    max_age: Option<u64>,
}

impl LtikCodec {
    pub fn new(secret: &str, max_age: Option<u64>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            max_age,
        }
    }

    pub fn encode(&self, mut claims: LtikClaims) -> Result<String, LtikError> {
        if self.max_age.is_some() {
            claims.iat = Some(unix_now());
        }
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| LtikError::Encode(e.to_string()))
    }

    /// Signature verification only; the semantic session checks happen in
    /// the launch state machine.
    pub fn decode(&self, token: &str) -> Result<LtikClaims, LtikError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = Default::default();

        let data = decode::<LtikClaims>(token, &self.decoding, &validation)
            .map_err(|e| LtikError::Verify(e.to_string()))?;

        if let Some(max_age) = self.max_age {
            match data.claims.iat {
                Some(iat) if unix_now().saturating_sub(iat) <= max_age => {}
                _ => return Err(LtikError::Expired),
            }
        }

        Ok(data.claims)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
