//! Inbound id_token validation.
//!
//! Verifies a platform-issued launch token against the platform's declared
//! key source (raw RSA public key, single JWK, or remote JWKS) and enforces
//! the LTI claim rules on top of the standard JWT checks.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::server::persist::{AuthMethod, Platform};
use crate::server::registry::{PlatformRegistry, RegistryError};

pub const MESSAGE_TYPE_RESOURCE_LINK: &str = "LtiResourceLinkRequest";
pub const MESSAGE_TYPE_DEEP_LINKING: &str = "LtiDeepLinkingRequest";
pub const LTI_VERSION: &str = "1.3.0";

/// Remote keysets are reused briefly to bound load on platforms.
const KEYSET_CACHE_TTL: Duration = Duration::from_secs(300);

/// Nonces must stay visible at least as long as the state cookie lives.
const NONCE_TTL_FLOOR: Duration = Duration::from_secs(600);

/// Claims carried by an LTI 1.3 launch token. Optional fields are enforced
/// by the validator rather than by deserialization, so a missing claim
/// surfaces as a claim error instead of a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtiClaims {
    pub iss: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub aud: Value,
    pub exp: u64,
    pub iat: u64,
    #[serde(default)]
    pub nbf: Option<u64>,
    #[serde(default)]
    pub azp: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,

    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,

    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/message_type"
    )]
    pub message_type: Option<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
    pub version: Option<String>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id"
    )]
    pub deployment_id: Option<String>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri"
    )]
    pub target_link_uri: Option<String>,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link"
    )]
    pub resource_link: Value,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/context")]
    pub context: Value,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/roles")]
    pub roles: Vec<String>,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/custom")]
    pub custom: Value,
    #[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/lis")]
    pub lis: Value,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/launch_presentation"
    )]
    pub launch_presentation: Value,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti/claim/tool_platform"
    )]
    pub platform_instance: Value,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint"
    )]
    pub endpoint: Value,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice"
    )]
    pub names_roles: Value,
    #[serde(
        default,
        rename = "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings"
    )]
    pub deep_linking_settings: Value,
}

/// Per-request validation inputs.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Issuer bound by the login-phase state cookie. `None` is only
    /// tolerated in dev mode, where the token's own issuer is used instead.
    pub expected_iss: Option<&'a str>,
    pub dev_mode: bool,
    /// Maximum accepted token age in seconds; `None` disables the check.
    pub max_age: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("issuer does not match the login state")]
    IssuerMismatch,

    #[error("unregistered platform: {0}")]
    UnregisteredPlatform(String),

    #[error("no key in the platform keyset matches kid '{0}'")]
    UnknownKeyId(String),

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("verification key rejected: {0}")]
    KeyResolution(String),

    #[error("keyset fetch failed: {0}")]
    KeysetFetch(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct TokenValidator {
    http: reqwest::Client,
    keysets: Cache<String, Arc<JwkSet>>,
    nonces: Cache<String, ()>,
}

impl TokenValidator {
    pub fn new(token_max_age: Option<u64>) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let nonce_ttl = NONCE_TTL_FLOOR.max(Duration::from_secs(token_max_age.unwrap_or(0)));

        Ok(Self {
            http,
            keysets: Cache::builder()
                .max_capacity(64)
                .time_to_live(KEYSET_CACHE_TTL)
                .build(),
            nonces: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(nonce_ttl)
                .build(),
        })
    }

    /// Validate an inbound id_token end to end and return its claims along
    /// with the platform record it verified against.
    pub async fn validate(
        &self,
        registry: &PlatformRegistry,
        id_token: &str,
        ctx: ValidationContext<'_>,
    ) -> Result<(LtiClaims, Platform), ValidationError> {
        let header =
            decode_header(id_token).map_err(|e| ValidationError::MalformedToken(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| ValidationError::MalformedToken("header has no kid".to_string()))?;
        if !matches!(
            header.alg,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
        ) {
            return Err(ValidationError::MalformedToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        // Unverified peek at the payload for the issuer; nothing from it is
        // trusted until the signature checks out.
        let payload = peek_claims(id_token)?;
        let token_iss = payload
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::MalformedToken("payload has no iss".to_string()))?;

        let expected_iss = match ctx.expected_iss {
            Some(iss) => iss,
            None if ctx.dev_mode => token_iss,
            None => return Err(ValidationError::IssuerMismatch),
        };
        if token_iss != expected_iss {
            return Err(ValidationError::IssuerMismatch);
        }

        let platform = registry
            .get(token_iss)
            .await?
            .ok_or_else(|| ValidationError::UnregisteredPlatform(token_iss.to_string()))?;

        let decoding_key = self
            .resolve_decoding_key(&platform.auth_config, &kid)
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[platform.client_id.as_str()]);
        validation.validate_nbf = true;

        let data = decode::<LtiClaims>(id_token, &decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::InvalidSignature => ValidationError::BadSignature(e.to_string()),
                ErrorKind::ExpiredSignature => {
                    ValidationError::InvalidClaims("token has expired".to_string())
                }
                ErrorKind::ImmatureSignature => {
                    ValidationError::InvalidClaims("token is not yet valid".to_string())
                }
                ErrorKind::InvalidAudience => ValidationError::InvalidClaims(
                    "audience does not include the client id".to_string(),
                ),
                ErrorKind::Json(_) | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    ValidationError::MalformedToken(e.to_string())
                }
                _ => ValidationError::BadSignature(e.to_string()),
            }
        })?;
        let claims = data.claims;

        let nonce = check_lti_claims(&claims, &platform, ctx)?;

        // Replay guard: a nonce may authenticate exactly one launch per
        // issuer within the cache TTL.
        let replay_key = format!("{}\u{1}{}", token_iss, nonce);
        if self.nonces.contains_key(&replay_key) {
            return Err(ValidationError::InvalidClaims("nonce replayed".to_string()));
        }
        self.nonces.insert(replay_key, ());

        Ok((claims, platform))
    }

    async fn resolve_decoding_key(
        &self,
        method: &AuthMethod,
        kid: &str,
    ) -> Result<DecodingKey, ValidationError> {
        match method {
            AuthMethod::RsaKey(pem) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| ValidationError::KeyResolution(e.to_string())),
            AuthMethod::Jwk(value) => {
                let jwk: Jwk = serde_json::from_value(value.clone())
                    .map_err(|e| ValidationError::KeyResolution(e.to_string()))?;
                DecodingKey::from_jwk(&jwk)
                    .map_err(|e| ValidationError::KeyResolution(e.to_string()))
            }
            AuthMethod::JwkSet(url) => {
                let keyset = self.fetch_keyset(url).await?;
                let jwk = keyset
                    .keys
                    .iter()
                    .find(|k| k.common.key_id.as_deref() == Some(kid))
                    .ok_or_else(|| ValidationError::UnknownKeyId(kid.to_string()))?;
                DecodingKey::from_jwk(jwk)
                    .map_err(|e| ValidationError::KeyResolution(e.to_string()))
            }
        }
    }

    async fn fetch_keyset(&self, url: &str) -> Result<Arc<JwkSet>, ValidationError> {
        if let Some(cached) = self.keysets.get(url) {
            return Ok(cached);
        }

        let keyset: JwkSet = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ValidationError::KeysetFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| ValidationError::KeysetFetch(e.to_string()))?;

        let keyset = Arc::new(keyset);
        self.keysets.insert(url.to_string(), keyset.clone());
        tracing::debug!(url = %url, keys = keyset.keys.len(), "fetched platform keyset");
        Ok(keyset)
    }
}

/// Decode the payload segment without trusting the signature.
fn peek_claims(token: &str) -> Result<Value, ValidationError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ValidationError::MalformedToken("not a compact JWS".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ValidationError::MalformedToken(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ValidationError::MalformedToken(e.to_string()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Enforce the LTI-specific claim rules; returns the launch nonce.
fn check_lti_claims<'c>(
    claims: &'c LtiClaims,
    platform: &Platform,
    ctx: ValidationContext<'_>,
) -> Result<&'c str, ValidationError> {
    let now = unix_now();

    if claims.iat > now {
        return Err(ValidationError::InvalidClaims(
            "token issued in the future".to_string(),
        ));
    }
    if let Some(max_age) = ctx.max_age
        && now.saturating_sub(claims.iat) > max_age
    {
        return Err(ValidationError::InvalidClaims(format!(
            "token older than {} seconds",
            max_age
        )));
    }

    if let Some(azp) = claims.azp.as_deref()
        && azp != platform.client_id
    {
        return Err(ValidationError::InvalidClaims(
            "azp does not match the client id".to_string(),
        ));
    }

    let nonce = claims
        .nonce
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ValidationError::InvalidClaims("missing nonce".to_string()))?;

    let message_type = claims
        .message_type
        .as_deref()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ValidationError::InvalidClaims("missing message_type".to_string()))?;
    if message_type != MESSAGE_TYPE_RESOURCE_LINK && message_type != MESSAGE_TYPE_DEEP_LINKING {
        return Err(ValidationError::InvalidClaims(format!(
            "unsupported message_type '{}'",
            message_type
        )));
    }

    match claims.version.as_deref() {
        Some(LTI_VERSION) => {}
        _ => {
            return Err(ValidationError::InvalidClaims(
                "version is not 1.3.0".to_string(),
            ));
        }
    }

    if claims
        .deployment_id
        .as_deref()
        .unwrap_or_default()
        .is_empty()
    {
        return Err(ValidationError::InvalidClaims(
            "missing deployment_id".to_string(),
        ));
    }

    if message_type == MESSAGE_TYPE_RESOURCE_LINK
        && claims
            .resource_link
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .is_empty()
    {
        return Err(ValidationError::InvalidClaims(
            "resource link launch without resource_link.id".to_string(),
        ));
    }

    if claims
        .target_link_uri
        .as_deref()
        .unwrap_or_default()
        .is_empty()
    {
        return Err(ValidationError::InvalidClaims(
            "missing target_link_uri".to_string(),
        ));
    }

    // Anonymous launches carry no subject and are rejected outright.
    if claims.sub.is_empty() {
        return Err(ValidationError::InvalidClaims("missing sub".to_string()));
    }

    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_rejects_non_jws_input() {
        assert!(matches!(
            peek_claims("definitely-not-a-token"),
            Err(ValidationError::MalformedToken(_))
        ));
    }

    #[test]
    fn peek_reads_the_payload_without_a_key() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"iss":"https://lms.example/"}"#);
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", payload);
        let claims = peek_claims(&token).expect("peek");
        assert_eq!(claims["iss"], "https://lms.example/");
    }
}
