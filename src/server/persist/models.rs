use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Build a composite document key from its parts.
///
/// Parts are percent-encoded individually so that a separator occurring
/// inside an issuer URL or deployment id cannot collide with the join
/// character.
pub fn composite_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| urlencoding::encode(p).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// How a platform's id_token signatures are verified.
///
/// Tagged variant instead of a loose `{method, key}` pair; the validator
/// dispatches on the tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "key")]
pub enum AuthMethod {
    /// PEM-encoded RSA public key used directly.
    #[serde(rename = "RSA_KEY")]
    RsaKey(String),
    /// A single JWK document.
    #[serde(rename = "JWK_KEY")]
    Jwk(Value),
    /// A remote JWKS URL; the key is picked by the token header `kid`.
    #[serde(rename = "JWK_SET")]
    JwkSet(String),
}

/// Trust anchor for one issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub platform_name: String,
    /// Issuer URL; unique across the registry.
    pub platform_url: String,
    pub client_id: String,
    /// OIDC authorize endpoint launches are redirected to.
    pub auth_endpoint: String,
    pub accesstoken_endpoint: String,
    /// The tool's own key pair used when talking to this platform.
    pub kid: String,
    pub auth_config: AuthMethod,
}

impl Platform {
    pub fn key(&self) -> String {
        Self::key_for(&self.platform_url)
    }

    pub fn key_for(platform_url: &str) -> String {
        composite_key(&[platform_url])
    }
}

/// Registration request for `PlatformRegistry::register`.
///
/// `platform_url` identifies the record; the remaining fields are merged
/// into an existing registration when present.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistration {
    pub platform_url: String,
    pub platform_name: Option<String>,
    pub client_id: Option<String>,
    pub auth_endpoint: Option<String>,
    pub accesstoken_endpoint: Option<String>,
    pub auth_config: Option<AuthMethod>,
}

/// The tool's public half of a key pair, stored in clear along with its
/// ready-to-serve JWK document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub kid: String,
    pub platform_url: String,
    pub pem: String,
    pub jwk: Value,
}

impl PublicKeyRecord {
    pub fn key(&self) -> String {
        composite_key(&[&self.kid])
    }
}

/// The tool's private half of a key pair. Always persisted through the
/// encrypted store scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKeyRecord {
    pub kid: String,
    pub platform_url: String,
    pub pem: String,
}

impl PrivateKeyRecord {
    pub fn key(&self) -> String {
        composite_key(&[&self.kid])
    }
}

/// Identity fields lifted from the validated id_token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// The validated LTI id_token of the most recent launch for a given
/// deployment/user on a platform. Overwritten on re-launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenRecord {
    pub iss: String,
    /// The `sub` claim.
    pub user: String,
    pub roles: Vec<String>,
    pub user_info: UserInfo,
    /// The `tool_platform` claim, verbatim.
    pub platform_info: Value,
    pub deployment_id: String,
    pub lis: Value,
    /// Assignment and Grade Services endpoint claim, kept for service
    /// clients.
    pub endpoint: Value,
    /// Names and Role Provisioning Services claim, kept for service clients.
    pub names_roles: Value,
}

impl IdTokenRecord {
    pub fn key(&self) -> String {
        Self::key_for(&self.iss, &self.deployment_id, &self.user)
    }

    pub fn key_for(iss: &str, deployment_id: &str, user: &str) -> String {
        composite_key(&[iss, deployment_id, user])
    }
}

/// The context/resource state of the last launch into a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTokenRecord {
    pub context_id: String,
    /// Request path the launch landed on; rewritten when a callback binds a
    /// new resource path.
    pub path: String,
    pub user: String,
    pub target_link_uri: String,
    pub context: Value,
    pub resource: Value,
    pub custom: Value,
    pub launch_presentation: Value,
    pub message_type: String,
    pub version: String,
    pub deep_linking_settings: Value,
}

impl ContextTokenRecord {
    pub fn key(&self) -> String {
        Self::key_for(&self.context_id, &self.user)
    }

    pub fn key_for(context_id: &str, user: &str) -> String {
        composite_key(&[context_id, user])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_escapes_the_separator() {
        let plain = composite_key(&["https://lms.example/", "d:1", "u1"]);
        let tricky = composite_key(&["https://lms.example/", "d", "1:u1"]);
        assert_ne!(plain, tricky);
    }

    #[test]
    fn auth_method_round_trips_through_tagged_json() {
        let method = AuthMethod::JwkSet("https://lms.example/jwks".to_string());
        let json = serde_json::to_value(&method).expect("serialize");
        assert_eq!(json["method"], "JWK_SET");
        let back: AuthMethod = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, method);
    }
}
