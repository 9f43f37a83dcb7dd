#![allow(dead_code)]
//! Shared fixtures for the integration suites: a provider over a scratch
//! database, a fixture platform key pair, and helpers for driving the
//! router and reading redirects/cookies.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use rsa::pkcs1::EncodeRsaPublicKey as _;
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::traits::PublicKeyParts as _;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt as _;

use axum::response::IntoResponse as _;
use latch::server::service::build_router;
use latch::{
    AppState, AuthMethod, Callbacks, PlatformRegistration, ToolConfig, ToolState, Whitelist,
};

pub const ISSUER: &str = "https://lms.example/";
pub const CLIENT_ID: &str = "C";
pub const DEPLOYMENT: &str = "d";
pub const FIXTURE_KID: &str = "fixture";

/// RSA key pair a test pretends the platform signs with.
pub struct FixtureKey {
    pub private_pem: String,
    pub public_pem: String,
    pub jwk: Value,
}

pub fn fixture_key() -> FixtureKey {
    let mut rng = OsRng;
    let private = RsaPrivateKey::new(&mut rng, 2048).expect("generate fixture key");
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
        .expect("private pem")
        .to_string();
    let public_pem = public
        .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
        .expect("public pem");

    let jwk = json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": FIXTURE_KID,
        "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    });

    FixtureKey {
        private_pem,
        public_pem,
        jwk,
    }
}

/// Provider over a scratch database with recording callbacks.
pub struct TestProvider {
    pub app: AppState,
    /// Callback invocations, in order: "connect:<user>" / "deep:<user>".
    pub hits: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

impl TestProvider {
    pub fn router(&self) -> Router {
        build_router(self.app.clone())
    }

    pub fn recorded(&self) -> Vec<String> {
        self.hits.lock().expect("hits lock").clone()
    }
}

pub async fn provider() -> TestProvider {
    provider_with(|_| {}, Whitelist::default()).await
}

pub async fn provider_with_config(adjust: impl FnOnce(&mut ToolConfig)) -> TestProvider {
    provider_with(adjust, Whitelist::default()).await
}

pub async fn provider_with(
    adjust: impl FnOnce(&mut ToolConfig),
    whitelist: Whitelist,
) -> TestProvider {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = ToolConfig::load_with_overrides(
        None,
        Some("test-master-secret".to_string()),
        None,
        Some(dir.path().join("latch.sqlite")),
        None,
    )
    .expect("config");
    adjust(&mut config);

    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let connect_hits = hits.clone();
    let deep_hits = hits.clone();
    let callbacks = Callbacks::new(move |request: latch::LaunchRequest| {
        let hits = connect_hits.clone();
        async move {
            let user = request
                .session
                .as_ref()
                .map(|s| s.token.user.clone())
                .unwrap_or_else(|| "-".to_string());
            hits.lock().expect("hits lock").push(format!("connect:{}", user));
            axum::http::StatusCode::OK.into_response()
        }
    })
    .with_deep_linking(move |request: latch::LaunchRequest| {
        let hits = deep_hits.clone();
        async move {
            let user = request
                .session
                .as_ref()
                .map(|s| s.token.user.clone())
                .unwrap_or_else(|| "-".to_string());
            hits.lock().expect("hits lock").push(format!("deep:{}", user));
            axum::http::StatusCode::OK.into_response()
        }
    });

    let app = ToolState::setup(config, callbacks, whitelist)
        .await
        .expect("provider setup");

    TestProvider {
        app,
        hits,
        _dir: dir,
    }
}

/// Register the fixture platform with the given verification method.
pub async fn register_platform(provider: &TestProvider, auth_config: AuthMethod) {
    provider
        .app
        .0
        .registry
        .register(PlatformRegistration {
            platform_url: ISSUER.to_string(),
            platform_name: Some("Example LMS".to_string()),
            client_id: Some(CLIENT_ID.to_string()),
            auth_endpoint: Some("https://lms.example/auth".to_string()),
            accesstoken_endpoint: Some("https://lms.example/token".to_string()),
            auth_config: Some(auth_config),
        })
        .await
        .expect("platform registration");
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs()
}

/// Claims of a well-formed resource-link launch for user `u1`.
pub fn base_claims(nonce: &str) -> Value {
    let now = unix_now();
    json!({
        "iss": ISSUER,
        "sub": "u1",
        "aud": CLIENT_ID,
        "exp": now + 60,
        "iat": now,
        "nonce": nonce,
        "name": "User One",
        "https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiResourceLinkRequest",
        "https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
        "https://purl.imsglobal.org/spec/lti/claim/deployment_id": DEPLOYMENT,
        "https://purl.imsglobal.org/spec/lti/claim/target_link_uri": "https://tool/",
        "https://purl.imsglobal.org/spec/lti/claim/resource_link": { "id": "r" },
        "https://purl.imsglobal.org/spec/lti/claim/context": { "id": "c", "title": "Course C" },
        "https://purl.imsglobal.org/spec/lti/claim/roles": [
            "http://purl.imsglobal.org/vocab/lis/v2/membership#Learner"
        ],
    })
}

pub fn sign_token(key: &FixtureKey, claims: &Value) -> String {
    sign_token_with_kid(key, claims, FIXTURE_KID)
}

pub fn sign_token_with_kid(key: &FixtureKey, claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(key.private_pem.as_bytes()).expect("encoding key"),
    )
    .expect("sign token")
}

/// All Set-Cookie pairs of a response as (name, raw value).
pub fn set_cookies(response: &Response<Body>) -> Vec<(String, String)> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| {
            let first = cookie.split(';').next()?;
            let (name, value) = first.split_once('=')?;
            Some((name.trim().to_string(), value.to_string()))
        })
        .collect()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn query_params(url: &str) -> HashMap<String, String> {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Drive the login phase; returns the state nonce and its cookie pair.
pub async fn do_login(provider: &TestProvider) -> (String, (String, String)) {
    let response = provider
        .router()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/login?iss={}&login_hint=u1&target_link_uri={}",
                    urlencoding::encode(ISSUER),
                    urlencoding::encode("https://tool/"),
                ))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("login response");

    assert_eq!(response.status(), axum::http::StatusCode::SEE_OTHER);
    let state = query_params(&location(&response))
        .get("state")
        .cloned()
        .expect("state in authorize redirect");

    let cookie = set_cookies(&response)
        .into_iter()
        .find(|(name, _)| name == &format!("state{}", state))
        .expect("state cookie");

    (state, cookie)
}

/// POST the authentication response to the app route.
pub async fn post_id_token(
    provider: &TestProvider,
    id_token: &str,
    state: &str,
    cookie: Option<&(String, String)>,
) -> Response<Body> {
    let body = format!(
        "id_token={}&state={}",
        urlencoding::encode(id_token),
        urlencoding::encode(state)
    );
    let mut builder = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some((name, value)) = cookie {
        builder = builder.header(header::COOKIE, format!("{}={}", name, value));
    }

    provider
        .router()
        .oneshot(builder.body(Body::from(body)).expect("request"))
        .await
        .expect("callback response")
}
