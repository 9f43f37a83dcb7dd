mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt as _;

use latch::server::persist::models::composite_key;
use latch::server::persist::{Collection, PrivateKeyRecord, PublicKeyRecord, Scope, get_typed};
use latch::server::registry::RegistryError;
use latch::{AuthMethod, PlatformRegistration};
use support::{CLIENT_ID, ISSUER, fixture_key, provider, register_platform};

fn registration(platform_url: &str, public_pem: &str) -> PlatformRegistration {
    PlatformRegistration {
        platform_url: platform_url.to_string(),
        platform_name: Some("Example LMS".to_string()),
        client_id: Some(CLIENT_ID.to_string()),
        auth_endpoint: Some("https://lms.example/auth".to_string()),
        accesstoken_endpoint: Some("https://lms.example/token".to_string()),
        auth_config: Some(AuthMethod::RsaKey(public_pem.to_string())),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_mints_a_key_pair() {
    let key = fixture_key();
    let provider = provider().await;

    let platform = provider
        .app
        .0
        .registry
        .register(registration(ISSUER, &key.public_pem))
        .await
        .expect("register");
    assert!(!platform.kid.is_empty());

    let store = provider.app.0.store.clone();
    let public: Option<PublicKeyRecord> = get_typed(
        store.as_ref(),
        Scope::Plain,
        Collection::PublicKey,
        &composite_key(&[&platform.kid]),
    )
    .await
    .expect("store");
    let public = public.expect("public key row");
    assert_eq!(public.jwk["kid"], platform.kid.as_str());

    let private: Option<PrivateKeyRecord> = get_typed(
        store.as_ref(),
        Scope::Encrypted,
        Collection::PrivateKey,
        &composite_key(&[&platform.kid]),
    )
    .await
    .expect("store");
    let private = private.expect("private key row");
    assert!(private.pem.contains("PRIVATE KEY"));

    // The signing key is reconstructible from the encrypted row.
    provider
        .app
        .0
        .keys
        .signing_key(&platform.kid)
        .await
        .expect("signing key");
}

#[tokio::test(flavor = "multi_thread")]
async fn reregistration_merges_fields_and_keeps_the_key_pair() {
    let key = fixture_key();
    let provider = provider().await;
    register_platform(&provider, AuthMethod::RsaKey(key.public_pem.clone())).await;

    let before = provider
        .app
        .0
        .registry
        .get(ISSUER)
        .await
        .expect("get")
        .expect("registered");

    let merged = provider
        .app
        .0
        .registry
        .register(PlatformRegistration {
            platform_url: ISSUER.to_string(),
            platform_name: Some("Renamed LMS".to_string()),
            ..PlatformRegistration::default()
        })
        .await
        .expect("merge");

    assert_eq!(merged.platform_name, "Renamed LMS");
    assert_eq!(merged.client_id, before.client_id);
    assert_eq!(merged.kid, before.kid);
    assert_eq!(
        provider.app.0.registry.get_all().await.expect("get_all").len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn new_registration_without_required_fields_is_rejected() {
    let provider = provider().await;

    let err = provider
        .app
        .0
        .registry
        .register(PlatformRegistration {
            platform_url: "https://new.example/".to_string(),
            platform_name: Some("Incomplete".to_string()),
            ..PlatformRegistration::default()
        })
        .await
        .expect_err("registration must fail");
    assert!(matches!(err, RegistryError::MissingArgument("client_id")));

    // Nothing was left behind.
    assert!(
        provider
            .app
            .0
            .registry
            .get("https://new.example/")
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_platform_url_is_a_missing_argument() {
    let provider = provider().await;
    let err = provider
        .app
        .0
        .registry
        .get("")
        .await
        .expect_err("lookup must fail");
    assert!(matches!(err, RegistryError::MissingArgument("platform_url")));
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_a_platform_cascades_to_its_key_pair() {
    let key = fixture_key();
    let provider = provider().await;
    register_platform(&provider, AuthMethod::RsaKey(key.public_pem.clone())).await;

    let kid = provider
        .app
        .0
        .registry
        .get(ISSUER)
        .await
        .expect("get")
        .expect("registered")
        .kid;

    provider.app.0.registry.delete(ISSUER).await.expect("delete");

    assert!(
        provider
            .app
            .0
            .registry
            .get(ISSUER)
            .await
            .expect("get")
            .is_none()
    );

    let store = provider.app.0.store.clone();
    let public: Option<PublicKeyRecord> = get_typed(
        store.as_ref(),
        Scope::Plain,
        Collection::PublicKey,
        &composite_key(&[&kid]),
    )
    .await
    .expect("store");
    assert!(public.is_none());
    let private: Option<PrivateKeyRecord> = get_typed(
        store.as_ref(),
        Scope::Encrypted,
        Collection::PrivateKey,
        &composite_key(&[&kid]),
    )
    .await
    .expect("store");
    assert!(private.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn keyset_endpoint_serves_every_public_key() {
    let key = fixture_key();
    let provider = provider().await;
    register_platform(&provider, AuthMethod::RsaKey(key.public_pem.clone())).await;

    let kid = provider
        .app
        .0
        .registry
        .get(ISSUER)
        .await
        .expect("get")
        .expect("registered")
        .kid;

    let response = provider
        .router()
        .oneshot(
            Request::builder()
                .uri("/keys")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let keyset: serde_json::Value = serde_json::from_slice(&body).expect("json");

    let keys = keyset["keys"].as_array().expect("keys array");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], kid.as_str());
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["use"], "sig");
    assert!(!keys[0]["n"].as_str().unwrap_or_default().is_empty());
}
