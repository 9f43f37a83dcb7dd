//! The launch state machine.
//!
//! Orchestrates the three phases of an LTI launch: the OIDC
//! third-party-initiated login redirect, the authentication response that
//! materializes a server-side session, and the steady-state authentication
//! of every later in-tool request via the continuation token and session
//! cookie.

use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::SignedCookieJar;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng as _;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::errors::StartupError;
use crate::server::cookies::{
    build_session_cookie, build_state_cookie, clear_state_cookie, state_cookie_name,
};
use crate::server::ltik::LtikClaims;
use crate::server::persist::{
    Collection, ContextTokenRecord, IdTokenRecord, Scope, UserInfo, get_typed, put_typed,
};
use crate::server::registry::RegistryError;
use crate::server::validate::{MESSAGE_TYPE_DEEP_LINKING, ValidationContext, ValidationError};
use crate::state::ToolState;

/// Length of the login state nonce.
const STATE_LENGTH: usize = 20;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random base-36 string, used for the login state and the OIDC nonce.
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect()
}

/// Name of the per-deployment session cookie.
pub fn platform_code(iss: &str, deployment_id: &str) -> String {
    let encoded = BASE64.encode(format!("{}{}", iss, deployment_id));
    urlencoding::encode(&format!("lti{}", encoded)).into_owned()
}

/// Stable identifier of one context/resource pair within a deployment.
/// Course and resource ids default to the literal `NF` when the launch
/// carries none.
pub fn context_id(
    iss: &str,
    deployment_id: &str,
    course_id: Option<&str>,
    resource_id: Option<&str>,
) -> String {
    let course = course_id.filter(|c| !c.is_empty()).unwrap_or("NF");
    let resource = resource_id.filter(|r| !r.is_empty()).unwrap_or("NF");
    urlencoding::encode(&format!("{}{}{}_{}", iss, deployment_id, course, resource)).into_owned()
}

/// Routes exempt from launch authentication, either for any method or for
/// one specific method.
#[derive(Debug, Clone)]
pub enum WhitelistEntry {
    Route(String),
    RouteMethod { route: String, method: String },
}

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    entries: HashSet<String>,
}

impl Whitelist {
    pub fn new(entries: impl IntoIterator<Item = WhitelistEntry>) -> Result<Self, StartupError> {
        let mut set = HashSet::new();
        for entry in entries {
            match entry {
                WhitelistEntry::Route(route) => {
                    if route.is_empty() {
                        return Err(StartupError::MissingArgument(
                            "whitelist route".to_string(),
                        ));
                    }
                    set.insert(route);
                }
                WhitelistEntry::RouteMethod { route, method } => {
                    if route.is_empty() || method.is_empty() {
                        return Err(StartupError::MissingArgument(
                            "whitelist route/method".to_string(),
                        ));
                    }
                    set.insert(format!("{}-method-{}", route, method.to_uppercase()));
                }
            }
        }
        Ok(Self { entries: set })
    }

    pub fn allows(&self, path: &str, method: &Method) -> bool {
        self.entries.contains(path)
            || self
                .entries
                .contains(&format!("{}-method-{}", path, method.as_str().to_uppercase()))
    }
}

/// Authenticated launch state attached to a steady-state request.
#[derive(Debug, Clone)]
pub struct LaunchSession {
    pub token: IdTokenRecord,
    pub context: ContextTokenRecord,
    pub ltik: String,
}

/// What a user callback receives. `session` is `None` only for whitelisted
/// requests that carried no credentials.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub session: Option<LaunchSession>,
    pub path: String,
    pub method: Method,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("unregistered platform: {0}")]
    UnregisteredPlatform(String),

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Login phase: resolve the issuer, bind it to a signed state cookie and
/// redirect the browser to the platform's authorize endpoint.
pub async fn login(
    state: &ToolState,
    jar: SignedCookieJar,
    params: &HashMap<String, String>,
) -> Result<(SignedCookieJar, Redirect), LoginError> {
    let iss = params
        .get("iss")
        .filter(|v| !v.is_empty())
        .ok_or(LoginError::MissingParameter("iss"))?;
    let login_hint = params
        .get("login_hint")
        .filter(|v| !v.is_empty())
        .ok_or(LoginError::MissingParameter("login_hint"))?;
    let target_link_uri = params
        .get("target_link_uri")
        .filter(|v| !v.is_empty())
        .ok_or(LoginError::MissingParameter("target_link_uri"))?;

    let platform = state
        .registry
        .get(iss)
        .await?
        .ok_or_else(|| LoginError::UnregisteredPlatform(iss.clone()))?;

    let login_state = random_base36(STATE_LENGTH);
    let nonce = random_base36(STATE_LENGTH);

    let jar = jar.add(build_state_cookie(&login_state, iss, &state.config.cookies));

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("response_type", "id_token")
        .append_pair("response_mode", "form_post")
        .append_pair("scope", "openid")
        .append_pair("prompt", "none")
        .append_pair(
            "client_id",
            params
                .get("client_id")
                .filter(|v| !v.is_empty())
                .unwrap_or(&platform.client_id),
        )
        .append_pair("redirect_uri", target_link_uri)
        .append_pair("login_hint", login_hint);
    if let Some(hint) = params.get("lti_message_hint").filter(|v| !v.is_empty()) {
        query.append_pair("lti_message_hint", hint);
    }
    if let Some(deployment) = params.get("lti_deployment_id").filter(|v| !v.is_empty()) {
        query.append_pair("lti_deployment_id", deployment);
    }
    query
        .append_pair("nonce", &nonce)
        .append_pair("state", &login_state);

    let authorize_url = format!("{}?{}", platform.auth_endpoint, query.finish());
    tracing::debug!(platform = %iss, "redirecting launch to platform authorize endpoint");

    Ok((jar, Redirect::to(&authorize_url)))
}

/// Authentication response: validate the posted id_token and materialize
/// the session (token rows, session cookie, continuation token).
pub async fn materialize(
    state: &ToolState,
    jar: SignedCookieJar,
    id_token: &str,
    login_state: &str,
    path: &str,
    query: Option<&str>,
) -> Response {
    let state_cookie = jar
        .get(&state_cookie_name(login_state))
        .map(|c| c.value().to_string());

    let expected_iss = match &state_cookie {
        Some(iss) => Some(iss.as_str()),
        None if state.config.dev_mode => None,
        None => {
            tracing::warn!("authentication response without a matching state cookie");
            return (jar, redirect_invalid_token(state)).into_response();
        }
    };

    let ctx = ValidationContext {
        expected_iss,
        dev_mode: state.config.dev_mode,
        max_age: state.config.token_max_age,
    };
    let (claims, _platform) = match state.validator.validate(&state.registry, id_token, ctx).await
    {
        Ok(validated) => validated,
        Err(e) => {
            log_rejection(&e);
            let jar = clear_state_cookie(jar, login_state);
            return (jar, redirect_invalid_token(state)).into_response();
        }
    };
    let jar = clear_state_cookie(jar, login_state);

    // Every unwrap_or_default below is on a claim the validator required.
    let deployment_id = claims.deployment_id.clone().unwrap_or_default();
    let course_id = claims.context.get("id").and_then(Value::as_str);
    let resource_id = claims.resource_link.get("id").and_then(Value::as_str);
    let context_id = context_id(&claims.iss, &deployment_id, course_id, resource_id);
    let code = platform_code(&claims.iss, &deployment_id);

    let token_record = IdTokenRecord {
        iss: claims.iss.clone(),
        user: claims.sub.clone(),
        roles: claims.roles.clone(),
        user_info: UserInfo {
            given_name: claims.given_name.clone(),
            family_name: claims.family_name.clone(),
            name: claims.name.clone(),
            email: claims.email.clone(),
        },
        platform_info: claims.platform_instance.clone(),
        deployment_id: deployment_id.clone(),
        lis: claims.lis.clone(),
        endpoint: claims.endpoint.clone(),
        names_roles: claims.names_roles.clone(),
    };
    let context_record = ContextTokenRecord {
        context_id: context_id.clone(),
        path: path.to_string(),
        user: claims.sub.clone(),
        target_link_uri: claims.target_link_uri.clone().unwrap_or_default(),
        context: claims.context.clone(),
        resource: claims.resource_link.clone(),
        custom: claims.custom.clone(),
        launch_presentation: claims.launch_presentation.clone(),
        message_type: claims.message_type.clone().unwrap_or_default(),
        version: claims.version.clone().unwrap_or_default(),
        deep_linking_settings: claims.deep_linking_settings.clone(),
    };

    // The write order is part of the contract: both rows are durable before
    // the browser is sent anywhere with the continuation token.
    if let Err(e) = put_typed(
        state.store.as_ref(),
        Scope::Plain,
        Collection::IdToken,
        &token_record.key(),
        &token_record,
    )
    .await
    {
        tracing::debug!("id token write failed: {}", e);
        return (jar, redirect_invalid_token(state)).into_response();
    }
    if let Err(e) = put_typed(
        state.store.as_ref(),
        Scope::Plain,
        Collection::ContextToken,
        &context_record.key(),
        &context_record,
    )
    .await
    {
        tracing::debug!("context token write failed: {}", e);
        return (jar, redirect_invalid_token(state)).into_response();
    }

    let jar = jar.add(build_session_cookie(&code, &claims.sub, &state.config.cookies));

    let ltik = match state.ltik.encode(LtikClaims {
        platform_url: claims.iss.clone(),
        deployment_id,
        platform_code: code,
        context_id,
        user: claims.sub.clone(),
        s: login_state.to_string(),
        iat: None,
    }) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("continuation token signing failed: {}", e);
            return (jar, redirect_invalid_token(state)).into_response();
        }
    };

    let location = match query.filter(|q| !q.is_empty()) {
        Some(q) => format!("{}?{}&ltik={}", path, q, urlencoding::encode(&ltik)),
        None => format!("{}?ltik={}", path, urlencoding::encode(&ltik)),
    };
    tracing::debug!(user = %claims.sub, "launch materialized");
    (jar, Redirect::to(&location)).into_response()
}

/// Steady-state phase: authenticate an in-tool request from its
/// continuation token and session cookie, then hand it to the user
/// callback.
pub async fn authorize(
    state: &ToolState,
    jar: SignedCookieJar,
    method: Method,
    path: &str,
    headers: &HeaderMap,
    params: HashMap<String, String>,
) -> Response {
    let ltik_token = bearer_token(headers).or_else(|| params.get("ltik").cloned());

    let Some(ltik_token) = ltik_token else {
        return whitelist_or_invalid(state, method, path, params).await;
    };

    let ltik = match state.ltik.decode(&ltik_token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("continuation token rejected: {}", e);
            return whitelist_or_invalid(state, method, path, params).await;
        }
    };

    let cookie_user = jar.get(&ltik.platform_code).map(|c| c.value().to_string());
    let session_alive = match cookie_user {
        Some(user) if user == ltik.user => true,
        // A cookie for a different subject means the browser session moved
        // on; the continuation token alone is not a session.
        Some(_) => false,
        None => state.config.dev_mode,
    };
    if !session_alive {
        return redirect_session_timeout(state).into_response();
    }

    let token_record: IdTokenRecord = match get_typed(
        state.store.as_ref(),
        Scope::Plain,
        Collection::IdToken,
        &IdTokenRecord::key_for(&ltik.platform_url, &ltik.deployment_id, &ltik.user),
    )
    .await
    {
        Ok(Some(record)) => record,
        Ok(None) => return redirect_session_timeout(state).into_response(),
        Err(e) => {
            tracing::debug!("id token load failed: {}", e);
            return redirect_invalid_token(state).into_response();
        }
    };

    let context_record: ContextTokenRecord = match get_typed(
        state.store.as_ref(),
        Scope::Plain,
        Collection::ContextToken,
        &ContextTokenRecord::key_for(&ltik.context_id, &ltik.user),
    )
    .await
    {
        Ok(Some(record)) => record,
        Ok(None) => return redirect_session_timeout(state).into_response(),
        Err(e) => {
            tracing::debug!("context token load failed: {}", e);
            return redirect_invalid_token(state).into_response();
        }
    };

    let request = LaunchRequest {
        session: Some(LaunchSession {
            token: token_record,
            context: context_record,
            ltik: ltik_token,
        }),
        path: path.to_string(),
        method,
        params,
    };
    dispatch(state, request).await
}

/// Route an authenticated request to the matching user callback.
pub async fn dispatch(state: &ToolState, request: LaunchRequest) -> Response {
    let deep_linking = request
        .session
        .as_ref()
        .is_some_and(|s| s.context.message_type == MESSAGE_TYPE_DEEP_LINKING);

    let callback = if deep_linking {
        state
            .callbacks
            .on_deep_linking
            .clone()
            .unwrap_or_else(|| state.callbacks.on_connect.clone())
    } else {
        state.callbacks.on_connect.clone()
    };
    (*callback)(request).await
}

async fn whitelist_or_invalid(
    state: &ToolState,
    method: Method,
    path: &str,
    params: HashMap<String, String>,
) -> Response {
    if state.whitelist.allows(path, &method) {
        let request = LaunchRequest {
            session: None,
            path: path.to_string(),
            method,
            params,
        };
        return dispatch(state, request).await;
    }
    redirect_invalid_token(state).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn redirect_invalid_token(state: &ToolState) -> Redirect {
    Redirect::to(&state.config.routes.invalid_token)
}

fn redirect_session_timeout(state: &ToolState) -> Redirect {
    Redirect::to(&state.config.routes.session_timeout)
}

fn log_rejection(error: &ValidationError) {
    match error {
        // Store problems are infrastructure noise, not launch attempts.
        ValidationError::Registry(RegistryError::Store(e)) => {
            tracing::debug!("store failure during validation: {}", e);
        }
        _ => tracing::warn!("launch token rejected: {}", error),
    }
}

/// Plain 401 bodies used when no handler is configured for the error
/// routes.
pub fn default_session_timeout() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        "Token invalid or expired. Please reinitiate login.",
    )
        .into_response()
}

pub fn default_invalid_token() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        "Invalid token. Please reinitiate login.",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_nonce_is_base36_of_the_documented_length() {
        let nonce = random_base36(STATE_LENGTH);
        assert_eq!(nonce.len(), 20);
        assert!(nonce.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn platform_code_is_url_safe() {
        let code = platform_code("https://lms.example/", "d1");
        assert!(code.starts_with("lti"));
        assert!(!code.contains('='));
        assert!(!code.contains('/'));
        assert!(!code.contains('+'));
    }

    #[test]
    fn context_id_defaults_absent_parts_to_nf() {
        let with_both = context_id("https://lms.example/", "d", Some("c"), Some("r"));
        assert_eq!(
            with_both,
            urlencoding::encode("https://lms.example/dc_r").into_owned()
        );

        let with_neither = context_id("https://lms.example/", "d", None, None);
        assert_eq!(
            with_neither,
            urlencoding::encode("https://lms.example/dNF_NF").into_owned()
        );
    }

    #[test]
    fn whitelist_matches_bare_and_method_entries() {
        let whitelist = Whitelist::new([
            WhitelistEntry::Route("/open".to_string()),
            WhitelistEntry::RouteMethod {
                route: "/hook".to_string(),
                method: "post".to_string(),
            },
        ])
        .expect("whitelist");

        assert!(whitelist.allows("/open", &Method::GET));
        assert!(whitelist.allows("/open", &Method::DELETE));
        assert!(whitelist.allows("/hook", &Method::POST));
        assert!(!whitelist.allows("/hook", &Method::GET));
        assert!(!whitelist.allows("/other", &Method::GET));
    }

    #[test]
    fn empty_whitelist_entries_are_rejected() {
        assert!(Whitelist::new([WhitelistEntry::Route(String::new())]).is_err());
        assert!(
            Whitelist::new([WhitelistEntry::RouteMethod {
                route: "/x".to_string(),
                method: String::new(),
            }])
            .is_err()
        );
    }
}
