//! HTTP handlers for the provider's reserved routes and the launch entry
//! every other path falls through to.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::SignedCookieJar;
use std::collections::HashMap;

use crate::server::launch::{self, LoginError};
use crate::state::AppState;

/// Requests bigger than this are not launch messages.
const BODY_LIMIT: usize = 256 * 1024;

/// OIDC third-party-initiated login. Any method; parameters are the union
/// of query string and form body.
pub async fn login_handler(
    State(app): State<AppState>,
    jar: SignedCookieJar,
    req: Request<Body>,
) -> Response {
    let params = request_params(req).await;

    match launch::login(&app.0, jar, &params).await {
        Ok((jar, redirect)) => (jar, redirect).into_response(),
        Err(LoginError::UnregisteredPlatform(iss)) => {
            tracing::warn!(platform = %iss, "login from unregistered platform");
            (StatusCode::UNAUTHORIZED, "Unregistered platform.").into_response()
        }
        Err(e) => {
            tracing::warn!("login rejected: {}", e);
            (StatusCode::BAD_REQUEST, "Bad login request.").into_response()
        }
    }
}

/// Landing point for everything that is not a reserved route, including the
/// app route itself. An `id_token` in the body marks the platform's
/// authentication response; anything else is a steady-state request.
pub async fn launch_entry(
    State(app): State<AppState>,
    jar: SignedCookieJar,
    req: Request<Body>,
) -> Response {
    let method = req.method().clone();
    let headers = req.headers().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let params = request_params(req).await;

    if let Some(id_token) = params.get("id_token").filter(|t| !t.is_empty()) {
        let login_state = params.get("state").cloned().unwrap_or_default();
        launch::materialize(
            &app.0,
            jar,
            id_token,
            &login_state,
            &path,
            query.as_deref(),
        )
        .await
    } else {
        launch::authorize(&app.0, jar, method, &path, &headers, params).await
    }
}

/// Public JWKS of the tool.
pub async fn keyset_handler(State(app): State<AppState>) -> Response {
    match app.0.keys.jwks().await {
        Ok(keyset) => Json(keyset).into_response(),
        Err(e) => {
            tracing::error!("keyset assembly failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to assemble keyset.",
            )
                .into_response()
        }
    }
}

pub async fn session_timeout_handler(State(app): State<AppState>) -> Response {
    match &app.0.callbacks.on_session_timeout {
        Some(handler) => (**handler)().await,
        None => launch::default_session_timeout(),
    }
}

pub async fn invalid_token_handler(State(app): State<AppState>) -> Response {
    match &app.0.callbacks.on_invalid_token {
        Some(handler) => (**handler)().await,
        None => launch::default_invalid_token(),
    }
}

/// Union of query-string and urlencoded-body parameters. Body values win
/// over query values of the same name.
async fn request_params(req: Request<Body>) -> HashMap<String, String> {
    let (parts, body) = req.into_parts();
    let mut params = HashMap::new();

    if let Some(query) = parts.uri.query() {
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert(k.into_owned(), v.into_owned());
        }
    }

    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        match axum::body::to_bytes(body, BODY_LIMIT).await {
            Ok(bytes) => {
                for (k, v) in url::form_urlencoded::parse(&bytes) {
                    params.insert(k.into_owned(), v.into_owned());
                }
            }
            Err(e) => tracing::debug!("failed to read request body: {}", e),
        }
    }

    params
}
