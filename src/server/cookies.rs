//! Cookie construction for the launch flow.
//!
//! Two signed cookies carry launch state across redirects: a short-lived
//! `state<nonce>` cookie binding the OIDC round trip to one issuer, and a
//! per-deployment session cookie (named by the platform code) holding the
//! launched subject.

use axum_extra::extract::cookie::{Cookie, SignedCookieJar};
use cookie::time::Duration as CookieDuration;

use crate::config::CookieOptions;

/// Prefix of the login state cookies; the full name is `state<nonce>`.
pub const STATE_COOKIE_PREFIX: &str = "state";

pub fn state_cookie_name(state: &str) -> String {
    format!("{}{}", STATE_COOKIE_PREFIX, state)
}

/// The state cookie set at login: value is the issuer, bounded to the
/// lifetime of one OIDC round trip.
pub fn build_state_cookie(state: &str, iss: &str, opts: &CookieOptions) -> Cookie<'static> {
    with_options(
        Cookie::build((state_cookie_name(state), iss.to_string())),
        opts,
    )
    .max_age(CookieDuration::minutes(10))
    .build()
}

/// The session cookie set on a successful launch: named by the platform
/// code, value is the launched subject. A session cookie, so no max-age.
pub fn build_session_cookie(
    platform_code: &str,
    user: &str,
    opts: &CookieOptions,
) -> Cookie<'static> {
    with_options(
        Cookie::build((platform_code.to_string(), user.to_string())),
        opts,
    )
    .build()
}

pub fn clear_state_cookie(jar: SignedCookieJar, state: &str) -> SignedCookieJar {
    jar.remove(
        Cookie::build((state_cookie_name(state), ""))
            .path("/")
            .build(),
    )
}

fn with_options<'c>(
    builder: cookie::CookieBuilder<'c>,
    opts: &CookieOptions,
) -> cookie::CookieBuilder<'c> {
    builder
        .http_only(true)
        .secure(opts.effective_secure())
        .same_site(opts.same_site.as_same_site())
        .path("/")
}
