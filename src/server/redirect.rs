//! Redirect helper for in-tool navigation.
//!
//! Outbound redirects issued by user callbacks lose the continuation token
//! unless it is re-appended to the target's query string; this helper does
//! that, and can rebind the stored context path when the redirect lands on
//! a new resource.

use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;
use url::Url;

use crate::server::launch::LaunchSession;
use crate::server::persist::{Collection, ContextTokenRecord, Scope};
use crate::state::ToolState;

#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectOptions {
    /// Persist `target` as the context's resource path so re-entry resolves
    /// to the same resource.
    pub new_resource: bool,
}

/// 302 to `target`, carrying the session's continuation token along. With
/// no session bound to the request this is a plain redirect.
pub async fn redirect(
    state: &ToolState,
    session: Option<&LaunchSession>,
    target: &str,
    options: RedirectOptions,
) -> Response {
    let Some(session) = session else {
        return Redirect::to(target).into_response();
    };

    if options.new_resource {
        let key =
            ContextTokenRecord::key_for(&session.context.context_id, &session.context.user);
        if let Err(e) = state
            .store
            .modify(
                Scope::Plain,
                Collection::ContextToken,
                &key,
                &json!({ "path": target }),
            )
            .await
        {
            tracing::debug!("failed to rebind resource path: {}", e);
        }
    }

    let location = append_ltik(target, &session.ltik);
    Redirect::to(&location).into_response()
}

/// Merge the existing query of `target` with the continuation token.
/// Absolute URLs go through `Url` so `host:port` survives even when the
/// target has no path segment.
fn append_ltik(target: &str, ltik: &str) -> String {
    if let Ok(mut url) = Url::parse(target)
        && matches!(url.scheme(), "http" | "https")
    {
        url.query_pairs_mut().append_pair("ltik", ltik);
        return url.to_string();
    }

    match target.split_once('?') {
        Some((path, query)) if !query.is_empty() => {
            format!("{}?{}&ltik={}", path, query, urlencoding::encode(ltik))
        }
        _ => format!(
            "{}?ltik={}",
            target.trim_end_matches('?'),
            urlencoding::encode(ltik)
        ),
    }
}
