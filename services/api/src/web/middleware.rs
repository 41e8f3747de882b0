//! services/api/src/web/middleware.rs
//!
//! Resolves the caller identity for every lesson route. A valid session
//! cookie maps to a signed-in user; otherwise the `x-client-id` header
//! identifies an anonymous browser profile.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use feeled_core::domain::Caller;
use std::sync::Arc;
use tracing::debug;

use super::rest::error_response;
use super::state::AppState;

/// The header anonymous clients send to scope their slots.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|cookie| {
        cookie
            .trim()
            .strip_prefix("session=")
            .map(|id| id.to_string())
    })
}

/// Middleware that attaches a [`Caller`] extension to the request, or
/// rejects it when no identity can be established.
pub async fn identify(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller = if let Some(session_id) = session_cookie(request.headers()) {
        match state.identity.validate_auth_session(&session_id).await {
            Ok(user_id) => Caller::User(user_id),
            Err(e) => {
                debug!("rejecting stale session cookie: {e}");
                return error_response(
                    StatusCode::UNAUTHORIZED,
                    "Your session has expired. Please sign in again.",
                );
            }
        }
    } else {
        let client_key = request
            .headers()
            .get(CLIENT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty());

        match client_key {
            Some(key) => Caller::Anonymous(key.to_string()),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Sign in or provide an x-client-id header to use the lesson API.",
                );
            }
        }
    };

    request.extensions_mut().insert(caller);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_cookie_is_found_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc123; lang=en"),
        );
        assert_eq!(session_cookie(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn missing_cookie_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers), None);
    }
}
