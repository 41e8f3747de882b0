//! crates/feeled_core/src/share.rs
//!
//! The shareable-lesson codec. A lesson's portable subset is serialized to
//! compact JSON, percent-encoded into a single-byte-safe ASCII form, then
//! base64-encoded with the URL-safe alphabet so the token can ride in a
//! `?lesson=` query parameter.
//!
//! Decoding is deliberately best-effort: a broken link degrades to "no shared
//! lesson" rather than an error page.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::debug;

use crate::domain::{HistoryItem, SharedLesson};

/// The query parameter carrying a share token.
pub const SHARE_QUERY_PARAM: &str = "lesson";

/// Encodes the shareable subset of a history item into a URL-safe token.
///
/// Identity fields, personal feedback and the session-local audio URL are
/// stripped by the [`SharedLesson`] conversion.
pub fn encode(item: &HistoryItem) -> String {
    let shared = SharedLesson::from(item);
    let json = serde_json::to_string(&shared).expect("shareable lesson serializes to JSON");
    // Percent-encoding first normalizes any Unicode into plain ASCII.
    let ascii = urlencoding::encode(&json);
    URL_SAFE_NO_PAD.encode(ascii.as_bytes())
}

/// Builds a full share link for the given base URL.
pub fn share_link(base_url: &str, item: &HistoryItem) -> String {
    format!(
        "{}?{}={}",
        base_url.trim_end_matches('/'),
        SHARE_QUERY_PARAM,
        encode(item)
    )
}

/// Decodes a share token back into a lesson.
///
/// Returns `None` for anything that is not a well-formed token carrying a
/// titled lesson with at least one scene; failures are logged, never raised.
pub fn decode(token: &str) -> Option<SharedLesson> {
    let bytes = match URL_SAFE_NO_PAD.decode(token.trim().as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("share token is not valid base64: {e}");
            return None;
        }
    };

    let ascii = match String::from_utf8(bytes) {
        Ok(ascii) => ascii,
        Err(e) => {
            debug!("share token payload is not UTF-8: {e}");
            return None;
        }
    };

    let json = match urlencoding::decode(&ascii) {
        Ok(json) => json,
        Err(e) => {
            debug!("share token payload is not percent-encoded text: {e}");
            return None;
        }
    };

    let lesson: SharedLesson = match serde_json::from_str(&json) {
        Ok(lesson) => lesson,
        Err(e) => {
            debug!("share token payload is not a lesson: {e}");
            return None;
        }
    };

    // Soft schema check: a shared lesson needs a title and at least one scene.
    if lesson.title.trim().is_empty() || lesson.scenes.is_empty() {
        debug!("share token decoded but the lesson is incomplete; ignoring it");
        return None;
    }

    Some(lesson)
}
