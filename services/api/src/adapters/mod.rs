pub mod image_llm;
pub mod script_llm;
pub mod store;
pub mod tts;

pub use image_llm::OpenAiImageAdapter;
pub use script_llm::OpenAiScriptAdapter;
pub use store::PgStore;
pub use tts::OpenAiTtsAdapter;

use async_openai::error::OpenAIError;
use feeled_core::ports::PortError;

/// The message the UI keys on to re-prompt for credential selection.
pub(crate) const INVALID_API_KEY_MESSAGE: &str =
    "The provided API key is invalid or not found. Please select a valid key and try again.";

/// Maps a provider error to the port error shown to the user.
///
/// Credential problems keep their distinctive "API key" wording; everything
/// else collapses into the adapter's generic failure message (details go to
/// the log, not the user).
pub(crate) fn map_provider_error(err: OpenAIError, fallback: &str) -> PortError {
    let detail = err.to_string();
    tracing::error!("generation provider call failed: {detail}");
    if detail.to_lowercase().contains("api key") {
        PortError::Upstream(INVALID_API_KEY_MESSAGE.to_string())
    } else {
        PortError::Upstream(fallback.to_string())
    }
}
