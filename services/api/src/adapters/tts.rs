//! services/api/src/adapters/tts.rs
//!
//! This module contains the adapter for OpenAI's Text-to-Speech (TTS) service.
//! It implements the `AudioSynthesisService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateSpeechRequest, SpeechModel, SpeechResponseFormat, Voice},
    Client,
};
use async_trait::async_trait;
use feeled_core::ports::{AudioSynthesisService, PortError, PortResult};

use super::map_provider_error;

const AUDIO_FAILURE_MESSAGE: &str =
    "Failed to generate audio. The text-to-speech service may be temporarily unavailable.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `AudioSynthesisService` port using the
/// OpenAI TTS API. The voice is chosen per call from the lesson form.
#[derive(Clone)]
pub struct OpenAiTtsAdapter {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
}

impl OpenAiTtsAdapter {
    /// Creates a new `OpenAiTtsAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: SpeechModel) -> Self {
        Self { client, model }
    }
}

/// Maps a form voice name onto the provider's voice enum.
fn map_voice(name: &str) -> Option<Voice> {
    match name.to_lowercase().as_str() {
        "alloy" => Some(Voice::Alloy),
        "echo" => Some(Voice::Echo),
        "fable" => Some(Voice::Fable),
        "onyx" => Some(Voice::Onyx),
        "nova" => Some(Voice::Nova),
        "shimmer" => Some(Voice::Shimmer),
        _ => None,
    }
}

//=========================================================================================
// `AudioSynthesisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AudioSynthesisService for OpenAiTtsAdapter {
    /// Narrates `text` with the requested voice, returning raw 16-bit mono
    /// PCM at 24 kHz. The caller wraps it into a WAV envelope.
    async fn synthesize(&self, text: &str, voice: &str) -> PortResult<Vec<u8>> {
        let voice = map_voice(voice).ok_or_else(|| {
            PortError::Upstream(format!("Unsupported narration voice '{voice}'."))
        })?;

        let request = CreateSpeechRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice,
            response_format: Some(SpeechResponseFormat::Pcm),
            ..Default::default()
        };

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .audio()
            .speech(request)
            .await
            .map_err(|e: OpenAIError| map_provider_error(e, AUDIO_FAILURE_MESSAGE))?;

        Ok(response.bytes.to_vec())
    }
}
