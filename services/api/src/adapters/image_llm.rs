//! services/api/src/adapters/image_llm.rs
//!
//! This module contains the adapter for the scene-illustration model.
//! It implements the `ImageSynthesisService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat},
    Client,
};
use async_trait::async_trait;
use feeled_core::ports::{ImageSynthesisService, PortError, PortResult};

use super::map_provider_error;

const IMAGE_FAILURE_MESSAGE: &str =
    "Failed to generate the image. The image generation service may be temporarily unavailable or the prompt was rejected.";
const NO_IMAGE_MESSAGE: &str =
    "The AI model did not return any image data. Please try again with a different description.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ImageSynthesisService` port using the
/// OpenAI image-generation API.
#[derive(Clone)]
pub struct OpenAiImageAdapter {
    client: Client<OpenAIConfig>,
    model: ImageModel,
}

impl OpenAiImageAdapter {
    /// Creates a new `OpenAiImageAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: ImageModel) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `ImageSynthesisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ImageSynthesisService for OpenAiImageAdapter {
    /// Generates an illustration for a scene's visual description and
    /// returns it as a self-contained data URL.
    async fn generate_image(&self, prompt: &str) -> PortResult<String> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(self.model.clone())
            .response_format(ImageResponseFormat::B64Json)
            .n(1u8)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .images()
            .create(request)
            .await
            .map_err(|e: OpenAIError| map_provider_error(e, IMAGE_FAILURE_MESSAGE))?;

        let image = response
            .data
            .first()
            .ok_or_else(|| PortError::Upstream(NO_IMAGE_MESSAGE.to_string()))?;

        match image.as_ref() {
            Image::B64Json { b64_json, .. } => Ok(format!("data:image/png;base64,{b64_json}")),
            Image::Url { url, .. } => Ok(url.clone()),
        }
    }
}
