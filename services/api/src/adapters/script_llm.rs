//! services/api/src/adapters/script_llm.rs
//!
//! This module contains the adapter for the lesson-script LLM.
//! It implements the `ScriptGenerationService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are an expert curriculum developer and creative storyteller for an AI learning platform called "FeelEd".
Your task is to create an emotionally engaging audio lesson script based on the user's request.
The output MUST be a single valid JSON object with exactly these fields and no commentary around it:

{
  "title": string,
  "story": string,
  "scenes": [
    { "sceneNumber": integer, "narration": string, "visualDescription": string, "textOverlay": string (optional) }
  ],
  "quiz": {
    "question": string,
    "options": [ { "text": string, "isCorrect": boolean, "feedback": string } ]
  },
  "summary": string
}

Instructions:
1. Title: create a short, catchy title for the lesson in the requested language.
2. Story: write a short, simple, and relatable story that introduces the concept. The story should match the desired tone and be appropriate for the grade level.
3. Scenes: break the concept explanation into 3-5 simple scenes, numbered sequentially from 1. For each scene:
   - "narration": the voice-over script in the requested language. Keep it concise.
   - "visualDescription": describe the visuals or animation that would accompany the narration.
   - "textOverlay": (optional) very short text to highlight key terms or formulas.
4. Quiz: create one multiple-choice question to test understanding of the core concept. Provide 4 options. Exactly one option MUST have "isCorrect": true. Every option's "feedback" explains in detail why it is correct or incorrect, referencing the lesson script. All quiz text and feedback should be in the requested language.
5. Summary: conclude with a brief but powerful summary in the requested language that matches the desired tone. Recap the key learning points, connect them to a real-world example, and end with a single compelling call to action for the student."#;

const USER_INPUT_TEMPLATE: &str = r#"User Request:
- Concept/Problem: "{concept}"
- Grade Level: {grade}
- Language: {language}
- Desired Tone: {tone}

Respond with the lesson script JSON object only."#;

use async_openai::{
    config::OpenAIConfig, error::OpenAIError, types::responses::CreateResponseArgs, Client,
};
use async_trait::async_trait;
use feeled_core::domain::{LessonFormData, LessonScript};
use feeled_core::ports::{PortError, PortResult, ScriptGenerationService};
use tracing::error;

use super::map_provider_error;

const SCRIPT_FAILURE_MESSAGE: &str =
    "Failed to generate lesson script due to an issue with the AI model.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ScriptGenerationService` using an
/// OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiScriptAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiScriptAdapter {
    /// Creates a new `OpenAiScriptAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Trims a model answer down to the outermost JSON object: markdown fences
/// first, then anything before the first `{` or after the last `}`.
fn extract_json_object(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    text = text.strip_suffix("```").unwrap_or(text).trim();

    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if last > first {
            return &text[first..=last];
        }
    }
    text
}

//=========================================================================================
// `ScriptGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ScriptGenerationService for OpenAiScriptAdapter {
    /// Generates a structured lesson script for the submitted form data.
    async fn generate_script(&self, form: &LessonFormData) -> PortResult<LessonScript> {
        let user_input = USER_INPUT_TEMPLATE
            .replace("{concept}", &form.concept)
            .replace("{grade}", &form.grade)
            .replace("{language}", &form.language)
            .replace("{tone}", &form.tone);

        let request = CreateResponseArgs::default()
            .model(&self.model)
            .instructions(SYSTEM_INSTRUCTIONS)
            .input(user_input)
            .max_output_tokens(4000u32)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .responses()
            .create(request)
            .await
            .map_err(|e: OpenAIError| map_provider_error(e, SCRIPT_FAILURE_MESSAGE))?;

        let raw = response.output_text.unwrap_or_default();
        let json = extract_json_object(&raw);

        let script: LessonScript = serde_json::from_str(json).map_err(|e| {
            error!("script model returned unparseable JSON: {e}");
            PortError::Upstream(SCRIPT_FAILURE_MESSAGE.to_string())
        })?;

        Ok(script)
    }
}
