//! crates/feeled_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! Wire names are camelCase so that generated lessons, persisted history
//! and share tokens all use the same JSON shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// The form a caller submits to request a new lesson.
///
/// All fields are required; beyond presence there is no semantic validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LessonFormData {
    pub concept: String,
    pub grade: String,
    pub language: String,
    pub tone: String,
    pub voice: String,
}

impl LessonFormData {
    /// Presence-only check: every field must be non-blank.
    pub fn is_complete(&self) -> bool {
        [
            &self.concept,
            &self.grade,
            &self.language,
            &self.tone,
            &self.voice,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

/// A single narrated scene within a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// 1-based, sequential within a script.
    pub scene_number: u32,
    pub narration: String,
    pub visual_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_overlay: Option<String>,
    /// Patched in place after creation once an illustration is generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOption {
    pub text: String,
    pub is_correct: bool,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub question: String,
    pub options: Vec<QuizOption>,
}

/// The document the script-generation model returns.
///
/// The "exactly one option is correct" invariant is enforced by the
/// generation prompt only, not validated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonScript {
    pub title: String,
    pub story: String,
    pub scenes: Vec<Scene>,
    pub quiz: Quiz,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AvatarStyle {
    Robot,
    Blob,
    Alien,
    Photo,
}

/// The caller's tutor-avatar settings, snapshotted onto each lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvatarCustomization {
    pub style: AvatarStyle,
    pub color: String,
    pub has_glasses: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A fully generated lesson: the script fields plus the resolved audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub audio_url: String,
    pub quiz: Quiz,
    pub summary: String,
    pub title: String,
    pub scenes: Vec<Scene>,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_customization: Option<AvatarCustomization>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

/// A completed lesson as it lives in a user's history list.
///
/// `id` is the creation time in epoch milliseconds, used as an opaque unique
/// key; `timestamp` is redundant with it by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: i64,
    pub timestamp: i64,
    #[serde(flatten)]
    pub content: GeneratedContent,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

/// The portable subset of a lesson carried inside a share token.
///
/// Identity (id, timestamp), personal feedback and the non-portable audio
/// URL are excluded by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLesson {
    pub title: String,
    pub scenes: Vec<Scene>,
    pub quiz: Quiz,
    pub summary: String,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_customization: Option<AvatarCustomization>,
}

impl From<&HistoryItem> for SharedLesson {
    fn from(item: &HistoryItem) -> Self {
        Self {
            title: item.content.title.clone(),
            scenes: item.content.scenes.clone(),
            quiz: item.content.quiz.clone(),
            summary: item.content.summary.clone(),
            voice: item.content.voice.clone(),
            avatar_customization: item.content.avatar_customization.clone(),
        }
    }
}

/// Who is asking for a generation: a signed-in user or an anonymous browser
/// session identified by its client key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User(Uuid),
    Anonymous(String),
}

impl Caller {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Caller::Anonymous(_))
    }

    /// A stable storage-key fragment for this caller's scoped slots.
    pub fn storage_key(&self) -> String {
        match self {
            Caller::User(id) => format!("user:{id}"),
            Caller::Anonymous(client) => format!("anon:{client}"),
        }
    }
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
