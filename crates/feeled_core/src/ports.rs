//! crates/feeled_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like the
//! generative-AI provider or the persistence backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{LessonFormData, LessonScript, User, UserCredentials};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., the
/// AI provider, database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// A non-2xx answer from a generation endpoint; the message is passed
    /// through to the caller verbatim.
    #[error("{0}")]
    Upstream(String),
    /// A persistence read or write failed. Callers on best-effort paths log
    /// this and degrade instead of aborting.
    #[error("storage error: {0}")]
    Storage(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Generation Ports (Traits)
//=========================================================================================

/// Phase 1: turn a lesson request into a structured script.
#[async_trait]
pub trait ScriptGenerationService: Send + Sync {
    async fn generate_script(&self, form: &LessonFormData) -> PortResult<LessonScript>;
}

/// Phase 2: narrate text with the requested voice.
///
/// Implementations return raw linear PCM audio (16-bit, single channel,
/// 24 kHz); the pipeline wraps it into a playable WAV envelope.
#[async_trait]
pub trait AudioSynthesisService: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> PortResult<Vec<u8>>;
}

/// Generates an illustration for a scene's visual description, returned as a
/// self-contained data URL.
#[async_trait]
pub trait ImageSynthesisService: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> PortResult<String>;
}

//=========================================================================================
// Persistence Ports (Traits)
//=========================================================================================

/// The explicit key-value store behind every persisted slot.
///
/// Values are JSON strings; the typed accessors in [`crate::slots`] own the
/// key layout and the (de)serialization.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> PortResult<()>;
    async fn delete(&self, key: &str) -> PortResult<()>;
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}

//=========================================================================================
// Ambient Ports (Traits)
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Info,
    Error,
}

/// A user-visible notice emitted while the pipeline runs (threshold warnings,
/// session resets, completion messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Injected time source so lesson ids and the inactivity window are testable.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The wall clock used by the running service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
