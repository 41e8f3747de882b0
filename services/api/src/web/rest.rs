//! services/api/src/web/rest.rs
//!
//! The lesson-facing HTTP surface: generation, resume, audio playback,
//! history, feedback, scene illustrations, share links, avatar settings
//! and the anonymous activity stamp.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use feeled_core::domain::{AvatarCustomization, Caller, Feedback, HistoryItem, LessonFormData};
use feeled_core::generation::GenerationError;
use feeled_core::ports::Notice;
use feeled_core::share;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use super::state::{AppState, CollectingNotifier};

//=========================================================================================
// The Error Envelope
//=========================================================================================

/// Every error body has the same shape: `{"error": {"message": "..."}}`.
#[derive(Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub error: ErrorMessage,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorMessage {
    pub message: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            error: ErrorMessage {
                message: message.into(),
            },
        }),
    )
        .into_response()
}

fn generation_error_status(err: &GenerationError) -> StatusCode {
    match err {
        GenerationError::IncompleteForm => StatusCode::BAD_REQUEST,
        GenerationError::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
        GenerationError::NotFound => StatusCode::NOT_FOUND,
        GenerationError::InvalidScript | GenerationError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
}

fn generation_error_response(err: &GenerationError) -> Response {
    error_response(generation_error_status(err), err.user_message())
}

/// Routes that operate on stored history require a signed-in caller.
fn require_user(caller: &Caller) -> Result<Uuid, Response> {
    match caller {
        Caller::User(user_id) => Ok(*user_id),
        Caller::Anonymous(_) => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Sign in to use lesson history.",
        )),
    }
}

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Serialize)]
pub struct LessonResponse {
    pub lesson: HistoryItem,
    pub notices: Vec<Notice>,
}

#[derive(Serialize)]
pub struct ResumeResponse {
    pub lesson: Option<HistoryItem>,
    pub notices: Vec<Notice>,
}

#[derive(Deserialize, ToSchema)]
pub struct FeedbackRequest {
    pub feedback: Feedback,
}

#[derive(Deserialize, Default, ToSchema)]
pub struct SceneImageRequest {
    /// Anonymous callers must carry the visual description themselves.
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SceneImageResponse {
    pub image_url: String,
}

#[derive(Serialize, ToSchema)]
pub struct ShareLinkResponse {
    pub share_url: String,
    pub token: String,
}

#[derive(Deserialize)]
pub struct SharedLessonQuery {
    pub lesson: String,
}

#[derive(Serialize)]
pub struct NoticesResponse {
    pub notices: Vec<Notice>,
}

//=========================================================================================
// Generation Handlers
//=========================================================================================

/// POST /lessons - Generate a lesson from a submitted form
#[utoipa::path(
    post,
    path = "/lessons",
    responses(
        (status = 201, description = "Lesson generated"),
        (status = 400, description = "Incomplete form", body = ErrorEnvelope),
        (status = 402, description = "Free lesson quota exhausted", body = ErrorEnvelope),
        (status = 502, description = "Generation failed upstream", body = ErrorEnvelope)
    )
)]
pub async fn generate_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(form): Json<LessonFormData>,
) -> Response {
    let notifier = CollectingNotifier::default();
    match state.pipeline.generate(&caller, &form, &notifier).await {
        Ok(lesson) => (
            StatusCode::CREATED,
            Json(LessonResponse {
                lesson,
                notices: notifier.into_notices(),
            }),
        )
            .into_response(),
        Err(err) => generation_error_response(&err),
    }
}

/// POST /lessons/resume - Replay an interrupted generation, if one is stored
#[utoipa::path(
    post,
    path = "/lessons/resume",
    responses(
        (status = 200, description = "Replayed lesson, or null when nothing was pending"),
        (status = 402, description = "Free lesson quota exhausted", body = ErrorEnvelope),
        (status = 502, description = "Generation failed upstream", body = ErrorEnvelope)
    )
)]
pub async fn resume_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Response {
    let notifier = CollectingNotifier::default();
    match state.pipeline.resume(&caller, &notifier).await {
        Ok(lesson) => Json(ResumeResponse {
            lesson,
            notices: notifier.into_notices(),
        })
        .into_response(),
        Err(err) => generation_error_response(&err),
    }
}

/// GET /lessons/audio/{file} - Stream a generated lesson's WAV audio
#[utoipa::path(
    get,
    path = "/lessons/audio/{file}",
    params(("file" = String, Path, description = "Lesson id, with or without a .wav suffix")),
    responses(
        (status = 200, description = "WAV audio"),
        (status = 404, description = "Audio not found", body = ErrorEnvelope)
    )
)]
pub async fn lesson_audio_handler(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Response {
    let id_str = file.strip_suffix(".wav").unwrap_or(&file);
    let Ok(lesson_id) = id_str.parse::<i64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid lesson audio id.");
    };

    match state.pipeline.slots().load_audio(lesson_id).await {
        Ok(Some(wav)) => ([(header::CONTENT_TYPE, "audio/wav")], wav).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "Audio for this lesson is no longer available.",
        ),
        Err(e) => {
            error!("could not load the lesson audio blob: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load lesson audio.",
            )
        }
    }
}

//=========================================================================================
// History Handlers
//=========================================================================================

/// GET /lessons/history - List the caller's lessons, newest first
#[utoipa::path(
    get,
    path = "/lessons/history",
    responses(
        (status = 200, description = "Lesson history, newest first"),
        (status = 401, description = "Not signed in", body = ErrorEnvelope)
    )
)]
pub async fn list_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Response {
    let user_id = match require_user(&caller) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };
    match state.pipeline.list_history(user_id).await {
        Ok(history) => Json(history).into_response(),
        Err(err) => generation_error_response(&err),
    }
}

/// DELETE /lessons/history/{id} - Delete one lesson from history
#[utoipa::path(
    delete,
    path = "/lessons/history/{id}",
    params(("id" = i64, Path, description = "Lesson id")),
    responses(
        (status = 204, description = "Lesson deleted"),
        (status = 404, description = "Lesson not found", body = ErrorEnvelope)
    )
)]
pub async fn delete_history_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(lesson_id): Path<i64>,
) -> Response {
    let user_id = match require_user(&caller) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };
    match state.pipeline.delete_history_item(user_id, lesson_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => generation_error_response(&err),
    }
}

/// DELETE /lessons/history - Clear the caller's entire history
#[utoipa::path(
    delete,
    path = "/lessons/history",
    responses(
        (status = 204, description = "History cleared"),
        (status = 401, description = "Not signed in", body = ErrorEnvelope)
    )
)]
pub async fn clear_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Response {
    let user_id = match require_user(&caller) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };
    match state.pipeline.clear_history(user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => generation_error_response(&err),
    }
}

/// POST /lessons/{id}/feedback - Record a thumbs-up or thumbs-down vote
#[utoipa::path(
    post,
    path = "/lessons/{id}/feedback",
    params(("id" = i64, Path, description = "Lesson id")),
    responses(
        (status = 200, description = "Feedback recorded"),
        (status = 404, description = "Lesson not found", body = ErrorEnvelope)
    )
)]
pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(lesson_id): Path<i64>,
    Json(req): Json<FeedbackRequest>,
) -> Response {
    let user_id = match require_user(&caller) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };
    let notifier = CollectingNotifier::default();
    match state
        .pipeline
        .submit_feedback(user_id, lesson_id, req.feedback, &notifier)
        .await
    {
        Ok(()) => Json(NoticesResponse {
            notices: notifier.into_notices(),
        })
        .into_response(),
        Err(err) => generation_error_response(&err),
    }
}

//=========================================================================================
// Scene Illustration Handler
//=========================================================================================

/// POST /lessons/{id}/scenes/{scene}/image - Illustrate one scene
///
/// Signed-in callers have the image generated from the stored scene's visual
/// description and patched into their history. Anonymous callers supply the
/// prompt themselves and patch their local copy.
#[utoipa::path(
    post,
    path = "/lessons/{id}/scenes/{scene}/image",
    params(
        ("id" = i64, Path, description = "Lesson id"),
        ("scene" = u32, Path, description = "Scene number within the lesson")
    ),
    request_body = SceneImageRequest,
    responses(
        (status = 200, description = "Illustration generated", body = SceneImageResponse),
        (status = 404, description = "Lesson or scene not found", body = ErrorEnvelope),
        (status = 502, description = "Image generation failed", body = ErrorEnvelope)
    )
)]
pub async fn scene_image_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((lesson_id, scene_number)): Path<(i64, u32)>,
    Json(req): Json<SceneImageRequest>,
) -> Response {
    let result = match &caller {
        Caller::User(user_id) => {
            state
                .pipeline
                .attach_scene_image(*user_id, lesson_id, scene_number)
                .await
        }
        Caller::Anonymous(_) => {
            let prompt = req.prompt.unwrap_or_default();
            state.pipeline.generate_scene_image(&prompt).await
        }
    };
    match result {
        Ok(image_url) => Json(SceneImageResponse { image_url }).into_response(),
        Err(err) => generation_error_response(&err),
    }
}

//=========================================================================================
// Share Handlers
//=========================================================================================

/// POST /lessons/{id}/share - Mint a share link for a stored lesson
#[utoipa::path(
    post,
    path = "/lessons/{id}/share",
    params(("id" = i64, Path, description = "Lesson id")),
    responses(
        (status = 200, description = "Share link minted", body = ShareLinkResponse),
        (status = 404, description = "Lesson not found", body = ErrorEnvelope)
    )
)]
pub async fn share_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(lesson_id): Path<i64>,
) -> Response {
    let user_id = match require_user(&caller) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };
    let history = match state.pipeline.list_history(user_id).await {
        Ok(history) => history,
        Err(err) => return generation_error_response(&err),
    };
    let Some(item) = history.iter().find(|item| item.id == lesson_id) else {
        return generation_error_response(&GenerationError::NotFound);
    };

    let token = share::encode(item);
    let share_url = share::share_link(&state.config.public_base_url, item);
    Json(ShareLinkResponse { share_url, token }).into_response()
}

/// GET /lessons/shared?lesson={token} - Resolve a share token
///
/// Broken tokens answer 404, never 500: a stale link degrades to "no shared
/// lesson" exactly like the codec's own soft-failure policy.
#[utoipa::path(
    get,
    path = "/lessons/shared",
    params(("lesson" = String, Query, description = "Share token")),
    responses(
        (status = 200, description = "The shared lesson"),
        (status = 404, description = "Invalid or expired token", body = ErrorEnvelope)
    )
)]
pub async fn shared_lesson_handler(Query(query): Query<SharedLessonQuery>) -> Response {
    match share::decode(&query.lesson) {
        Some(lesson) => Json(lesson).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "This shared lesson link is invalid or has expired.",
        ),
    }
}

//=========================================================================================
// Avatar Handlers
//=========================================================================================

/// GET /profile/avatar - Fetch the caller's avatar settings
#[utoipa::path(
    get,
    path = "/profile/avatar",
    responses((status = 200, description = "Avatar settings, or null when unset"))
)]
pub async fn get_avatar_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Response {
    match state.pipeline.slots().load_avatar(&caller).await {
        Ok(avatar) => Json(avatar).into_response(),
        Err(e) => {
            error!("could not load the avatar slot: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load avatar settings.",
            )
        }
    }
}

/// PUT /profile/avatar - Replace the caller's avatar settings
#[utoipa::path(
    put,
    path = "/profile/avatar",
    responses(
        (status = 204, description = "Avatar saved"),
        (status = 500, description = "Storage failure", body = ErrorEnvelope)
    )
)]
pub async fn put_avatar_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(avatar): Json<AvatarCustomization>,
) -> Response {
    match state.pipeline.slots().save_avatar(&caller, &avatar).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("could not save the avatar slot: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save avatar settings.",
            )
        }
    }
}

//=========================================================================================
// Activity Handler
//=========================================================================================

/// POST /session/activity - Stamp anonymous activity for the inactivity reset
#[utoipa::path(
    post,
    path = "/session/activity",
    responses((status = 200, description = "Activity stamped; any reset notice is returned"))
)]
pub async fn activity_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Response {
    let notifier = CollectingNotifier::default();
    state.pipeline.touch_activity(&caller, &notifier).await;
    Json(NoticesResponse {
        notices: notifier.into_notices(),
    })
    .into_response()
}

//=========================================================================================
// OpenAPI Documentation
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        generate_lesson_handler,
        resume_lesson_handler,
        lesson_audio_handler,
        list_history_handler,
        delete_history_item_handler,
        clear_history_handler,
        feedback_handler,
        scene_image_handler,
        share_lesson_handler,
        shared_lesson_handler,
        get_avatar_handler,
        put_avatar_handler,
        activity_handler,
    ),
    components(schemas(
        ErrorEnvelope,
        ErrorMessage,
        SceneImageRequest,
        SceneImageResponse,
        ShareLinkResponse,
        crate::web::auth::SignupRequest,
        crate::web::auth::LoginRequest,
        crate::web::auth::AuthResponse,
    )),
    info(
        title = "FeelEd API",
        description = "Two-phase AI lesson generation with shareable links"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_errors_map_to_their_documented_statuses() {
        assert_eq!(
            generation_error_status(&GenerationError::IncompleteForm),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            generation_error_status(&GenerationError::QuotaExceeded),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            generation_error_status(&GenerationError::NotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            generation_error_status(&GenerationError::InvalidScript),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            generation_error_status(&GenerationError::Upstream("boom".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn envelope_serializes_to_the_shared_shape() {
        let envelope = ErrorEnvelope {
            error: ErrorMessage {
                message: "You have used all your free lessons.".into(),
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json["error"]["message"],
            "You have used all your free lessons."
        );
    }
}
