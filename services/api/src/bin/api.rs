//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        image_llm::OpenAiImageAdapter, script_llm::OpenAiScriptAdapter, store::PgStore,
        tts::OpenAiTtsAdapter,
    },
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        middleware::identify,
        rest::{
            activity_handler, clear_history_handler, delete_history_item_handler,
            feedback_handler, generate_lesson_handler, get_avatar_handler, lesson_audio_handler,
            list_history_handler, put_avatar_handler, resume_lesson_handler, scene_image_handler,
            share_lesson_handler, shared_lesson_handler, ApiDoc,
        },
        state::AppState,
    },
};
use async_openai::{
    config::OpenAIConfig,
    types::{ImageModel, SpeechModel},
    Client,
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use feeled_core::generation::LessonPipeline;
use feeled_core::ports::SystemClock;
use feeled_core::slots::Slots;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(db_pool.clone()));
    info!("Running database migrations...");
    store
        .run_migrations()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let script_adapter = Arc::new(OpenAiScriptAdapter::new(
        openai_client.clone(),
        config.script_model.clone(),
    ));

    let tts_model = match config.tts_model.as_str() {
        "tts-1" => SpeechModel::Tts1,
        "tts-1-hd" => SpeechModel::Tts1Hd,
        other => SpeechModel::Other(other.to_string()),
    };
    let tts_adapter = Arc::new(OpenAiTtsAdapter::new(openai_client.clone(), tts_model));

    let image_model = match config.image_model.as_str() {
        "dall-e-2" => ImageModel::DallE2,
        "dall-e-3" => ImageModel::DallE3,
        other => ImageModel::Other(other.to_string()),
    };
    let image_adapter = Arc::new(OpenAiImageAdapter::new(openai_client.clone(), image_model));

    // --- 4. Build the Pipeline and the Shared AppState ---
    let slots = Slots::new(store.clone());
    let pipeline = LessonPipeline::new(
        script_adapter,
        tts_adapter,
        image_adapter,
        slots,
        Arc::new(SystemClock),
    )
    .with_limits(
        config.free_lesson_limit,
        config.inactivity_timeout_minutes * 60 * 1000,
    );

    let app_state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        identity: store.clone(),
        config: config.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {e}")))?,
        )
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no caller identity required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/lessons/shared", get(shared_lesson_handler))
        .route("/lessons/audio/{file}", get(lesson_audio_handler));

    // Lesson routes (session cookie or x-client-id required)
    let lesson_routes = Router::new()
        .route("/lessons", post(generate_lesson_handler))
        .route("/lessons/resume", post(resume_lesson_handler))
        .route(
            "/lessons/history",
            get(list_history_handler).delete(clear_history_handler),
        )
        .route("/lessons/history/{id}", delete(delete_history_item_handler))
        .route("/lessons/{id}/feedback", post(feedback_handler))
        .route(
            "/lessons/{id}/scenes/{scene}/image",
            post(scene_image_handler),
        )
        .route("/lessons/{id}/share", post(share_lesson_handler))
        .route(
            "/profile/avatar",
            get(get_avatar_handler).put(put_avatar_handler),
        )
        .route("/session/activity", post(activity_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            identify,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(lesson_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
