use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::models::{CreateSessionResponse, ProviderModels, PublishRequest};
use crate::api::response;
use crate::error::{AppError, Result};
use crate::llm::Provider;
use crate::pipeline::GenerateRequest;
use crate::session::CredentialsUpdate;
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/models", get(models_handler))
        .route("/api/sessions", post(create_session_handler))
        .route("/api/sessions/:id", get(session_status_handler))
        .route(
            "/api/sessions/:id/credentials",
            put(set_credentials_handler).delete(clear_credentials_handler),
        )
        .route("/api/sessions/:id/refresh", post(refresh_handler))
        .route("/api/sessions/:id/generate", post(generate_handler))
        .route("/api/sessions/:id/post", get(last_post_handler))
        .route("/api/sessions/:id/publish", post(publish_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn models_handler() -> impl IntoResponse {
    let catalog: Vec<ProviderModels> = Provider::ALL
        .into_iter()
        .map(|provider| ProviderModels {
            provider,
            name: provider.display_name(),
            models: provider.models(),
            custom_models: provider == Provider::OpenRouter,
        })
        .collect();
    response::success(catalog)
}

async fn create_session_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let session_id = state.sessions.create()?;
    Ok(response::created(CreateSessionResponse {
        session_id,
        expires_in_secs: state.sessions.policy().timeout.as_secs(),
    }))
}

async fn session_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(response::success(state.sessions.status(id)?))
}

async fn set_credentials_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<CredentialsUpdate>,
) -> Result<impl IntoResponse> {
    state.sessions.configure(id, update)?;
    Ok(response::success(state.sessions.status(id)?))
}

async fn clear_credentials_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.sessions.clear(id)?;
    Ok(response::success(state.sessions.status(id)?))
}

async fn refresh_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.sessions.refresh(id)?;
    Ok(response::success(state.sessions.status(id)?))
}

async fn generate_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<GenerateRequest>,
) -> Result<impl IntoResponse> {
    tracing::info!(session = %id, url = %req.url, auto_post = req.auto_post, "processing generate request");
    let start_time = std::time::Instant::now();

    // Set an overall timeout for the entire handler
    let result = tokio::time::timeout(
        state.config.request_timeout,
        state.pipeline.run(&state.sessions, id, req),
    )
    .await;

    let elapsed = start_time.elapsed();
    match result {
        Ok(Ok(outcome)) => {
            tracing::info!(session = %id, ?elapsed, published = outcome.published.is_some(), "generate request succeeded");
            Ok(response::success(outcome))
        }
        Ok(Err(err)) => {
            tracing::warn!(session = %id, ?elapsed, error = %err, "generate request failed");
            Err(err)
        }
        Err(_) => {
            tracing::warn!(session = %id, ?elapsed, "generate request timed out");
            Err(AppError::Provider("Request processing timed out".to_string()))
        }
    }
}

async fn last_post_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let post = state
        .sessions
        .last_post(id)?
        .ok_or_else(|| AppError::InvalidInput("No post has been generated yet".to_string()))?;
    Ok(response::success(post))
}

async fn publish_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<PublishRequest>>,
) -> Result<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let result = tokio::time::timeout(
        state.config.request_timeout,
        state.pipeline.publish(&state.sessions, id, req.visibility),
    )
    .await;

    match result {
        Ok(Ok(confirmation)) => Ok(response::success(confirmation)),
        Ok(Err(err)) => {
            tracing::warn!(session = %id, error = %err, "publish failed");
            Err(err)
        }
        Err(_) => Err(AppError::Posting("Request processing timed out".to_string())),
    }
}
