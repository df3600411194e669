//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    CompleteResearchRequest, ConversationLogsResponse, CreateUserRequest, ErrorResponse,
    ResearchRequest, SayRequest, SearchRequest, SelectRequest, SelectionsResponse,
    SetVoiceRequest, SignedUrlResponse, StartSessionRequest, StartSessionResponse,
};
use super::ws::voice_socket;
use super::AppState;
use crate::db::{DbError, PreferencesUpdate, UserProfile};
use crate::research::{
    summarize_selection, RestaurantQuery, RestaurantResults, SearchError, SearchResponse,
};
use crate::runtime::{SessionError, SseEvent};
use crate::state_machine::{SessionSnapshot, TransitionError};
use crate::voice::{VoiceError, VoiceErrorKind};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Upper bound on results per search request
const MAX_SEARCH_RESULTS: u32 = 20;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route("/api/sessions/:id/voice", get(voice_socket))
        .route("/api/sessions/:id/end", post(end_session))
        // Reply dispatch
        .route("/api/sessions/:id/select", post(select_suggestion))
        .route("/api/sessions/:id/say", post(say))
        .route("/api/sessions/:id/regenerate", post(regenerate))
        // Research
        .route("/api/sessions/:id/research", post(request_research))
        .route(
            "/api/sessions/:id/research/complete",
            post(complete_research),
        )
        .route("/api/sessions/:id/research/cancel", post(cancel_research))
        .route("/api/research/search", post(search))
        .route("/api/research/restaurants", post(find_restaurants))
        // Users
        .route("/api/users", post(create_user))
        .route("/api/users/:auth_id", get(get_user))
        .route("/api/users/:auth_id/preferences", post(update_preferences))
        .route("/api/users/:auth_id/voice", post(set_voice))
        .route("/api/users/:auth_id/conversations", get(list_conversations))
        .route("/api/users/:auth_id/selections", get(list_selections))
        // Voice provider
        .route("/api/voice/signed-url", get(signed_url))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Sessions
// ============================================================

async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, AppError> {
    let started = state.sessions.start(&req.user_id).await?;
    Ok(Json(StartSessionResponse {
        session_id: started.session_id,
        snapshot: started.snapshot,
        voice: started.voice,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.sessions.snapshot(&id).await?))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (snapshot, broadcast_rx) = state.sessions.subscribe(&id).await?;
    Ok(sse_stream(SseEvent::Init { snapshot }, broadcast_rx))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.sessions.end(&id).await?))
}

async fn select_suggestion(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.sessions.select_suggestion(&id, &req.id).await?))
}

async fn say(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SayRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.sessions.submit_custom_text(&id, &req.text).await?))
}

async fn regenerate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.sessions.request_regeneration(&id).await?))
}

// ============================================================
// Research
// ============================================================

async fn request_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.sessions.request_research(&id, &req.query).await?))
}

async fn complete_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CompleteResearchRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let typed = req.result.filter(|r| !r.trim().is_empty());
    let result = match (typed, req.selected) {
        (Some(text), _) => text,
        (None, Some(selected)) => summarize_selection(&selected),
        (None, None) => {
            return Err(AppError::BadRequest(
                "Provide a result or selected search results".to_string(),
            ))
        }
    };
    Ok(Json(state.sessions.complete_research(&id, &result).await?))
}

async fn cancel_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.sessions.cancel_research(&id).await?))
}

async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let Some(provider) = state.search.as_ref() else {
        return Err(AppError::Unavailable(
            "Web search is not configured".to_string(),
        ));
    };
    let max_results = req
        .num_results
        .unwrap_or(state.search_results)
        .clamp(1, MAX_SEARCH_RESULTS);
    Ok(Json(provider.search(&req.query, max_results).await?))
}

async fn find_restaurants(
    State(state): State<AppState>,
    Json(query): Json<RestaurantQuery>,
) -> Result<Json<RestaurantResults>, AppError> {
    let Some(places) = state.places.as_ref() else {
        return Err(AppError::Unavailable(
            "Restaurant search is not configured".to_string(),
        ));
    };
    Ok(Json(places.find(&query).await?))
}

// ============================================================
// Users
// ============================================================

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserProfile>, AppError> {
    if req.auth_id.trim().is_empty() {
        return Err(AppError::BadRequest("auth_id is required".to_string()));
    }
    let user = state
        .db
        .upsert_user(&req.auth_id, req.email.as_deref(), req.name.as_deref())?;
    Ok(Json(user))
}

async fn get_user(
    State(state): State<AppState>,
    Path(auth_id): Path<String>,
) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(state.db.get_user(&auth_id)?))
}

async fn update_preferences(
    State(state): State<AppState>,
    Path(auth_id): Path<String>,
    Json(update): Json<PreferencesUpdate>,
) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(state.db.update_preferences(&auth_id, &update)?))
}

async fn set_voice(
    State(state): State<AppState>,
    Path(auth_id): Path<String>,
    Json(req): Json<SetVoiceRequest>,
) -> Result<Json<UserProfile>, AppError> {
    if req.voice_id.trim().is_empty() {
        return Err(AppError::BadRequest("voice_id is required".to_string()));
    }
    Ok(Json(state.db.set_voice(&auth_id, req.voice_id.trim())?))
}

async fn list_conversations(
    State(state): State<AppState>,
    Path(auth_id): Path<String>,
) -> Result<Json<ConversationLogsResponse>, AppError> {
    // Distinguish an unknown user from one with no history
    state.db.get_user(&auth_id)?;
    let conversations = state.db.list_conversation_logs(&auth_id)?;
    Ok(Json(ConversationLogsResponse { conversations }))
}

async fn list_selections(
    State(state): State<AppState>,
    Path(auth_id): Path<String>,
) -> Result<Json<SelectionsResponse>, AppError> {
    state.db.get_user(&auth_id)?;
    let selections = state.db.list_reply_selections(&auth_id)?;
    Ok(Json(SelectionsResponse { selections }))
}

// ============================================================
// Voice provider
// ============================================================

async fn signed_url(State(state): State<AppState>) -> Result<Json<SignedUrlResponse>, AppError> {
    let (Some(client), Some(agent_id)) = (state.elevenlabs.as_ref(), state.agent_id.as_deref())
    else {
        return Err(AppError::Unavailable(
            "ElevenLabs is not configured".to_string(),
        ));
    };
    let signed_url = client.signed_url(agent_id).await?;
    Ok(Json(SignedUrlResponse { signed_url }))
}

async fn get_version() -> impl IntoResponse {
    env!("CARGO_PKG_VERSION")
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    PreconditionFailed(String),
    BadGateway(String),
    Unavailable(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        let message = e.to_string();
        match e {
            SessionError::NotFound(_) | SessionError::UserNotFound(_) | SessionError::Closed => {
                AppError::NotFound(message)
            }
            SessionError::Transition(TransitionError::Precondition) => {
                AppError::PreconditionFailed(message)
            }
            SessionError::Transition(TransitionError::IllegalState { .. }) => {
                AppError::Conflict(message)
            }
            SessionError::Transition(
                TransitionError::UnknownSuggestion(_)
                | TransitionError::EmptyUtterance
                | TransitionError::EmptyResearchQuery,
            ) => AppError::BadRequest(message),
            SessionError::Voice(voice) => voice.into(),
            SessionError::Storage(_) => AppError::Internal(message),
        }
    }
}

impl From<VoiceError> for AppError {
    fn from(e: VoiceError) -> Self {
        match e.kind {
            VoiceErrorKind::NotConnected => AppError::NotFound(e.to_string()),
            _ => AppError::BadGateway(format!("Voice channel error: {e}")),
        }
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::UserNotFound(_) => AppError::NotFound(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::EmptyQuery => AppError::BadRequest(e.to_string()),
            _ => AppError::BadGateway(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::PreconditionFailed(msg) => (StatusCode::PRECONDITION_FAILED, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
