//! FreeSpeech - conversation turn coordinator
//!
//! Backend for an AAC app: listens to a conversation partner, suggests
//! replies, and speaks the chosen one in the user's cloned voice.

mod api;
mod config;
mod db;
mod llm;
mod research;
mod runtime;
mod state_machine;
mod suggestions;
mod voice;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::{LlmService, LoggingService, OpenAIService};
use research::{GooglePlaces, RestaurantFinder, SearchProvider, TavilySearch};
use runtime::{DatabaseStorage, SessionManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use suggestions::{LlmSuggestionGenerator, SuggestionGenerator, UnconfiguredGenerator};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice::{ElevenLabsClient, VoiceBridge};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "freespeech=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    let providers = &config.providers;

    let generator: Arc<dyn SuggestionGenerator> = if let Some(key) = &providers.openai_api_key {
        let openai: Arc<dyn LlmService> = Arc::new(OpenAIService::new(
            key.clone(),
            providers.suggestion_model.clone(),
            providers.openai_base_url.as_deref(),
        ));
        tracing::info!(model = %providers.suggestion_model, "Suggestion generation enabled");
        Arc::new(LlmSuggestionGenerator::new(Arc::new(LoggingService::new(
            openai,
        ))))
    } else {
        tracing::warn!("OPENAI_API_KEY not set. Reply suggestions are disabled.");
        Arc::new(UnconfiguredGenerator)
    };

    let search: Option<Arc<dyn SearchProvider>> = if let Some(key) = &providers.tavily_api_key {
        Some(Arc::new(TavilySearch::new(key.clone())))
    } else {
        tracing::warn!("TAVILY_API_KEY not set. Web search is disabled.");
        None
    };

    let places: Option<Arc<dyn RestaurantFinder>> =
        if let Some(key) = &providers.google_places_api_key {
            Some(Arc::new(GooglePlaces::new(key.clone())))
        } else {
            tracing::warn!("GOOGLE_PLACES_API_KEY not set. Restaurant search is disabled.");
            None
        };

    let elevenlabs = providers.elevenlabs_api_key.clone().map(ElevenLabsClient::new);
    if elevenlabs.is_none() {
        tracing::warn!("ELEVENLABS_API_KEY not set. Signed voice URLs are disabled.");
    }
    if providers.elevenlabs_agent_id.is_none() {
        tracing::warn!("ELEVENLABS_AGENT_ID not set. Clients must supply their own agent.");
    }

    let voice = Arc::new(VoiceBridge::new(
        providers.elevenlabs_agent_id.clone(),
        elevenlabs.clone(),
    ));

    let sessions = Arc::new(SessionManager::new(
        DatabaseStorage::new(db.clone()),
        voice.clone(),
        generator,
        config.session,
    ));

    let state = AppState {
        sessions,
        db,
        voice,
        search,
        places,
        elevenlabs,
        agent_id: providers.elevenlabs_agent_id.clone(),
        search_results: config.session.search_results,
    };

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("FreeSpeech server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
