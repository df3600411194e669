//! HTTP API for the session server
//!
//! Command surface, SSE session stream and the voice bridge socket.

mod handlers;
mod sse;
mod types;
mod ws;

pub use handlers::create_router;

use crate::db::Database;
use crate::research::{RestaurantFinder, SearchProvider};
use crate::runtime::ProductionManager;
use crate::voice::{ElevenLabsClient, VoiceBridge};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<ProductionManager>,
    pub db: Database,
    pub voice: Arc<VoiceBridge>,
    /// `None` when no search key is configured
    pub search: Option<Arc<dyn SearchProvider>>,
    /// `None` when no places key is configured
    pub places: Option<Arc<dyn RestaurantFinder>>,
    pub elevenlabs: Option<ElevenLabsClient>,
    pub agent_id: Option<String>,
    pub search_results: u32,
}
