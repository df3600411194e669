//! API request and response types

use crate::research::SearchResult;
use crate::state_machine::SessionSnapshot;
use serde::{Deserialize, Serialize};

/// Request to start a session
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
}

/// Response for a started session
#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub snapshot: SessionSnapshot,
    /// Settings the browser uses to open the voice agent
    pub voice: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SayRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
}

/// Research is completed with free text or with picked search results
#[derive(Debug, Default, Deserialize)]
pub struct CompleteResearchRequest {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub selected: Option<Vec<SearchResult>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub num_results: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub auth_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetVoiceRequest {
    pub voice_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationLogsResponse {
    pub conversations: Vec<crate::db::ConversationLog>,
}

#[derive(Debug, Serialize)]
pub struct SelectionsResponse {
    pub selections: Vec<crate::db::ReplySelectionRecord>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub signed_url: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
