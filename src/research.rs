//! Web search for the research sub-flow
//!
//! The coordinator only tracks that research is pending. Searching happens
//! through the HTTP API, and the client completes the research with a summary
//! of the results it picked. Restaurant lookups have their own provider.

mod places;

pub use places::{
    GooglePlaces, Restaurant, RestaurantFinder, RestaurantQuery, RestaurantResults,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_RESULTS: u32 = 5;
const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const NO_RESULTS: &str = "No relevant results found";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search query is empty")]
    EmptyQuery,
    #[error("Search request failed: {0}")]
    Request(String),
    #[error("Search provider returned {status}")]
    Status { status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, SearchError>;
}

#[async_trait]
impl<T: SearchProvider + ?Sized> SearchProvider for Arc<T> {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, SearchError> {
        (**self).search(query, max_results).await
    }
}

/// Tavily search API client
pub struct TavilySearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    search_depth: &'static str,
    max_results: u32,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
}

impl From<TavilyResponse> for SearchResponse {
    fn from(resp: TavilyResponse) -> Self {
        Self {
            results: resp
                .results
                .into_iter()
                .map(|r| SearchResult {
                    title: r.title,
                    snippet: r.content,
                    url: r.url,
                })
                .collect(),
            answer: resp.answer,
        }
    }
}

impl TavilySearch {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            endpoint: TAVILY_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&TavilyRequest {
                query,
                search_depth: "basic",
                max_results,
                include_answer: true,
            })
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Search provider error");
            return Err(SearchError::Status {
                status: status.as_u16(),
            });
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Request(format!("Invalid search response: {e}")))?;
        let parsed = SearchResponse::from(parsed);
        tracing::debug!(results = parsed.results.len(), "Search completed");
        Ok(parsed)
    }
}

/// Condense the results the user picked into research context text
pub fn summarize_selection(selected: &[SearchResult]) -> String {
    if selected.is_empty() {
        return NO_RESULTS.to_string();
    }
    selected
        .iter()
        .map(|r| format!("{}: {}", r.title, r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}
