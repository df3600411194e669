//! Reply suggestion generation
//!
//! Turns the recent transcript into up to three short candidate replies. The
//! coordinator never calls this directly; the runtime runs it off the event
//! loop and feeds the result back as an event.

use crate::llm::{LlmError, LlmRequest, LlmService};
use crate::state_machine::{Role, Suggestion, TranscriptEntry};
use crate::state_machine::state::MAX_SUGGESTIONS;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SUGGESTION_MODEL: &str = "gpt-4";
const TEMPERATURE: f32 = 0.8;
const MAX_TOKENS: u32 = 300;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("No transcript to reply to")]
    InvalidInput,
    #[error("Suggestion request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Could not parse suggestions: {0}")]
    Parse(String),
    #[error("Suggestion generation is not configured")]
    NotConfigured,
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Llm(e) if e.kind.is_retryable())
    }
}

/// How the user talks, used to shape the replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleHint {
    pub user_name: String,
    pub communication_style: String,
}

impl Default for StyleHint {
    fn default() -> Self {
        Self {
            user_name: "Friend".to_string(),
            communication_style: "warm and conversational".to_string(),
        }
    }
}

impl StyleHint {
    pub fn new(user_name: Option<&str>, communication_style: Option<&str>) -> Self {
        let defaults = Self::default();
        Self {
            user_name: user_name
                .filter(|s| !s.trim().is_empty())
                .map_or(defaults.user_name, str::to_string),
            communication_style: communication_style
                .filter(|s| !s.trim().is_empty())
                .map_or(defaults.communication_style, str::to_string),
        }
    }
}

#[async_trait]
pub trait SuggestionGenerator: Send + Sync {
    /// Produce at most three replies for the transcript tail
    async fn generate(
        &self,
        tail: &[TranscriptEntry],
        style: &StyleHint,
    ) -> Result<Vec<Suggestion>, GenerationError>;
}

#[async_trait]
impl<T: SuggestionGenerator + ?Sized> SuggestionGenerator for Arc<T> {
    async fn generate(
        &self,
        tail: &[TranscriptEntry],
        style: &StyleHint,
    ) -> Result<Vec<Suggestion>, GenerationError> {
        (**self).generate(tail, style).await
    }
}

/// Stand-in used when no model credentials are configured
pub struct UnconfiguredGenerator;

#[async_trait]
impl SuggestionGenerator for UnconfiguredGenerator {
    async fn generate(
        &self,
        _tail: &[TranscriptEntry],
        _style: &StyleHint,
    ) -> Result<Vec<Suggestion>, GenerationError> {
        Err(GenerationError::NotConfigured)
    }
}

/// Suggestion generator backed by a chat completion model
pub struct LlmSuggestionGenerator {
    llm: Arc<dyn LlmService>,
}

impl LlmSuggestionGenerator {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SuggestionGenerator for LlmSuggestionGenerator {
    async fn generate(
        &self,
        tail: &[TranscriptEntry],
        style: &StyleHint,
    ) -> Result<Vec<Suggestion>, GenerationError> {
        let last = tail.last().ok_or(GenerationError::InvalidInput)?;
        if last.role == Role::User {
            // The user just spoke; nothing to reply to yet
            return Ok(Vec::new());
        }

        let request = LlmRequest {
            system: Some(system_prompt(style)),
            prompt: format!(
                "Recent conversation:\n{}\n\nGenerate 3 reply options for {}.",
                render_context(tail, &style.user_name),
                style.user_name
            ),
            max_tokens: Some(MAX_TOKENS),
            temperature: Some(TEMPERATURE),
        };

        let response = self.llm.complete(&request).await?;
        parse_suggestions(&response.text)
    }
}

fn system_prompt(style: &StyleHint) -> String {
    let name = &style.user_name;
    format!(
        r#"You are helping {name} communicate in a conversation. Generate 3 short, natural reply options that {name} could say in response to what they just heard.

Communication style: {style}

Rules:
- Keep each reply under 15 words
- Make them semantically distinct from each other
- Match the communication style
- Be contextually appropriate
- One should be affirmative/agreeing
- One should be a question/clarification
- One should be informational/conversational

Return ONLY a JSON array of 3 objects with this format:
[
  {{"id": "1", "text": "reply text", "category": "affirmative"}},
  {{"id": "2", "text": "reply text", "category": "question"}},
  {{"id": "3", "text": "reply text", "category": "informational"}}
]"#,
        style = style.communication_style
    )
}

/// Render transcript entries as `speaker: text` lines
pub fn render_context(tail: &[TranscriptEntry], user_name: &str) -> String {
    tail.iter()
        .map(|entry| {
            let speaker = match entry.role {
                Role::User => user_name,
                Role::Partner => "Partner",
                Role::System => "Note",
            };
            format!("{speaker}: {}", entry.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A suggestion as a model or the voice agent writes it; ids and categories are optional
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DraftSuggestion {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Parse a model reply as a JSON array, falling back to the first fenced json block
pub fn parse_suggestions(text: &str) -> Result<Vec<Suggestion>, GenerationError> {
    let raw: Vec<DraftSuggestion> = match serde_json::from_str(text.trim()) {
        Ok(raw) => raw,
        Err(e) => {
            let block = fenced_json(text).ok_or_else(|| GenerationError::Parse(e.to_string()))?;
            serde_json::from_str(block).map_err(|e| GenerationError::Parse(e.to_string()))?
        }
    };
    Ok(finalize_batch(raw))
}

/// Drop blank entries, cap the batch and make every id unique.
///
/// A missing or repeated id is replaced by the lowest positive number no
/// other entry in the batch uses.
pub fn finalize_batch(drafts: Vec<DraftSuggestion>) -> Vec<Suggestion> {
    let drafts: Vec<DraftSuggestion> = drafts
        .into_iter()
        .filter(|d| !d.text.trim().is_empty())
        .take(MAX_SUGGESTIONS)
        .collect();

    let explicit: Vec<String> = drafts
        .iter()
        .filter_map(|d| d.id.as_deref().map(str::trim))
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect();

    let mut used: Vec<String> = Vec::with_capacity(drafts.len());
    let mut next = 0usize;
    for draft in &drafts {
        let id = match draft.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() && !used.iter().any(|u| u == id) => id.to_string(),
            _ => loop {
                next += 1;
                let candidate = next.to_string();
                if !explicit.contains(&candidate) && !used.contains(&candidate) {
                    break candidate;
                }
            },
        };
        used.push(id);
    }

    drafts
        .into_iter()
        .zip(used)
        .map(|(draft, id)| {
            let category = draft.category.unwrap_or_else(|| "general".to_string());
            Suggestion::new(id, draft.text.trim(), category)
        })
        .collect()
}

fn fenced_json(text: &str) -> Option<&str> {
    let (_, rest) = text.split_once("```json")?;
    let (block, _) = rest.split_once("```")?;
    Some(block.trim())
}

/// Exponential backoff for transient generation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based), where attempt 1 has none
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * 2u32.saturating_pow(attempt - 2)
    }
}

/// Run the generator, retrying retryable failures per `policy`
pub async fn generate_with_retry<G: SuggestionGenerator + ?Sized>(
    generator: &G,
    tail: &[TranscriptEntry],
    style: &StyleHint,
    policy: RetryPolicy,
) -> Result<Vec<Suggestion>, GenerationError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match generator.generate(tail, style).await {
            Ok(suggestions) => return Ok(suggestions),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                attempt += 1;
                let delay = policy.delay_before(attempt);
                tracing::warn!(error = %e, attempt, delay_ms = %delay.as_millis(), "Retrying suggestion generation");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
