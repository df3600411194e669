//! Environment configuration

use crate::research::DEFAULT_MAX_RESULTS;
use crate::state_machine::state::{DEFAULT_CONTEXT_ENTRIES, DEFAULT_SPEECH_TIMEOUT};
use crate::suggestions::{RetryPolicy, DEFAULT_SUGGESTION_MODEL};
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Provider credentials; a missing key disables that feature
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub suggestion_model: String,
    pub tavily_api_key: Option<String>,
    pub google_places_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_agent_id: Option<String>,
}

/// Session timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub speech_timeout: Duration,
    pub flush_timeout: Duration,
    pub context_entries: usize,
    pub retry: RetryPolicy,
    pub search_results: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speech_timeout: DEFAULT_SPEECH_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            context_entries: DEFAULT_CONTEXT_ENTRIES,
            retry: RetryPolicy::default(),
            search_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub port: u16,
    pub providers: ProviderConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| {
            let raw = non_empty(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(variable = key, value = %raw, "Ignoring unparseable value");
                    None
                }
            }
        };
        let millis = |key: &str, default: Duration| parsed(key).map_or(default, Duration::from_millis);

        let db_path = non_empty("FREESPEECH_DB_PATH").unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.freespeech/freespeech.db")
        });

        let port = parsed("FREESPEECH_PORT")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            speech_timeout: millis("FREESPEECH_SPEECH_TIMEOUT_MS", defaults.speech_timeout),
            flush_timeout: millis("FREESPEECH_FLUSH_TIMEOUT_MS", defaults.flush_timeout),
            context_entries: parsed("FREESPEECH_CONTEXT_ENTRIES")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.context_entries),
            retry: RetryPolicy {
                max_attempts: parsed("FREESPEECH_GENERATION_ATTEMPTS")
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay: millis("FREESPEECH_GENERATION_BACKOFF_MS", defaults.retry.base_delay),
            },
            search_results: defaults.search_results,
        };

        let providers = ProviderConfig {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL"),
            suggestion_model: non_empty("FREESPEECH_SUGGESTION_MODEL")
                .unwrap_or_else(|| DEFAULT_SUGGESTION_MODEL.to_string()),
            tavily_api_key: non_empty("TAVILY_API_KEY"),
            google_places_api_key: non_empty("GOOGLE_PLACES_API_KEY"),
            elevenlabs_api_key: non_empty("ELEVENLABS_API_KEY"),
            elevenlabs_agent_id: non_empty("ELEVENLABS_AGENT_ID"),
        };

        Self {
            db_path,
            port,
            providers,
            session,
        }
    }
}
