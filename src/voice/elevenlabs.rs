//! `ElevenLabs` conversational agent signed URLs

use super::VoiceError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";

/// Issues signed websocket URLs so the browser never sees the API key
#[derive(Clone)]
pub struct ElevenLabsClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

impl ElevenLabsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[allow(dead_code)] // Used to point at a local stub
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn signed_url_endpoint(&self) -> String {
        format!(
            "{}/v1/convai/conversation/get_signed_url",
            self.base_url.trim_end_matches('/')
        )
    }

    pub async fn signed_url(&self, agent_id: &str) -> Result<String, VoiceError> {
        let response = self
            .client
            .get(self.signed_url_endpoint())
            .query(&[("agent_id", agent_id)])
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| VoiceError::connect(format!("Signed URL request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::connect(format!(
                "ElevenLabs API error ({status}): {body}"
            )));
        }

        let parsed: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::connect(format!("Invalid signed URL response: {e}")))?;
        Ok(parsed.signed_url)
    }
}
