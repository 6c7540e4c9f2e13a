//! # Gemini Speech Adapter
//!
//! Calls the hosted `generateContent` endpoint with an audio response modality
//! and returns the inline Base64 audio payload unchanged.

use crate::config::SynthesisConfig;
use crate::synthesis::{SpeechSynthesizer, SynthesisError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// REST client for the speech model.
#[derive(Clone)]
pub struct GeminiSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiSynthesizer {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(&config.endpoint, &config.model, &config.api_key)
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl std::fmt::Debug for GeminiSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSynthesizer")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// JSON body for a single-turn speech request.
fn request_body(text: &str, voice: &str) -> serde_json::Value {
    json!({
        "contents": [{ "parts": [{ "text": text }] }],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": voice }
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: Option<String>,
}

/// Pull `candidates[0].content.parts[0].inlineData.data` out of a response.
fn extract_audio(response: GenerateContentResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()?
        .inline_data?
        .data
        .filter(|data| !data.is_empty())
}

#[async_trait]
impl SpeechSynthesizer for GeminiSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SynthesisError> {
        debug!(model = %self.model, voice = %voice, chars = text.len(), "Requesting speech");

        let response = self
            .client
            .post(self.url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request_body(text, voice))
            .send()
            .await
            .map_err(|e| {
                error!("TTS request error: {}", e);
                SynthesisError::new("Failed to generate speech.")
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status.as_u16(), body = %body, "TTS request rejected");
            return Err(SynthesisError::new("Failed to generate speech."));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            error!("TTS response parse error: {}", e);
            SynthesisError::new("Failed to generate speech.")
        })?;

        extract_audio(parsed).ok_or_else(|| SynthesisError::new("No audio data received from the speech model."))
    }
}
