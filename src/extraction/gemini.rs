//! # Gemini Extraction Adapter
//!
//! Sends the upload as inline Base64 data next to a fixed instruction and
//! returns the text parts of the first candidate.

use crate::config::{ExtractionConfig, SynthesisConfig};
use crate::extraction::{ExtractionError, TextExtractor};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

const API_KEY_HEADER: &str = "x-goog-api-key";

const EXTRACTION_PROMPT: &str = "Extract all text from this document. If it is a multi-page PDF, \
process all pages in order. Preserve the original structure, paragraphs, and lists. Return ONLY \
the extracted text. Do not include markdown code blocks (```) or any introductory/concluding remarks.";

const FAILURE_MESSAGE: &str = "Failed to extract text. Ensure the file is legible and under 20MB.";

/// REST client for the vision model.
#[derive(Clone)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiExtractor {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Shares the endpoint and key with the speech model.
    pub fn from_config(synthesis: &SynthesisConfig, extraction: &ExtractionConfig) -> Self {
        Self::new(&synthesis.endpoint, &extraction.model, &synthesis.api_key)
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl std::fmt::Debug for GeminiExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiExtractor")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

fn request_body(data: &[u8], mime_type: &str) -> serde_json::Value {
    json!({
        "contents": [{
            "parts": [
                { "inlineData": { "mimeType": mime_type, "data": general_purpose::STANDARD.encode(data) } },
                { "text": EXTRACTION_PROMPT }
            ]
        }]
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
struct Part {
    text: Option<String>,
}

/// Concatenated text parts of the first candidate, trimmed. `None` if blank.
fn extract_text(response: GenerateContentResponse) -> Option<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl TextExtractor for GeminiExtractor {
    async fn extract(&self, data: &[u8], mime_type: &str) -> Result<String, ExtractionError> {
        debug!(model = %self.model, mime_type = %mime_type, bytes = data.len(), "Requesting text extraction");

        let response = self
            .client
            .post(self.url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request_body(data, mime_type))
            .send()
            .await
            .map_err(|e| {
                error!("OCR request error: {}", e);
                ExtractionError::new(FAILURE_MESSAGE)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status.as_u16(), body = %body, "OCR request rejected");
            return Err(ExtractionError::new(FAILURE_MESSAGE));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            error!("OCR response parse error: {}", e);
            ExtractionError::new(FAILURE_MESSAGE)
        })?;

        extract_text(parsed).ok_or_else(|| {
            error!("OCR response contained no text");
            ExtractionError::new(FAILURE_MESSAGE)
        })
    }
}
