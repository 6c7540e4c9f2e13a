//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform shortcuts (`HOST`, `PORT`, `GEMINI_API_KEY`, `API_KEY`)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_SYNTHESIS__API_KEY`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore so that field names with single
//! underscores (`api_key`, `sample_rate`) survive the mapping.

use crate::audio::device::SinkPreference;
use crate::audio::{AudioFormat, TruncationPolicy};
use crate::synthesis::Voice;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub synthesis: SynthesisConfig,
    pub extraction: ExtractionConfig,
    pub audio: AudioConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote speech model settings.
///
/// ## Fields:
/// - `endpoint`: Base URL of the generative language API (no trailing path)
/// - `model`: Speech-capable model name
/// - `api_key`: Sent as `x-goog-api-key`; never returned by `GET /config`
/// - `default_voice`: Used when a play request names no voice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub default_voice: String,
}

/// Text extraction settings. Endpoint and API key come from `synthesis`.
///
/// ## Fields:
/// - `model`: Vision-capable model used to read uploads
/// - `max_upload_bytes`: Largest accepted upload (inline data must stay under ~20 MB)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub model: String,
    pub max_upload_bytes: usize,
}

/// Playback settings. Fixed for the lifetime of the process.
///
/// ## Fields:
/// - `sample_rate` / `channels`: Format of the PCM the model returns
/// - `output`: `"null"` (timer-driven, headless) or `"device"` (needs `device-output`)
/// - `truncation`: `"truncate"` drops a partial trailing frame, `"reject"` refuses it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub output: String,
    pub truncation: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            synthesis: SynthesisConfig {
                endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-2.5-flash-preview-tts".to_string(),
                api_key: String::new(),
                default_voice: Voice::default().as_str().to_string(),
            },
            extraction: ExtractionConfig {
                model: "gemini-2.5-flash".to_string(),
                max_upload_bytes: 19 * 1024 * 1024,
            },
            audio: AudioConfig {
                sample_rate: AudioFormat::SPEECH.sample_rate,
                channels: AudioFormat::SPEECH.channel_count,
                output: SinkPreference::default().as_str().to_string(),
                truncation: "truncate".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_SYNTHESIS__DEFAULT_VOICE=Puck`: Override the default voice
    /// - `APP_AUDIO__OUTPUT=device`: Play through the sound card
    /// - `APP_EXTRACTION__MAX_UPLOAD_BYTES=5242880`: Lower the upload limit
    /// - `HOST=0.0.0.0`, `PORT=3000`: Deployment platform conventions
    /// - `GEMINI_API_KEY=...` or `API_KEY=...`: Speech model credentials
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Some(key) = env::var("GEMINI_API_KEY").ok().or_else(|| env::var("API_KEY").ok()) {
            settings = settings.set_override("synthesis.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Endpoint and both models are set
    /// - The upload limit is non-zero
    /// - The default voice, output backend and truncation policy are known names
    /// - Sample rate and channel count are non-zero
    ///
    /// A missing API key is allowed: the server still starts and every synthesis
    /// attempt fails with an error the UI can show.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.synthesis.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Synthesis endpoint cannot be empty"));
        }

        if self.synthesis.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Synthesis model cannot be empty"));
        }

        if self.extraction.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Extraction model cannot be empty"));
        }

        if self.extraction.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Upload limit cannot be 0"));
        }

        self.default_voice()?;
        self.audio_format()?;
        self.output_preference()?;
        self.truncation_policy()?;

        Ok(())
    }

    pub fn default_voice(&self) -> Result<Voice> {
        self.synthesis
            .default_voice
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }

    pub fn audio_format(&self) -> Result<AudioFormat> {
        AudioFormat::new(self.audio.sample_rate, self.audio.channels).map_err(|e| anyhow::anyhow!(e))
    }

    pub fn output_preference(&self) -> Result<SinkPreference> {
        self.audio.output.parse().map_err(|e: String| anyhow::anyhow!(e))
    }

    pub fn truncation_policy(&self) -> Result<TruncationPolicy> {
        self.audio.truncation.parse().map_err(|e: String| anyhow::anyhow!(e))
    }

    /// Copy safe to hand out over HTTP.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.synthesis.api_key.is_empty() {
            copy.synthesis.api_key = "********".to_string();
        }
        copy
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only `server` and `synthesis.default_voice` can change at runtime. Models,
    /// endpoint and audio settings are captured by the running adapters and the
    /// controller, so an attempt to change them is refused. On any failure the
    /// configuration is left exactly as it was.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                updated.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                updated.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port out of range: {}", port))?;
            }
        }

        if let Some(synthesis) = partial_config.get("synthesis") {
            if let Some(voice) = synthesis.get("default_voice").and_then(|v| v.as_str()) {
                updated.synthesis.default_voice = voice.to_string();
            }
            for fixed in ["endpoint", "model", "api_key"] {
                if synthesis.get(fixed).is_some() {
                    return Err(anyhow::anyhow!("synthesis.{} cannot be changed at runtime", fixed));
                }
            }
        }

        for fixed in ["extraction", "audio"] {
            if partial_config.get(fixed).is_some() {
                return Err(anyhow::anyhow!("{} settings cannot be changed at runtime", fixed));
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
