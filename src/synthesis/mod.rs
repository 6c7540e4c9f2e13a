//! # Speech Synthesis
//!
//! The remote text-to-speech call is an external collaborator: the playback
//! controller only knows it as "text + voice in, Base64 PCM out, or an opaque
//! failure". This module defines that seam and the voices it accepts.
//!
//! ## Key Components:
//! - **SpeechSynthesizer**: The async trait the controller depends on
//! - **Voice**: The prebuilt voice catalogue
//! - **GeminiSynthesizer**: REST adapter for the hosted speech model (`gemini`)

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use gemini::GeminiSynthesizer;

/// Opaque synthesis failure. The controller records the message and moves on.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisError(pub String);

impl SynthesisError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Speech synthesis failed: {}", self.0)
    }
}

impl std::error::Error for SynthesisError {}

/// Turns text into speech.
///
/// ## Contract:
/// - Returns Base64-encoded 16-bit little-endian PCM in the configured `AudioFormat`
/// - May take arbitrarily long; callers do not impose a timeout
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SynthesisError>;
}

/// Prebuilt voices offered by the speech model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Voice {
    Kore,
    Puck,
    Charon,
    Fenrir,
    Zephyr,
}

impl Voice {
    pub const ALL: [Voice; 5] = [Voice::Kore, Voice::Puck, Voice::Charon, Voice::Fenrir, Voice::Zephyr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Fenrir => "Fenrir",
            Voice::Zephyr => "Zephyr",
        }
    }
}

impl Default for Voice {
    fn default() -> Self {
        Voice::Kore
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown voice: {}", s))
    }
}
