//! # Audio Processing Module
//!
//! This module turns the synthesized speech payload into something we can play and download.
//! Everything here except the sink is synchronous, pure and whole-buffer.
//!
//! ## Key Components:
//! - **Byte Codec**: Base64 text to raw bytes (`codec`)
//! - **PCM Transcoder**: 16-bit little-endian PCM to normalized float samples (`pcm`)
//! - **WAV Writer**: Raw PCM plus a 44-byte RIFF header (`wav`)
//! - **Output Sink**: Where decoded samples are rendered (`sink`, `device`)
//! - **Playback Session**: Lifecycle of one playback (`session`)
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 24kHz (24,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod codec;      // Base64 decoding
pub mod device;     // Output backend selection
pub mod pcm;        // PCM to float sample buffers
pub mod session;    // Playback session state machine
pub mod sink;       // Output sink abstraction and shared resource
pub mod wav;        // WAV container writer

use std::fmt;
use std::sync::Arc;

pub use pcm::{AudioFormat, SampleBuffer, TruncationPolicy};

/// Raw bytes as returned by the codec.
///
/// ## Rust Concepts:
/// - **Arc<[u8]>**: Immutable, shared slice. The transcoder, the WAV writer and the
///   download handler all read the same buffer without copying it.
pub type RawAudio = Arc<[u8]>;

/// Errors produced by the audio core.
///
/// ## Error Categories:
/// - **MalformedEncoding**: The synthesized payload is not valid Base64
/// - **TruncatedAudioData**: Partial trailing frame (only under `TruncationPolicy::Reject`)
/// - **SinkUnavailable**: The output device could not be acquired (retry on next play)
/// - **InvalidSessionState**: A session operation was called from the wrong state
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    MalformedEncoding(String),
    TruncatedAudioData { len: usize, frame_bytes: usize },
    SinkUnavailable(String),
    InvalidSessionState(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::MalformedEncoding(msg) => write!(f, "Malformed audio encoding: {}", msg),
            AudioError::TruncatedAudioData { len, frame_bytes } => write!(
                f,
                "Truncated audio data: {} bytes is not a multiple of the {}-byte frame size",
                len, frame_bytes
            ),
            AudioError::SinkUnavailable(msg) => write!(f, "Audio output unavailable: {}", msg),
            AudioError::InvalidSessionState(msg) => write!(f, "Invalid session state: {}", msg),
        }
    }
}

impl std::error::Error for AudioError {}
