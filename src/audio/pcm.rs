//! # PCM Transcoding
//!
//! Reinterprets raw bytes as 16-bit signed little-endian PCM and produces a
//! normalized floating-point sample buffer that an output sink can render.
//!
//! ## Normalization:
//! Samples are divided by 32768.0, so the range is `[-1.0, 32767/32768]`.
//! +32767 maps to 0.999969..., never to 1.0.

use crate::audio::AudioError;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bits per sample for every format this service handles.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Bytes in one 16-bit sample.
const BYTES_PER_SAMPLE: usize = (BITS_PER_SAMPLE / 8) as usize;

/// Describes how a raw byte sequence should be interpreted.
///
/// ## Rust Concepts:
/// - **Copy**: Small value type, passed around by value freely
/// - **Invariant**: The transcoder, the WAV writer and the sink must all see the
///   same `AudioFormat` for a given byte sequence. The controller captures one
///   instance at startup and hands it to each of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 24kHz mono 16-bit PCM, what the speech model returns.
    pub const SPEECH: AudioFormat = AudioFormat {
        sample_rate: 24_000,
        channel_count: 1,
        bits_per_sample: BITS_PER_SAMPLE,
    };

    /// Create a 16-bit PCM format, rejecting zero rates and channel counts.
    pub fn new(sample_rate: u32, channel_count: u16) -> Result<Self, String> {
        if sample_rate == 0 {
            return Err("Sample rate must be greater than 0".to_string());
        }
        if channel_count == 0 {
            return Err("Channel count must be greater than 0".to_string());
        }
        Ok(Self {
            sample_rate,
            channel_count,
            bits_per_sample: BITS_PER_SAMPLE,
        })
    }

    /// Bytes per frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        BYTES_PER_SAMPLE * self.channel_count as usize
    }

    /// Bytes per second of audio.
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Playback duration of `byte_len` bytes in this format.
    pub fn duration_of(&self, byte_len: usize) -> Duration {
        let frames = byte_len / self.block_align();
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::SPEECH
    }
}

/// What to do when the byte length is not a whole number of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationPolicy {
    /// Drop the trailing partial frame silently
    #[default]
    Truncate,
    /// Fail with `AudioError::TruncatedAudioData`
    Reject,
}

impl std::str::FromStr for TruncationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "truncate" => Ok(TruncationPolicy::Truncate),
            "reject" => Ok(TruncationPolicy::Reject),
            _ => Err(format!("Unknown truncation policy: {}", s)),
        }
    }
}

/// Decoded audio: one vector of normalized samples per channel.
///
/// ## Memory Layout:
/// Channels are stored planar (`channels[c][i]`), the same way the browser's
/// `AudioBuffer` exposes them. Sinks that need interleaved output read with
/// `sample(frame, channel)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Sample at `frame` of `channel`, or silence past the end.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.channels
            .get(channel)
            .and_then(|c| c.get(frame))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

/// Convert a 16-bit PCM sample to float using the asymmetric `/ 32768.0` mapping.
pub fn normalize_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Transcode raw PCM bytes with the default (truncating) policy.
pub fn to_sample_buffer(raw: &[u8], format: &AudioFormat) -> Result<SampleBuffer, AudioError> {
    to_sample_buffer_with_policy(raw, format, TruncationPolicy::default())
}

/// Transcode raw PCM bytes into a `SampleBuffer`.
///
/// ## Algorithm:
/// 1. Split the input into whole frames of `2 * channel_count` bytes
/// 2. For channel `c` of frame `i`, read the little-endian `i16` at byte offset
///    `(i * channel_count + c) * 2`
/// 3. Normalize with `normalize_sample`
///
/// ## Trailing Bytes:
/// A partial final frame is dropped under `Truncate` and reported under `Reject`.
pub fn to_sample_buffer_with_policy(
    raw: &[u8],
    format: &AudioFormat,
    policy: TruncationPolicy,
) -> Result<SampleBuffer, AudioError> {
    let channel_count = format.channel_count.max(1) as usize;
    let frame_bytes = format.block_align().max(BYTES_PER_SAMPLE);

    if raw.len() % frame_bytes != 0 && policy == TruncationPolicy::Reject {
        return Err(AudioError::TruncatedAudioData {
            len: raw.len(),
            frame_bytes,
        });
    }

    let frame_count = raw.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];

    for frame in raw.chunks_exact(frame_bytes) {
        for (channel, bytes) in frame.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
            channels[channel].push(normalize_sample(LittleEndian::read_i16(bytes)));
        }
    }

    Ok(SampleBuffer {
        channels,
        sample_rate: format.sample_rate,
    })
}
