//! # Output Backend Selection
//!
//! Chooses what the shared `SinkResource` opens on first use. The default build
//! only has the timed `null` backend; the `device-output` feature adds playback
//! through the host's default output device via cpal.

use crate::audio::sink::{NullSink, OutputSink};
use crate::audio::{AudioError, AudioFormat};
use tracing::info;

/// Which output backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPreference {
    /// Timed sink with no audible output
    Null,
    /// Host default output device (requires the `device-output` feature)
    Device,
}

impl std::str::FromStr for SinkPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "null" | "none" => Ok(SinkPreference::Null),
            "device" | "default" => Ok(SinkPreference::Device),
            _ => Err(format!("Unknown audio output: {}", s)),
        }
    }
}

impl Default for SinkPreference {
    fn default() -> Self {
        SinkPreference::Null
    }
}

impl SinkPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkPreference::Null => "null",
            SinkPreference::Device => "device",
        }
    }

    /// Open the backend. Called lazily by `SinkResource::acquire`.
    pub fn open(self, format: AudioFormat) -> Result<Box<dyn OutputSink>, AudioError> {
        match self {
            SinkPreference::Null => {
                info!("Using null audio output (no device playback)");
                Ok(Box::new(NullSink))
            }
            SinkPreference::Device => open_device(format),
        }
    }
}

#[cfg(feature = "device-output")]
fn open_device(format: AudioFormat) -> Result<Box<dyn OutputSink>, AudioError> {
    Ok(Box::new(cpal_output::CpalSink::open(format)?))
}

#[cfg(not(feature = "device-output"))]
fn open_device(_format: AudioFormat) -> Result<Box<dyn OutputSink>, AudioError> {
    Err(AudioError::SinkUnavailable(
        "built without the device-output feature".to_string(),
    ))
}

#[cfg(feature = "device-output")]
mod cpal_output {
    use crate::audio::sink::{OutputSink, SinkConnection, SinkControl};
    use crate::audio::{AudioError, AudioFormat, SampleBuffer};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tracing::{debug, error, info};

    /// Plays through the default output device.
    ///
    /// ## Threading:
    /// `cpal::Stream` is not `Send`, so each connection builds and owns its stream on
    /// a dedicated thread. The thread lives until the connection is halted or dropped.
    pub struct CpalSink {
        format: AudioFormat,
        device_name: String,
    }

    impl CpalSink {
        pub fn open(format: AudioFormat) -> Result<Self, AudioError> {
            let device_name = probe_device()?;
            info!(device = %device_name, sample_rate = format.sample_rate, "Audio output device found");
            Ok(Self { format, device_name })
        }
    }

    fn probe_device() -> Result<String, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::SinkUnavailable("No output device available".to_string()))?;
        Ok(device.name().unwrap_or_else(|_| "Unknown".to_string()))
    }

    impl OutputSink for CpalSink {
        fn name(&self) -> &str {
            "device"
        }

        fn resume(&mut self) -> Result<(), AudioError> {
            // The default device can change (headphones unplugged); re-probe it
            let name = probe_device()?;
            if name != self.device_name {
                debug!(previous = %self.device_name, current = %name, "Default output device changed");
                self.device_name = name;
            }
            Ok(())
        }

        fn connect(&mut self, buffer: Arc<SampleBuffer>) -> Result<SinkConnection, AudioError> {
            let (done_tx, done_rx) = oneshot::channel();
            let (halt_tx, halt_rx) = mpsc::channel::<()>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
            let sample_rate = self.format.sample_rate;

            std::thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || match build_stream(buffer, sample_rate, done_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Returns on halt or when the control is dropped
                        let _ = halt_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })
                .map_err(|e| AudioError::SinkUnavailable(format!("Failed to spawn output thread: {}", e)))?;

            ready_rx
                .recv()
                .map_err(|_| AudioError::SinkUnavailable("Output thread exited".to_string()))??;

            Ok(SinkConnection {
                control: Box::new(StreamControl { halt: Some(halt_tx) }),
                completion: done_rx,
            })
        }
    }

    fn build_stream(
        buffer: Arc<SampleBuffer>,
        sample_rate: u32,
        done_tx: oneshot::Sender<()>,
    ) -> Result<cpal::Stream, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::SinkUnavailable("No output device available".to_string()))?;

        let channels = device
            .default_output_config()
            .map(|c| c.channels())
            .map_err(|e| AudioError::SinkUnavailable(format!("Failed to get default output config: {}", e)))?;

        // No resampling: the device must accept the buffer's own rate
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let last_channel = buffer.channel_count().saturating_sub(1);
        let frame_count = buffer.frame_count();
        let mut position = 0usize;
        let mut done_tx = Some(done_tx);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels.max(1) as usize) {
                        for (channel, out) in frame.iter_mut().enumerate() {
                            *out = buffer.sample(position, channel.min(last_channel));
                        }
                        position += 1;
                    }
                    if position >= frame_count {
                        if let Some(tx) = done_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                },
                |err| error!("Audio output error: {}", err),
                None,
            )
            .map_err(|e| AudioError::SinkUnavailable(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::SinkUnavailable(format!("Failed to start stream: {}", e)))?;

        Ok(stream)
    }

    struct StreamControl {
        halt: Option<mpsc::Sender<()>>,
    }

    impl SinkControl for StreamControl {
        fn halt(&mut self) {
            if let Some(halt) = self.halt.take() {
                let _ = halt.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_parsing() {
        assert_eq!("null".parse::<SinkPreference>().unwrap(), SinkPreference::Null);
        assert_eq!("DEVICE".parse::<SinkPreference>().unwrap(), SinkPreference::Device);
        assert!("speakers".parse::<SinkPreference>().is_err());
        assert_eq!(SinkPreference::default().as_str(), "null");
    }

    #[test]
    fn test_null_backend_opens() {
        let sink = SinkPreference::Null.open(AudioFormat::SPEECH).unwrap();
        assert_eq!(sink.name(), "null");
    }

    #[cfg(not(feature = "device-output"))]
    #[test]
    fn test_device_backend_requires_feature() {
        assert!(matches!(
            SinkPreference::Device.open(AudioFormat::SPEECH),
            Err(AudioError::SinkUnavailable(_))
        ));
    }
}
