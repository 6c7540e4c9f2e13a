//! # Output Sinks
//!
//! A sink renders a `SampleBuffer` somewhere audible and reports, exactly once,
//! when it has run out of samples. The controller owns a single `SinkResource`
//! that creates the sink on first use and resumes it before every playback.
//!
//! ## Completion Signalling:
//! `connect` hands back a `tokio::sync::oneshot::Receiver<()>`. The sink resolves
//! it from whatever thread or task it runs on; nothing calls back into the
//! controller directly.

use crate::audio::device::SinkPreference;
use crate::audio::{AudioError, AudioFormat, SampleBuffer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Handle used to halt an in-progress playback.
pub trait SinkControl: Send {
    /// Stop output immediately. Must be safe to call after natural completion.
    fn halt(&mut self);
}

/// A live connection between one sample buffer and the sink.
pub struct SinkConnection {
    pub control: Box<dyn SinkControl>,
    pub completion: oneshot::Receiver<()>,
}

/// Platform audio output.
///
/// ## Rust Concepts:
/// - **Send**: The controller task owns the sink and may move between runtime threads
/// - **&mut self**: A sink serves one connection at a time; the controller stops the
///   previous session before connecting the next
pub trait OutputSink: Send {
    /// Short backend name for logs and status output.
    fn name(&self) -> &str;

    /// Make sure the sink is ready to play (re-acquire a suspended device, etc).
    fn resume(&mut self) -> Result<(), AudioError>;

    /// Start rendering `buffer`.
    fn connect(&mut self, buffer: Arc<SampleBuffer>) -> Result<SinkConnection, AudioError>;
}

type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn OutputSink>, AudioError> + Send>;

/// The shared output resource, created lazily and reused across sessions.
///
/// ## Lifecycle:
/// 1. **Uninitialized**: Nothing is opened until the first playback
/// 2. **Acquired**: `acquire` creates the sink if needed, then resumes it
/// 3. **Released**: `release` drops the sink (teardown, or after a failed resume)
pub struct SinkResource {
    factory: SinkFactory,
    sink: Option<Box<dyn OutputSink>>,
}

impl SinkResource {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> Result<Box<dyn OutputSink>, AudioError> + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            sink: None,
        }
    }

    /// Resource backed by the configured output backend.
    pub fn from_preference(preference: SinkPreference, format: AudioFormat) -> Self {
        Self::new(move || preference.open(format))
    }

    /// Get the sink, creating it on first use and resuming it every time.
    ///
    /// ## Error Handling:
    /// A sink that fails to resume is dropped so the next call starts fresh.
    pub fn acquire(&mut self) -> Result<&mut dyn OutputSink, AudioError> {
        if self.sink.is_none() {
            let created = (self.factory)()?;
            info!(sink = created.name(), "Audio output initialized");
            self.sink = Some(created);
        }

        let resumed = match self.sink.as_mut() {
            Some(sink) => sink.resume(),
            None => Err(AudioError::SinkUnavailable("output sink not initialized".to_string())),
        };

        if let Err(e) = resumed {
            warn!(error = %e, "Audio output could not be resumed, releasing it");
            self.sink = None;
            return Err(e);
        }

        match self.sink.as_mut() {
            Some(sink) => Ok(sink.as_mut()),
            None => Err(AudioError::SinkUnavailable("output sink not initialized".to_string())),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.sink.is_some()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.sink.as_ref().map(|s| s.name())
    }

    /// Drop the underlying sink.
    pub fn release(&mut self) {
        if let Some(sink) = self.sink.take() {
            debug!(sink = sink.name(), "Audio output released");
        }
    }
}

/// A sink with no device behind it: it waits for the buffer's duration and then
/// reports completion. Used on headless servers, where the browser does the
/// actual listening via the WAV download.
pub struct NullSink;

impl OutputSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        // Timers need a runtime; outside one there is nothing to drive playback
        tokio::runtime::Handle::try_current()
            .map(|_| ())
            .map_err(|e| AudioError::SinkUnavailable(e.to_string()))
    }

    fn connect(&mut self, buffer: Arc<SampleBuffer>) -> Result<SinkConnection, AudioError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::SinkUnavailable(e.to_string()))?;

        let duration: Duration = buffer.duration();
        let (done_tx, done_rx) = oneshot::channel();
        let (halt_tx, halt_rx) = oneshot::channel::<()>();

        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    let _ = done_tx.send(());
                }
                _ = halt_rx => {}
            }
        });

        Ok(SinkConnection {
            control: Box::new(TimerControl { halt: Some(halt_tx) }),
            completion: done_rx,
        })
    }
}

struct TimerControl {
    halt: Option<oneshot::Sender<()>>,
}

impl SinkControl for TimerControl {
    fn halt(&mut self) {
        if let Some(halt) = self.halt.take() {
            let _ = halt.send(());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ManualSinkProbe;
    use super::*;
    use crate::audio::pcm::to_sample_buffer;

    fn one_second_buffer() -> Arc<SampleBuffer> {
        Arc::new(to_sample_buffer(&vec![0u8; 48_000], &AudioFormat::SPEECH).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_sink_completes_after_buffer_duration() {
        let mut sink = NullSink;
        sink.resume().unwrap();
        let mut connection = sink.connect(one_second_buffer()).unwrap();

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(connection.completion.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(connection.completion.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_sink_halt_drops_completion() {
        let mut sink = NullSink;
        let mut connection = sink.connect(one_second_buffer()).unwrap();
        connection.control.halt();
        connection.control.halt();

        // The timer task exits without sending, so the receiver sees a closed channel
        assert!(connection.completion.await.is_err());
    }

    #[test]
    fn test_null_sink_needs_runtime() {
        let mut sink = NullSink;
        assert!(matches!(sink.resume(), Err(AudioError::SinkUnavailable(_))));
    }

    #[tokio::test]
    async fn test_resource_is_lazy_and_reused() {
        let probe = ManualSinkProbe::default();
        let created = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = created.clone();
        let inner = probe.clone();
        let mut resource = SinkResource::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Box::new(inner.sink()) as Box<dyn OutputSink>)
        });

        assert!(!resource.is_initialized());
        resource.acquire().unwrap();
        resource.acquire().unwrap();
        assert!(resource.is_initialized());
        assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(probe.resumes(), 2);
        assert_eq!(resource.backend_name(), Some("manual"));
    }

    #[tokio::test]
    async fn test_failed_resume_releases_sink() {
        let probe = ManualSinkProbe::default();
        let mut resource = probe.resource();
        resource.acquire().unwrap();

        probe.set_fail_resume(true);
        assert!(matches!(resource.acquire(), Err(AudioError::SinkUnavailable(_))));
        assert!(!resource.is_initialized());

        probe.set_fail_resume(false);
        assert!(resource.acquire().is_ok());
    }
}
