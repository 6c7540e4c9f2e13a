//! # Playback Controller
//!
//! ## State Transitions:
//! ```text
//! Idle         --play (text non-empty)-->  Synthesizing
//! Synthesizing --synthesis ok---------->  Playing   (decode, keep raw bytes, start session)
//! Synthesizing --synthesis failed------>  Errored   (previous audio kept)
//! Synthesizing --stop------------------>  Idle      (result ignored when it arrives)
//! Playing      --completed | stop------>  Idle
//! Playing      --play------------------>  Synthesizing (always re-synthesizes)
//! Errored      --play------------------>  Synthesizing
//! any          --source cleared-------->  Idle      (audio discarded)
//! ```
//! Play requests with blank text are ignored in every state, and so are play
//! requests that arrive while a synthesis call is already in flight.
//!
//! ## Stale Results:
//! Every synthesis request gets a generation number. Stop, clear and shutdown bump
//! the generation, so a result that comes back afterwards no longer matches and is
//! dropped. The remote call itself is never cancelled.

use crate::audio::codec;
use crate::audio::pcm::{self, AudioFormat, TruncationPolicy};
use crate::audio::session::PlaybackSession;
use crate::audio::sink::SinkResource;
use crate::audio::{AudioError, RawAudio};
use crate::synthesis::{SpeechSynthesizer, SynthesisError};
use serde::Serialize;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Controller state as seen by the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Idle,
    Synthesizing,
    Playing,
    Errored(String),
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Synthesizing => "synthesizing",
            PlaybackState::Playing => "playing",
            PlaybackState::Errored(_) => "errored",
        }
    }
}

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum ControllerEvent {
    /// User asked to hear `text` in `voice`
    Play { text: String, voice: String },
    /// Stop if playing, otherwise play (the single play/stop button)
    Toggle { text: String, voice: String },
    /// User asked to stop
    Stop,
    /// The source document was cleared or replaced by a new upload
    ClearSource,
    /// A synthesis call returned
    SynthesisFinished {
        generation: u64,
        result: Result<String, SynthesisError>,
    },
    /// The sink reached the end of a session's buffer
    SessionCompleted { session_id: Uuid },
    /// Snapshot request
    Status(oneshot::Sender<ControllerStatus>),
    /// Download request for the last synthesized audio
    LastAudio(oneshot::Sender<Option<StoredAudio>>),
    /// Stop everything, release the sink and exit the loop
    Shutdown(oneshot::Sender<()>),
}

/// Running totals, reported by `/metrics` and `/speech/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackStats {
    pub synthesis_requests: u64,
    pub synthesis_failures: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_stopped: u64,
    pub stale_results_ignored: u64,
}

/// Serializable snapshot of the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: &'static str,
    pub error: Option<String>,
    pub has_audio: bool,
    pub audio_bytes: usize,
    pub audio_duration_seconds: f64,
    pub session_id: Option<Uuid>,
    pub output: Option<String>,
    pub format: AudioFormat,
    pub stats: PlaybackStats,
}

/// The last synthesized PCM together with the format it was played in.
#[derive(Debug, Clone)]
pub struct StoredAudio {
    pub raw: RawAudio,
    pub format: AudioFormat,
}

/// The controller task went away (shutdown already happened).
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerGone;

impl fmt::Display for ControllerGone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Playback controller is not running")
    }
}

impl std::error::Error for ControllerGone {}

/// Owns the playback state machine. Driven through `handle`.
pub struct PlaybackController {
    state: PlaybackState,
    format: AudioFormat,
    truncation: TruncationPolicy,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: SinkResource,
    session: Option<PlaybackSession>,
    last_audio: Option<RawAudio>,
    generation: u64,
    stats: PlaybackStats,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl PlaybackController {
    /// Build a controller and the receiving end of its event channel.
    ///
    /// Synthesis results and sink completions are posted back on the same channel,
    /// so whoever drives the controller must keep feeding it from the receiver.
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: SinkResource,
        format: AudioFormat,
        truncation: TruncationPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            state: PlaybackState::Idle,
            format,
            truncation,
            synthesizer,
            sink,
            session: None,
            last_audio: None,
            generation: 0,
            stats: PlaybackStats::default(),
            events,
        };
        (controller, receiver)
    }

    /// Spawn the controller loop on the current runtime and return a handle to it.
    pub fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: SinkResource,
        format: AudioFormat,
        truncation: TruncationPolicy,
    ) -> ControllerHandle {
        let (controller, receiver) = Self::new(synthesizer, sink, format, truncation);
        let handle = ControllerHandle {
            events: controller.events.clone(),
        };
        tokio::spawn(controller.run(receiver));
        handle
    }

    /// Apply events until shutdown.
    pub async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<ControllerEvent>) {
        info!(sample_rate = self.format.sample_rate, channels = self.format.channel_count, "Playback controller started");
        while let Some(event) = receiver.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }
        self.teardown();
        info!("Playback controller stopped");
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// The single state-transition function.
    pub fn handle(&mut self, event: ControllerEvent) -> ControlFlow<()> {
        match event {
            ControllerEvent::Play { text, voice } => self.on_play(text, voice),
            ControllerEvent::Toggle { text, voice } => {
                if self.state == PlaybackState::Playing {
                    self.on_stop();
                } else {
                    self.on_play(text, voice);
                }
            }
            ControllerEvent::Stop => self.on_stop(),
            ControllerEvent::ClearSource => self.on_clear_source(),
            ControllerEvent::SynthesisFinished { generation, result } => {
                self.on_synthesis_finished(generation, result)
            }
            ControllerEvent::SessionCompleted { session_id } => self.on_session_completed(session_id),
            ControllerEvent::Status(reply) => {
                let _ = reply.send(self.status());
            }
            ControllerEvent::LastAudio(reply) => {
                let stored = self.last_audio.clone().map(|raw| StoredAudio { raw, format: self.format });
                let _ = reply.send(stored);
            }
            ControllerEvent::Shutdown(reply) => {
                self.teardown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn status(&self) -> ControllerStatus {
        let error = match &self.state {
            PlaybackState::Errored(msg) => Some(msg.clone()),
            _ => None,
        };
        let audio_bytes = self.last_audio.as_ref().map(|a| a.len()).unwrap_or(0);

        ControllerStatus {
            state: self.state.as_str(),
            error,
            has_audio: self.last_audio.is_some(),
            audio_bytes,
            audio_duration_seconds: self.format.duration_of(audio_bytes).as_secs_f64(),
            session_id: self.session.as_ref().map(|s| s.session_id),
            output: self.sink.backend_name().map(str::to_string),
            format: self.format,
            stats: self.stats.clone(),
        }
    }

    fn on_play(&mut self, text: String, voice: String) {
        if text.trim().is_empty() {
            debug!("Ignoring play request with empty text");
            return;
        }
        if self.state == PlaybackState::Synthesizing {
            debug!(generation = self.generation, "Synthesis already in flight, ignoring play request");
            return;
        }

        // Never two sinks at once: the old session goes before the new request
        self.stop_session();

        self.generation += 1;
        let generation = self.generation;
        self.state = PlaybackState::Synthesizing;
        self.stats.synthesis_requests += 1;
        info!(generation, voice = %voice, chars = text.len(), "Synthesizing speech");

        let synthesizer = self.synthesizer.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = synthesizer.synthesize(&text, &voice).await;
            let _ = events.send(ControllerEvent::SynthesisFinished { generation, result });
        });
    }

    fn on_stop(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                self.stop_session();
                self.state = PlaybackState::Idle;
            }
            PlaybackState::Synthesizing => {
                self.generation += 1;
                self.state = PlaybackState::Idle;
                debug!("Stopped while synthesizing, pending result will be ignored");
            }
            PlaybackState::Idle | PlaybackState::Errored(_) => {}
        }
    }

    fn on_clear_source(&mut self) {
        self.stop_session();
        self.generation += 1;
        self.last_audio = None;
        self.state = PlaybackState::Idle;
        info!("Source content cleared, audio discarded");
    }

    fn on_synthesis_finished(&mut self, generation: u64, result: Result<String, SynthesisError>) {
        if generation != self.generation || self.state != PlaybackState::Synthesizing {
            self.stats.stale_results_ignored += 1;
            debug!(generation, current = self.generation, "Ignoring stale synthesis result");
            return;
        }

        let encoded = match result {
            Ok(encoded) => encoded,
            Err(e) => {
                self.stats.synthesis_failures += 1;
                self.fail(e.to_string());
                return;
            }
        };

        let raw = match codec::decode(&encoded) {
            Ok(raw) => raw,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        debug!(generation, bytes = raw.len(), "Synthesis result decoded");
        // Kept for download even if playback fails below
        self.last_audio = Some(raw.clone());

        if let Err(e) = self.start_playback(&raw) {
            self.fail(e.to_string());
        }
    }

    fn start_playback(&mut self, raw: &[u8]) -> Result<(), AudioError> {
        let buffer = Arc::new(pcm::to_sample_buffer_with_policy(raw, &self.format, self.truncation)?);
        self.stop_session();

        let mut session = PlaybackSession::new(buffer);
        let started = match self.sink.acquire() {
            Ok(sink) => session.start(sink),
            Err(e) => Err(e),
        };
        let completion = started?;

        let session_id = session.session_id;
        let events = self.events.clone();
        tokio::spawn(async move {
            // An Err here means the session was halted; nothing to report
            if completion.await.is_ok() {
                let _ = events.send(ControllerEvent::SessionCompleted { session_id });
            }
        });

        info!(
            session_id = %session_id,
            frames = session.buffer().frame_count(),
            seconds = session.buffer().duration().as_secs_f64(),
            "Playback started"
        );
        self.session = Some(session);
        self.state = PlaybackState::Playing;
        self.stats.sessions_started += 1;
        Ok(())
    }

    fn on_session_completed(&mut self, session_id: Uuid) {
        let is_current = self
            .session
            .as_ref()
            .map(|s| s.session_id == session_id)
            .unwrap_or(false);
        if !is_current {
            debug!(session_id = %session_id, "Ignoring completion of a superseded session");
            return;
        }

        if let Some(mut session) = self.session.take() {
            if session.complete() {
                self.stats.sessions_completed += 1;
                info!(session_id = %session_id, seconds = session.playback_seconds(), "Playback completed");
            }
        }
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Idle;
        }
    }

    fn stop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.stop() {
                self.stats.sessions_stopped += 1;
                info!(session_id = %session.session_id, "Playback stopped");
            }
        }
    }

    fn fail(&mut self, message: String) {
        warn!(error = %message, "Playback request failed");
        self.state = PlaybackState::Errored(message);
    }

    fn teardown(&mut self) {
        self.stop_session();
        self.generation += 1;
        self.sink.release();
        if self.state != PlaybackState::Idle {
            self.state = PlaybackState::Idle;
        }
    }
}

/// Cloneable sender side used by HTTP handlers.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerHandle {
    fn send(&self, event: ControllerEvent) -> Result<(), ControllerGone> {
        self.events.send(event).map_err(|_| ControllerGone)
    }

    pub fn play(&self, text: impl Into<String>, voice: impl Into<String>) -> Result<(), ControllerGone> {
        self.send(ControllerEvent::Play {
            text: text.into(),
            voice: voice.into(),
        })
    }

    pub fn toggle(&self, text: impl Into<String>, voice: impl Into<String>) -> Result<(), ControllerGone> {
        self.send(ControllerEvent::Toggle {
            text: text.into(),
            voice: voice.into(),
        })
    }

    pub fn stop(&self) -> Result<(), ControllerGone> {
        self.send(ControllerEvent::Stop)
    }

    pub fn clear_source(&self) -> Result<(), ControllerGone> {
        self.send(ControllerEvent::ClearSource)
    }

    pub async fn status(&self) -> Result<ControllerStatus, ControllerGone> {
        let (reply, response) = oneshot::channel();
        self.send(ControllerEvent::Status(reply))?;
        response.await.map_err(|_| ControllerGone)
    }

    pub async fn last_audio(&self) -> Result<Option<StoredAudio>, ControllerGone> {
        let (reply, response) = oneshot::channel();
        self.send(ControllerEvent::LastAudio(reply))?;
        response.await.map_err(|_| ControllerGone)
    }

    /// Stop playback, release the sink and end the controller task.
    pub async fn shutdown(&self) -> Result<(), ControllerGone> {
        let (reply, response) = oneshot::channel();
        self.send(ControllerEvent::Shutdown(reply))?;
        response.await.map_err(|_| ControllerGone)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::sink::testing::ManualSinkProbe;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Synthesizer double that replays queued responses.
    #[derive(Default)]
    pub(crate) struct ScriptedSynthesizer {
        responses: Mutex<VecDeque<Result<String, SynthesisError>>>,
        pub calls: AtomicUsize,
        pub voices: Mutex<Vec<String>>,
    }

    impl ScriptedSynthesizer {
        pub(crate) fn with(responses: Vec<Result<String, SynthesisError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for ScriptedSynthesizer {
        async fn synthesize(&self, _text: &str, voice: &str) -> Result<String, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.voices.lock().unwrap().push(voice.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SynthesisError::new("no scripted response")))
        }
    }

    /// Base64 of `samples` as 16-bit LE PCM.
    pub(crate) fn pcm_base64(samples: &[i16]) -> String {
        let raw: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        codec::encode(&raw)
    }

    fn setup(
        responses: Vec<Result<String, SynthesisError>>,
    ) -> (
        PlaybackController,
        mpsc::UnboundedReceiver<ControllerEvent>,
        Arc<ScriptedSynthesizer>,
        ManualSinkProbe,
    ) {
        let synth = ScriptedSynthesizer::with(responses);
        let probe = ManualSinkProbe::default();
        let (controller, rx) = PlaybackController::new(
            synth.clone(),
            probe.resource(),
            AudioFormat::SPEECH,
            TruncationPolicy::Truncate,
        );
        (controller, rx, synth, probe)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> ControllerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for controller event")
            .expect("event channel closed")
    }

    fn play(controller: &mut PlaybackController, text: &str) {
        let _ = controller.handle(ControllerEvent::Play {
            text: text.to_string(),
            voice: "Kore".to_string(),
        });
    }

    /// Play and feed the synthesis result back in.
    async fn play_to_completion_of_synthesis(
        controller: &mut PlaybackController,
        rx: &mut mpsc::UnboundedReceiver<ControllerEvent>,
        text: &str,
    ) {
        play(controller, text);
        let event = next_event(rx).await;
        assert!(matches!(event, ControllerEvent::SynthesisFinished { .. }));
        let _ = controller.handle(event);
    }

    #[tokio::test]
    async fn test_empty_text_never_synthesizes() {
        let (mut controller, mut rx, synth, _probe) = setup(vec![]);

        play(&mut controller, "");
        play(&mut controller, "   \n\t");

        assert_eq!(controller.state(), &PlaybackState::Idle);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn test_play_then_natural_completion() {
        let (mut controller, mut rx, synth, probe) = setup(vec![Ok(pcm_base64(&[0, 100, -100, 200]))]);

        play(&mut controller, "Hello");
        assert_eq!(controller.state(), &PlaybackState::Synthesizing);

        let event = next_event(&mut rx).await;
        let _ = controller.handle(event);
        assert_eq!(controller.state(), &PlaybackState::Playing);
        assert_eq!(probe.active(), 1);
        assert_eq!(synth.voices.lock().unwrap().as_slice(), &["Kore".to_string()]);

        let status = controller.status();
        assert!(status.has_audio);
        assert_eq!(status.audio_bytes, 8);
        assert!(status.session_id.is_some());

        probe.finish_latest();
        let event = next_event(&mut rx).await;
        assert!(matches!(event, ControllerEvent::SessionCompleted { .. }));
        let _ = controller.handle(event);

        assert_eq!(controller.state(), &PlaybackState::Idle);
        let status = controller.status();
        assert!(status.has_audio, "audio stays downloadable after playback");
        assert_eq!(status.stats.sessions_completed, 1);
        assert!(status.session_id.is_none());
    }

    #[tokio::test]
    async fn test_stop_while_playing() {
        let (mut controller, mut rx, _synth, probe) = setup(vec![Ok(pcm_base64(&[1, 2, 3]))]);
        play_to_completion_of_synthesis(&mut controller, &mut rx, "Hello").await;
        assert_eq!(controller.state(), &PlaybackState::Playing);

        let _ = controller.handle(ControllerEvent::Stop);
        assert_eq!(controller.state(), &PlaybackState::Idle);
        assert_eq!(probe.active(), 0);

        // Stopping again is harmless
        let _ = controller.handle(ControllerEvent::Stop);
        assert_eq!(controller.state(), &PlaybackState::Idle);
        assert_eq!(controller.status().stats.sessions_stopped, 1);
    }

    #[tokio::test]
    async fn test_replay_resynthesizes_and_keeps_one_active_session() {
        let (mut controller, mut rx, synth, probe) =
            setup(vec![Ok(pcm_base64(&[1, 2])), Ok(pcm_base64(&[3, 4, 5, 6]))]);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "first").await;
        assert_eq!(probe.active(), 1);

        play(&mut controller, "first");
        assert_eq!(controller.state(), &PlaybackState::Synthesizing);
        assert_eq!(probe.active(), 0, "old session stops before the new request");

        let event = next_event(&mut rx).await;
        let _ = controller.handle(event);
        assert_eq!(controller.state(), &PlaybackState::Playing);
        assert_eq!(probe.active(), 1);
        assert_eq!(probe.connects(), 2);
        assert_eq!(synth.calls(), 2);
        assert_eq!(controller.status().audio_bytes, 8);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_previous_audio() {
        let (mut controller, mut rx, _synth, probe) = setup(vec![
            Ok(pcm_base64(&[7, 8])),
            Err(SynthesisError::new("quota exceeded")),
        ]);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "one").await;
        probe.finish_latest();
        let event = next_event(&mut rx).await;
        let _ = controller.handle(event);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "two").await;
        match controller.state() {
            PlaybackState::Errored(msg) => assert!(msg.contains("quota exceeded")),
            other => panic!("expected Errored, got {:?}", other),
        }
        let status = controller.status();
        assert_eq!(status.state, "errored");
        assert!(status.has_audio);
        assert_eq!(status.audio_bytes, 4);
        assert_eq!(status.stats.synthesis_failures, 1);
    }

    #[tokio::test]
    async fn test_errored_play_retries() {
        let (mut controller, mut rx, synth, _probe) = setup(vec![
            Err(SynthesisError::new("network down")),
            Ok(pcm_base64(&[1])),
        ]);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "retry me").await;
        assert!(matches!(controller.state(), PlaybackState::Errored(_)));

        play_to_completion_of_synthesis(&mut controller, &mut rx, "retry me").await;
        assert_eq!(controller.state(), &PlaybackState::Playing);
        assert_eq!(synth.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let (mut controller, mut rx, _synth, probe) = setup(vec![Ok("not base64!".to_string())]);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "Hello").await;
        assert!(matches!(controller.state(), PlaybackState::Errored(msg) if msg.contains("Malformed")));
        assert!(!controller.status().has_audio);
        assert_eq!(probe.connects(), 0);
    }

    #[tokio::test]
    async fn test_sink_unavailable_keeps_audio_for_download() {
        let (mut controller, mut rx, _synth, probe) = setup(vec![Ok(pcm_base64(&[1, 2, 3, 4]))]);
        probe.set_fail_connect(true);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "Hello").await;
        assert!(matches!(controller.state(), PlaybackState::Errored(msg) if msg.contains("unavailable")));
        assert!(controller.status().has_audio);
        assert_eq!(probe.active(), 0);
    }

    #[tokio::test]
    async fn test_clear_source_discards_audio_and_pending_result() {
        let (mut controller, mut rx, _synth, probe) =
            setup(vec![Ok(pcm_base64(&[1, 2])), Ok(pcm_base64(&[3, 4]))]);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "first").await;
        let _ = controller.handle(ControllerEvent::ClearSource);
        assert_eq!(controller.state(), &PlaybackState::Idle);
        assert!(!controller.status().has_audio);
        assert_eq!(probe.active(), 0);

        // A request in flight when the source is cleared must not resurrect audio
        play(&mut controller, "second");
        let _ = controller.handle(ControllerEvent::ClearSource);
        let event = next_event(&mut rx).await;
        let _ = controller.handle(event);
        assert_eq!(controller.state(), &PlaybackState::Idle);
        assert!(!controller.status().has_audio);
        assert_eq!(controller.status().stats.stale_results_ignored, 1);
    }

    #[tokio::test]
    async fn test_stop_while_synthesizing_ignores_result() {
        let (mut controller, mut rx, _synth, probe) = setup(vec![Ok(pcm_base64(&[1, 2]))]);

        play(&mut controller, "Hello");
        let _ = controller.handle(ControllerEvent::Stop);
        assert_eq!(controller.state(), &PlaybackState::Idle);

        let event = next_event(&mut rx).await;
        let _ = controller.handle(event);
        assert_eq!(controller.state(), &PlaybackState::Idle);
        assert_eq!(probe.connects(), 0);
    }

    #[tokio::test]
    async fn test_play_while_synthesizing_is_ignored() {
        let (mut controller, mut rx, synth, _probe) = setup(vec![Ok(pcm_base64(&[1, 2]))]);

        play(&mut controller, "Hello");
        play(&mut controller, "Hello again");

        let event = next_event(&mut rx).await;
        let _ = controller.handle(event);
        assert_eq!(controller.state(), &PlaybackState::Playing);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(synth.calls(), 1);
    }

    #[tokio::test]
    async fn test_odd_length_audio_drops_last_byte() {
        let mut raw: Vec<u8> = [100i16, -100, 300].iter().flat_map(|s| s.to_le_bytes()).collect();
        raw.push(0x7F);
        let (mut controller, mut rx, _synth, _probe) = setup(vec![Ok(codec::encode(&raw))]);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "Hello").await;
        assert_eq!(controller.state(), &PlaybackState::Playing);
        let frames = controller.session.as_ref().unwrap().buffer().frame_count();
        assert_eq!(frames, raw.len() / 2);
        // The stored bytes are untouched, trailing byte included
        assert_eq!(controller.status().audio_bytes, raw.len());
    }

    #[tokio::test]
    async fn test_completion_of_superseded_session_is_ignored() {
        let (mut controller, mut rx, _synth, probe) =
            setup(vec![Ok(pcm_base64(&[1, 2])), Ok(pcm_base64(&[3, 4]))]);

        play_to_completion_of_synthesis(&mut controller, &mut rx, "one").await;
        let stale_id = controller.status().session_id.unwrap();
        play_to_completion_of_synthesis(&mut controller, &mut rx, "two").await;
        assert_eq!(probe.active(), 1);

        let _ = controller.handle(ControllerEvent::SessionCompleted { session_id: stale_id });
        assert_eq!(controller.state(), &PlaybackState::Playing);
        assert_eq!(probe.active(), 1);
    }

    #[tokio::test]
    async fn test_toggle_stops_when_playing() {
        let (mut controller, mut rx, synth, probe) = setup(vec![Ok(pcm_base64(&[1, 2]))]);

        let _ = controller.handle(ControllerEvent::Toggle {
            text: "Hello".to_string(),
            voice: "Puck".to_string(),
        });
        let event = next_event(&mut rx).await;
        let _ = controller.handle(event);
        assert_eq!(controller.state(), &PlaybackState::Playing);

        let _ = controller.handle(ControllerEvent::Toggle {
            text: "Hello".to_string(),
            voice: "Puck".to_string(),
        });
        assert_eq!(controller.state(), &PlaybackState::Idle);
        assert_eq!(probe.active(), 0);
        assert_eq!(synth.calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let (mut controller, mut rx, _synth, probe) = setup(vec![Ok(pcm_base64(&[1, 2]))]);
        play_to_completion_of_synthesis(&mut controller, &mut rx, "Hello").await;

        let (reply, done) = oneshot::channel();
        assert!(controller.handle(ControllerEvent::Shutdown(reply)).is_break());
        done.await.unwrap();
        assert_eq!(probe.active(), 0);
        assert_eq!(controller.state(), &PlaybackState::Idle);
        assert!(controller.status().output.is_none());
    }

    #[tokio::test]
    async fn test_handle_drives_spawned_controller() {
        let synth = ScriptedSynthesizer::with(vec![Ok(pcm_base64(&[5, 6, 7, 8]))]);
        let probe = ManualSinkProbe::default();
        let handle = PlaybackController::spawn(
            synth.clone(),
            probe.resource(),
            AudioFormat::SPEECH,
            TruncationPolicy::Truncate,
        );

        handle.play("Hello", "Charon").unwrap();
        let mut status = handle.status().await.unwrap();
        for _ in 0..50 {
            if status.state == "playing" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = handle.status().await.unwrap();
        }
        assert_eq!(status.state, "playing");
        assert_eq!(status.output.as_deref(), Some("manual"));

        let audio = handle.last_audio().await.unwrap().unwrap();
        assert_eq!(audio.raw.len(), 8);
        assert_eq!(audio.format, AudioFormat::SPEECH);

        handle.shutdown().await.unwrap();
        assert_eq!(probe.active(), 0);
    }
}
