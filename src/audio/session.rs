//! # Playback Session Management
//!
//! A playback session owns one decoded sample buffer and drives it through the
//! output sink. Sessions are short-lived: one is created per play request and
//! discarded once it stops or completes.
//!
//! ## Session Lifecycle:
//! 1. **Constructed**: Buffer decoded, nothing playing yet
//! 2. **Active**: Connected to the sink and producing sound
//! 3. **Completed**: The sink ran out of samples (natural end)
//! 4. **Stopped**: Halted on request before the end
//!
//! Only `start` can fail. `stop` and `complete` are no-ops outside `Active`, because
//! a user can easily press "stop" just after playback ended on its own.

use crate::audio::sink::{OutputSink, SinkControl};
use crate::audio::{AudioError, SampleBuffer};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Current status of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Constructed,
    Active,
    Completed,
    Stopped,
}

impl SessionStatus {
    /// Convert status to string for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Constructed => "constructed",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Stopped => "stopped",
        }
    }
}

type CompletionCallback = Box<dyn FnOnce(Uuid) + Send>;

/// One playback of one sample buffer.
///
/// ## Ownership:
/// - **buffer**: Shared with the sink for as long as the connection lives
/// - **control**: Held only while `Active`; dropping it releases the sink connection
pub struct PlaybackSession {
    /// Unique identifier for this session
    pub session_id: Uuid,

    status: SessionStatus,

    buffer: Arc<SampleBuffer>,

    control: Option<Box<dyn SinkControl>>,

    on_completion: Option<CompletionCallback>,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    started_at: Option<DateTime<Utc>>,

    ended_at: Option<DateTime<Utc>>,
}

impl PlaybackSession {
    pub fn new(buffer: Arc<SampleBuffer>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            status: SessionStatus::Constructed,
            buffer,
            control: None,
            on_completion: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Register a callback fired exactly once, on natural completion only.
    pub fn with_completion_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Uuid) + Send + 'static,
    {
        self.on_completion = Some(Box::new(callback));
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Connect the buffer to the sink and begin playback.
    ///
    /// ## State Transition:
    /// Constructed → Active
    ///
    /// ## Returns:
    /// - **Ok(receiver)**: Resolves when the sink reaches the end of the buffer
    /// - **Err(SinkUnavailable)**: The sink refused the connection; still Constructed
    /// - **Err(InvalidSessionState)**: The session was already started
    pub fn start(&mut self, sink: &mut dyn OutputSink) -> Result<oneshot::Receiver<()>, AudioError> {
        if self.status != SessionStatus::Constructed {
            return Err(AudioError::InvalidSessionState(format!(
                "Cannot start session from status: {}",
                self.status.as_str()
            )));
        }

        let connection = sink.connect(self.buffer.clone())?;
        self.control = Some(connection.control);
        self.status = SessionStatus::Active;
        self.started_at = Some(Utc::now());
        Ok(connection.completion)
    }

    /// Record natural end of playback.
    ///
    /// ## State Transition:
    /// Active → Completed. Returns `false` (and does nothing) from any other state.
    pub fn complete(&mut self) -> bool {
        if self.status != SessionStatus::Active {
            return false;
        }

        self.status = SessionStatus::Completed;
        self.ended_at = Some(Utc::now());
        self.control = None;
        if let Some(callback) = self.on_completion.take() {
            callback(self.session_id);
        }
        true
    }

    /// Halt playback immediately and release the sink connection.
    ///
    /// ## State Transition:
    /// Active → Stopped. Returns `false` (and does nothing) from any other state.
    pub fn stop(&mut self) -> bool {
        if self.status != SessionStatus::Active {
            return false;
        }

        if let Some(mut control) = self.control.take() {
            control.halt();
        }
        self.status = SessionStatus::Stopped;
        self.ended_at = Some(Utc::now());
        true
    }

    /// Seconds spent playing, up to now or to the end of playback.
    pub fn playback_seconds(&self) -> f64 {
        match self.started_at {
            Some(started) => {
                let end_time = self.ended_at.unwrap_or_else(Utc::now);
                end_time.signed_duration_since(started).num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("session_id", &self.session_id)
            .field("status", &self.status)
            .field("frames", &self.buffer.frame_count())
            .field("created_at", &self.created_at)
            .finish()
    }
}
