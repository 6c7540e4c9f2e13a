//! # Application State Management
//!
//! Shared state handed to every actix worker. Each worker gets its own clone of
//! `AppState`; the clones share the same data through `Arc`.
//!
//! ## What lives here:
//! - **config**: Runtime-updatable configuration (`Arc<RwLock<AppConfig>>`)
//! - **metrics**: Request counters written by the middleware
//! - **document**: The editable source text the speech is generated from
//! - **controller**: Sender side of the playback controller task
//! - **extractor**: The text extraction collaborator used by uploads
//!
//! Playback state itself is not stored here: it belongs to the controller task
//! and is only reached through `ControllerHandle`.
//!
//! ## Locking:
//! All locks are `std::sync::RwLock` and are never held across an `.await`.
//! A poisoned lock is recovered rather than propagated, since every write
//! here replaces whole values and cannot leave them half-updated.

use crate::config::AppConfig;
use crate::extraction::TextExtractor;
use crate::playback::ControllerHandle;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Source text shown in the editor
    pub document: Arc<RwLock<String>>,

    pub controller: ControllerHandle,

    pub extractor: Arc<dyn TextExtractor>,

    /// When the server started
    pub start_time: Instant,
}

/// Request metrics collected by the middleware.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// WAV files served by `/speech/download`
    pub audio_downloads: u64,

    /// Key: "METHOD /path", e.g. "POST /api/v1/speech/play"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint counters.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    pub fn new(config: AppConfig, controller: ControllerHandle, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            document: Arc::new(RwLock::new(String::new())),
            controller,
            extractor,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other workers aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Replace the configuration if it validates.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *write(&self.config) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn document_text(&self) -> String {
        read(&self.document).clone()
    }

    /// Store new source text. Returns `true` if it differs from what was there.
    pub fn replace_document(&self, text: String) -> bool {
        let mut document = write(&self.document);
        if *document == text {
            return false;
        }
        *document = text;
        true
    }

    /// Empty the source text. Returns `true` if there was anything to clear.
    pub fn clear_document(&self) -> bool {
        let mut document = write(&self.document);
        let had_text = !document.is_empty();
        document.clear();
        had_text
    }

    pub fn increment_request_count(&self) {
        write(&self.metrics).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        write(&self.metrics).error_count += 1;
    }

    pub fn increment_audio_downloads(&self) {
        write(&self.metrics).audio_downloads += 1;
    }

    /// Record one finished request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write(&self.metrics);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read(&self.metrics).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("controller", &self.controller)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

/// Test helpers shared by handler and middleware tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::audio::sink::testing::ManualSinkProbe;
    use crate::audio::{AudioFormat, TruncationPolicy};
    use crate::extraction::tests::ScriptedExtractor;
    use crate::extraction::ExtractionError;
    use crate::playback::controller::tests::ScriptedSynthesizer;
    use crate::playback::PlaybackController;
    use crate::synthesis::SynthesisError;

    /// State wired to a scripted synthesizer and a manual sink.
    pub fn state_with(responses: Vec<Result<String, SynthesisError>>) -> (AppState, Arc<ScriptedSynthesizer>, ManualSinkProbe) {
        let synth = ScriptedSynthesizer::with(responses);
        let probe = ManualSinkProbe::default();
        let controller = PlaybackController::spawn(
            synth.clone(),
            probe.resource(),
            AudioFormat::SPEECH,
            TruncationPolicy::Truncate,
        );
        let state = AppState::new(AppConfig::default(), controller, ScriptedExtractor::with(vec![]));
        (state, synth, probe)
    }

    /// Like `state_with`, with a scripted extractor for upload tests.
    pub fn state_with_extractor(
        synthesized: Vec<Result<String, SynthesisError>>,
        extracted: Vec<Result<String, ExtractionError>>,
    ) -> (AppState, Arc<ScriptedExtractor>, ManualSinkProbe) {
        let (mut state, _, probe) = state_with(synthesized);
        let extractor = ScriptedExtractor::with(extracted);
        state.extractor = extractor.clone() as Arc<dyn TextExtractor>;
        (state, extractor, probe)
    }
}
