//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket connection:
//! the configuration, the relay metrics, the session registry and the
//! collaborator handles (recognition engine, result pipeline). Everything
//! mutable sits behind `Arc<RwLock<_>>`; the collaborators themselves are
//! stateless and shared as trait objects.

use crate::audio::session::SessionRegistry;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::notes::{NoteArchive, NotesClient};
use crate::pipeline::ResultPipeline;
use crate::speech::azure::AzureSpeechEngine;
use crate::speech::RecognitionEngine;
use crate::translate::{AzureTranslator, Translator};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::info;

/// Counters for the whole relay process.
#[derive(Debug, Default, Clone)]
pub struct RelayMetrics {
    /// HTTP requests served (health, metrics, config).
    pub request_count: u64,

    /// HTTP requests that ended in an error status.
    pub error_count: u64,

    /// Device connections accepted since start.
    pub connections_total: u64,

    /// Device connections currently open.
    pub active_sessions: u32,

    /// Well-formed audio frames demultiplexed.
    pub frames_received: u64,

    /// Undersized binary frames dropped.
    pub frames_dropped: u64,

    /// Non-binary device messages rejected.
    pub non_binary_rejected: u64,

    /// Raw audio bytes forwarded to recognition engines.
    pub audio_bytes: u64,

    /// Finalized utterances that reached the result pipeline.
    pub utterances: u64,

    /// Archival outcomes.
    pub notes_archived: u64,
    pub notes_failed: u64,
}

/// The state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<RelayMetrics>>,
    pub start_time: Instant,

    /// Active sessions, keyed by connection identity.
    pub registry: Arc<SessionRegistry>,

    /// Recognition-engine factory; one engine instance is started per
    /// connection.
    pub engine: Arc<dyn RecognitionEngine>,

    /// Shared, stateless result pipeline.
    pub pipeline: Arc<ResultPipeline>,
}

impl AppState {
    /// Build the full collaborator graph from configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let engine: Arc<dyn RecognitionEngine> = Arc::new(AzureSpeechEngine::new(&config.speech));

        let translator: Option<Arc<dyn Translator>> = if config.translator_configured() {
            Some(Arc::new(AzureTranslator::new(&config.translation)?))
        } else {
            info!("No translation key configured; running with the translator off");
            None
        };

        let notes: Arc<dyn NoteArchive> = Arc::new(NotesClient::new(&config.notes)?);
        let pipeline = Arc::new(ResultPipeline::new(translator, notes, &config.translation));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(RelayMetrics::default())),
            start_time: Instant::now(),
            registry: Arc::new(SessionRegistry::new()),
            engine,
            pipeline,
        })
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn get_metrics_snapshot(&self) -> RelayMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// A device connection reached `Active`.
    pub fn session_opened(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.connections_total += 1;
        metrics.active_sessions += 1;
    }

    /// A device connection finished cleanup.
    pub fn session_closed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_frame(&self, payload_bytes: usize) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_received += 1;
        metrics.audio_bytes += payload_bytes as u64;
    }

    pub fn record_dropped_frame(&self) {
        self.metrics.write().unwrap().frames_dropped += 1;
    }

    pub fn record_non_binary(&self) {
        self.metrics.write().unwrap().non_binary_rejected += 1;
    }

    pub fn record_utterance(&self) {
        self.metrics.write().unwrap().utterances += 1;
    }

    pub fn record_archival(&self, ok: bool) {
        let mut metrics = self.metrics.write().unwrap();
        if ok {
            metrics.notes_archived += 1;
        } else {
            metrics.notes_failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        // Default config has no translator key, so the pipeline runs with
        // the translator off; nothing here touches the network.
        AppState::new(AppConfig::default()).unwrap()
    }

    #[test]
    fn session_gauges_track_open_and_close() {
        let state = test_state();

        state.session_opened();
        state.session_opened();
        state.session_closed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.connections_total, 2);
        assert_eq!(metrics.active_sessions, 1);

        // The gauge never underflows, even if close is over-counted.
        state.session_closed();
        state.session_closed();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn frame_counters_accumulate() {
        let state = test_state();

        state.record_frame(320);
        state.record_frame(160);
        state.record_dropped_frame();
        state.record_non_binary();
        state.record_utterance();
        state.record_archival(true);
        state.record_archival(false);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.frames_received, 2);
        assert_eq!(metrics.audio_bytes, 480);
        assert_eq!(metrics.frames_dropped, 1);
        assert_eq!(metrics.non_binary_rejected, 1);
        assert_eq!(metrics.utterances, 1);
        assert_eq!(metrics.notes_archived, 1);
        assert_eq!(metrics.notes_failed, 1);
    }
}
