//! # Relay Session Management
//!
//! Per-connection session state and the registry that owns it. One
//! `RelaySession` exists for exactly as long as its connection is between
//! start-of-connect and end-of-cleanup; the registry entry is created by
//! the connection handler before the engine starts and removed by the same
//! handler's teardown, never by anyone else.
//!
//! ## What a session tracks:
//! - its identity (a process-unique UUID per connection)
//! - the device tag demultiplexed out of inbound frames, starting at the
//!   `UNKNOWN_DEVICE` sentinel and following the latest observed address
//! - the outcome of the most recent result-pipeline run (telemetry only)
//! - volume counters surfaced by the `/sessions` endpoint
//!
//! The audio sink and engine handle are deliberately *not* stored here:
//! they are exclusively owned by the connection's `RecognitionBridge` so
//! that teardown ordering has a single owner.

use crate::audio::frame::UNKNOWN_DEVICE;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// What `observe_device_tag` saw, so the caller can log appropriately.
#[derive(Debug, Clone, PartialEq)]
pub enum TagObservation {
    /// First frame from this connection; the tag was adopted silently.
    First,

    /// Same address as before; nothing changed.
    Unchanged,

    /// A different address appeared mid-session. The new tag was adopted
    /// (device hand-off is accepted, not rejected); `previous` is kept for
    /// the warning log.
    Changed { previous: String },
}

/// Volume counters for one session.
#[derive(Debug, Default)]
struct SessionStats {
    audio_bytes: u64,
    frames: u64,
    frames_dropped: u64,
    utterances: u64,
}

/// State for one active device connection.
pub struct RelaySession {
    /// Unique identity of this connection for the process lifetime.
    pub session_id: Uuid,

    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,

    /// Latest device tag observed in frames; authoritative for delivery
    /// and archival.
    device_tag: RwLock<String>,

    /// Whether the most recent result-pipeline run archived successfully.
    /// `None` until the first finalized utterance.
    last_result_ok: RwLock<Option<bool>>,

    stats: RwLock<SessionStats>,
}

impl RelaySession {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            connected_at: Utc::now(),
            device_tag: RwLock::new(UNKNOWN_DEVICE.to_string()),
            last_result_ok: RwLock::new(None),
            stats: RwLock::new(SessionStats::default()),
        }
    }

    /// Current device tag (the unknown sentinel until a frame arrives).
    pub fn device_tag(&self) -> String {
        self.device_tag.read().unwrap().clone()
    }

    /// Record the device tag carried by a frame.
    ///
    /// The latest observed tag always wins; the return value tells the
    /// caller whether this was the first sighting, a repeat, or a
    /// mid-session change that deserves a warning.
    pub fn observe_device_tag(&self, candidate: &str) -> TagObservation {
        let mut tag = self.device_tag.write().unwrap();

        if *tag == UNKNOWN_DEVICE {
            *tag = candidate.to_string();
            return TagObservation::First;
        }

        if *tag == candidate {
            return TagObservation::Unchanged;
        }

        let previous = std::mem::replace(&mut *tag, candidate.to_string());
        TagObservation::Changed { previous }
    }

    pub fn record_audio(&self, bytes: usize) {
        let mut stats = self.stats.write().unwrap();
        stats.frames += 1;
        stats.audio_bytes += bytes as u64;
    }

    pub fn record_dropped_frame(&self) {
        self.stats.write().unwrap().frames_dropped += 1;
    }

    pub fn record_utterance(&self) {
        self.stats.write().unwrap().utterances += 1;
    }

    /// Store the outcome of the most recent result-pipeline run. Used for
    /// logging and the `/sessions` endpoint only, never for control flow.
    pub fn set_last_result(&self, ok: bool) {
        *self.last_result_ok.write().unwrap() = Some(ok);
    }

    pub fn last_result_ok(&self) -> Option<bool> {
        *self.last_result_ok.read().unwrap()
    }

    /// Consistent copy of the session state for the HTTP surface.
    pub fn snapshot(&self) -> SessionSnapshot {
        let stats = self.stats.read().unwrap();
        SessionSnapshot {
            session_id: self.session_id,
            device_tag: self.device_tag(),
            connected_at: self.connected_at,
            audio_bytes: stats.audio_bytes,
            frames: stats.frames,
            frames_dropped: stats.frames_dropped,
            utterances: stats.utterances,
            last_result_ok: self.last_result_ok(),
        }
    }
}

/// Serializable view of one session for `/api/v1/sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub device_tag: String,
    pub connected_at: DateTime<Utc>,
    pub audio_bytes: u64,
    pub frames: u64,
    pub frames_dropped: u64,
    pub utterances: u64,
    pub last_result_ok: Option<bool>,
}

/// Owned collection of active sessions, injected through `AppState`.
///
/// There is deliberately no session cap: the listener accepts unboundedly
/// many concurrent device connections. Each entry is mutated only by the
/// connection handler that created it.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<RelaySession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session and register it. Called during `Connecting`,
    /// before the recognition engine starts.
    pub fn register(&self) -> Arc<RelaySession> {
        let session = Arc::new(RelaySession::new());
        self.sessions
            .write()
            .unwrap()
            .insert(session.session_id, session.clone());
        session
    }

    /// Remove a session at end-of-cleanup. Returns whether an entry was
    /// actually present, so a double removal is observable in tests.
    pub fn remove(&self, session_id: &Uuid) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &Uuid) -> bool {
        self.sessions.read().unwrap().contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .map(|s| s.snapshot())
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_adopts_the_tag_silently() {
        let registry = SessionRegistry::new();
        let session = registry.register();

        assert_eq!(session.device_tag(), UNKNOWN_DEVICE);
        assert_eq!(
            session.observe_device_tag("AA:BB:CC:DD:EE:FF"),
            TagObservation::First
        );
        assert_eq!(session.device_tag(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn repeated_tag_is_unchanged_and_handoff_reports_previous() {
        let registry = SessionRegistry::new();
        let session = registry.register();

        session.observe_device_tag("AA:BB:CC:DD:EE:FF");
        assert_eq!(
            session.observe_device_tag("AA:BB:CC:DD:EE:FF"),
            TagObservation::Unchanged
        );

        // A differing address is adopted, not rejected.
        assert_eq!(
            session.observe_device_tag("11:22:33:44:55:66"),
            TagObservation::Changed {
                previous: "AA:BB:CC:DD:EE:FF".to_string()
            }
        );
        assert_eq!(session.device_tag(), "11:22:33:44:55:66");
    }

    #[test]
    fn registry_entry_exists_only_between_register_and_remove() {
        let registry = SessionRegistry::new();
        let session = registry.register();
        let id = session.session_id;

        assert!(registry.contains(&id));
        assert_eq!(registry.active_count(), 1);

        assert!(registry.remove(&id));
        assert!(!registry.contains(&id));

        // Cleanup runs at most once per connection; a second removal is a
        // visible no-op.
        assert!(!registry.remove(&id));
    }

    #[test]
    fn snapshot_reflects_counters_and_pipeline_outcome() {
        let registry = SessionRegistry::new();
        let session = registry.register();

        session.record_audio(320);
        session.record_audio(160);
        session.record_dropped_frame();
        session.record_utterance();
        session.set_last_result(true);

        let snap = session.snapshot();
        assert_eq!(snap.audio_bytes, 480);
        assert_eq!(snap.frames, 2);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.utterances, 1);
        assert_eq!(snap.last_result_ok, Some(true));
    }
}
