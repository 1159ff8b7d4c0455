//! # Speech Recognition Module
//!
//! The session-facing side of the streaming speech-recognition engine.
//!
//! ## Key Components:
//! - **Engine seam**: `RecognitionEngine`/`EngineHandle` traits plus the
//!   handler registry with per-callback release capabilities (`engine`)
//! - **Azure client**: the concrete engine speaking the Azure Speech
//!   Service streaming WebSocket protocol (`azure`)
//! - **Recognition Bridge**: per-session wiring, event marshaling and
//!   ordered teardown (`bridge`)
//!
//! ## Execution contexts:
//! Engine events are dispatched on the engine's own task, never on the
//! connection actors' event loop. Anything that must reach a session's
//! socket crosses over through a channel; handlers never block and never
//! call back into the loop synchronously.

pub mod azure;
pub mod bridge;
pub mod engine;

pub use bridge::RecognitionBridge;
pub use engine::{EngineHandle, EventKind, HandlerRegistry, RecognitionEngine, Subscription};

/// Audio format contract with the device firmware. Not negotiated.
pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const CHANNELS: u16 = 1;

/// One event emitted by a recognition-engine instance.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// Partial hypothesis for the utterance in progress. The relay ignores
    /// these by policy.
    Recognizing { text: String },

    /// Finalized utterance text. Drives the result pipeline.
    Recognized { text: String },

    /// Recognition was canceled by the service or the transport.
    Canceled {
        reason: CancelReason,
        code: CancelCode,
        details: String,
    },

    /// The engine's service-side session opened.
    SessionStarted { service_session: String },

    /// The engine's service-side session closed.
    SessionStopped { service_session: String },
}

/// Why a recognition session was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The service or transport failed.
    Error,
    /// The audio stream ended and the service finished with it.
    EndOfStream,
}

/// Service error code attached to a cancellation.
///
/// `ConnectionFailure` and `AuthenticationFailure` get dedicated log lines
/// in the bridge because they are the two codes operators act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCode {
    NoError,
    ConnectionFailure,
    AuthenticationFailure,
    BadRequest,
    TooManyRequests,
    ServiceError,
    ServiceTimeout,
}

impl CancelCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelCode::NoError => "no_error",
            CancelCode::ConnectionFailure => "connection_failure",
            CancelCode::AuthenticationFailure => "authentication_failure",
            CancelCode::BadRequest => "bad_request",
            CancelCode::TooManyRequests => "too_many_requests",
            CancelCode::ServiceError => "service_error",
            CancelCode::ServiceTimeout => "service_timeout",
        }
    }
}

impl std::fmt::Display for CancelCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
