//! # Audio Relay Module
//!
//! Everything between an inbound device frame and the recognition engine's
//! audio stream.
//!
//! ## Key Components:
//! - **Frame Demultiplexer**: splits each binary message into a device tag
//!   and raw audio payload (`frame`)
//! - **Audio Sink**: the append-only byte stream handed to the engine,
//!   with close-once semantics (`sink`)
//! - **Session Registry**: per-connection state and its owning collection
//!   (`session`)
//!
//! ## Audio Format Contract:
//! Devices send mono 16-bit little-endian PCM at 16 kHz. The relay never
//! decodes samples; payload bytes are forwarded opaquely to the engine.

// The WebSocket connection handler itself lives in src/websocket.rs.
pub mod frame; // device-tag/payload demultiplexing
pub mod sink; // engine-facing audio stream
pub mod session; // session state and registry
