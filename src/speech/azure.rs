//! # Azure Speech Streaming Client
//!
//! Concrete `RecognitionEngine` speaking the Azure Speech Service
//! streaming WebSocket protocol directly. One engine instance per session:
//! `start` performs the `wss://` handshake (so credential and connectivity
//! failures abort the connection before any audio is consumed) and spawns
//! the pump task that owns the service connection from then on. That task
//! is the engine's execution context: every event is dispatched from it,
//! never from a connection actor's event loop.
//!
//! ## Protocol sketch:
//! - Client text message `speech.config` opens a request, then audio flows
//!   as binary messages (`Path: audio`) with a 2-byte big-endian header
//!   length prefix; the first audio chunk of each turn carries a RIFF
//!   header describing the fixed 16 kHz/16-bit/mono format.
//! - The service answers with text messages: `turn.start`,
//!   `speech.startDetected`, `speech.hypothesis` (partial),
//!   `speech.phrase` (final), `speech.endDetected`, `turn.end`.
//! - A `turn.end` while audio is still flowing opens the next turn under a
//!   fresh request id on the same connection.

use crate::audio::sink::AudioStream;
use crate::config::SpeechConfig;
use crate::error::{AppError, AppResult};
use crate::speech::engine::{EngineHandle, HandlerRegistry, RecognitionEngine};
use crate::speech::{CancelCode, CancelReason, RecognitionEvent};
use crate::speech::{BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE_HZ};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stateless factory for per-session service connections.
pub struct AzureSpeechEngine {
    key: String,
    region: String,
}

impl AzureSpeechEngine {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            key: config.key.clone(),
            region: config.region.clone(),
        }
    }

    fn endpoint(&self, language: &str) -> String {
        format!(
            "wss://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={}&format=simple",
            self.region, language
        )
    }

    fn build_request(
        &self,
        language: &str,
        connection_id: &str,
    ) -> AppResult<tungstenite::http::Request<()>> {
        tungstenite::http::Request::builder()
            .uri(self.endpoint(language))
            .header("Host", format!("{}.stt.speech.microsoft.com", self.region))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Ocp-Apim-Subscription-Key", self.key.clone())
            .header("X-ConnectionId", connection_id.to_string())
            .body(())
            .map_err(|e| AppError::Engine(format!("failed to build handshake request: {}", e)))
    }
}

#[async_trait]
impl RecognitionEngine for AzureSpeechEngine {
    async fn start(&self, audio: AudioStream, language: &str) -> AppResult<Box<dyn EngineHandle>> {
        let connection_id = Uuid::new_v4().simple().to_string();
        let request = self.build_request(language, &connection_id)?;

        let ws = match connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status();
                return Err(if status == tungstenite::http::StatusCode::UNAUTHORIZED
                    || status == tungstenite::http::StatusCode::FORBIDDEN
                {
                    AppError::Engine(format!(
                        "speech service rejected credentials (HTTP {})",
                        status
                    ))
                } else {
                    AppError::Engine(format!("speech service handshake failed (HTTP {})", status))
                });
            }
            Err(err) => {
                return Err(AppError::Engine(format!(
                    "speech service connection failed: {}",
                    err
                )))
            }
        };

        let events = Arc::new(HandlerRegistry::new());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(
            ws,
            audio,
            events.clone(),
            stop_rx,
            connection_id,
        ));

        Ok(Box::new(AzureEngineHandle {
            events,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }))
    }
}

struct AzureEngineHandle {
    events: Arc<HandlerRegistry>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl EngineHandle for AzureEngineHandle {
    fn events(&self) -> &Arc<HandlerRegistry> {
        &self.events
    }

    async fn stop(&mut self) -> AppResult<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| AppError::Engine(format!("engine task ended abnormally: {}", e)))?;
        }

        Ok(())
    }
}

fn dispatch_canceled(events: &HandlerRegistry, code: CancelCode, details: String) {
    events.dispatch(&RecognitionEvent::Canceled {
        reason: CancelReason::Error,
        code,
        details,
    });
}

/// What a service text message means for the turn in progress.
enum TurnOutcome {
    Continue,
    TurnEnded,
}

/// The pump: owns the service connection, feeds audio forward, dispatches
/// recognition events back. Runs until stop is requested, the audio ends
/// and the turn closes, or the connection dies.
async fn run_session(
    mut ws: WsStream,
    mut audio: AudioStream,
    events: Arc<HandlerRegistry>,
    mut stop_rx: oneshot::Receiver<()>,
    connection_id: String,
) {
    let mut request_id = Uuid::new_v4().simple().to_string();
    let mut announced = false;
    let mut audio_done = false;
    let mut header_pending = true;

    if let Err(err) = open_turn(&mut ws, &request_id).await {
        dispatch_canceled(&events, CancelCode::ConnectionFailure, err.to_string());
        events.dispatch(&RecognitionEvent::SessionStopped {
            service_session: connection_id,
        });
        return;
    }

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                let _ = ws.send(Message::Binary(audio_message(&request_id, &[]))).await;
                let _ = ws.send(Message::Close(None)).await;
                break;
            }

            chunk = audio.next_chunk(), if !audio_done => {
                let sent = match chunk {
                    Some(payload) => {
                        let framed = if header_pending {
                            header_pending = false;
                            let mut with_header = wav_header().to_vec();
                            with_header.extend_from_slice(&payload);
                            audio_message(&request_id, &with_header)
                        } else {
                            audio_message(&request_id, &payload)
                        };
                        ws.send(Message::Binary(framed)).await
                    }
                    None => {
                        // Sink closed; tell the service the stream is over
                        // and keep draining results until the turn closes.
                        audio_done = true;
                        ws.send(Message::Binary(audio_message(&request_id, &[]))).await
                    }
                };

                if let Err(err) = sent {
                    dispatch_canceled(&events, CancelCode::ConnectionFailure, err.to_string());
                    break;
                }
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match handle_service_message(&text, &events, &mut announced, &connection_id) {
                            TurnOutcome::Continue => {}
                            TurnOutcome::TurnEnded => {
                                if audio_done {
                                    break;
                                }
                                // Open the next turn on the same connection.
                                request_id = Uuid::new_v4().simple().to_string();
                                header_pending = true;
                                if let Err(err) = open_turn(&mut ws, &request_id).await {
                                    dispatch_canceled(
                                        &events,
                                        CancelCode::ConnectionFailure,
                                        err.to_string(),
                                    );
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if !audio_done {
                            dispatch_canceled(
                                &events,
                                CancelCode::ConnectionFailure,
                                format!("service closed the connection: {:?}", frame),
                            );
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        dispatch_canceled(&events, CancelCode::ConnectionFailure, err.to_string());
                        break;
                    }
                    None => {
                        if !audio_done {
                            dispatch_canceled(
                                &events,
                                CancelCode::ConnectionFailure,
                                "service connection ended unexpectedly".to_string(),
                            );
                        }
                        break;
                    }
                }
            }
        }
    }

    events.dispatch(&RecognitionEvent::SessionStopped {
        service_session: connection_id,
    });
}

/// Send the `speech.config` message that opens a request on the wire.
async fn open_turn(ws: &mut WsStream, request_id: &str) -> Result<(), tungstenite::Error> {
    let body = json!({
        "context": {
            "system": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "audio": {
                "source": {
                    "samplerate": SAMPLE_RATE_HZ,
                    "bitspersample": BITS_PER_SAMPLE,
                    "channelcount": CHANNELS,
                }
            }
        }
    });

    ws.send(Message::Text(text_message(
        "speech.config",
        request_id,
        &body.to_string(),
    )))
    .await
}

fn handle_service_message(
    text: &str,
    events: &HandlerRegistry,
    announced: &mut bool,
    connection_id: &str,
) -> TurnOutcome {
    let Some((path, body)) = parse_service_message(text) else {
        warn!("Unparseable speech service message, ignoring");
        return TurnOutcome::Continue;
    };

    match path.as_str() {
        "turn.start" => {
            if !*announced {
                *announced = true;
                events.dispatch(&RecognitionEvent::SessionStarted {
                    service_session: connection_id.to_string(),
                });
            }
        }
        "speech.hypothesis" => {
            let text = body
                .get("Text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            events.dispatch(&RecognitionEvent::Recognizing { text });
        }
        "speech.phrase" => {
            if let Some(event) = phrase_event(&body) {
                events.dispatch(&event);
            }
        }
        "speech.startDetected" | "speech.endDetected" => {
            debug!(path = %path, "Speech boundary detected");
        }
        "turn.end" => return TurnOutcome::TurnEnded,
        other => {
            debug!(path = %other, "Ignoring unknown service message");
        }
    }

    TurnOutcome::Continue
}

/// Map one `speech.phrase` body to an event. `NoMatch` phrases (silence,
/// noise) produce nothing; a `Success` with empty display text is still
/// forwarded and becomes the pipeline's empty-utterance no-op.
fn phrase_event(body: &Value) -> Option<RecognitionEvent> {
    match body.get("RecognitionStatus").and_then(Value::as_str) {
        Some("Success") => Some(RecognitionEvent::Recognized {
            text: body
                .get("DisplayText")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        Some("NoMatch") => None,
        Some(status) => {
            debug!(status = %status, "Phrase with non-success status");
            None
        }
        None => None,
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Frame a client text message: protocol headers, blank line, JSON body.
fn text_message(path: &str, request_id: &str, body: &str) -> String {
    format!(
        "Path: {}\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: application/json; charset=utf-8\r\n\r\n{}",
        path,
        request_id,
        timestamp(),
        body
    )
}

/// Frame a client audio message: 2-byte big-endian header length, the
/// headers, then the raw payload. An empty payload marks end-of-audio.
fn audio_message(request_id: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "Path: audio\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: audio/x-wav\r\n",
        request_id,
        timestamp()
    );

    let mut message = Vec::with_capacity(2 + header.len() + payload.len());
    message.extend_from_slice(&(header.len() as u16).to_be_bytes());
    message.extend_from_slice(header.as_bytes());
    message.extend_from_slice(payload);
    message
}

/// Split a service text message into its `Path` header and JSON body.
fn parse_service_message(text: &str) -> Option<(String, Value)> {
    let (headers, body) = text.split_once("\r\n\r\n")?;

    let path = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("path") {
            Some(value.trim().to_string())
        } else {
            None
        }
    })?;

    let body = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).ok()?
    };

    Some((path, body))
}

/// 44-byte RIFF header describing the fixed device audio format. Chunk
/// sizes are the streaming placeholder (`u32::MAX`): the total length is
/// unknown while the device is live.
fn wav_header() -> [u8; 44] {
    let byte_rate = SAMPLE_RATE_HZ * u32::from(CHANNELS) * u32::from(BITS_PER_SAMPLE) / 8;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;

    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE_HZ.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&u32::MAX.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_message_prefixes_header_length() {
        let message = audio_message("req-1", &[1, 2, 3]);

        let header_len = u16::from_be_bytes([message[0], message[1]]) as usize;
        let header = std::str::from_utf8(&message[2..2 + header_len]).unwrap();

        assert!(header.starts_with("Path: audio\r\n"));
        assert!(header.contains("X-RequestId: req-1"));
        assert_eq!(&message[2 + header_len..], &[1, 2, 3]);
    }

    #[test]
    fn end_of_audio_message_has_empty_payload() {
        let message = audio_message("req-1", &[]);
        let header_len = u16::from_be_bytes([message[0], message[1]]) as usize;
        assert_eq!(message.len(), 2 + header_len);
    }

    #[test]
    fn service_message_parsing_extracts_path_and_body() {
        let raw = "X-RequestId: abc\r\nPath: speech.phrase\r\nContent-Type: application/json\r\n\r\n{\"RecognitionStatus\":\"Success\",\"DisplayText\":\"halo dunia\"}";

        let (path, body) = parse_service_message(raw).unwrap();
        assert_eq!(path, "speech.phrase");
        assert_eq!(body["DisplayText"], "halo dunia");
    }

    #[test]
    fn successful_phrase_becomes_a_final_event() {
        let body = json!({"RecognitionStatus": "Success", "DisplayText": "halo dunia"});
        match phrase_event(&body) {
            Some(RecognitionEvent::Recognized { text }) => assert_eq!(text, "halo dunia"),
            other => panic!("expected final event, got {:?}", other),
        }
    }

    #[test]
    fn no_match_phrase_is_ignored() {
        let body = json!({"RecognitionStatus": "NoMatch"});
        assert!(phrase_event(&body).is_none());
    }

    #[test]
    fn wav_header_describes_the_firmware_format() {
        let header = wav_header();

        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(
            u32::from_le_bytes(header[24..28].try_into().unwrap()),
            16_000
        );
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(header[34..36].try_into().unwrap()), 16);
    }
}
