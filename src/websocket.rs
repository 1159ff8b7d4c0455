//! # Device WebSocket Handler
//!
//! The per-connection control loop. Embedded devices connect over a
//! persistent WebSocket and stream MAC-prefixed binary audio frames; the
//! relay pushes back plain-text messages (a translated utterance or one of
//! the fixed status strings) and nothing else.
//!
//! ## Connection lifecycle:
//! 1. **Connecting**: the route handler validates the upgrade, registers a
//!    session and starts the recognition engine, awaiting its start so no
//!    audio is dropped while the engine warms up. Any failure here aborts
//!    the connection before a single frame is consumed.
//! 2. **Active**: the actor demultiplexes inbound frames into the session's
//!    audio sink and relays finalized utterances back out. Each connection
//!    is one actor; all actors share the arbiter's single-threaded event
//!    loop, while the engine runs on its own task and reaches the actor
//!    only through the finals channel added as a stream.
//! 3. **Closing**: entered exactly once when the actor stops, from any exit
//!    path. Runs the bridge teardown (unregister handlers, await engine
//!    stop, close sink) and removes the registry entry.
//! 4. **Closed**: terminal; the session identity is never reused.

use crate::audio::frame::{self, Frame};
use crate::audio::session::{RelaySession, TagObservation};
use crate::speech::RecognitionBridge;
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// How often the relay pings an idle device.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a device may stay silent (no frames, no pongs) before the
/// connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection state machine. `Connecting` work happens in the route
/// handler before the actor exists; the actor itself starts `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// A finalized utterance handed over from the engine's execution context.
struct FinalTranscript {
    text: String,
}

/// Plain-text message scheduled for delivery to the device.
#[derive(Message)]
#[rtype(result = "()")]
struct DeliverText(String);

/// WebSocket actor for one device connection.
pub struct DeviceSocket {
    session: Arc<RelaySession>,
    state: AppState,

    /// Exclusively owned recognition wiring; taken exactly once at close.
    bridge: Option<RecognitionBridge>,

    /// Receiver for finalized utterances, consumed into the actor mailbox
    /// when the actor starts.
    finals: Option<mpsc::UnboundedReceiver<String>>,

    conn_state: ConnState,
    last_heartbeat: Instant,
}

impl DeviceSocket {
    fn new(
        session: Arc<RelaySession>,
        state: AppState,
        bridge: RecognitionBridge,
        finals: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            session,
            state,
            bridge: Some(bridge),
            finals: Some(finals),
            conn_state: ConnState::Connecting,
            last_heartbeat: Instant::now(),
        }
    }

    /// Demultiplex one inbound binary message.
    fn handle_frame(&mut self, data: &[u8]) {
        if self.conn_state != ConnState::Active {
            return;
        }

        match frame::classify(data) {
            Frame::Undersized { len } => {
                warn!(
                    session_id = %self.session.session_id,
                    device = %self.session.device_tag(),
                    len,
                    "Short binary frame, discarding"
                );
                self.session.record_dropped_frame();
                self.state.record_dropped_frame();
            }
            Frame::Audio {
                device_tag,
                payload,
            } => {
                match self.session.observe_device_tag(&device_tag) {
                    TagObservation::First => {
                        info!(
                            session_id = %self.session.session_id,
                            device = %device_tag,
                            "Connection identified by device address"
                        );
                    }
                    TagObservation::Changed { previous } => {
                        warn!(
                            session_id = %self.session.session_id,
                            previous = %previous,
                            device = %device_tag,
                            "Device address changed mid-session, using the new one"
                        );
                    }
                    TagObservation::Unchanged => {}
                }

                if payload.is_empty() {
                    return;
                }

                self.session.record_audio(payload.len());
                self.state.record_frame(payload.len());

                if let Some(bridge) = &self.bridge {
                    if let Err(err) = bridge.write_audio(payload) {
                        warn!(
                            session_id = %self.session.session_id,
                            error = %err,
                            "Dropping audio frame"
                        );
                    }
                }
            }
        }
    }

    /// Enter `Closing` and run the guaranteed teardown. Exactly once per
    /// connection: later calls find the state already advanced and the
    /// bridge already taken.
    fn begin_close(&mut self) {
        if matches!(self.conn_state, ConnState::Closing | ConnState::Closed) {
            return;
        }
        self.conn_state = ConnState::Closing;

        info!(
            session_id = %self.session.session_id,
            device = %self.session.device_tag(),
            "Cleaning up session resources"
        );

        let bridge = self.bridge.take();
        let session = self.session.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            if let Some(mut bridge) = bridge {
                // Unregister handlers, await engine stop, close the sink.
                bridge.shutdown().await;
            }

            state.registry.remove(&session.session_id);
            state.session_closed();

            info!(
                session_id = %session.session_id,
                device = %session.device_tag(),
                "Finished session cleanup"
            );
        });

        // The actor is done; cleanup completes on its own task.
        self.conn_state = ConnState::Closed;
    }
}

impl Actor for DeviceSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.conn_state = ConnState::Active;
        self.state.session_opened();

        info!(
            session_id = %self.session.session_id,
            "Device connection active"
        );

        // Engine events become a second input stream of this actor, so
        // finalized utterances are processed on the same event loop as the
        // frames, in mailbox order.
        if let Some(finals) = self.finals.take() {
            ctx.add_stream(UnboundedReceiverStream::new(finals).map(|text| FinalTranscript { text }));
        }

        // Protocol-level heartbeat. Outbound application messages must stay
        // plain text, so liveness uses WebSocket ping frames.
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    session_id = %act.session.session_id,
                    device = %act.session.device_tag(),
                    "Device heartbeat timeout, closing connection"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Runs once no matter how the connection ended: graceful close,
        // protocol error, or a failure mid-frame.
        self.begin_close();
    }
}

/// Inbound device traffic.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DeviceSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_frame(&data);
            }
            Ok(ws::Message::Text(text)) => {
                warn!(
                    session_id = %self.session.session_id,
                    device = %self.session.device_tag(),
                    message = %text,
                    "Rejected non-binary device message"
                );
                self.state.record_non_binary();
            }
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    session_id = %self.session.session_id,
                    device = %self.session.device_tag(),
                    reason = ?reason,
                    "Device closed the connection"
                );
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(
                    session_id = %self.session.session_id,
                    "Unexpected continuation frame"
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(
                    session_id = %self.session.session_id,
                    device = %self.session.device_tag(),
                    error = %err,
                    "WebSocket protocol error"
                );
                ctx.stop();
            }
        }
    }
}

/// Finalized utterances from the recognition engine.
impl StreamHandler<FinalTranscript> for DeviceSocket {
    fn handle(&mut self, msg: FinalTranscript, ctx: &mut Self::Context) {
        if self.conn_state != ConnState::Active {
            return;
        }

        self.session.record_utterance();
        self.state.record_utterance();

        let pipeline = self.state.pipeline.clone();
        let session = self.session.clone();
        let state = self.state.clone();
        let device_tag = self.session.device_tag();
        let addr = ctx.address();

        // Translation and archival run off-loop; the reply is scheduled
        // back onto the actor as soon as it is decided, independent of how
        // the archival call goes.
        tokio::spawn(async move {
            let utterance = pipeline.evaluate(&msg.text, &device_tag).await;

            if let Some(reply) = utterance.reply {
                addr.do_send(DeliverText(reply));
            }

            if let Some(note) = utterance.note {
                let ok = pipeline.archive(&note, &device_tag).await;
                session.set_last_result(ok);
                state.record_archival(ok);
                if !ok {
                    warn!(
                        session_id = %session.session_id,
                        device = %device_tag,
                        "Note archival failed after recognition"
                    );
                }
            }
        });
    }
}

impl Handler<DeliverText> for DeviceSocket {
    type Result = ();

    fn handle(&mut self, msg: DeliverText, ctx: &mut Self::Context) {
        if self.conn_state != ConnState::Active {
            debug!(
                session_id = %self.session.session_id,
                "Dropping delivery, connection no longer active"
            );
            return;
        }

        info!(
            session_id = %self.session.session_id,
            device = %self.session.device_tag(),
            text = %msg.0,
            "Sending text to device"
        );
        ctx.text(msg.0);
    }
}

/// WebSocket endpoint handler.
///
/// Runs the `Connecting` phase before the actor exists: validate the
/// upgrade, register the session, start the recognition engine (awaited).
/// Only then is the connection switched to streaming, so the loop never
/// consumes a frame the engine is not ready for.
pub async fn device_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let peer = req
        .connection_info()
        .peer_addr()
        .unwrap_or("unknown")
        .to_string();
    info!(peer = %peer, "Device connection request");

    // Fail bad upgrades before an engine is started for them.
    let mut response = ws::handshake(&req)?;

    let state = state.get_ref().clone();
    let session = state.registry.register();
    let language = state.get_config().speech.language;
    let (finals_tx, finals_rx) = mpsc::unbounded_channel();

    let bridge = match RecognitionBridge::start(
        state.engine.as_ref(),
        &language,
        session.clone(),
        finals_tx,
    )
    .await
    {
        Ok(bridge) => bridge,
        Err(err) => {
            error!(
                session_id = %session.session_id,
                error = %err,
                "Failed to start recognition, aborting connection"
            );
            state.registry.remove(&session.session_id);
            return Err(err.into());
        }
    };

    info!(
        session_id = %session.session_id,
        language = %language,
        "Recognition started, upgrading connection"
    );

    let socket = DeviceSocket::new(session, state, bridge, finals_rx);
    Ok(response.streaming(ws::WebsocketContext::create(socket, stream)))
}
