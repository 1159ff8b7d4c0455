//! # Recognition Bridge
//!
//! Per-session glue between the connection handler and one recognition
//! engine instance. The bridge exclusively owns the session's audio sink
//! and engine handle, wires the engine's five event callbacks, and marshals
//! finalized utterances from the engine's execution context into the
//! connection's event loop through an unbounded channel.
//!
//! ## Teardown ordering:
//! `shutdown` releases every handler subscription first (no further events
//! can reach session-scoped state), then awaits the engine's stop, then
//! closes the audio sink. The order matters: a late event must never find
//! a closed sink or a half-dead session. `shutdown` is idempotent so the
//! connection handler can run its `Closing` state from any exit path
//! without double-stopping the engine.

use crate::audio::session::RelaySession;
use crate::audio::sink::{audio_channel, AudioSink};
use crate::error::AppResult;
use crate::speech::engine::{EngineHandle, EventKind, RecognitionEngine};
use crate::speech::{CancelCode, CancelReason, RecognitionEvent, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

struct BridgeInner {
    handle: Box<dyn EngineHandle>,
    subscriptions: Vec<Subscription>,
    sink: AudioSink,
}

/// One session's recognition wiring. Created during `Connecting`, shut
/// down exactly once during `Closing`.
pub struct RecognitionBridge {
    inner: Option<BridgeInner>,
}

impl RecognitionBridge {
    /// Create the audio sink/stream pair, start the engine over the stream
    /// and register the session's event handlers.
    ///
    /// Resolves only once the engine is ready to consume audio, so the
    /// caller may begin feeding frames immediately after. Finalized
    /// utterance texts are sent into `finals_tx`; everything else is
    /// logged from the handlers themselves.
    pub async fn start(
        engine: &dyn RecognitionEngine,
        language: &str,
        session: Arc<RelaySession>,
        finals_tx: mpsc::UnboundedSender<String>,
    ) -> AppResult<Self> {
        let (sink, stream) = audio_channel();
        let handle = engine.start(stream, language).await?;
        let events = handle.events().clone();
        let mut subscriptions = Vec::with_capacity(5);

        // Partial hypotheses are not delivered to clients or archived.
        subscriptions.push(events.connect(EventKind::Recognizing, Box::new(|_| {})));

        {
            let tx = finals_tx;
            let session = session.clone();
            subscriptions.push(events.connect(
                EventKind::Recognized,
                Box::new(move |event| {
                    if let RecognitionEvent::Recognized { text } = event {
                        // Hand-off to the connection's scheduler. The send
                        // never blocks; if the actor is already gone the
                        // text is dropped with the channel.
                        if tx.send(text.clone()).is_err() {
                            warn!(
                                session_id = %session.session_id,
                                device = %session.device_tag(),
                                "Final transcript arrived after the connection went away"
                            );
                        }
                    }
                }),
            ));
        }

        {
            let session = session.clone();
            subscriptions.push(events.connect(
                EventKind::Canceled,
                Box::new(move |event| {
                    if let RecognitionEvent::Canceled {
                        reason,
                        code,
                        details,
                    } = event
                    {
                        error!(
                            session_id = %session.session_id,
                            device = %session.device_tag(),
                            reason = ?reason,
                            code = %code,
                            details = %details,
                            "Recognition canceled"
                        );
                        if *reason == CancelReason::Error {
                            match code {
                                CancelCode::ConnectionFailure => error!(
                                    session_id = %session.session_id,
                                    "Engine connection failure; session continues until the socket closes"
                                ),
                                CancelCode::AuthenticationFailure => error!(
                                    session_id = %session.session_id,
                                    "Engine authentication failure; check the speech key and region"
                                ),
                                other => error!(
                                    session_id = %session.session_id,
                                    code = %other,
                                    "Unhandled engine error code"
                                ),
                            }
                        }
                    }
                }),
            ));
        }

        {
            let session = session.clone();
            subscriptions.push(events.connect(
                EventKind::SessionStarted,
                Box::new(move |event| {
                    if let RecognitionEvent::SessionStarted { service_session } = event {
                        info!(
                            session_id = %session.session_id,
                            device = %session.device_tag(),
                            service_session = %service_session,
                            "Engine session started"
                        );
                    }
                }),
            ));
        }

        {
            let session = session;
            subscriptions.push(events.connect(
                EventKind::SessionStopped,
                Box::new(move |event| {
                    if let RecognitionEvent::SessionStopped { service_session } = event {
                        info!(
                            session_id = %session.session_id,
                            device = %session.device_tag(),
                            service_session = %service_session,
                            "Engine session stopped"
                        );
                    }
                }),
            ));
        }

        Ok(Self {
            inner: Some(BridgeInner {
                handle,
                subscriptions,
                sink,
            }),
        })
    }

    /// Append one frame's audio payload to the session's sink.
    pub fn write_audio(&self, payload: Vec<u8>) -> Result<(), String> {
        match &self.inner {
            Some(inner) => inner.sink.write(payload),
            None => Err("recognition bridge is shut down".to_string()),
        }
    }

    /// Tear down: unregister all handlers, await engine stop, close sink.
    /// Safe to call more than once; only the first call does anything.
    pub async fn shutdown(&mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };

        // 1. Release every callback capability. After this, no event can
        //    reach session-scoped state.
        inner.subscriptions.clear();

        // 2. Await the engine's own stop contract. No application timeout
        //    is imposed here; shutdown latency is bounded by the engine.
        if let Err(err) = inner.handle.stop().await {
            warn!(error = %err, "Engine stop reported an error during teardown");
        }

        // 3. Only now is the sink closed.
        inner.sink.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::SessionRegistry;
    use crate::audio::sink::AudioStream;
    use crate::speech::engine::HandlerRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockHandle {
        events: Arc<HandlerRegistry>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EngineHandle for MockHandle {
        fn events(&self) -> &Arc<HandlerRegistry> {
            &self.events
        }

        async fn stop(&mut self) -> AppResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Engine double that parks the audio stream and exposes its event
    /// registry so tests can fire events "from the engine context".
    struct MockEngine {
        stops: Arc<AtomicUsize>,
        events: Arc<HandlerRegistry>,
        stream: Arc<Mutex<Option<AudioStream>>>,
    }

    impl MockEngine {
        fn new() -> Self {
            Self {
                stops: Arc::new(AtomicUsize::new(0)),
                events: Arc::new(HandlerRegistry::new()),
                stream: Arc::new(Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl RecognitionEngine for MockEngine {
        async fn start(
            &self,
            audio: AudioStream,
            _language: &str,
        ) -> AppResult<Box<dyn EngineHandle>> {
            *self.stream.lock().unwrap() = Some(audio);
            Ok(Box::new(MockHandle {
                events: self.events.clone(),
                stops: self.stops.clone(),
            }))
        }
    }

    fn test_session() -> Arc<RelaySession> {
        SessionRegistry::new().register()
    }

    #[tokio::test]
    async fn final_results_cross_into_the_channel() {
        let engine = MockEngine::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _bridge = RecognitionBridge::start(&engine, "id-ID", test_session(), tx)
            .await
            .unwrap();

        engine.events.dispatch(&RecognitionEvent::Recognized {
            text: "halo dunia".to_string(),
        });
        engine.events.dispatch(&RecognitionEvent::Recognizing {
            text: "partial is ignored".to_string(),
        });

        assert_eq!(rx.recv().await.unwrap(), "halo dunia");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn audio_flows_through_the_bridge_sink() {
        let engine = MockEngine::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let bridge = RecognitionBridge::start(&engine, "id-ID", test_session(), tx)
            .await
            .unwrap();

        bridge.write_audio(vec![1, 2, 3, 4]).unwrap();

        let mut stream = engine.stream.lock().unwrap().take().unwrap();
        assert_eq!(stream.next_chunk().await, Some(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn shutdown_unregisters_then_stops_then_closes() {
        let engine = MockEngine::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = RecognitionBridge::start(&engine, "id-ID", test_session(), tx)
            .await
            .unwrap();

        assert_eq!(engine.events.handler_count(), 5);

        bridge.shutdown().await;

        // All capabilities released: a late event reaches no handler and
        // therefore never schedules a delivery against the closed sink.
        assert_eq!(engine.events.handler_count(), 0);
        engine.events.dispatch(&RecognitionEvent::Recognized {
            text: "too late".to_string(),
        });
        assert!(rx.recv().await.is_none());

        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
        assert!(bridge.is_shut_down());
        assert!(bridge.write_audio(vec![9]).is_err());

        // The engine sees end-of-audio after stop completed.
        let mut stream = engine.stream.lock().unwrap().take().unwrap();
        assert_eq!(stream.next_chunk().await, None);
    }

    #[tokio::test]
    async fn shutdown_twice_is_a_single_teardown() {
        let engine = MockEngine::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bridge = RecognitionBridge::start(&engine, "id-ID", test_session(), tx)
            .await
            .unwrap();

        bridge.shutdown().await;
        bridge.shutdown().await;

        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
    }
}
