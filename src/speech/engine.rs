//! # Recognition Engine Seam
//!
//! The trait boundary between a session and whatever speech service backs
//! it, plus the event-handler registry the engine dispatches through.
//!
//! ## Callback capabilities:
//! Registering a handler returns a `Subscription`. Releasing (or dropping)
//! it removes the handler and *guarantees no further invocation*: dispatch
//! holds the registry's read lock while it runs handlers, and removal takes
//! the write lock, so `release()` returning means any in-flight dispatch
//! has finished and no later dispatch can see the handler. Teardown releases
//! every subscription before stopping the engine for exactly this reason.

use crate::audio::sink::AudioStream;
use crate::error::AppResult;
use crate::speech::RecognitionEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Handler invoked on the engine's own execution context. Must not block.
pub type EventHandler = Box<dyn Fn(&RecognitionEvent) + Send + Sync>;

/// Which engine event a handler is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Recognizing,
    Recognized,
    Canceled,
    SessionStarted,
    SessionStopped,
}

impl EventKind {
    fn of(event: &RecognitionEvent) -> EventKind {
        match event {
            RecognitionEvent::Recognizing { .. } => EventKind::Recognizing,
            RecognitionEvent::Recognized { .. } => EventKind::Recognized,
            RecognitionEvent::Canceled { .. } => EventKind::Canceled,
            RecognitionEvent::SessionStarted { .. } => EventKind::SessionStarted,
            RecognitionEvent::SessionStopped { .. } => EventKind::SessionStopped,
        }
    }
}

/// A streaming speech-recognition engine.
///
/// `start` is awaited to completion before the connection loop consumes
/// any frames, so audio written to the returned session's sink is never
/// dropped while the engine warms up.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Begin continuous recognition over `audio` in `language`.
    async fn start(&self, audio: AudioStream, language: &str) -> AppResult<Box<dyn EngineHandle>>;
}

/// One running engine instance, exclusively owned by its session.
#[async_trait]
pub trait EngineHandle: Send {
    /// The registry this instance dispatches events through.
    fn events(&self) -> &Arc<HandlerRegistry>;

    /// Stop recognition. Resolves once the engine has fully stopped; the
    /// caller closes the audio sink only after this returns.
    async fn stop(&mut self) -> AppResult<()>;
}

/// Event-handler registry shared between an engine instance and the
/// session's bridge.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<u64, (EventKind, EventHandler)>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for events of `kind`, returning the capability
    /// that keeps it registered.
    pub fn connect(self: &Arc<Self>, kind: EventKind, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().unwrap().insert(id, (kind, handler));
        Subscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    /// Invoke every handler registered for this event's kind. Called from
    /// the engine's execution context only.
    pub fn dispatch(&self, event: &RecognitionEvent) {
        let kind = EventKind::of(event);
        let handlers = self.handlers.read().unwrap();
        for (registered_kind, handler) in handlers.values() {
            if *registered_kind == kind {
                handler(event);
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    fn disconnect(&self, id: u64) {
        self.handlers.write().unwrap().remove(&id);
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability returned by `HandlerRegistry::connect`.
///
/// Once released, the handler can never run again (see module docs for the
/// locking argument). Dropping releases implicitly.
pub struct Subscription {
    registry: Weak<HandlerRegistry>,
    id: u64,
}

impl Subscription {
    /// Explicitly release the handler registration.
    pub fn release(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.disconnect(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(count: Arc<AtomicUsize>) -> EventHandler {
        Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_only_matching_kind() {
        let registry = Arc::new(HandlerRegistry::new());
        let finals = Arc::new(AtomicUsize::new(0));
        let partials = Arc::new(AtomicUsize::new(0));

        let _final_sub = registry.connect(EventKind::Recognized, counting_handler(finals.clone()));
        let _partial_sub =
            registry.connect(EventKind::Recognizing, counting_handler(partials.clone()));

        registry.dispatch(&RecognitionEvent::Recognized {
            text: "halo".to_string(),
        });

        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert_eq!(partials.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn released_handler_never_fires_again() {
        let registry = Arc::new(HandlerRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));

        let sub = registry.connect(EventKind::Recognized, counting_handler(count.clone()));
        registry.dispatch(&RecognitionEvent::Recognized {
            text: "one".to_string(),
        });
        sub.release();
        registry.dispatch(&RecognitionEvent::Recognized {
            text: "two".to_string(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count(), 0);
    }

    #[test]
    fn dropping_the_subscription_disconnects() {
        let registry = Arc::new(HandlerRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));

        {
            let _sub = registry.connect(EventKind::Canceled, counting_handler(count.clone()));
            assert_eq!(registry.handler_count(), 1);
        }

        assert_eq!(registry.handler_count(), 0);
    }
}
