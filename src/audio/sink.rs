//! # Session Audio Sink
//!
//! The append-only byte stream that feeds a session's recognition engine.
//! `audio_channel()` returns the two ends: the `AudioSink` stays with the
//! connection handler (fed by inbound frames), the `AudioStream` is handed
//! to the engine at start and consumed on the engine's own task.
//!
//! ## Ownership rules:
//! - Exactly one sink and one stream per session, created together.
//! - The sink is closed exactly once, at teardown, after the engine has
//!   stopped; `close()` is idempotent so teardown can be retried safely.
//! - Writes after close are rejected with an error, never a panic; a late
//!   frame must not take the connection down.

use tokio::sync::mpsc;

/// Create a connected sink/stream pair for one session.
pub fn audio_channel() -> (AudioSink, AudioStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AudioSink { tx: Some(tx) }, AudioStream { rx })
}

/// Write end: ordered, append-only, owned by the connection handler.
pub struct AudioSink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl AudioSink {
    /// Append one chunk of raw audio.
    ///
    /// Fails if the sink was closed or the engine dropped its stream; the
    /// caller logs and drops the chunk.
    pub fn write(&self, data: Vec<u8>) -> Result<(), String> {
        match &self.tx {
            Some(tx) => tx
                .send(data)
                .map_err(|_| "audio stream receiver is gone".to_string()),
            None => Err("audio sink is closed".to_string()),
        }
    }

    /// Close the sink. Idempotent; the stream sees end-of-audio once all
    /// buffered chunks are drained.
    pub fn close(&mut self) {
        self.tx.take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Read end: consumed by the recognition engine on its own task.
pub struct AudioStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl AudioStream {
    /// Next chunk of audio, in write order. `None` means the sink closed
    /// and everything buffered has been delivered.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_arrive_in_write_order() {
        let (sink, mut stream) = audio_channel();

        sink.write(vec![1, 2]).unwrap();
        sink.write(vec![3]).unwrap();

        assert_eq!(stream.next_chunk().await, Some(vec![1, 2]));
        assert_eq!(stream.next_chunk().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_late_writes() {
        let (mut sink, mut stream) = audio_channel();

        sink.write(vec![9]).unwrap();
        sink.close();
        sink.close(); // second close is a no-op

        assert!(sink.is_closed());
        assert!(sink.write(vec![7]).is_err());

        // Buffered audio still drains, then the stream ends.
        assert_eq!(stream.next_chunk().await, Some(vec![9]));
        assert_eq!(stream.next_chunk().await, None);
    }

    #[tokio::test]
    async fn write_fails_when_engine_drops_the_stream() {
        let (sink, stream) = audio_channel();
        drop(stream);

        assert!(sink.write(vec![1]).is_err());
    }
}
