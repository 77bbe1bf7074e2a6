//! Change streams for blob store backends.
//!
//! Every physical operation a backend performs (store, erase, flush) is
//! published as a [`BlobEvent`]. Tests use this to observe exactly what
//! reached the medium; applications can use it to mirror settings
//! elsewhere.

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::Stream;

/// Type of physical operation that reached a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobEventKind {
    /// A blob was written under the key.
    Stored,
    /// The key was erased (it may not have existed).
    Erased,
    /// Pending writes were made durable. The event key is the namespace.
    Flushed,
}

/// A physical operation performed by a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEvent {
    /// The key operated on, or the namespace for flushes.
    pub key: String,
    /// What happened.
    pub kind: BlobEventKind,
    /// Bytes written (stores only).
    pub value: Option<Vec<u8>>,
}

impl BlobEvent {
    /// Create a new Stored event.
    pub fn stored(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            kind: BlobEventKind::Stored,
            value: Some(value),
        }
    }

    /// Create a new Erased event.
    pub fn erased(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: BlobEventKind::Erased,
            value: None,
        }
    }

    /// Create a new Flushed event for a namespace.
    pub fn flushed(namespace: impl Into<String>) -> Self {
        Self {
            key: namespace.into(),
            kind: BlobEventKind::Flushed,
            value: None,
        }
    }
}

/// A stream of blob events for a specific key pattern.
pub struct WatchStream {
    receiver: broadcast::Receiver<BlobEvent>,
    pattern: String,
}

impl WatchStream {
    /// Create a new watch stream for the given pattern.
    pub fn new(receiver: broadcast::Receiver<BlobEvent>, pattern: impl Into<String>) -> Self {
        Self {
            receiver,
            pattern: pattern.into(),
        }
    }

    /// Get the pattern this stream is watching.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Return the next already-published matching event without waiting.
    pub fn try_next(&mut self) -> Option<BlobEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event.key) => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Check if a key matches this stream's pattern.
    ///
    /// A pattern ending in `*` matches by prefix, so `*` alone matches
    /// everything.
    fn matches(&self, key: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == self.pattern,
        }
    }
}

impl Stream for WatchStream {
    type Item = BlobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event.key) {
                        return Poll::Ready(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Poll::Ready(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    continue;
                }
            }
        }
    }
}

/// Handle for publishing blob events to subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<BlobEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: BlobEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self, pattern: impl Into<String>) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), pattern)
    }

    /// Get the number of current subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn test_event_kind_serialize() {
        let json = serde_json::to_string(&BlobEventKind::Stored).unwrap();
        assert_eq!(json, "\"Stored\"");
    }

    #[test]
    fn test_blob_event_constructors() {
        let event = BlobEvent::stored("volume", vec![1, 2]);
        assert_eq!(event.kind, BlobEventKind::Stored);
        assert_eq!(event.value, Some(vec![1, 2]));

        let event = BlobEvent::erased("volume");
        assert_eq!(event.kind, BlobEventKind::Erased);
        assert!(event.value.is_none());

        let event = BlobEvent::flushed("storage");
        assert_eq!(event.key, "storage");
        assert_eq!(event.kind, BlobEventKind::Flushed);
    }

    #[test]
    fn test_pattern_matching() {
        let sender = WatchSender::new(16);
        let stream = sender.subscribe("led_*");

        assert!(stream.matches("led_r"));
        assert!(stream.matches("led_brightness"));
        assert!(!stream.matches("volume"));

        let all = sender.subscribe("*");
        assert!(all.matches("anything"));
    }

    #[test]
    fn test_exact_pattern() {
        let sender = WatchSender::new(16);
        let stream = sender.subscribe("volume");

        assert!(stream.matches("volume"));
        assert!(!stream.matches("volume2"));
    }

    #[test]
    fn test_try_next_filters() {
        let sender = WatchSender::new(16);
        let mut stream = sender.subscribe("volume");

        sender.send(BlobEvent::stored("other", vec![0]));
        sender.send(BlobEvent::stored("volume", vec![7]));

        let event = stream.try_next().unwrap();
        assert_eq!(event.key, "volume");
        assert_eq!(event.value, Some(vec![7]));
        assert!(stream.try_next().is_none());
    }

    #[tokio::test]
    async fn test_stream_yields_events() {
        let sender = WatchSender::new(16);
        let mut stream = sender.subscribe("*");
        assert_eq!(sender.receiver_count(), 1);

        sender.send(BlobEvent::erased("volume"));
        let event = stream.next().await.unwrap();
        assert_eq!(event, BlobEvent::erased("volume"));
    }
}
