//! Bounded queue between event producers and the stream drain loop.
//!
//! Producers suspend while the relay is full, so memory stays bounded
//! however far the worker runs ahead of the client.

use std::fmt;
use std::time::Duration;

use relayrun_core::{SseData, ERROR_SENTINEL};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// One relay entry.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event(SseData),
    /// A producer failed abruptly; draining must stop.
    Error,
}

impl fmt::Display for RelayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(event) => write!(f, "event({})", event.stream_id),
            Self::Error => f.write_str(ERROR_SENTINEL),
        }
    }
}

/// The receiving side is gone.
#[derive(Debug, Error)]
#[error("Event relay closed")]
pub struct RelayClosed;

/// Result of one bounded wait on the relay.
#[derive(Debug)]
pub enum Pop {
    Message(RelayMessage),
    /// Nothing arrived within the wait.
    TimedOut,
    /// Empty, and every producer is gone.
    Closed,
}

/// Constructor for a relay pair.
pub struct EventRelay;

impl EventRelay {
    /// Create a relay holding at most `capacity` entries (at least one).
    pub fn bounded(capacity: usize) -> (RelaySender, RelayReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (RelaySender { tx }, RelayReceiver { rx })
    }
}

/// Producer handle. Cloned into every producer of a run.
#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<RelayMessage>,
}

impl RelaySender {
    /// Enqueue an event, waiting for space if the relay is full.
    pub async fn push(&self, event: SseData) -> Result<(), RelayClosed> {
        self.tx
            .send(RelayMessage::Event(event))
            .await
            .map_err(|_| RelayClosed)
    }

    /// Enqueue the failure sentinel.
    pub async fn fail(&self) -> Result<(), RelayClosed> {
        self.tx
            .send(RelayMessage::Error)
            .await
            .map_err(|_| RelayClosed)
    }

    /// Entries currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer handle, owned by the drain loop of one run.
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<RelayMessage>,
}

impl RelayReceiver {
    /// Wait at most `timeout` for the next entry.
    pub async fn pop_timeout(&mut self, timeout: Duration) -> Pop {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Pop::Message(message),
            Ok(None) => Pop::Closed,
            Err(_) => Pop::TimedOut,
        }
    }

    /// Take the next entry if one is buffered.
    pub fn try_pop(&mut self) -> Option<RelayMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayrun_core::TaskId;

    fn event(n: usize) -> SseData {
        SseData::progress(&TaskId::new("t1"), n.to_string())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = EventRelay::bounded(10);
        for n in 0..3 {
            tx.push(event(n)).await.unwrap();
        }
        for n in 0..3 {
            match rx.pop_timeout(Duration::from_millis(10)).await {
                Pop::Message(RelayMessage::Event(e)) => assert_eq!(e.content, n.to_string()),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_push_beyond_capacity_suspends_until_pop() {
        let (tx, mut rx) = EventRelay::bounded(100);
        for n in 0..100 {
            tx.push(event(n)).await.unwrap();
        }
        assert_eq!(rx.len(), 100);

        let producer = tx.clone();
        let blocked = tokio::spawn(async move { producer.push(event(100)).await });
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());
        assert_eq!(rx.len(), 100);

        assert!(matches!(rx.try_pop(), Some(RelayMessage::Event(_))));
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(rx.len(), 100);
        assert_eq!(rx.capacity(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout_and_close() {
        let (tx, mut rx) = EventRelay::bounded(4);
        assert!(matches!(
            rx.pop_timeout(Duration::from_millis(500)).await,
            Pop::TimedOut
        ));

        tx.fail().await.unwrap();
        drop(tx);
        assert!(matches!(
            rx.pop_timeout(Duration::from_millis(500)).await,
            Pop::Message(RelayMessage::Error)
        ));
        assert!(matches!(
            rx.pop_timeout(Duration::from_millis(500)).await,
            Pop::Closed
        ));
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (tx, rx) = EventRelay::bounded(1);
        drop(rx);
        assert!(tx.push(event(0)).await.is_err());
    }

    #[test]
    fn test_sentinel_display() {
        assert_eq!(RelayMessage::Error.to_string(), "error");
    }
}
