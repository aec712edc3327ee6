use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::error::{StoreError, StoreResult};

use super::subscription::Subscription;
use super::{CollectionHandler, CollectionSnapshot, HandlerResult};

/// A pull-based stream of collection snapshots.
///
/// Backed by a bounded channel: when the consumer falls behind, new snapshots
/// are dropped and counted rather than blocking the writer. The first
/// snapshot in the stream is the collection's contents at subscription time.
///
/// Dropping the stream unsubscribes.
#[derive(Debug)]
pub struct ChangeStream {
    subscription: Option<Subscription>,
    rx: Receiver<CollectionSnapshot>,
    dropped: Arc<AtomicU64>,
}

/// Sending half handed to the bus as a collection handler.
pub(crate) struct StreamSink {
    tx: Sender<CollectionSnapshot>,
    dropped: Arc<AtomicU64>,
}

impl StreamSink {
    pub(crate) fn into_handler(self) -> CollectionHandler {
        Arc::new(move |snapshot: &CollectionSnapshot| -> HandlerResult {
            match self.tx.try_send(snapshot.clone()) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(())
        })
    }
}

impl ChangeStream {
    /// Create the receiving half and the sink to register with the bus.
    pub(crate) fn channel(capacity: usize) -> (Self, StreamSink) {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let stream = Self {
            subscription: None,
            rx,
            dropped: Arc::clone(&dropped),
        };
        (stream, StreamSink { tx, dropped })
    }

    pub(crate) fn attach(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    /// The subscription backing this stream.
    #[must_use]
    pub const fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Snapshots dropped because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop receiving new snapshots. Already buffered ones can still be read.
    pub fn unsubscribe(&self) {
        if let Some(sub) = &self.subscription {
            sub.unsubscribe();
        }
    }

    /// Receive the next snapshot (blocking).
    pub fn recv(&self) -> StoreResult<CollectionSnapshot> {
        self.rx.recv().map_err(|_| StoreError::Disconnected {
            path: "change_stream".to_string(),
        })
    }

    /// Receive the next snapshot with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> StoreResult<CollectionSnapshot> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StoreError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => StoreError::Disconnected {
                path: "change_stream".to_string(),
            },
        })
    }

    /// Receive a buffered snapshot without blocking.
    pub fn try_recv(&self) -> StoreResult<Option<CollectionSnapshot>> {
        match self.rx.try_recv() {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StoreError::Disconnected {
                path: "change_stream".to_string(),
            }),
        }
    }

    /// Drain every buffered snapshot.
    pub fn drain(&self) -> Vec<CollectionSnapshot> {
        self.rx.try_iter().collect()
    }
}
