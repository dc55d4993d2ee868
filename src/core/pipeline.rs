// src/core/pipeline.rs

//! The bounded hand-off queue between connection handlers and publishing workers.
//!
//! Many handlers push, many workers pop. Capacity is the system's backpressure
//! control: a push on a full queue waits for space, it never evicts or drops.
//! Order is FIFO per producer; batches from different connections interleave.

use crate::core::EventGateError;
use crate::core::collection::CollectRequest;
use crate::core::metrics;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Creates a queue holding at most `capacity` batches.
pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
            closed: CancellationToken::new(),
        },
    )
}

/// The producer side, cloned into every collector.
#[derive(Clone, Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<CollectRequest>,
}

impl QueueSender {
    /// Enqueues a batch, waiting while the queue is full.
    /// Fails only once the queue has been closed.
    pub async fn push(&self, request: CollectRequest) -> Result<(), EventGateError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EventGateError::QueueClosed)?;
        metrics::PIPELINE_QUEUE_DEPTH.set(self.len() as f64);
        Ok(())
    }

    /// Number of batches currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The consumer side, shared by every worker.
#[derive(Clone, Debug)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<CollectRequest>>>,
    closed: CancellationToken,
}

impl QueueReceiver {
    /// Waits for the next batch. After [`QueueReceiver::close`], returns the batches
    /// still buffered and then `None`.
    pub async fn pop(&self) -> Option<CollectRequest> {
        let mut rx = self.rx.lock().await;
        let next = tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                rx.close();
                rx.recv().await
            }
            next = rx.recv() => next,
        };
        metrics::PIPELINE_QUEUE_DEPTH.set(rx.len() as f64);
        next
    }

    /// Stops accepting new batches. Producers blocked on a full queue fail with
    /// `QueueClosed`; batches already queued remain available to [`QueueReceiver::pop`].
    pub fn close(&self) {
        self.closed.cancel();
        // A worker parked in `pop` closes the channel itself once it sees the token.
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
