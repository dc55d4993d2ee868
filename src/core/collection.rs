// src/core/collection.rs

//! The collector: the single coupling point between connection handlers and the
//! worker pool.

use crate::connection::ConnectionIdentity;
use crate::core::EventGateError;
use crate::core::pipeline::QueueSender;
use crate::core::protocol::{Event, SendEventRequest};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// A decoded batch on its way to the broker.
#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub identity: ConnectionIdentity,
    pub request: SendEventRequest,
    /// When the handler finished decoding the batch.
    pub time_consumed: Instant,
    /// When the batch was handed to the pipeline queue.
    pub time_pushed: Instant,
}

impl CollectRequest {
    pub fn new(identity: ConnectionIdentity, request: SendEventRequest, time_consumed: Instant) -> Self {
        Self {
            identity,
            request,
            time_consumed,
            time_pushed: time_consumed,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.request.events
    }

    pub fn req_guid(&self) -> &str {
        &self.request.req_guid
    }

    /// The client's send time, if it sent a valid one.
    pub fn sent_time(&self) -> Option<SystemTime> {
        let ts = self.request.sent_time?;
        let secs = u64::try_from(ts.seconds).ok()?;
        let nanos = u32::try_from(ts.nanos).ok()?;
        UNIX_EPOCH.checked_add(Duration::new(secs, nanos))
    }
}

/// Hands batches to the pipeline queue.
///
/// With no wait timeout configured a full queue blocks the caller until a worker
/// frees a slot, throttling that one connection. With a timeout the caller gets
/// `CollectTimeout` once it elapses. Either way nothing is dropped silently: every
/// batch is either queued or reported back as an error.
#[derive(Clone, Debug)]
pub struct Collector {
    queue: QueueSender,
    wait_timeout: Option<Duration>,
}

impl Collector {
    pub fn new(queue: QueueSender, wait_timeout: Option<Duration>) -> Self {
        Self {
            queue,
            wait_timeout: wait_timeout.filter(|d| !d.is_zero()),
        }
    }

    /// Stamps `time_pushed` and enqueues the batch.
    ///
    /// Returns `Cancelled` if `ctx` is cancelled while waiting for space.
    pub async fn collect(
        &self,
        ctx: &CancellationToken,
        mut request: CollectRequest,
    ) -> Result<(), EventGateError> {
        request.time_pushed = Instant::now();
        let push = self.queue.push(request);
        let bounded = async {
            match self.wait_timeout {
                Some(limit) => tokio::time::timeout(limit, push)
                    .await
                    .map_err(|_| EventGateError::CollectTimeout)?,
                None => push.await,
            }
        };
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(EventGateError::Cancelled),
            result = bounded => result,
        }
    }

    pub fn queue(&self) -> &QueueSender {
        &self.queue
    }
}
