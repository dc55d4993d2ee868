// src/connection/conn.rs

//! Defines `Connection`, the shared write side of one duplex socket, and
//! `FrameReader`, the read side owned by the connection's handler task.

use super::identity::ConnectionIdentity;
use crate::core::EventGateError;
use axum::extract::ws::{CloseFrame, Message as Frame};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// The outbound half of a duplex socket.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = axum::Error> + Send>>;

/// One live duplex connection.
///
/// Two call sites write to a connection: its handler (responses) and the prober
/// (pings). Every write goes through the same mutex, so at most one writer touches
/// the socket at a time. Reads never happen here; see [`FrameReader`].
pub struct Connection {
    identity: ConnectionIdentity,
    sink: Mutex<FrameSink>,
    write_wait: Duration,
    shutdown: CancellationToken,
    close_sent: AtomicBool,
    created: Instant,
}

impl Connection {
    /// Wraps the outbound half of a socket. `write_wait` bounds every write.
    pub fn new<S>(identity: ConnectionIdentity, sink: S, write_wait: Duration) -> Self
    where
        S: Sink<Frame, Error = axum::Error> + Send + 'static,
    {
        Self::with_shutdown(identity, sink, write_wait, CancellationToken::new())
    }

    /// Like [`Connection::new`], with a shutdown token that may be cancelled from
    /// outside (typically a child of the server-wide token).
    pub fn with_shutdown<S>(
        identity: ConnectionIdentity,
        sink: S,
        write_wait: Duration,
        shutdown: CancellationToken,
    ) -> Self
    where
        S: Sink<Frame, Error = axum::Error> + Send + 'static,
    {
        Self {
            identity,
            sink: Mutex::new(Box::pin(sink)),
            write_wait,
            shutdown,
            close_sent: AtomicBool::new(false),
            created: Instant::now(),
        }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Writes one frame under the write mutex and the write deadline.
    pub async fn write_message(&self, frame: Frame) -> Result<(), EventGateError> {
        let mut sink = self.sink.lock().await;
        match timeout(self.write_wait, sink.send(frame)).await {
            Ok(result) => result.map_err(EventGateError::from),
            Err(_) => Err(EventGateError::WriteTimeout),
        }
    }

    /// Sends a liveness ping.
    pub async fn ping(&self) -> Result<(), EventGateError> {
        self.write_message(Frame::Ping(Bytes::new())).await
    }

    /// Sends a close frame, closes the socket and wakes the handler if it is blocked.
    /// Safe to call more than once.
    pub async fn close(&self, close_frame: Option<CloseFrame>) {
        self.shutdown.cancel();
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Some(frame) = close_frame {
            let _ = timeout(self.write_wait, sink.send(Frame::Close(Some(frame)))).await;
        }
        if let Err(e) = timeout(self.write_wait, sink.close()).await {
            debug!("Closing socket for {} timed out: {}", self.identity, e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the connection is closed or its shutdown token is cancelled.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// A token that is cancelled when this connection is closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// The inbound half of a duplex socket. Owned exclusively by the handler task,
/// so no synchronization is needed.
pub struct FrameReader<S> {
    stream: S,
    read_wait: Duration,
}

impl<S> FrameReader<S>
where
    S: Stream<Item = Result<Frame, axum::Error>> + Unpin,
{
    /// `read_wait` is the longest silence tolerated from the peer. Any inbound
    /// frame, including pongs, resets it.
    pub fn new(stream: S, read_wait: Duration) -> Self {
        Self { stream, read_wait }
    }

    /// Blocks until a data frame arrives or the connection fails.
    ///
    /// Control frames are consumed here. A close frame or end of stream yields
    /// `ConnectionClosed`; everything else that ends the session is a different error.
    pub async fn read_message(&mut self) -> Result<Frame, EventGateError> {
        loop {
            let next = timeout(self.read_wait, self.stream.next())
                .await
                .map_err(|_| EventGateError::ReadTimeout)?;
            match next {
                Some(Ok(Frame::Ping(_))) | Some(Ok(Frame::Pong(_))) => continue,
                Some(Ok(Frame::Close(frame))) => {
                    let reason = match frame {
                        Some(f) => format!(
                            "close frame (code {}, reason '{}')",
                            f.code,
                            f.reason.as_str()
                        ),
                        None => "close frame without status".to_string(),
                    };
                    return Err(EventGateError::ConnectionClosed(reason));
                }
                Some(Ok(frame)) => return Ok(frame),
                Some(Err(e)) => return Err(EventGateError::from(e)),
                None => {
                    return Err(EventGateError::ConnectionClosed(
                        "abnormal closure".to_string(),
                    ));
                }
            }
        }
    }
}
