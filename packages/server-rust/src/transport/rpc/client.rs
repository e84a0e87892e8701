//! Multiplexing RPC client bound to one instance address.
//!
//! The connection is dialed lazily on the first call and re-dialed on the
//! next call after it breaks. Concurrent calls share it: each one parks a
//! oneshot under its request id and the reader task routes answers back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use storefront_core::RpcFrame;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::FrameCodec;
use super::server::DEFAULT_MAX_FRAME_LEN;
use crate::service::operation::CallError;
use crate::service::router::EncodedReply;

const OUTBOUND_CAPACITY: usize = 256;

type Pending = DashMap<u64, oneshot::Sender<RpcFrame>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcClientConfig {
    /// Upper bound on one dial attempt.
    pub connect_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

struct Connection {
    outbound: mpsc::Sender<RpcFrame>,
    pending: Arc<Pending>,
    /// Cancelled when either task stops or the connection is dropped.
    alive: CancellationToken,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.alive.cancel();
    }
}

/// Removes a parked call when its caller stops waiting.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

pub struct RpcClient {
    addr: String,
    config: RpcClientConfig,
    next_id: AtomicU64,
    conn: Mutex<Option<Arc<Connection>>>,
    closed: CancellationToken,
}

impl RpcClient {
    #[must_use]
    pub fn new(addr: impl Into<String>, config: RpcClientConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one request and waits for its answer.
    ///
    /// # Errors
    ///
    /// - `CallError::Transport` if the dial fails or the connection breaks
    ///   before the answer arrives.
    /// - The error rebuilt from a `Fault` frame sent by the server.
    pub async fn call(
        &self,
        method: &str,
        timeout_ms: u64,
        body: Vec<u8>,
    ) -> Result<EncodedReply, CallError> {
        let conn = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        conn.pending.insert(id, tx);
        let _parked = PendingGuard {
            pending: &conn.pending,
            id,
        };

        let request = RpcFrame::Request {
            id,
            method: method.to_string(),
            timeout_ms,
            body,
        };
        if conn.outbound.send(request).await.is_err() {
            return Err(self.broken());
        }

        let answer = tokio::select! {
            biased;
            answer = rx => answer.map_err(|_| self.broken())?,
            () = conn.alive.cancelled() => return Err(self.broken()),
        };

        match answer {
            RpcFrame::Reply { body, err, .. } => Ok(EncodedReply { body, err }),
            RpcFrame::Fault { code, message, .. } => Err(CallError::from_fault(code, message)),
            RpcFrame::Request { .. } => Err(CallError::Transport(format!(
                "{} sent a request frame as an answer",
                self.addr
            ))),
        }
    }

    /// Closes the connection. Later calls fail without dialing.
    pub fn close(&self) {
        self.closed.cancel();
    }

    fn broken(&self) -> CallError {
        CallError::Transport(format!("connection to {} closed", self.addr))
    }

    async fn connection(&self) -> Result<Arc<Connection>, CallError> {
        if self.closed.is_cancelled() {
            return Err(CallError::Transport(format!(
                "client for {} is closed",
                self.addr
            )));
        }

        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.alive.is_cancelled() {
                return Ok(Arc::clone(conn));
            }
        }

        let conn = Arc::new(self.dial().await?);
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    async fn dial(&self) -> Result<Connection, CallError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                CallError::Transport(format!(
                    "connect to {} timed out after {:?}",
                    self.addr, self.config.connect_timeout
                ))
            })?
            .map_err(|e| CallError::Transport(format!("connect to {}: {e}", self.addr)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %self.addr, error = %e, "set_nodelay failed");
        }
        debug!(addr = %self.addr, "rpc connection established");

        let (sink, frames) = Framed::new(stream, FrameCodec::new(self.config.max_frame_len)).split();
        let (outbound, queue) = mpsc::channel(OUTBOUND_CAPACITY);
        let pending = Arc::new(Pending::new());
        let alive = self.closed.child_token();

        tokio::spawn(write_loop(sink, queue, alive.clone(), self.addr.clone()));
        tokio::spawn(read_loop(
            frames,
            Arc::clone(&pending),
            alive.clone(),
            self.addr.clone(),
        ));

        Ok(Connection {
            outbound,
            pending,
            alive,
        })
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn write_loop(
    mut sink: SplitSink<Framed<TcpStream, FrameCodec>, RpcFrame>,
    mut queue: mpsc::Receiver<RpcFrame>,
    alive: CancellationToken,
    addr: String,
) {
    loop {
        let frame = tokio::select! {
            () = alive.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = sink.send(frame).await {
            warn!(%addr, error = %e, "rpc write failed");
            break;
        }
    }
    alive.cancel();
}

async fn read_loop(
    mut frames: SplitStream<Framed<TcpStream, FrameCodec>>,
    pending: Arc<Pending>,
    alive: CancellationToken,
    addr: String,
) {
    loop {
        let item = tokio::select! {
            () = alive.cancelled() => break,
            item = frames.next() => item,
        };
        match item {
            Some(Ok(frame)) => match pending.remove(&frame.id()) {
                // The caller may have given up meanwhile.
                Some((_, waiter)) => {
                    let _ = waiter.send(frame);
                }
                None => debug!(%addr, id = frame.id(), "answer for an abandoned call"),
            },
            Some(Err(e)) => {
                warn!(%addr, error = %e, "rpc read failed");
                break;
            }
            None => {
                debug!(%addr, "rpc connection closed by peer");
                break;
            }
        }
    }
    alive.cancel();
    pending.clear();
}
