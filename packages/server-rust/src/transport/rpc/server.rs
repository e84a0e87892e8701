//! RPC server: accepts connections and answers multiplexed requests.
//!
//! Each connection gets one reader and one writer task. Every `Request`
//! frame runs in its own task, so a slow call never blocks the calls behind
//! it on the same connection. Answers are written in completion order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use storefront_core::RpcFrame;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::FrameCodec;
use crate::network::ShutdownController;
use crate::service::operation::{CallContext, CallError};
use crate::service::router::MethodRouter;

/// Largest accepted frame, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Bounded outbound queue per connection.
const OUTBOUND_CAPACITY: usize = 256;

/// Serves a [`MethodRouter`] over length-delimited `MsgPack` frames.
pub struct RpcServer {
    router: Arc<MethodRouter>,
    shutdown: Arc<ShutdownController>,
    max_frame_len: usize,
}

impl RpcServer {
    #[must_use]
    pub fn new(router: MethodRouter, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            router: Arc::new(router),
            shutdown,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Accepts connections until shutdown is triggered.
    ///
    /// Connections already open keep being served so their in-flight calls
    /// can answer; the caller drains them through the shutdown controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local = listener.local_addr()?;
        let stop = self.shutdown.token();
        info!(%local, methods = self.router.methods().len(), "rpc server listening");

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            Arc::clone(&self.router),
                            Arc::clone(&self.shutdown),
                            self.max_frame_len,
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "rpc accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        info!(%local, "rpc accept loop stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<MethodRouter>,
    shutdown: Arc<ShutdownController>,
    max_frame_len: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }
    debug!(%peer, "rpc connection opened");

    let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new(max_frame_len)).split();
    let (outbound, mut queue) = mpsc::channel::<RpcFrame>(OUTBOUND_CAPACITY);
    let connection = CancellationToken::new();

    let writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!(%peer, error = %e, "rpc write failed");
                break;
            }
        }
    });

    while let Some(item) = frames.next().await {
        match item {
            Ok(RpcFrame::Request {
                id,
                method,
                timeout_ms,
                body,
            }) => {
                let guard = shutdown.in_flight_guard();
                let router = Arc::clone(&router);
                let outbound = outbound.clone();
                let cancel = connection.child_token();
                tokio::spawn(async move {
                    let _guard = guard;
                    let answer = answer(&router, id, &method, timeout_ms, &body, cancel).await;
                    // The writer is gone only when the connection is closing.
                    let _ = outbound.send(answer).await;
                });
            }
            Ok(other) => {
                warn!(%peer, id = other.id(), "unexpected frame from rpc client");
            }
            Err(e) => {
                warn!(%peer, error = %e, "rpc read failed, closing connection");
                break;
            }
        }
    }

    // The client is gone: abandon its calls.
    connection.cancel();
    drop(outbound);
    let _ = writer.await;
    debug!(%peer, "rpc connection closed");
}

/// Runs one request and builds the frame answering it.
async fn answer(
    router: &MethodRouter,
    id: u64,
    method: &str,
    timeout_ms: u64,
    body: &[u8],
    cancel: CancellationToken,
) -> RpcFrame {
    let call_cancel = cancel.clone();
    let context = move |name: &'static str| {
        let ctx = CallContext::new(name).with_cancel(call_cancel);
        if timeout_ms > 0 {
            ctx.with_timeout(Duration::from_millis(timeout_ms))
        } else {
            ctx
        }
    };

    let result = tokio::select! {
        result = router.dispatch(method, context, body) => result,
        () = cancel.cancelled() => Err(CallError::Cancelled),
    };

    match result {
        Ok(reply) => RpcFrame::Reply {
            id,
            body: reply.body,
            err: reply.err,
        },
        Err(err) => {
            debug!(id, method, error = %err, "rpc call faulted");
            let (code, message) = err.into_fault();
            RpcFrame::Fault { id, code, message }
        }
    }
}
