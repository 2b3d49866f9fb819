//! One end of a duplex channel.
//!
//! A [`Connection`] owns the output stream (through a single writer task)
//! and the correlator for the calls this end issues. Reader tasks started
//! with [`Connection::serve`] route every line they read:
//!
//! - requests go to the [`RequestHandler`], each in its own task, and the
//!   reply is written back under the request's id
//! - responses complete a pending call
//! - anything else is the peer's own output and is logged

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlator::Correlator;
use crate::envelope::{Action, ActionReply, Envelope};
use crate::error::{IpcError, IpcResult};
use crate::frame::{FrameSink, LineDecoder, decode_frame};

const READ_CHUNK_SIZE: usize = 64 * 1024;

type OutboundReply<S> = <<S as Side>::Outbound as Action>::Reply;
type InboundReply<S> = <<S as Side>::Inbound as Action>::Reply;

/// Which contract table each direction of a connection speaks.
pub trait Side: Send + Sync + 'static {
    /// Name of the process on the other end, used in logs.
    const PEER: &'static str;
    /// Requests this end issues.
    type Outbound: Action + Serialize + Send + Sync + 'static;
    /// Requests this end serves.
    type Inbound: Action + DeserializeOwned + Send + 'static;
}

/// Serves inbound requests. Always answers; failures are encoded in the
/// reply rather than dropped.
#[async_trait]
pub trait RequestHandler<Q: Action + Send + 'static>: Send + Sync {
    async fn handle(&self, request: Q) -> Q::Reply;
}

/// One end of a channel, see the module docs.
pub struct Connection<S: Side> {
    sink: FrameSink,
    correlator: Correlator<S::Outbound>,
}

impl<S: Side> Connection<S> {
    /// Starts the writer task over `writer`.
    pub fn new<W>(writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let sink = FrameSink::spawn(writer);
        Arc::new(Self {
            correlator: Correlator::new(sink.clone()),
            sink,
        })
    }

    /// Starts a reader task over `reader`. The task ends at end of stream.
    ///
    /// `stream` names the input in logs (`"stdout"`, `"stderr"`, ...).
    pub fn serve<R>(
        self: &Arc<Self>,
        reader: R,
        handler: Arc<dyn RequestHandler<S::Inbound>>,
        stream: &'static str,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let conn = Arc::clone(self);
        tokio::spawn(async move { conn.read_loop(reader, handler, stream).await })
    }

    /// Issues a call with the action's default timeout.
    pub async fn call(&self, request: S::Outbound) -> IpcResult<OutboundReply<S>> {
        let timeout = request.default_timeout();
        self.call_with_timeout(request, timeout).await
    }

    /// Issues a call and checks the reply names the same action.
    pub async fn call_with_timeout(
        &self,
        request: S::Outbound,
        timeout: Duration,
    ) -> IpcResult<OutboundReply<S>> {
        let expected = request.action_name();
        let reply = self.correlator.send(request, timeout).await?;
        let got = reply.action_name();
        if got != expected {
            return Err(IpcError::UnexpectedResponse { expected, got });
        }
        Ok(reply)
    }

    /// Fails every pending call with `ChannelClosed` and refuses new ones.
    pub fn close(&self) {
        self.correlator.close();
    }

    pub fn is_closed(&self) -> bool {
        self.correlator.is_closed() || self.sink.is_closed()
    }

    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    async fn read_loop<R>(
        self: Arc<Self>,
        mut reader: R,
        handler: Arc<dyn RequestHandler<S::Inbound>>,
        stream: &'static str,
    ) where
        R: AsyncRead + Send + Unpin,
    {
        let mut decoder = LineDecoder::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let read = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(peer = S::PEER, stream, error = %e, "read failed");
                    break;
                }
            };
            for line in decoder.push(&chunk[..read]) {
                self.route(&line, &handler, stream);
            }
        }
        if let Some(line) = decoder.finish() {
            self.route(&line, &handler, stream);
        }
        debug!(peer = S::PEER, stream, "end of stream");
    }

    fn route(
        self: &Arc<Self>,
        line: &str,
        handler: &Arc<dyn RequestHandler<S::Inbound>>,
        stream: &'static str,
    ) {
        match decode_frame::<Envelope<S::Inbound, OutboundReply<S>>>(line) {
            Some(Envelope::Request { id, payload }) => {
                let conn = Arc::clone(self);
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    let action = payload.action_name();
                    debug!(%id, action, "handling request");
                    let reply: InboundReply<S> = handler.handle(payload).await;
                    let frame: Envelope<(), &InboundReply<S>> = Envelope::Response {
                        id,
                        payload: &reply,
                    };
                    if let Err(e) = conn.sink.send(&frame).await {
                        warn!(action, error = %e, "failed to send response");
                    }
                });
            }
            Some(Envelope::Response { id, payload }) => {
                self.correlator.resolve(&id, payload);
            }
            None if line.trim_start().starts_with("{\"type\"") => {
                warn!(peer = S::PEER, stream, "dropping malformed frame");
            }
            None => {
                info!(target: "harbor::peer", peer = S::PEER, stream, "{line}");
            }
        }
    }
}
