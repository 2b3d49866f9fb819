//! Pending-request table for calls issued by one side of the channel.
//!
//! Every outbound request gets a fresh id and an entry holding the
//! completion for whoever is waiting. A response with a matching id
//! completes that caller exactly once; a timeout removes the entry so a
//! late response finds nothing and is dropped.

use harbor_types::RequestId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::envelope::{Action, Envelope};
use crate::error::{IpcError, IpcResult};
use crate::frame::FrameSink;

struct PendingTable<P> {
    entries: HashMap<RequestId, oneshot::Sender<P>>,
    closed: bool,
}

/// Correlates outbound requests of type `Q` with their replies.
pub struct Correlator<Q: Action> {
    sink: FrameSink,
    table: Mutex<PendingTable<Q::Reply>>,
}

impl<Q> Correlator<Q>
where
    Q: Action + Serialize,
{
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink,
            table: Mutex::new(PendingTable {
                entries: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Sends `request` and waits up to `timeout` for its reply.
    ///
    /// Dropping the returned future before completion removes the
    /// pending entry.
    pub async fn send(&self, request: Q, timeout: Duration) -> IpcResult<Q::Reply> {
        let action = request.action_name();
        let id = RequestId::generate();
        let (tx, mut rx) = oneshot::channel();

        {
            let mut table = self.table();
            if table.closed {
                return Err(IpcError::ChannelClosed);
            }
            table.entries.insert(id.clone(), tx);
        }
        let _guard = PendingGuard {
            correlator: self,
            id: &id,
        };

        let frame: Envelope<&Q, ()> = Envelope::Request {
            id: id.clone(),
            payload: &request,
        };
        self.sink.send(&frame).await?;
        debug!(%id, action, "request sent");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(IpcError::ChannelClosed),
            Err(_) => {
                if self.remove(&id) {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    warn!(%id, action, timeout_ms, "request timed out");
                    Err(IpcError::Timeout { action, timeout_ms })
                } else {
                    // The reply was delivered between the deadline and the removal.
                    rx.try_recv().map_err(|_| IpcError::ChannelClosed)
                }
            }
        }
    }

    /// Completes the caller waiting on `id`. Returns false when no caller
    /// is waiting (unknown id, already completed, or timed out).
    pub fn resolve(&self, id: &RequestId, reply: Q::Reply) -> bool {
        let Some(tx) = self.table().entries.remove(id) else {
            debug!(%id, "dropping response with no pending request");
            return false;
        };
        if tx.send(reply).is_err() {
            debug!(%id, "caller went away before the response arrived");
            return false;
        }
        true
    }

    /// Rejects every pending call and refuses new ones.
    pub fn close(&self) {
        let mut table = self.table();
        table.closed = true;
        let failed = table.entries.len();
        // Dropping the senders wakes every waiter with ChannelClosed.
        table.entries.clear();
        if failed > 0 {
            debug!(failed, "closed correlator with calls in flight");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }

    pub fn pending_count(&self) -> usize {
        self.table().entries.len()
    }

    fn remove(&self, id: &RequestId) -> bool {
        self.table().entries.remove(id).is_some()
    }

    fn table(&self) -> MutexGuard<'_, PendingTable<Q::Reply>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PendingGuard<'a, Q: Action + Serialize> {
    correlator: &'a Correlator<Q>,
    id: &'a RequestId,
}

impl<Q: Action + Serialize> Drop for PendingGuard<'_, Q> {
    fn drop(&mut self) {
        self.correlator.remove(self.id);
    }
}
