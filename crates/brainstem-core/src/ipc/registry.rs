//! Connection registry: connection id → outbound queue.
//!
//! Each accepted connection registers a bounded queue drained by its
//! writer task. Removing an entry drops the peer's close guard, which
//! ends that connection's read loop; nothing else is affected.
//!
//! Mode changes are queued from inside the mode lock (see
//! [`TransitionSink`]), so every send here is `try_send`: a peer whose
//! queue is full is dropped instead of stalling the writer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::types::Response;
use crate::mode::{ModeTransition, TransitionSink};

/// Identity of one accepted connection, unique for the daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Peer {
    outbound: mpsc::Sender<Response>,
    // Dropped with the entry; the connection's read loop waits on the other end.
    _close: oneshot::Sender<()>,
}

/// Registry of live connections.
pub struct Registry {
    next_id: AtomicU64,
    peers: Mutex<HashMap<ConnectionId, Peer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            peers: Mutex::new(HashMap::new()),
        }
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<ConnectionId, Peer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id for a newly accepted connection.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a connection's outbound queue.
    ///
    /// The returned receiver resolves once the entry is removed, whoever
    /// removes it.
    pub fn register(
        &self,
        id: ConnectionId,
        outbound: mpsc::Sender<Response>,
    ) -> oneshot::Receiver<()> {
        let (close, closed) = oneshot::channel();
        self.peers().insert(
            id,
            Peer {
                outbound,
                _close: close,
            },
        );
        debug!(conn = %id, "connection registered");
        closed
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.peers().remove(&id).is_some();
        if removed {
            debug!(conn = %id, "connection removed");
        }
        removed
    }

    /// Drop every connection.
    pub fn clear(&self) {
        let drained: Vec<_> = self.peers().drain().collect();
        debug!(count = drained.len(), "all connections removed");
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers().contains_key(&id)
    }

    /// Queue `response` for one connection without waiting.
    ///
    /// Returns `false` if the connection is gone or was dropped because its
    /// queue is full or closed.
    pub fn send_to(&self, id: ConnectionId, response: Response) -> bool {
        let Some(outbound) = self.peers().get(&id).map(|peer| peer.outbound.clone()) else {
            return false;
        };
        match outbound.try_send(response) {
            Ok(()) => true,
            Err(e) => {
                warn!(conn = %id, error = %e, "send failed, dropping connection");
                self.remove(id);
                false
            }
        }
    }

    /// Best-effort delivery to every connection.
    ///
    /// Queues are snapshotted under the lock and filled after it is
    /// released. A peer whose queue is full or closed is dropped; delivery
    /// to the others continues. Returns the number of peers reached.
    pub fn broadcast(&self, response: &Response) -> usize {
        let targets: Vec<(ConnectionId, mpsc::Sender<Response>)> = self
            .peers()
            .iter()
            .map(|(id, peer)| (*id, peer.outbound.clone()))
            .collect();

        let mut delivered = 0;
        for (id, outbound) in targets {
            match outbound.try_send(response.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn = %id, error = %e, "broadcast failed, dropping connection");
                    self.remove(id);
                }
            }
        }
        delivered
    }
}

/// Every connection, the requester included, gets one copy of each change.
/// The requester's copy is its reply.
impl TransitionSink for Registry {
    fn deliver(&self, transition: &ModeTransition) {
        let reached = self.broadcast(&Response::mode_change(transition.to));
        debug!(
            mode = %transition.to,
            origin = %transition.origin,
            reached,
            "mode change queued"
        );
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
