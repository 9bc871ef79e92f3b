//! In-process transport for a local validator network.
//!
//! Every node registers the sender half of its inbound channel under its
//! address. A broadcast clones the message into every other registered
//! channel. A full channel drops the message for that peer; the sender
//! never blocks.

use favo_core::{ConsensusMessage, Event};
use favo_types::Address;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Cloneable handle to the shared peer table.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    peers: RwLock<BTreeMap<Address, mpsc::Sender<Event>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Replaces any earlier registration for `address`.
    pub fn register(&self, address: Address, inbound: mpsc::Sender<Event>) {
        self.inner.peers.write().insert(address, inbound);
    }

    /// Detach a node. Messages to it are no longer attempted.
    pub fn unregister(&self, address: &Address) {
        self.inner.peers.write().remove(address);
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.read().len()
    }

    /// Deliver `message` to every registered node except `from`.
    pub fn broadcast(&self, from: Address, message: &ConsensusMessage) {
        let peers = self.inner.peers.read();
        for (address, inbound) in peers.iter() {
            if *address == from {
                continue;
            }
            let event = Event::MessageReceived {
                message: message.clone(),
            };
            match inbound.try_send(event) {
                Ok(()) => {
                    self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(from = ?from, to = ?address, "Peer inbound channel full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(to = ?address, "Peer stopped, message dropped");
                }
            }
        }
    }

    /// Messages handed to a peer's channel.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Messages dropped because the peer's channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
