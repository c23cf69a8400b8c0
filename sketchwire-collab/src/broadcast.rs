//! Broadcast server: registered clients, replay history and fan-out.
//!
//! ```text
//!  broadcast(sender, op)
//!        │
//!        ▼
//!  ┌──────────────┐   append    ┌─────────────────────────────┐
//!  │   Registry   │ ──────────► │ history: [(seq, sender, op)]│
//!  │ (one mutex)  │             └─────────────────────────────┘
//!  └──────┬───────┘
//!         │ enqueue in broadcast order, skipping `sender`
//!   ┌─────┼──────────┐
//!   ▼     ▼          ▼
//!  queue  queue     queue      one FIFO per client, drained by its
//!   │     │          │         own connection task
//!   ▼     ▼          ▼
//! client client    client
//! ```
//!
//! Registration, unregistration and broadcast are serialized by the registry
//! lock. Recipients only enqueue, so holding the lock while dispatching
//! never waits on the network; the actual send runs on each client's task.
//! That keeps per-client order equal to broadcast order while different
//! clients drain independently.
//!
//! History is never compacted. It grows with every broadcast for the life of
//! the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use sketchwire_core::CommittedOperation;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::protocol::ClientId;

/// One operation pushed to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Position in the server history.
    pub seq: u64,
    pub sender: ClientId,
    pub operation: Arc<CommittedOperation>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Recipient queue closed")]
    Closed,
    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Client {0} is already registered")]
    AlreadyRegistered(ClientId),
}

/// Handle used to reach a registered client.
///
/// `deliver` must not block: it hands the delivery to whatever task owns the
/// client's connection.
pub trait Recipient: Send + Sync {
    fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError>;
}

impl Recipient for mpsc::UnboundedSender<Delivery> {
    fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        self.send(delivery).map_err(|_| DeliveryError::Closed)
    }
}

/// A recorded broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub seq: u64,
    pub sender: ClientId,
    pub operation: Arc<CommittedOperation>,
}

/// Statistics for monitoring relay health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub operations_broadcast: u64,
    pub deliveries: u64,
    pub failed_deliveries: u64,
    pub replayed: u64,
    pub registered_clients: usize,
    pub history_len: usize,
}

struct AtomicBroadcastStats {
    operations_broadcast: AtomicU64,
    deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
    replayed: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            operations_broadcast: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            failed_deliveries: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
        }
    }
}

/// Result of a single broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub seq: u64,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    clients: FxHashMap<ClientId, Arc<dyn Recipient>>,
    history: Vec<HistoryEntry>,
}

pub struct BroadcastServer {
    registry: Mutex<Registry>,
    stats: AtomicBroadcastStats,
    /// Log a capacity warning whenever history reaches a multiple of this.
    history_warn_threshold: usize,
}

impl Default for BroadcastServer {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl BroadcastServer {
    pub fn new(history_warn_threshold: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            stats: AtomicBroadcastStats::new(),
            history_warn_threshold,
        }
    }

    /// Add a client, then replay the full history to it alone.
    ///
    /// Returns the number of replayed operations. No broadcast can interleave
    /// with the replay.
    pub async fn register(
        &self,
        client_id: ClientId,
        recipient: Arc<dyn Recipient>,
    ) -> Result<usize, RegistryError> {
        let mut registry = self.registry.lock().await;
        if registry.clients.contains_key(&client_id) {
            return Err(RegistryError::AlreadyRegistered(client_id));
        }
        registry.clients.insert(client_id.clone(), recipient.clone());

        let replay_len = registry.history.len();
        for entry in &registry.history {
            let delivery = Delivery {
                seq: entry.seq,
                sender: entry.sender.clone(),
                operation: entry.operation.clone(),
            };
            self.dispatch(&client_id, recipient.as_ref(), delivery);
        }
        self.stats
            .replayed
            .fetch_add(replay_len as u64, Ordering::Relaxed);

        log::info!(
            "Client {client_id} registered ({} connected, {replay_len} replayed)",
            registry.clients.len()
        );
        Ok(replay_len)
    }

    /// Remove a client. Absent clients are ignored.
    pub async fn unregister(&self, client_id: &ClientId) -> bool {
        let removed = self.registry.lock().await.clients.remove(client_id).is_some();
        if removed {
            log::info!("Client {client_id} unregistered");
        }
        removed
    }

    /// Record `operation` and push it to every client except `sender`.
    pub async fn broadcast(
        &self,
        sender: &ClientId,
        operation: impl Into<Arc<CommittedOperation>>,
    ) -> BroadcastOutcome {
        let operation = operation.into();
        let mut registry = self.registry.lock().await;

        let seq = registry.history.len() as u64;
        registry.history.push(HistoryEntry {
            seq,
            sender: sender.clone(),
            operation: operation.clone(),
        });
        self.stats
            .operations_broadcast
            .fetch_add(1, Ordering::Relaxed);

        let mut outcome = BroadcastOutcome {
            seq,
            delivered: 0,
            failed: 0,
        };
        for (client_id, recipient) in &registry.clients {
            if client_id == sender {
                continue;
            }
            let delivery = Delivery {
                seq,
                sender: sender.clone(),
                operation: operation.clone(),
            };
            if self.dispatch(client_id, recipient.as_ref(), delivery) {
                outcome.delivered += 1;
            } else {
                outcome.failed += 1;
            }
        }

        let history_len = registry.history.len();
        if self.history_warn_threshold > 0 && history_len % self.history_warn_threshold == 0 {
            log::warn!("Broadcast history holds {history_len} operations and is never compacted");
        }
        log::debug!(
            "Operation #{seq} from {sender} fanned out to {} clients ({} failed)",
            outcome.delivered,
            outcome.failed
        );
        outcome
    }

    /// Copy of the replay history in broadcast order.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.registry.lock().await.history.clone()
    }

    pub async fn client_count(&self) -> usize {
        self.registry.lock().await.clients.len()
    }

    pub async fn is_registered(&self, client_id: &ClientId) -> bool {
        self.registry.lock().await.clients.contains_key(client_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        let registry = self.registry.lock().await;
        BroadcastStats {
            operations_broadcast: self.stats.operations_broadcast.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            failed_deliveries: self.stats.failed_deliveries.load(Ordering::Relaxed),
            replayed: self.stats.replayed.load(Ordering::Relaxed),
            registered_clients: registry.clients.len(),
            history_len: registry.history.len(),
        }
    }

    // A failed delivery is logged and counted; the client stays registered.
    fn dispatch(&self, client_id: &ClientId, recipient: &dyn Recipient, delivery: Delivery) -> bool {
        let seq = delivery.seq;
        match recipient.deliver(delivery) {
            Ok(()) => {
                self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.stats.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                log::warn!("Delivery of operation #{seq} to {client_id} failed: {e}");
                false
            }
        }
    }
}
