//! # sketchwire-collab: replication layer for Sketchwire canvases
//!
//! Every participant keeps a full replica of the drawing. Completed local
//! operations are sent to a central relay, which records them and fans them
//! out to every other participant.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐     WebSocket      ┌─────────────────┐
//! │ ReplicationClient │ ◄────────────────► │ RelayServer     │
//! │ (per canvas)      │    Binary Proto    │ (central)       │
//! └────────┬──────────┘                    └────────┬────────┘
//!          │                                        │
//!          ▼                                        ▼
//! ┌───────────────────┐                    ┌─────────────────┐
//! │ Canvas            │                    │ BroadcastServer │
//! │ (local replica)   │                    │ history+fan-out │
//! └───────────────────┘                    └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded RelayMessage)
//! - [`broadcast`]: Client registry, replay history and ordered fan-out
//! - [`server`]: WebSocket relay server
//! - [`client`]: Replication client bound to one canvas

pub mod protocol;
pub mod broadcast;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{ClientId, MessageType, ProtocolError, RelayMessage};
pub use broadcast::{
    BroadcastOutcome, BroadcastServer, BroadcastStats, Delivery, DeliveryError, HistoryEntry,
    Recipient, RegistryError,
};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use client::{ClientConfig, ConnectionState, ReplicationClient, ReplicationError};
