//! Binary relay protocol between replication clients and the broadcast server.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬─────────────┬──────────┬──────────┐
//! │ msg_type │ client_id   │ seq      │ payload  │
//! │ 1 byte   │ string      │ varint   │ variable │
//! └──────────┴─────────────┴──────────┴──────────┘
//! ```
//!
//! `Broadcast` and `Deliver` carry a bincode-encoded [`CommittedOperation`]
//! in the payload. Only the committed value travels; listener state of the
//! live operation never does.

use std::fmt;

use serde::{Deserialize, Serialize};
use sketchwire_core::CommittedOperation;
use uuid::Uuid;

/// Message types for the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client asks to join; `client_id` is its identity
    Register = 1,
    /// Server accepted the registration; `seq` is the replay length
    Registered = 2,
    /// Client leaves
    Unregister = 3,
    /// Client publishes a committed operation
    Broadcast = 4,
    /// Server pushes an operation to a client; `seq` is the history position
    Deliver = 5,
    /// Server reports a rejected request; payload is a UTF-8 message
    Error = 6,
    /// Heartbeat ping
    Ping = 7,
    /// Heartbeat pong
    Pong = 8,
}

/// Opaque participant identity, unique among registered clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A collision-resistant random identity.
    pub fn generate() -> Self {
        Self(format!("canvas-{}", Uuid::new_v4()))
    }

    /// Identity the server uses as sender of its own messages.
    pub fn server() -> Self {
        Self("server".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub msg_type: MessageType,
    pub client_id: ClientId,
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl RelayMessage {
    fn bare(msg_type: MessageType, client_id: ClientId) -> Self {
        Self {
            msg_type,
            client_id,
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn register(client_id: ClientId) -> Self {
        Self::bare(MessageType::Register, client_id)
    }

    pub fn registered(client_id: ClientId, replay_len: u64) -> Self {
        Self {
            seq: replay_len,
            ..Self::bare(MessageType::Registered, client_id)
        }
    }

    pub fn unregister(client_id: ClientId) -> Self {
        Self::bare(MessageType::Unregister, client_id)
    }

    /// Publish a committed operation on behalf of `sender`.
    pub fn broadcast(sender: ClientId, operation: &CommittedOperation) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: encode_operation(operation)?,
            ..Self::bare(MessageType::Broadcast, sender)
        })
    }

    /// Push history entry `seq`, originally sent by `sender`.
    pub fn deliver(
        sender: ClientId,
        seq: u64,
        operation: &CommittedOperation,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            seq,
            payload: encode_operation(operation)?,
            ..Self::bare(MessageType::Deliver, sender)
        })
    }

    pub fn error(client_id: ClientId, message: &str) -> Self {
        Self {
            payload: message.as_bytes().to_vec(),
            ..Self::bare(MessageType::Error, client_id)
        }
    }

    pub fn ping(client_id: ClientId) -> Self {
        Self::bare(MessageType::Ping, client_id)
    }

    pub fn pong(client_id: ClientId) -> Self {
        Self::bare(MessageType::Pong, client_id)
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the operation carried by a `Broadcast` or `Deliver` message.
    pub fn operation(&self) -> Result<CommittedOperation, ProtocolError> {
        match self.msg_type {
            MessageType::Broadcast | MessageType::Deliver => decode_operation(&self.payload),
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    /// Parse the text of an `Error` message.
    pub fn error_message(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::Error {
            return Err(ProtocolError::InvalidMessageType);
        }
        String::from_utf8(self.payload.clone())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

pub fn encode_operation(operation: &CommittedOperation) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(operation, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

pub fn decode_operation(bytes: &[u8]) -> Result<CommittedOperation, ProtocolError> {
    let (operation, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(operation)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
