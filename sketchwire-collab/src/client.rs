//! Replication client: keeps a local canvas in step with the relay server.
//!
//! Joining is a blocking handshake. The client registers under a fresh random
//! identity, applies the full history replay, and only then starts forwarding
//! local commits. After that:
//!
//! - local commits are snapshotted and queued for the writer task without
//!   waiting for the network;
//! - the reader task applies every delivered operation to the canvas as a
//!   remote commit, so nothing received is ever sent back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sketchwire_core::{Canvas, CanvasListener, CommittedOperation, EditOperation};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientId, MessageType, ProtocolError, RelayMessage};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay server
    pub server_url: String,
    /// Upper bound for connecting, and separately for the registration handshake
    pub join_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            join_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReplicationError {
    /// The relay server could not be reached.
    #[error("Unable to reach relay server at {url}: {reason}")]
    RegistrationLookup { url: String, reason: String },
    #[error("Relay server rejected registration: {0}")]
    Rejected(String),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Canvas listener that ships local commits to the writer task.
struct CommitForwarder {
    client_id: ClientId,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    sent: Arc<AtomicU64>,
}

impl CanvasListener for CommitForwarder {
    fn operation_committed(&self, seq: u64, operation: &EditOperation) {
        let snapshot = operation.snapshot();
        let encoded = match RelayMessage::broadcast(self.client_id.clone(), &snapshot)
            .and_then(|msg| msg.encode())
        {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("Failed to encode local operation #{seq}: {e}");
                return;
            }
        };
        if self.outgoing.send(encoded).is_err() {
            log::warn!("Connection closed; local operation #{seq} not sent");
            return;
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        log::debug!("Queued local {} operation #{seq} for broadcast", snapshot.kind());
    }
}

/// A canvas replica connected to the relay server.
pub struct ReplicationClient {
    client_id: ClientId,
    canvas: Arc<Canvas>,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task; `None` once left
    outgoing_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    forwarder: Option<Arc<dyn CanvasListener>>,
    writer: Option<JoinHandle<()>>,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl ReplicationClient {
    /// Register `canvas` with the server at `config.server_url`.
    ///
    /// Returns once the history replay has been applied to the canvas, with
    /// the commit listener attached.
    pub async fn join(canvas: Arc<Canvas>, config: &ClientConfig) -> Result<Self, ReplicationError> {
        let client_id = ClientId::generate();
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let url = config.server_url.clone();

        let lookup_failed = |reason: String| ReplicationError::RegistrationLookup {
            url: url.clone(),
            reason,
        };
        let (ws_stream, _) = tokio::time::timeout(config.join_timeout, tokio_tungstenite::connect_async(&url))
            .await
            .map_err(|_| lookup_failed("connection timed out".to_string()))?
            .map_err(|e| lookup_failed(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let register = RelayMessage::register(client_id.clone()).encode()?;
        ws_writer
            .send(Message::Binary(register.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let received = Arc::new(AtomicU64::new(0));
        let replayed = tokio::time::timeout(
            config.join_timeout,
            Self::handshake(&canvas, &mut ws_reader, &received),
        )
        .await
        .map_err(|_| ProtocolError::Timeout)??;

        // Set before the reader exists so an early disconnect is not overwritten.
        *state.write().await = ConnectionState::Connected;
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        // Writer task: forward the outgoing channel to the WebSocket
        let writer = tokio::spawn(async move {
            while let Some(data) = outgoing_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: apply deliveries to the canvas
        let reader_canvas = canvas.clone();
        let reader_state = state.clone();
        let reader_received = received.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match RelayMessage::decode(&bytes) {
                            Ok(relay_msg) => Self::dispatch(&reader_canvas, relay_msg, &reader_received),
                            Err(e) => log::warn!("Failed to decode message from server: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            log::info!("Disconnected from relay server");
            *reader_state.write().await = ConnectionState::Disconnected;
        });

        let sent = Arc::new(AtomicU64::new(0));
        let forwarder: Arc<dyn CanvasListener> = Arc::new(CommitForwarder {
            client_id: client_id.clone(),
            outgoing: outgoing_tx.clone(),
            sent: sent.clone(),
        });
        canvas.add_listener(forwarder.clone());

        log::info!("Joined {} as {client_id} ({replayed} operations replayed)", config.server_url);
        Ok(Self {
            client_id,
            canvas,
            state,
            outgoing_tx: Some(outgoing_tx),
            forwarder: Some(forwarder),
            writer: Some(writer),
            sent,
            received,
        })
    }

    /// Wait for the registration ack, then apply the announced replay.
    ///
    /// Unreadable frames are logged and skipped; inside the replay each one
    /// still counts as one of the announced entries.
    async fn handshake<S>(
        canvas: &Canvas,
        ws_reader: &mut S,
        received: &AtomicU64,
    ) -> Result<u64, ReplicationError>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let replay_len = loop {
            let msg = match RelayMessage::decode(&Self::next_frame(ws_reader).await?) {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("Ignoring unreadable frame before registration ack: {e}");
                    continue;
                }
            };
            match msg.msg_type {
                MessageType::Registered => break msg.seq,
                MessageType::Error => {
                    let text = msg.error_message().unwrap_or_else(|e| e.to_string());
                    return Err(ReplicationError::Rejected(text));
                }
                other => log::debug!("Ignoring {other:?} before registration ack"),
            }
        };

        let mut applied = 0;
        while applied < replay_len {
            let msg = match RelayMessage::decode(&Self::next_frame(ws_reader).await?) {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("Dropping unreadable replay entry {applied}: {e}");
                    applied += 1;
                    continue;
                }
            };
            if msg.msg_type != MessageType::Deliver {
                continue;
            }
            match msg.operation() {
                Ok(operation) => {
                    canvas.commit_remote_operation(operation);
                    received.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => log::warn!("Dropping unreadable replayed operation #{}: {e}", msg.seq),
            }
            applied += 1;
        }
        Ok(replay_len)
    }

    async fn next_frame<S>(ws_reader: &mut S) -> Result<Vec<u8>, ProtocolError>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws_reader.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data.into()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    return Err(ProtocolError::ConnectionClosed);
                }
                Some(Ok(_)) => {}
            }
        }
    }

    fn dispatch(canvas: &Canvas, msg: RelayMessage, received: &AtomicU64) {
        match msg.msg_type {
            MessageType::Deliver => match msg.operation() {
                Ok(operation) => {
                    let seq = canvas.commit_remote_operation(operation);
                    received.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Applied operation #{} from {} as local #{seq}", msg.seq, msg.client_id);
                }
                Err(e) => log::warn!("Dropping unreadable operation #{}: {e}", msg.seq),
            },
            MessageType::Pong => log::trace!("Pong from server"),
            MessageType::Error => {
                let text = msg.error_message().unwrap_or_else(|e| e.to_string());
                log::warn!("Server error: {text}");
            }
            other => log::debug!("Unhandled message type: {other:?}"),
        }
    }

    /// Apply an operation received from the server. Never re-broadcast.
    pub fn receive_from_server(&self, operation: CommittedOperation) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.canvas.commit_remote_operation(operation)
    }

    /// Send a ping to the server.
    pub fn send_ping(&self) -> Result<(), ProtocolError> {
        let encoded = RelayMessage::ping(self.client_id.clone()).encode()?;
        self.outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?
            .send(encoded)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Stop forwarding, unregister and close the connection.
    pub async fn leave(mut self) -> Result<(), ProtocolError> {
        self.detach();
        let unregister = RelayMessage::unregister(self.client_id.clone()).encode()?;
        let sent = match self.outgoing_tx.take() {
            Some(tx) => tx.send(unregister).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        };

        // With every sender gone the writer drains its queue and closes.
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
        log::info!("Client {} left", self.client_id);
        sent
    }

    fn detach(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            self.canvas.remove_listener(&forwarder);
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn canvas(&self) -> &Arc<Canvas> {
        &self.canvas
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Local operations handed to the writer task.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Operations applied from the server, replay included.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Drop for ReplicationClient {
    fn drop(&mut self) {
        self.detach();
    }
}
