//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌── queue A ── task A ──► Client A
//!             ├── connection tasks ──►  │
//! Client B ──┘    BroadcastServer ──────┼── queue B ── task B ──► Client B
//!                  (registry+history)   └── queue C ── task C ──► Client C
//! ```
//!
//! One task per connection. It decodes inbound frames and feeds them to the
//! shared [`BroadcastServer`], and it drains that connection's delivery queue
//! onto the socket. The connection's registration is dropped when the socket
//! closes, whichever way it closes.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::{BroadcastServer, Delivery};
use crate::protocol::{ClientId, MessageType, RelayMessage};

type BoxError = Box<dyn Error + Send + Sync>;
type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// History length at which (and at every multiple of which) a warning is logged
    pub history_warn_threshold: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            history_warn_threshold: 10_000,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    /// Frames that failed to decode, or carried an unreadable operation
    pub dropped_messages: u64,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    broadcast: Arc<BroadcastServer>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let broadcast = Arc::new(BroadcastServer::new(config.history_warn_threshold));
        Self {
            config,
            broadcast,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Relay server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let broadcast = self.broadcast.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, broadcast, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        broadcast: Arc<BroadcastServer>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (ws_sender, ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut connection = Connection {
            addr,
            client_id: None,
            broadcast: broadcast.clone(),
            stats: stats.clone(),
        };
        let result = connection.pump(ws_sender, ws_receiver).await;

        // Cleanup runs on every exit path, including write failures.
        if let Some(id) = connection.client_id.take() {
            broadcast.unregister(&id).await;
        }
        stats.write().await.active_connections -= 1;
        result
    }

    /// The registry shared by all connections.
    pub fn broadcast_server(&self) -> &Arc<BroadcastServer> {
        &self.broadcast
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

/// Per-connection state.
struct Connection {
    addr: SocketAddr,
    /// Identity registered through this connection, if any
    client_id: Option<ClientId>,
    broadcast: Arc<BroadcastServer>,
    stats: Arc<RwLock<ServerStats>>,
}

impl Connection {
    async fn pump(&mut self, mut ws_sender: WsSender, mut ws_receiver: WsReceiver) -> Result<(), BoxError> {
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Delivery>();
        let addr = self.addr;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            self.handle_frame(&bytes, &delivery_tx, &mut delivery_rx, &mut ws_sender).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                Some(delivery) = delivery_rx.recv() => {
                    let seq = delivery.seq;
                    match RelayMessage::deliver(delivery.sender, seq, &delivery.operation)
                        .and_then(|msg| msg.encode())
                    {
                        Ok(encoded) => {
                            if let Err(e) = ws_sender.send(Message::Binary(encoded.into())).await {
                                log::warn!("Failed to deliver operation #{seq} to {addr}: {e}");
                                break;
                            }
                        }
                        Err(e) => log::error!("Failed to encode operation #{seq}: {e}"),
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        bytes: &[u8],
        delivery_tx: &mpsc::UnboundedSender<Delivery>,
        delivery_rx: &mut mpsc::UnboundedReceiver<Delivery>,
        ws_sender: &mut WsSender,
    ) -> Result<(), BoxError> {
        let msg = match RelayMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Failed to decode message from {}: {e}", self.addr);
                self.stats.write().await.dropped_messages += 1;
                return Ok(());
            }
        };
        {
            let mut s = self.stats.write().await;
            s.total_messages += 1;
            s.total_bytes += bytes.len() as u64;
        }

        match msg.msg_type {
            MessageType::Register => {
                if let Some(existing) = &self.client_id {
                    let reply = RelayMessage::error(
                        ClientId::server(),
                        &format!("Connection already registered as {existing}"),
                    );
                    ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                    return Ok(());
                }

                // Replayed deliveries land in `delivery_tx` before the ack is
                // written, but are only drained after it.
                let recipient = Arc::new(delivery_tx.clone());
                let reply = match self.broadcast.register(msg.client_id.clone(), recipient).await {
                    Ok(replay_len) => {
                        self.client_id = Some(msg.client_id.clone());
                        RelayMessage::registered(msg.client_id, replay_len as u64)
                    }
                    Err(e) => {
                        log::warn!("Rejected registration from {}: {e}", self.addr);
                        RelayMessage::error(ClientId::server(), &e.to_string())
                    }
                };
                ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
            }

            MessageType::Unregister => {
                if let Some(id) = self.client_id.take() {
                    self.broadcast.unregister(&id).await;
                    // Drop deliveries still queued for the old registration.
                    let mut discarded = 0;
                    while delivery_rx.try_recv().is_ok() {
                        discarded += 1;
                    }
                    if discarded > 0 {
                        log::debug!("Discarded {discarded} pending deliveries for {id}");
                    }
                }
            }

            MessageType::Broadcast => match msg.operation() {
                Ok(operation) => {
                    let sender = self.client_id.clone().unwrap_or(msg.client_id);
                    self.broadcast.broadcast(&sender, operation).await;
                }
                Err(e) => {
                    log::warn!("Dropping unreadable operation from {}: {e}", self.addr);
                    self.stats.write().await.dropped_messages += 1;
                }
            },

            MessageType::Ping => {
                let pong = RelayMessage::pong(ClientId::server());
                ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
            }

            other => {
                log::debug!("Unhandled message type from {}: {other:?}", self.addr);
            }
        }
        Ok(())
    }
}
