use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use sitesmith_core::ids::SessionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique client identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session used when a request names none: the connection is its own session.
    pub fn default_session(&self) -> Option<SessionId> {
        SessionId::parse(&self.0).ok()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket client.
pub struct Client {
    pub id: ClientId,
    /// Session whose updates this client receives.
    session_id: Mutex<Option<SessionId>>,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            session_id: Mutex::new(None),
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    pub fn max_send_queue(&self) -> usize {
        self.max_send_queue
    }

    /// Register a new client and return its ID and outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Subscribe a client to updates for `session_id`.
    pub fn watch_session(&self, client_id: &ClientId, session_id: SessionId) {
        if let Some(client) = self.clients.get(client_id) {
            *client.session_id.lock() = Some(session_id);
        }
    }

    /// Send a message to a specific client. Drops it if the client's queue is full.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.clients.get(client_id).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Send a message to every client watching `session_id`, except `skip`.
    pub fn broadcast_to_session(
        &self,
        session_id: &SessionId,
        message: &str,
        skip: Option<&ClientId>,
    ) -> usize {
        let mut sent = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if Some(&client.id) == skip || !client.is_connected() {
                continue;
            }
            if client.session_id.lock().as_ref() == Some(session_id)
                && client.tx.try_send(message.to_string()).is_ok()
            {
                sent += 1;
            }
        }
        sent
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Remove clients that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage lifecycle with heartbeat.
///
/// Inbound text frames are forwarded to `on_message` in arrival order.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }

        if let Some(client) = writer_registry.get(&writer_cid) {
            client.connected.store(false, Ordering::Relaxed);
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if on_message.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "dead client cleanup");
            }
        }
    })
}
