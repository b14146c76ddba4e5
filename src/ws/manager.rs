//! Connection registry and request protocol for `/websocket` peers.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::connection::{ClientConnection, Outbound};
use crate::{
    config::QueueConfig,
    core::{DispatchQueue, QueueItem, QueueLoad, StreamExecutor},
    protocols::ws::{ClientRequest, ControlAction, ControlRequest, ServerEvent, StreamRequest},
    providers::ProviderRegistry,
    relay::{RelayRequest, StreamHandler, StreamRelay},
    session::{speed_test_session_id, SessionRegistry},
};

pub struct ConnectionManager {
    clients: DashMap<String, Arc<ClientConnection>>,
    /// ip -> connection ids
    ip_index: DashMap<String, HashSet<String>>,
    total_connections: AtomicU64,
    sessions: Arc<SessionRegistry>,
    providers: Arc<ProviderRegistry>,
    relay: Arc<dyn StreamRelay>,
    queue: Arc<DispatchQueue>,
    complete_delay: Duration,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.clients.len())
            .field("relay", &self.relay.name())
            .field("queue", &self.queue)
            .finish()
    }
}

impl ConnectionManager {
    /// Build the manager together with the dispatch queue it executes for.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        providers: Arc<ProviderRegistry>,
        relay: Arc<dyn StreamRelay>,
        queue_config: &QueueConfig,
        complete_delay: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let executor = weak.clone() as Weak<dyn StreamExecutor>;
            Self {
                clients: DashMap::new(),
                ip_index: DashMap::new(),
                total_connections: AtomicU64::new(0),
                sessions,
                providers,
                relay,
                queue: DispatchQueue::new(queue_config, executor),
                complete_delay,
            }
        })
    }

    pub fn connect(&self, ip: &str) -> (Arc<ClientConnection>, mpsc::UnboundedReceiver<Outbound>) {
        let (conn, rx) = ClientConnection::new(ip);
        let conn = Arc::new(conn);
        self.clients.insert(conn.id.clone(), conn.clone());
        self.ip_index
            .entry(conn.ip.clone())
            .or_default()
            .insert(conn.id.clone());
        self.total_connections.fetch_add(1, Ordering::Relaxed);

        info!(
            connection_id = %conn.id,
            ip = %conn.ip,
            connections = self.clients.len(),
            unique_ips = self.ip_index.len(),
            "Client connected"
        );

        self.broadcast_connection_count();
        (conn, rx)
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, connection_id: &str, socket_error: Option<&str>) {
        let Some((_, conn)) = self.clients.remove(connection_id) else {
            return;
        };

        if let Some(session_id) = conn.current_session() {
            match socket_error {
                Some(message) => {
                    self.sessions.set_error(&session_id, message);
                }
                None => {
                    self.sessions.complete(&session_id);
                }
            }
        }

        if let Some(mut ids) = self.ip_index.get_mut(&conn.ip) {
            ids.remove(connection_id);
        }
        self.ip_index.remove_if(&conn.ip, |_, ids| ids.is_empty());

        info!(
            connection_id,
            ip = %conn.ip,
            error = socket_error.unwrap_or(""),
            remaining = self.clients.len(),
            "Client disconnected"
        );

        if !conn.is_speed_test() {
            self.broadcast_connection_count();
        }
    }

    pub fn handle_message(&self, conn: &Arc<ClientConnection>, text: &str) {
        let request = match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => request,
            Err(e) => {
                warn!(connection_id = %conn.id, error = %e, "Invalid request");
                conn.send_event(&ServerEvent::connection_error("Invalid request format"));
                return;
            }
        };

        match request {
            ClientRequest::Stream(request) => self.enqueue_stream(conn, request),
            ClientRequest::Control(control) => self.handle_control(conn, control),
            ClientRequest::GetClientCount => {
                conn.send_event(&ServerEvent::ConnectionCount {
                    count: self.client_count(),
                });
            }
        }
    }

    fn enqueue_stream(&self, conn: &Arc<ClientConnection>, request: StreamRequest) {
        debug!(
            connection_id = %conn.id,
            model = %request.model,
            speed_test = request.is_speed_test(),
            "Stream request received"
        );
        if request.is_speed_test() && conn.mark_speed_test() {
            self.broadcast_connection_count();
        }
        if let Err(e) = self.queue.enqueue(QueueItem::new(conn.id.clone(), request)) {
            error!(connection_id = %conn.id, error = %e, "Failed to queue stream request");
            conn.send_event(&ServerEvent::connection_error(e.to_string()));
        }
    }

    fn handle_control(&self, conn: &ClientConnection, control: ControlRequest) {
        let session_id = control.session_id.as_str();
        if self.sessions.get(session_id).is_none() {
            warn!(connection_id = %conn.id, session_id, "Control request for unknown session");
            conn.send_event(&ServerEvent::connection_error("Session not found"));
            return;
        }

        let applied = match control.action {
            ControlAction::Pause => self.sessions.pause(session_id),
            ControlAction::Resume => self.sessions.resume(session_id),
            ControlAction::Cancel => self.sessions.complete(session_id),
        };
        debug!(connection_id = %conn.id, session_id, action = ?control.action, applied, "Control request");

        conn.send_event(&ServerEvent::Control {
            action: control.action.outcome(),
        });
    }

    /// Unique source IPs among non-speed-test connections.
    pub fn client_count(&self) -> usize {
        self.ip_index
            .iter()
            .filter(|entry| {
                entry.value().iter().any(|id| {
                    self.clients
                        .get(id)
                        .is_some_and(|conn| !conn.is_speed_test())
                })
            })
            .count()
    }

    /// Currently open connections.
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Connections accepted since startup.
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn queue_load(&self) -> QueueLoad {
        self.queue.load()
    }

    pub fn broadcast_connection_count(&self) {
        let event = ServerEvent::ConnectionCount {
            count: self.client_count(),
        };
        let text = event.to_json();
        debug!(event = %text, connections = self.clients.len(), "Broadcasting connection count");
        for conn in self.snapshot() {
            conn.send(Outbound::Text(text.clone()));
        }
    }

    fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }

    /// One heartbeat round: drop peers that missed the last ping, ping the rest.
    pub fn heartbeat_tick(&self) {
        for conn in self.snapshot() {
            if !conn.take_alive() {
                info!(connection_id = %conn.id, ip = %conn.ip, "Terminating unresponsive client");
                conn.send(Outbound::Close);
                self.disconnect(&conn.id, None);
                continue;
            }
            conn.send(Outbound::Ping);
        }
    }

    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.heartbeat_tick();
            }
        })
    }
}

#[async_trait]
impl StreamExecutor for ConnectionManager {
    async fn execute(&self, connection_id: &str, request: StreamRequest) {
        let Some(conn) = self.clients.get(connection_id).map(|c| c.value().clone()) else {
            debug!(connection_id, "Connection closed before its request was dispatched");
            return;
        };

        let mut handler = WsStreamHandler {
            conn,
            sessions: self.sessions.clone(),
            session_id: None,
            sequence: 0,
            complete_delay: self.complete_delay,
        };

        if let Err(e) = self.providers.get_config(&request.model) {
            handler.on_error(&e.to_string());
            return;
        }

        let session_id = if request.is_speed_test() {
            speed_test_session_id(&request.model)
        } else {
            let session =
                self.sessions
                    .create(&request.model, request.temperature, request.messages.clone());
            handler.conn.bind_session(&session.id);
            handler.session_id = Some(session.id.clone());
            session.id
        };

        info!(
            connection_id,
            session_id = %session_id,
            model = %request.model,
            relay = self.relay.name(),
            "Starting stream"
        );

        let relay_request = RelayRequest {
            session_id,
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        self.relay.stream_request(relay_request, &mut handler).await;
    }
}

/// Forwards relay output to one connection as sequenced events.
struct WsStreamHandler {
    conn: Arc<ClientConnection>,
    sessions: Arc<SessionRegistry>,
    session_id: Option<String>,
    sequence: u64,
    complete_delay: Duration,
}

impl WsStreamHandler {
    fn next_sequence(&mut self) -> u64 {
        let current = self.sequence;
        self.sequence += 1;
        current
    }
}

impl StreamHandler for WsStreamHandler {
    fn on_chunk(&mut self, content: &str) {
        let sequence = self.next_sequence();
        self.conn.send_event(&ServerEvent::Chunk {
            content: content.to_string(),
            sequence,
        });
    }

    fn on_error(&mut self, message: &str) {
        if let Some(session_id) = &self.session_id {
            self.sessions.set_error(session_id, message);
        }
        error!(
            connection_id = %self.conn.id,
            session_id = self.session_id.as_deref().unwrap_or(""),
            error = message,
            "Stream failed"
        );
        let sequence = self.next_sequence();
        self.conn.send_event(&ServerEvent::Error {
            content: message.to_string(),
            sequence: Some(sequence),
        });
    }

    fn on_complete(&mut self) {
        if let Some(session_id) = &self.session_id {
            self.sessions.complete(session_id);
        }
        info!(
            connection_id = %self.conn.id,
            session_id = self.session_id.as_deref().unwrap_or(""),
            chunks = self.sequence,
            "Stream complete"
        );
        let sequence = self.next_sequence();
        let conn = self.conn.clone();
        let delay = self.complete_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            conn.send_event(&ServerEvent::Complete { sequence });
        });
    }
}
