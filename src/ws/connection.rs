use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocols::ws::ServerEvent;

/// Frames queued for a socket's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close,
}

/// One accepted WebSocket peer.
///
/// Everything written to the socket goes through `tx`, so a single writer
/// task preserves send order.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: String,
    pub ip: String,
    alive: AtomicBool,
    speed_test: AtomicBool,
    session_id: Mutex<Option<String>>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientConnection {
    pub fn new(ip: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: Uuid::new_v4().to_string(),
            ip: ip.into(),
            alive: AtomicBool::new(true),
            speed_test: AtomicBool::new(false),
            session_id: Mutex::new(None),
            tx,
        };
        (conn, rx)
    }

    /// Queue a frame. Returns false once the writer is gone.
    pub fn send(&self, frame: Outbound) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn send_event(&self, event: &ServerEvent) -> bool {
        self.send(Outbound::Text(event.to_json()))
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn is_speed_test(&self) -> bool {
        self.speed_test.load(Ordering::Acquire)
    }

    /// Flag the connection as a speed test. True if it was not one yet.
    pub fn mark_speed_test(&self) -> bool {
        !self.speed_test.swap(true, Ordering::AcqRel)
    }

    pub fn bind_session(&self, session_id: &str) {
        *self.session_id.lock() = Some(session_id.to_string());
    }

    pub fn current_session(&self) -> Option<String> {
        self.session_id.lock().clone()
    }
}
