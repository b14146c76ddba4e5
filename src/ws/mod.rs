//! WebSocket transport: connection registry, heartbeat and the `/websocket` upgrade.

pub mod connection;
pub mod handler;
pub mod manager;

pub use connection::{ClientConnection, Outbound};
pub use handler::{client_ip, websocket_handler};
pub use manager::ConnectionManager;
