use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::Response,
};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{connection::Outbound, ConnectionManager};
use crate::{protocols::ws::ServerEvent, server::AppState};

/// Upper bound on the closing handshake with a peer that stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// First `X-Forwarded-For` entry, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_canonical().to_string())
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, peer);
    let manager = state.manager.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, manager, ip))
}

async fn handle_socket(socket: WebSocket, manager: Arc<ConnectionManager>, ip: String) {
    let (conn, outbound) = manager.connect(&ip);
    let (sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, outbound, CLOSE_TIMEOUT));

    let reader = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => manager.handle_message(&conn, text.as_str()),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => manager.handle_message(&conn, text),
                    Err(_) => {
                        conn.send_event(&ServerEvent::connection_error("Invalid request format"));
                    }
                },
                Ok(Message::Pong(_)) | Ok(Message::Ping(_)) => conn.mark_alive(),
                Ok(Message::Close(_)) => return None,
                Err(e) => return Some(e.to_string()),
            }
        }
        None
    };

    let socket_error = tokio::select! {
        socket_error = reader => socket_error,
        _ = &mut writer => None,
    };
    writer.abort();

    if let Some(e) = &socket_error {
        warn!(connection_id = %conn.id, error = %e, "WebSocket error");
    }
    manager.disconnect(&conn.id, socket_error.as_deref());
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    close_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let sent = match frame {
            Outbound::Text(text) => sink.send(Message::Text(text.into())).await,
            Outbound::Ping => sink.send(Message::Ping(Bytes::new())).await,
            Outbound::Close => {
                let _ = tokio::time::timeout(close_timeout, sink.send(Message::Close(None))).await;
                break;
            }
        };
        if sent.is_err() {
            debug!("WebSocket writer closed");
            break;
        }
    }
    if tokio::time::timeout(close_timeout, sink.close()).await.is_err() {
        debug!("WebSocket close timed out, dropping socket");
    }
}
