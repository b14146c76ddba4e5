// Wire types shared by the WebSocket protocol and the upstream relay

pub mod chat;
pub mod ws;
