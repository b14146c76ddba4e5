pub mod agents;
pub mod config;
pub mod core;
pub mod observability;
pub mod protocols;
pub mod providers;
pub mod relay;
pub mod routes;
pub mod server;
pub mod session;
pub mod ws;
