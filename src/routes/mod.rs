//! HTTP endpoints.

pub mod admin;
pub mod agents;
pub mod error;
pub mod status;
