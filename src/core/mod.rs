//! Core request scheduling
//!
//! - Dispatch queue gating concurrent stream executions

pub mod dispatch_queue;

pub use dispatch_queue::{
    DispatchQueue, QueueError, QueueItem, QueueLoad, StreamExecutor,
};
