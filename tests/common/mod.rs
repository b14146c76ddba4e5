// These modules are used by integration tests
#![allow(dead_code)]

pub mod mock_provider;
pub mod test_app;

use std::time::Duration;

pub use test_app::{create_state, create_test_app, test_config, TestServer, WsClient};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
