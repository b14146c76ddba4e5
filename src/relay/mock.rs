use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use super::{RelayRequest, StreamCursor, StreamHandler, StreamRelay};
use crate::session::SessionRegistry;

const DEFAULT_REPLY: &str = "这是一个模拟响应。The quick brown fox jumps over the lazy dog.";
const GREETING_REPLY: &str = "你好！Hello! 这是一个测试响应。";
const ERROR_REPLY: &str = "模拟错误响应";

/// Offline relay that streams canned text word by word.
pub struct MockRelay {
    sessions: Arc<SessionRegistry>,
    chunk_delay: Duration,
}

impl MockRelay {
    pub fn new(sessions: Arc<SessionRegistry>, chunk_delay: Duration) -> Self {
        Self {
            sessions,
            chunk_delay,
        }
    }
}

enum MockReply {
    Text(&'static str),
    Fail,
}

fn choose_reply(last_message: &str) -> MockReply {
    let text = last_message.to_lowercase();
    let says_hi = text
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == "hi");
    if text.contains("hello") || text.contains("你好") || says_hi {
        MockReply::Text(GREETING_REPLY)
    } else if text.contains("error") || text.contains("错误") {
        MockReply::Fail
    } else {
        MockReply::Text(DEFAULT_REPLY)
    }
}

#[async_trait]
impl StreamRelay for MockRelay {
    async fn stream_request(&self, request: RelayRequest, handler: &mut dyn StreamHandler) {
        if !self.sessions.is_valid(&request.session_id) {
            handler.on_error("Session not found");
            return;
        }

        let last = request.messages.last().map(|m| m.text()).unwrap_or_default();
        let reply = match choose_reply(&last) {
            MockReply::Text(reply) => reply,
            MockReply::Fail => {
                handler.on_error(ERROR_REPLY);
                return;
            }
        };

        let mut cursor = StreamCursor::new(&self.sessions, &request.session_id);
        for word in reply.split(' ') {
            tokio::time::sleep(self.chunk_delay).await;
            if self.sessions.is_terminal(&request.session_id) {
                debug!(session_id = %request.session_id, "Session ended, stopping mock stream");
                break;
            }
            let chunk = format!("{} ", word);
            cursor.advance(&chunk);
            handler.on_chunk(&chunk);
        }
        handler.on_complete();
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
