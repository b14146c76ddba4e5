use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, error, info, warn};

use super::{
    compose_upstream_error,
    sse::{extract_delta_content, parse_data_line, LineDecoder, SseFrame},
    RelayError, RelayRequest, StreamCursor, StreamHandler, StreamRelay,
};
use crate::{
    protocols::chat::{conversation_text, UpstreamChatRequest},
    providers::{auth::mask_auth_header, estimate_tokens, ProviderRegistry},
    session::SessionRegistry,
};

/// Relay that forwards requests to the provider's HTTP endpoint.
pub struct HttpRelay {
    client: reqwest::Client,
    providers: Arc<ProviderRegistry>,
    sessions: Arc<SessionRegistry>,
}

impl HttpRelay {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        sessions: Arc<SessionRegistry>,
        connect_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            providers,
            sessions,
        })
    }

    /// Everything up to a successful upstream response. Errors here map to
    /// `on_error` and no completion.
    async fn open_stream(&self, request: &RelayRequest) -> Result<reqwest::Response, RelayError> {
        if !self.sessions.is_valid(&request.session_id) {
            return Err(RelayError::SessionNotFound);
        }

        let config = self
            .providers
            .get_config(&request.model)
            .map_err(|_| RelayError::UnknownModel(request.model.clone()))?;

        let auth = config.auth_header().ok_or(RelayError::MissingAuthHeader)?;

        let temperature = config.clamp_temperature(request.temperature);
        let max_tokens = match request.max_tokens {
            Some(requested) => requested.min(config.max_tokens),
            None => {
                let input = estimate_tokens(&conversation_text(&request.messages));
                config.max_tokens_budget(input)
            }
        };

        debug!(
            session_id = %request.session_id,
            model = %request.model,
            upstream_model = %config.model,
            url = %config.url,
            auth = %mask_auth_header(auth.to_str().unwrap_or_default()),
            temperature,
            max_tokens,
            "Sending upstream request"
        );

        let body = UpstreamChatRequest {
            model: &config.model,
            messages: &request.messages,
            stream: true,
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(&config.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(
                session_id = %request.session_id,
                model = %request.model,
                status = status.as_u16(),
                body = %text,
                "Upstream request failed"
            );
            return Err(RelayError::Upstream(compose_upstream_error(status, &text)));
        }

        Ok(response)
    }

    fn handle_line(
        &self,
        line: &str,
        cursor: &mut StreamCursor<'_>,
        handler: &mut dyn StreamHandler,
    ) {
        let payload = match parse_data_line(line) {
            Some(SseFrame::Data(payload)) => payload,
            Some(SseFrame::Done) | None => return,
        };
        match extract_delta_content(payload) {
            Ok(Some(content)) => {
                cursor.advance(&content);
                handler.on_chunk(&content);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping malformed stream frame"),
        }
    }
}

#[async_trait]
impl StreamRelay for HttpRelay {
    async fn stream_request(&self, request: RelayRequest, handler: &mut dyn StreamHandler) {
        let response = match self.open_stream(&request).await {
            Ok(response) => response,
            Err(e) => {
                handler.on_error(&e.to_string());
                return;
            }
        };

        let session_id = request.session_id.as_str();
        let mut cursor = StreamCursor::new(&self.sessions, session_id);
        let mut decoder = LineDecoder::new();
        let mut body = response.bytes_stream();

        loop {
            match body.next().await {
                Some(Ok(bytes)) => {
                    decoder.push_chunk(&bytes);
                    while let Some(line) = decoder.next_line() {
                        self.handle_line(&line, &mut cursor, handler);
                    }
                    if self.sessions.is_terminal(session_id) {
                        info!(session_id, "Session ended, abandoning upstream stream");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(
                        session_id,
                        chars = cursor.position(),
                        error = %e,
                        "Upstream stream interrupted"
                    );
                    handler.on_error(&RelayError::from(e).to_string());
                    return;
                }
                None => {
                    if let Some(line) = decoder.take_remaining() {
                        self.handle_line(&line, &mut cursor, handler);
                    }
                    break;
                }
            }
        }
        drop(body);

        debug!(session_id, chars = cursor.position(), "Upstream stream finished");
        handler.on_complete();
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
