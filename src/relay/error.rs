use reqwest::StatusCode;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Missing or invalid Authorization header")]
    MissingAuthHeader,

    /// Non-2xx reply from the provider, already formatted for the client
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

/// `API request failed (<status>): <reason>` followed by the provider's error
/// `type: message` when the body carries one, or the raw body otherwise.
pub fn compose_upstream_error(status: StatusCode, body: &str) -> String {
    let mut message = format!(
        "API request failed ({}): {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
                let field = |name: &str| error.get(name).and_then(Value::as_str).unwrap_or("");
                message.push_str(&format!(" - {}: {}", field("type"), field("message")));
            }
        }
        Err(_) => {
            message.push_str(" - ");
            message.push_str(body);
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_body() {
        let body = r#"{"error":{"type":"invalid_api_key","message":"bad key"}}"#;
        assert_eq!(
            compose_upstream_error(StatusCode::UNAUTHORIZED, body),
            "API request failed (401): Unauthorized - invalid_api_key: bad key"
        );
    }

    #[test]
    fn test_raw_error_body() {
        assert_eq!(
            compose_upstream_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "API request failed (502): Bad Gateway - upstream down"
        );
    }

    #[test]
    fn test_json_without_error_object() {
        assert_eq!(
            compose_upstream_error(StatusCode::TOO_MANY_REQUESTS, r#"{"detail":"slow down"}"#),
            "API request failed (429): Too Many Requests"
        );
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(RelayError::SessionNotFound.to_string(), "Session not found");
        assert_eq!(
            RelayError::MissingAuthHeader.to_string(),
            "Missing or invalid Authorization header"
        );
        assert_eq!(
            RelayError::UnknownModel("x".to_string()).to_string(),
            "Unknown model: x"
        );
    }
}
