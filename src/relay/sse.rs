//! Incremental decoding of `data: ` framed chat completion streams.

use serde_json::Value;

/// Splits a byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte UTF-8
/// sequence split across network chunks is decoded only once whole.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete line without its terminator, CRLF normalized.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the stream ends, if non-blank.
    pub fn take_remaining(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame<'a> {
    Data(&'a str),
    Done,
}

/// Classify one line. Lines that are not `data: ` frames yield `None`.
pub fn parse_data_line(line: &str) -> Option<SseFrame<'_>> {
    let payload = line.strip_prefix("data: ")?.trim();
    if payload == "[DONE]" {
        Some(SseFrame::Done)
    } else {
        Some(SseFrame::Data(payload))
    }
}

/// `choices[0].delta.content` of a frame payload. Empty fragments yield `None`.
pub fn extract_delta_content(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let value: Value = serde_json::from_str(payload)?;
    Ok(value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}
