//! Incremental decoder for the `text/event-stream` session feed.

use tracing::debug;

use crate::models::{StreamMessage, SESSION_STATUS_EVENT};

/// Feeds raw bytes in, yields complete `session_status` messages. Chunk
/// boundaries may fall anywhere, including inside a UTF-8 sequence. Comments,
/// other event types, and undecodable payloads are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamMessage> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(msg) = self.dispatch() {
                    out.push(msg);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        out
    }

    fn dispatch(&mut self) -> Option<StreamMessage> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if data.is_empty() {
            return None;
        }
        if event.as_deref().is_some_and(|e| e != SESSION_STATUS_EVENT) {
            return None;
        }
        match serde_json::from_str::<StreamMessage>(&data.join("\n")) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!(error = %e, "skipping malformed session status event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_TICK: &str =
        "event: session_status\ndata: {\"type\":\"session_status\",\"sessions\":[]}\n\n";

    #[test]
    fn decodes_across_arbitrary_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = EMPTY_TICK.as_bytes();
        let mut messages = Vec::new();
        for chunk in bytes.chunks(7) {
            messages.extend(decoder.push(chunk));
        }
        assert_eq!(messages.len(), 1);
        assert!(messages.remove(0).into_sessions().is_empty());
    }

    #[test]
    fn skips_comments_malformed_and_foreign_events() {
        let mut decoder = SseDecoder::new();
        let input = format!(
            ":keep-alive\n\nevent: session_status\ndata: {{not json\n\nevent: other\ndata: {{}}\n\ndata:\n\n{}",
            EMPTY_TICK
        );
        let messages = decoder.push(input.as_bytes());
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn handles_crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let input = EMPTY_TICK.replace('\n', "\r\n");
        assert_eq!(decoder.push(input.as_bytes()).len(), 1);
    }
}
