//! Minimal Server-Sent-Events line parser shared by every streaming
//! provider adapter. Upstream bodies arrive as arbitrary byte chunks that
//! may split a line (or even a UTF-8 codepoint) across chunk boundaries, so
//! this buffers until a full `\n`-terminated line is available.

use bytes::Bytes;

/// One parsed SSE event. `event` is `None` for the common case of a bare
/// `data:` line with no explicit event name (the default OpenAI/Claude/
/// Gemini streams all rely on).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser. Feed it chunks as they arrive over the wire;
/// each call returns the events that became complete as a result.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a raw byte chunk. Invalid UTF-8 is replaced lossily rather
    /// than erroring — upstreams occasionally split multi-byte codepoints
    /// across TCP segments and the replacement is harmless for SSE framing.
    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(chunk);
        self.push_str(&text)
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        loop {
            let Some(pos) = self.buffer.find('\n') else {
                break;
            };
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }
            if let Some(rest) = line.strip_prefix(':') {
                let _ = rest;
                continue;
            }
            if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim_start().to_string());
            } else if line == "event" {
                self.event = Some(String::new());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_string());
            } else if line == "data" {
                self.data_lines.push(String::new());
            }
        }
        events
    }

    /// Flushes any event accumulated from an unterminated trailing chunk
    /// (upstream closed the connection without a final blank line).
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let remainder = std::mem::take(&mut self.buffer);
            if let Some(rest) = remainder.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_string());
            }
        }
        self.finish_event(&mut events);
        events
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.data_lines.is_empty() && self.event.is_none() {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
        });
        self.data_lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_data_lines() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn handles_split_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: par").is_empty());
        let events = parser.push_str("tial\n\n");
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn joins_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.push_str("event: message\ndata: line one\ndata: line two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn ignores_comment_lines() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": keep-alive\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: no-trailing-blank-line").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "no-trailing-blank-line");
    }
}
