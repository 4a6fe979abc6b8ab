// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Server-Sent Events (SSE) stream parser.
//!
//! Extracts `data:` payloads from the chat-completion byte stream, handling
//! lines split across network reads and the OpenAI-compatible `[DONE]`
//! sentinel.

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload.
    Data(String),
    /// Stream termination signal (`data: [DONE]`).
    Done,
}

/// Streaming SSE parser that handles partial chunks split across reads.
///
/// Feed raw UTF-8 text via [`feed`](SseParser::feed); complete events are
/// returned as they become available, and an incomplete trailing line is
/// buffered for the next read.
#[derive(Default)]
pub struct SseParser {
    line_buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            line_buffer: String::with_capacity(256),
        }
    }

    /// Feed a UTF-8 text chunk and return any complete SSE events.
    ///
    /// Recognizes `data:` lines (with or without a space after the colon);
    /// comments (`:` prefix) and other field lines are ignored.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.line_buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(newline_pos) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer[..newline_pos].to_string();
            self.line_buffer.drain(..=newline_pos);

            let line = line.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_data_event() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"text\":\"hello\"}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"text\":\"hello\"}".to_string())]);
    }

    #[test]
    fn test_done_sentinel() {
        let mut parser = SseParser::new();
        assert_eq!(parser.feed("data: [DONE]\n\n"), vec![SseEvent::Done]);
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_string()),
                SseEvent::Data("{\"b\":2}".to_string()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_partial_chunk_across_calls() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"tex").is_empty());
        let events = parser.feed("t\":\"hello\"}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"text\":\"hello\"}".to_string())]);
    }

    #[test]
    fn test_many_small_fragments() {
        let mut parser = SseParser::new();
        assert!(parser.feed("da").is_empty());
        assert!(parser.feed("ta: {\"p").is_empty());
        let events = parser.feed("art\":\"ial\"}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"part\":\"ial\"}".to_string())]);
    }

    #[test]
    fn test_comments_and_other_fields_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\nid: 123\nretry: 5000\ndata: {\"ok\":true}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"ok\":true}".to_string())]);
    }

    #[test]
    fn test_data_no_space_after_colon() {
        let mut parser = SseParser::new();
        let events = parser.feed("data:{\"compact\":true}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"compact\":true}".to_string())]);
    }

    #[test]
    fn test_empty_and_blank_input() {
        let mut parser = SseParser::new();
        assert!(parser.feed("").is_empty());
        assert!(parser.feed("\n\n\n\n").is_empty());
    }
}
