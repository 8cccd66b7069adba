//! Decoder for `data: <json>` server-sent event frames.
//!
//! Bytes are buffered until a full line is available, so multi-byte
//! characters split across network chunks decode correctly.

use tracing::warn;

use super::types::{ChatEvent, StreamChunk, ToolCall};

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder turning raw stream bytes into [`ChatEvent`]s.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    tool_call: Option<PendingToolCall>,
    done: bool,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` frame has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a network chunk, returning the events completed by it
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ChatEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line[..pos], &mut events);
        }

        events
    }

    /// Flush a trailing unterminated line and any tool call left open
    pub fn finish(&mut self) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut events);
        }
        if let Some(call) = self.take_tool_call() {
            events.push(ChatEvent::ToolCallRequested(call));
        }
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<ChatEvent>) {
        if self.done {
            return;
        }
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        if data == DONE_MARKER {
            self.done = true;
            if let Some(call) = self.take_tool_call() {
                events.push(ChatEvent::ToolCallRequested(call));
            }
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Skipping malformed stream frame");
                return;
            }
        };

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(thinking) = choice.delta.reasoning_content.filter(|s| !s.is_empty()) {
            events.push(ChatEvent::ThinkingDelta(thinking));
        }
        if let Some(content) = choice.delta.content.filter(|s| !s.is_empty()) {
            events.push(ChatEvent::ContentDelta(content));
        }
        if let Some(delta) = choice.delta.tool_calls.and_then(|calls| calls.into_iter().next()) {
            let function = delta.function.unwrap_or_default();
            match delta.id {
                Some(id) if !id.is_empty() => {
                    self.tool_call = Some(PendingToolCall {
                        id,
                        name: function.name.unwrap_or_default(),
                        arguments: function.arguments.unwrap_or_default(),
                    });
                }
                _ => {
                    if let Some(pending) = self.tool_call.as_mut() {
                        if let Some(name) = function.name {
                            pending.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            pending.arguments.push_str(&arguments);
                        }
                    }
                }
            }
        }
        if choice.finish_reason.as_deref() == Some("tool_calls") {
            if let Some(call) = self.take_tool_call() {
                events.push(ChatEvent::ToolCallRequested(call));
            }
        }
    }

    fn take_tool_call(&mut self) -> Option<ToolCall> {
        self.tool_call
            .take()
            .map(|p| ToolCall::function(p.id, p.name, p.arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::SEARCH_TOOL_NAME;

    fn frame(json: &str) -> String {
        format!("data: {}\n\n", json)
    }

    #[test]
    fn test_content_and_thinking_deltas() {
        let mut decoder = SseDecoder::new();
        let mut input = frame(r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#);
        input.push_str(&frame(r#"{"choices":[{"delta":{"content":"Once"}}]}"#));
        input.push_str(&frame(r#"{"choices":[{"delta":{"content":" upon"}}]}"#));
        input.push_str("data: [DONE]\n\n");

        let events = decoder.push(input.as_bytes());
        assert_eq!(
            events,
            vec![
                ChatEvent::ThinkingDelta("hmm".to_string()),
                ChatEvent::ContentDelta("Once".to_string()),
                ChatEvent::ContentDelta(" upon".to_string()),
            ]
        );
        assert!(decoder.is_done());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let input = frame(r#"{"choices":[{"delta":{"content":"雨夜"}}]}"#);
        let bytes = input.as_bytes();
        // split inside the multi-byte characters
        let (a, b) = bytes.split_at(40);

        assert!(decoder.push(a).is_empty());
        let events = decoder.push(b);
        assert_eq!(events, vec![ChatEvent::ContentDelta("雨夜".to_string())]);
    }

    #[test]
    fn test_tool_call_fragments_accumulate() {
        let mut decoder = SseDecoder::new();
        let mut input = frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"search_novel_memory","arguments":""}}]}}]}"#,
        );
        input.push_str(&frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"queries\":"}}]}}]}"#,
        ));
        input.push_str(&frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"[\"lamp\"]}"}}]}}]}"#,
        ));
        input.push_str(&frame(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#));

        let events = decoder.push(input.as_bytes());
        assert_eq!(
            events,
            vec![ChatEvent::ToolCallRequested(ToolCall::function(
                "call_9",
                SEARCH_TOOL_NAME,
                r#"{"queries":["lamp"]}"#
            ))]
        );
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut decoder = SseDecoder::new();
        let mut input = "data: {not json}\n".to_string();
        input.push_str(": keep-alive\n");
        input.push_str(&frame(r#"{"choices":[{"delta":{"content":"ok"}}]}"#));

        let events = decoder.push(input.as_bytes());
        assert_eq!(events, vec![ChatEvent::ContentDelta("ok".to_string())]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(br#"data: {"choices":[{"delta":{"content":"tail"}}]}"#);
        assert!(events.is_empty());

        let events = decoder.finish();
        assert_eq!(events, vec![ChatEvent::ContentDelta("tail".to_string())]);
    }

    #[test]
    fn test_frames_after_done_are_ignored() {
        let mut decoder = SseDecoder::new();
        let mut input = "data: [DONE]\n".to_string();
        input.push_str(&frame(r#"{"choices":[{"delta":{"content":"late"}}]}"#));
        assert!(decoder.push(input.as_bytes()).is_empty());
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = SseDecoder::new();
        let events =
            decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\n");
        assert_eq!(events, vec![ChatEvent::ContentDelta("x".to_string())]);
    }
}
