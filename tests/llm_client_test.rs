//! Integration tests for the generation client
//!
//! Tests streamed and non-streamed HTTP behavior using wiremock.

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use novel_workshop::config::{LlmConfig, RequestConfig};
use novel_workshop::error::LlmError;
use novel_workshop::llm::{ChatEvent, ChatRequest, CompletionService, LlmClient};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> LlmClient {
    create_client_with_retries(base_url, 0)
}

fn create_client_with_retries(base_url: &str, max_retries: u32) -> LlmClient {
    let config = LlmConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        model: "deepseek-chat".to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    LlmClient::new(&config, request_config).expect("Failed to create client")
}

fn create_test_request() -> ChatRequest {
    ChatRequest::new("deepseek-chat", "You are a narrator.", "Begin.", 0.8)
}

fn sse_body(frames: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn content_frame(content: &str) -> serde_json::Value {
    json!({"choices": [{"delta": {"content": content}, "finish_reason": null}]})
}

#[cfg(test)]
mod complete_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(body_partial_json(json!({"stream": false, "model": "deepseek-chat"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Once upon a tide."}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client
            .complete(&create_test_request(), &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap(), "Once upon a tide.");
    }

    #[tokio::test]
    async fn test_client_error_returns_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_client_with_retries(&mock_server.uri(), 3);
        let result = client
            .complete(&create_test_request(), &CancellationToken::new())
            .await;

        match result {
            Err(LlmError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid key");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_retried_then_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_client_with_retries(&mock_server.uri(), 2);
        let result = client
            .complete(&create_test_request(), &CancellationToken::new())
            .await;

        match result {
            Err(LlmError::Unavailable { retries, .. }) => assert_eq!(retries, 2),
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client
            .complete(&create_test_request(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LlmError::InvalidResponse { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"choices": [{"message": {"content": "late"}}]}))
                    .set_delay(std::time::Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = client.complete(&create_test_request(), &cancel).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_content_and_thinking() {
        let mock_server = MockServer::start().await;

        let body = sse_body(&[
            json!({"choices": [{"delta": {"reasoning_content": "Consider the tide."}}]}),
            content_frame("The water "),
            content_frame("rose."),
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let stream = client
            .stream(&create_test_request(), &CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<ChatEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(
            events,
            vec![
                ChatEvent::ThinkingDelta("Consider the tide.".to_string()),
                ChatEvent::ContentDelta("The water ".to_string()),
                ChatEvent::ContentDelta("rose.".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_tool_call_fragments_are_joined() {
        let mock_server = MockServer::start().await;

        let body = sse_body(&[
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                "function": {"name": "search_novel_memory", "arguments": "{\"queries\":"}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0,
                "function": {"arguments": "[\"Mira's arm\"]}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = create_test_request().with_search_tool();
        let stream = client
            .stream(&request, &CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<ChatEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::ToolCallRequested(call) => {
                assert_eq!(call.id, "call_1");
                assert_eq!(call.function.name, "search_novel_memory");
                assert_eq!(call.function.arguments, "{\"queries\":[\"Mira's arm\"]}");
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_frames() {
        let mock_server = MockServer::start().await;

        let body = format!(
            "data: {{not json}}\n\ndata: {}\n\ndata: [DONE]\n\n",
            content_frame("ok")
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let stream = client
            .stream(&create_test_request(), &CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(ChatEvent::ContentDelta(s)) if s == "ok"));
    }

    #[tokio::test]
    async fn test_stream_api_error_before_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client
            .stream(&create_test_request(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LlmError::Api { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_stream_request_carries_tools_and_thinking() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "stream": true,
                "thinking": {"type": "enabled"},
                "tools": [{"type": "function", "function": {"name": "search_novel_memory"}}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&[content_frame("x")]), "text/event-stream"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = create_test_request()
            .with_search_tool()
            .with_thinking(true);
        let stream = client
            .stream(&request, &CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
    }
}
