use super::*;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn body_from(parts: &[&'static str]) -> ByteStream {
    let items: Vec<std::io::Result<Bytes>> =
        parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
    futures::stream::iter(items).boxed()
}

fn all_adapters() -> Vec<Arc<dyn ProviderAdapter>> {
    vec![
        Arc::new(OpenAIAdapter::new()),
        Arc::new(DeepSeekAdapter::new()),
        Arc::new(AnthropicAdapter::new()),
    ]
}

#[tokio::test]
async fn test_stream_yields_content_then_single_finish() {
    let adapter = OpenAIAdapter::new();
    let body = body_from(&[
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
        "data: [DONE]\n",
    ]);

    let chunks: Vec<StreamingChunk> = adapter.parse_stream(body).collect().await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].content, "Hi");
    assert!(!chunks[0].finish);
    assert!(chunks[1].finish);
    assert_eq!(chunks.iter().filter(|c| c.finish).count(), 1);
}

#[tokio::test]
async fn test_stream_line_split_across_network_chunks() {
    let adapter = OpenAIAdapter::new();
    let body = body_from(&[
        "data: {\"choices\":[{\"delta\":",
        "{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
        "data: [DONE]\n",
    ]);

    let chunks: Vec<StreamingChunk> = adapter.parse_stream(body).collect().await;
    let text: String = chunks.iter().map(|c| c.content.as_str()).collect();

    assert_eq!(text, "Hello");
    assert!(chunks.last().is_some_and(|c| c.finish));
}

#[tokio::test]
async fn test_malformed_line_yields_error_chunk_and_continues() {
    let adapter = DeepSeekAdapter::new();
    let body = body_from(&[
        "data: {not json}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        "data: [DONE]\n",
    ]);

    let chunks: Vec<StreamingChunk> = adapter.parse_stream(body).collect().await;

    assert_eq!(chunks.len(), 3);
    assert!(chunks[0].error.is_some());
    assert_eq!(chunks[1].content, "ok");
    assert!(chunks[2].finish);
}

#[tokio::test]
async fn test_finish_reason_terminates_stream() {
    let adapter = OpenAIAdapter::new();
    let body = body_from(&[
        "data: {\"choices\":[{\"delta\":{\"content\":\"a\"},\"finish_reason\":null}]}\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
    ]);

    let chunks: Vec<StreamingChunk> = adapter.parse_stream(body).collect().await;

    assert_eq!(chunks.len(), 2);
    assert!(chunks[1].finish);
    assert_eq!(chunks[1].metadata.get("finish_reason"), Some(&json!("stop")));
}

#[tokio::test]
async fn test_anthropic_event_stream() {
    let adapter = AnthropicAdapter::new();
    let body = body_from(&[
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ]);

    let chunks: Vec<StreamingChunk> = adapter.parse_stream(body).collect().await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].content, "Hi");
    assert!(chunks[1].finish);
}

#[tokio::test]
async fn test_dropping_stream_releases_body() {
    let adapter = OpenAIAdapter::new();
    let (tx, rx) = futures::channel::mpsc::unbounded::<std::io::Result<Bytes>>();
    tx.unbounded_send(Ok(Bytes::from_static(
        b"data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n",
    )))
    .unwrap();

    let mut stream = adapter.parse_stream(rx.boxed());
    let first = stream.next().await.unwrap();
    assert_eq!(first.content, "first");

    drop(stream);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The aborted producer dropped the receiving half of the body
    assert!(tx.is_closed());
}

#[test]
fn test_classify_line() {
    use stream::{SseLine, classify_line};

    assert_eq!(classify_line("data: [DONE]"), SseLine::Done);
    assert_eq!(classify_line("data:{\"a\":1}"), SseLine::Data("{\"a\":1}"));
    assert_eq!(classify_line(": keep-alive"), SseLine::Ignored);
    assert_eq!(classify_line("event: ping"), SseLine::Ignored);
    assert_eq!(classify_line(""), SseLine::Ignored);
}

#[test]
fn test_rate_limited_and_unauthorized_for_every_adapter() {
    for adapter in all_adapters() {
        let limited = adapter.classify_error(429, "{\"error\":{\"message\":\"slow down\"}}");
        assert!(
            matches!(limited, ProviderError::RateLimited { .. }),
            "{} classified 429 as {:?}",
            adapter.name(),
            limited
        );

        let denied = adapter.classify_error(401, "not even json");
        assert!(
            matches!(denied, ProviderError::Unauthorized { .. }),
            "{} classified 401 as {:?}",
            adapter.name(),
            denied
        );
    }
}

#[test]
fn test_classify_server_not_found_and_unclassified() {
    let adapter = OpenAIAdapter::new();

    assert!(matches!(
        adapter.classify_error(503, ""),
        ProviderError::ServerError { status: 503, .. }
    ));
    assert!(matches!(
        AnthropicAdapter::new().classify_error(529, "{\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}"),
        ProviderError::ServerError { status: 529, .. }
    ));
    assert!(matches!(
        adapter.classify_error(404, ""),
        ProviderError::NotFound { .. }
    ));

    match adapter.classify_error(
        400,
        "{\"error\":{\"message\":\"bad field\",\"type\":\"invalid_request_error\"}}",
    ) {
        ProviderError::Unclassified {
            status,
            error_type,
            message,
        } => {
            assert_eq!(status, 400);
            assert_eq!(error_type.as_deref(), Some("invalid_request_error"));
            assert_eq!(message, "bad field");
        }
        other => panic!("unexpected classification {other:?}"),
    }

    match adapter.classify_error(418, "teapot") {
        ProviderError::Unclassified {
            error_type, message, ..
        } => {
            assert!(error_type.is_none());
            assert_eq!(message, "HTTP 418: teapot");
        }
        other => panic!("unexpected classification {other:?}"),
    }
}

#[test]
fn test_openai_optimize_fills_only_unset_fields() {
    let adapter = OpenAIAdapter::new();

    let optimized = adapter.optimize(ChatRequest::new("gpt-4o", "Write code to sort a list"));
    assert_eq!(optimized.temperature, Some(0.1));
    assert_eq!(optimized.max_tokens, Some(2048));
    assert_eq!(optimized.messages[0].role, MessageRole::System);
    assert_eq!(optimized.messages[0].content, DEFAULT_SYSTEM_PROMPT);
    assert_eq!(optimized.messages.len(), 2);

    let explicit = ChatRequest::new("gpt-4o", "Write code to sort a list")
        .with_temperature(0.9)
        .with_max_tokens(16);
    let optimized = adapter.optimize(explicit);
    assert_eq!(optimized.temperature, Some(0.9));
    assert_eq!(optimized.max_tokens, Some(16));
}

#[test]
fn test_openai_optimize_keeps_existing_system_message() {
    let adapter = OpenAIAdapter::new();
    let mut request = ChatRequest::new("gpt-4o", "hello");
    request.messages.insert(0, ChatMessage::system("be brief"));

    let optimized = adapter.optimize(request);

    assert_eq!(optimized.messages.len(), 2);
    assert_eq!(optimized.messages[0].content, "be brief");
    assert_eq!(optimized.temperature, None);
}

#[test]
fn test_deepseek_optimize() {
    let adapter = DeepSeekAdapter::new();

    let optimized = adapter.optimize(ChatRequest::new("deepseek-chat", "write a short story"));
    assert_eq!(optimized.temperature, Some(0.8));
    assert_eq!(optimized.max_tokens, Some(4096));
    assert_eq!(optimized.messages.len(), 1);

    let explicit = adapter.optimize(
        ChatRequest::new("deepseek-chat", "write a poem").with_temperature(0.2),
    );
    assert_eq!(explicit.temperature, Some(0.2));
}

#[test]
fn test_prompt_classification() {
    use super::provider::{looks_like_code_task, looks_like_creative_task};

    assert!(looks_like_code_task("Please REFACTOR this function"));
    assert!(looks_like_code_task("debug my script"));
    assert!(!looks_like_code_task("decoder ring"));
    assert!(looks_like_creative_task("Imagine a city under the sea"));
    assert!(!looks_like_creative_task("rewrite nothing"));
    assert!(!looks_like_code_task(""));
}

#[test]
fn test_batch_sizes() {
    assert_eq!(OpenAIAdapter::new().optimal_batch_size(), 20);
    assert_eq!(DeepSeekAdapter::new().optimal_batch_size(), 10);
    assert_eq!(AnthropicAdapter::new().optimal_batch_size(), 10);
}

#[test]
fn test_rate_limit_headers_per_family() {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit-requests", HeaderValue::from_static("500"));
    headers.insert("x-ratelimit-limit-tokens", HeaderValue::from_static("30000"));
    headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("1700000000"));

    let info = OpenAIAdapter::new().rate_limit_info(&headers);
    assert_eq!(info.requests_per_minute, Some(500));
    assert_eq!(info.tokens_per_minute, Some(30000));
    assert_eq!(info.reset_time.map(|t| t.timestamp()), Some(1_700_000_000));

    // DeepSeek reads different names and never guesses
    let info = DeepSeekAdapter::new().rate_limit_info(&headers);
    assert!(info.is_empty());

    let mut headers = HeaderMap::new();
    headers.insert("x-rpm-limit", HeaderValue::from_static("60"));
    let info = DeepSeekAdapter::new().rate_limit_info(&headers);
    assert_eq!(info.requests_per_minute, Some(60));
    assert_eq!(info.tokens_per_minute, None);
    assert_eq!(info.reset_time, None);
}

#[test]
fn test_relative_reset_durations() {
    let now = chrono::Utc::now();
    let reset = provider::parse_reset_value("6m0s", now).unwrap();
    assert_eq!((reset - now).num_seconds(), 360);

    let reset = provider::parse_reset_value("20ms", now).unwrap();
    assert_eq!((reset - now).num_milliseconds(), 20);

    assert!(provider::parse_reset_value("soon", now).is_none());
}

#[test]
fn test_anthropic_body_shape() {
    let adapter = AnthropicAdapter::new();
    let mut request = ChatRequest::new("claude-3-5-haiku", "describe")
        .with_tool(ToolSpec {
            name: "lookup".into(),
            description: "Look something up".into(),
            parameters: json!({"type": "object"}),
        });
    request.messages.insert(0, ChatMessage::system("sys"));
    request.messages[1] = ChatMessage::user("describe").with_image("data:image/png;base64,AAAA");

    let body = adapter.chat_body(&adapter.optimize(request));

    assert_eq!(body["system"], json!("sys"));
    assert_eq!(body["max_tokens"], json!(1024));
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["content"][0]["source"]["type"], json!("base64"));
    assert_eq!(body["tools"][0]["input_schema"], json!({"type": "object"}));
}

#[test]
fn test_extract_tool_call_variants() {
    let openai_body = json!({
        "choices": [{"message": {"tool_calls": [{"function": {
            "name": "get_current_weather",
            "arguments": "{\"location\":\"Boston\"}"
        }}]}}]
    });
    let call = OpenAIAdapter::new().extract_tool_call(&openai_body).unwrap();
    assert_eq!(call.name, "get_current_weather");
    assert_eq!(call.arguments["location"], json!("Boston"));

    let anthropic_body = json!({
        "content": [
            {"type": "text", "text": "checking"},
            {"type": "tool_use", "name": "get_current_weather", "input": {"location": "Paris"}}
        ]
    });
    let call = AnthropicAdapter::new().extract_tool_call(&anthropic_body).unwrap();
    assert_eq!(call.arguments["location"], json!("Paris"));

    let broken = json!({"choices": [{"message": {"tool_calls": [{"function": {
        "name": "x", "arguments": "{oops"
    }}]}}]});
    assert!(OpenAIAdapter::new().extract_tool_call(&broken).is_none());
}

#[test]
fn test_registry_resolution_is_case_insensitive() {
    let registry = AdapterRegistry::with_builtin();

    assert!(registry.resolve("OpenAI").is_ok());
    assert!(registry.resolve("DEEPSEEK").is_ok());
    assert_eq!(
        registry.resolve("mystery").err(),
        Some(UnknownProvider("mystery".to_string()))
    );
    assert_eq!(registry.providers(), vec!["anthropic", "deepseek", "openai"]);
}

#[test]
fn test_registry_last_write_wins() {
    let registry = AdapterRegistry::new();
    assert!(registry.register(Arc::new(OpenAIAdapter::named("synthetic"))).is_none());
    let replaced = registry.register(Arc::new(DeepSeekAdapter::named("Synthetic")));

    assert!(replaced.is_some());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.resolve("synthetic").unwrap().optimal_batch_size(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_and_resolve() {
    let registry = AdapterRegistry::with_builtin();
    let mut handles = Vec::new();

    for i in 0..64 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("provider-{}", i % 8);
            registry.register(adapter_for_family(AdapterFamily::OpenAI, &name));
            let resolved = registry.resolve(&name.to_uppercase()).unwrap();
            assert_eq!(resolved.name(), name);
            assert!(registry.resolve("openai").is_ok());
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(registry.len(), 3 + 8);
}

#[test]
fn test_family_parsing() {
    assert_eq!("OpenAI".parse::<AdapterFamily>(), Ok(AdapterFamily::OpenAI));
    assert_eq!("openai-compatible".parse::<AdapterFamily>(), Ok(AdapterFamily::OpenAI));
    assert!("cohere".parse::<AdapterFamily>().is_err());
}
