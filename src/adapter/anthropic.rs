use super::provider::{ProviderAdapter, header_str, header_u64, looks_like_code_task};
use super::stream::{ByteStream, ChunkStream};
use super::types::{ChatMessage, ChatRequest, MessageRole, RateLimitInfo, StreamingChunk, ToolCall};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde_json::{Value, json};

const API_VERSION: &str = "2023-06-01";
const CODE_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const BATCH_SIZE: usize = 10;

/// Adapter for the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    name: String,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::named("anthropic")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn optimize(&self, mut request: ChatRequest) -> ChatRequest {
        if request.temperature.is_none() && looks_like_code_task(&request.prompt_text()) {
            request.temperature = Some(CODE_TEMPERATURE);
        }
        // max_tokens is mandatory on this API
        if request.max_tokens.is_none() {
            request.max_tokens = Some(DEFAULT_MAX_TOKENS);
        }
        request
    }

    fn parse_stream(&self, body: ByteStream) -> ChunkStream {
        ChunkStream::spawn(body, anthropic_stream_chunks)
    }

    fn optimal_batch_size(&self) -> usize {
        BATCH_SIZE
    }

    fn rate_limit_info(&self, headers: &HeaderMap) -> RateLimitInfo {
        RateLimitInfo {
            requests_per_minute: header_u64(headers, "anthropic-ratelimit-requests-limit"),
            tokens_per_minute: header_u64(headers, "anthropic-ratelimit-tokens-limit"),
            reset_time: header_str(headers, "anthropic-ratelimit-requests-reset")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc)),
        }
    }

    fn chat_path(&self) -> &str {
        "/messages"
    }

    fn embeddings_path(&self) -> Option<&str> {
        None
    }

    fn auth_headers(&self, credential: &str) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", credential.to_string()),
            ("anthropic-version", API_VERSION.to_string()),
        ]
    }

    fn chat_body(&self, request: &ChatRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(anthropic_message)
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": request.stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        content_blocks(body)
            .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_tool_call(&self, body: &Value) -> Option<ToolCall> {
        let block = content_blocks(body)
            .find(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))?;
        Some(ToolCall {
            name: block.get("name")?.as_str()?.to_string(),
            arguments: block.get("input")?.clone(),
        })
    }
}

fn content_blocks(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn anthropic_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        MessageRole::Assistant => "assistant",
        _ => "user",
    };
    match &message.image_url {
        Some(url) => json!({
            "role": role,
            "content": [
                image_block(url),
                { "type": "text", "text": message.content },
            ],
        }),
        None => json!({ "role": role, "content": message.content }),
    }
}

/// Data URLs become inline base64 sources, anything else a URL source
fn image_block(url: &str) -> Value {
    let inline = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"));
    match inline {
        Some((media_type, data)) => json!({
            "type": "image",
            "source": { "type": "base64", "media_type": media_type, "data": data },
        }),
        None => json!({
            "type": "image",
            "source": { "type": "url", "url": url },
        }),
    }
}

/// Event-typed stream: text arrives in `content_block_delta`, the message
/// ends with `message_stop`.
pub fn anthropic_stream_chunks(value: &Value) -> Vec<StreamingChunk> {
    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => value
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(|text| vec![StreamingChunk::content(text)])
            .unwrap_or_default(),
        Some("message_stop") => vec![StreamingChunk::finished()],
        Some("error") => {
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("stream error");
            vec![StreamingChunk::failed(message)]
        }
        _ => Vec::new(),
    }
}
