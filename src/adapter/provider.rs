use super::stream::{ByteStream, ChunkStream};
use super::types::{
    ChatMessage, ChatRequest, MessageRole, ProviderError, RateLimitInfo, ToolCall, ToolSpec,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use std::sync::OnceLock;

/// Per-provider behaviour behind one polymorphic abstraction.
///
/// The first six methods are the capability set every provider family must
/// supply. The remaining methods describe the wire shape of the provider's
/// HTTP API; their defaults follow the OpenAI chat-completions layout, which
/// most providers mirror.
pub trait ProviderAdapter: Send + Sync {
    /// Provider name used as the registry key
    fn name(&self) -> &str;

    /// Fill provider-tuned defaults into fields the caller left unset
    fn optimize(&self, request: ChatRequest) -> ChatRequest;

    /// Decode a server-sent-event body into a lazy chunk sequence
    fn parse_stream(&self, body: ByteStream) -> ChunkStream;

    /// Map an HTTP failure onto the shared taxonomy
    fn classify_error(&self, status: u16, body: &str) -> ProviderError {
        classify_status(status, body)
    }

    /// Safe number of concurrent verifications against this provider
    fn optimal_batch_size(&self) -> usize;

    /// Extract rate-limit metadata from response headers
    fn rate_limit_info(&self, headers: &HeaderMap) -> RateLimitInfo;

    fn chat_path(&self) -> &str {
        "/chat/completions"
    }

    fn models_path(&self) -> &str {
        "/models"
    }

    fn model_path(&self, model: &str) -> String {
        format!("{}/{}", self.models_path(), model)
    }

    /// `None` when the provider has no embeddings endpoint
    fn embeddings_path(&self) -> Option<&str> {
        Some("/embeddings")
    }

    fn auth_headers(&self, credential: &str) -> Vec<(&'static str, String)> {
        vec![("authorization", format!("Bearer {credential}"))]
    }

    fn chat_body(&self, request: &ChatRequest) -> Value {
        openai_chat_body(request)
    }

    fn embeddings_body(&self, model: &str, input: &str) -> Value {
        json!({ "model": model, "input": input })
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_tool_call(&self, body: &Value) -> Option<ToolCall> {
        let function = body.pointer("/choices/0/message/tool_calls/0/function")?;
        let name = function.get("name")?.as_str()?.to_string();
        // Arguments arrive as a JSON document encoded in a string
        let arguments = match function.get("arguments")? {
            Value::String(raw) => serde_json::from_str(raw).ok()?,
            other => other.clone(),
        };
        Some(ToolCall { name, arguments })
    }

    fn extract_embedding(&self, body: &Value) -> Option<Vec<f64>> {
        numeric_vector(body.pointer("/data/0/embedding")?)
    }

    fn parse_model_list(&self, body: &Value) -> Vec<String> {
        body.get("data")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default system instruction injected by adapters that want one
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Provide accurate and well-structured responses.";

pub(crate) fn looks_like_code_task(prompt: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    matches_prompt(
        &RE,
        r"(?i)\b(code|coding|function|implement|debug|refactor|compile|script)\b",
        prompt,
    )
}

pub(crate) fn looks_like_creative_task(prompt: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    matches_prompt(&RE, r"(?i)\b(creative|write|story|poem|imagine)\b", prompt)
}

/// A pattern that fails to compile matches nothing
fn matches_prompt(cell: &OnceLock<Option<Regex>>, pattern: &str, prompt: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(prompt))
}

/// Taxonomy shared by all adapters: status decides the class, the body only
/// enriches the message.
pub fn classify_status(status: u16, body: &str) -> ProviderError {
    let parsed = parse_error_body(body);
    let message = parsed
        .as_ref()
        .map(|(_, message)| message.clone())
        .unwrap_or_else(|| raw_message(status, body));

    match status {
        401 => ProviderError::Unauthorized { message },
        429 => ProviderError::RateLimited { message },
        404 => ProviderError::NotFound { message },
        500..=599 => ProviderError::ServerError { status, message },
        _ => match parsed {
            Some((error_type, message)) => ProviderError::Unclassified {
                status,
                error_type,
                message,
            },
            None => ProviderError::Unclassified {
                status,
                error_type: None,
                message: raw_message(status, body),
            },
        },
    }
}

fn raw_message(status: u16, body: &str) -> String {
    if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.trim())
    }
}

/// Pull `(type, message)` out of the common provider error envelopes:
/// `{"error":{"type","message"}}`, `{"error":"..."}` and `{"message":"..."}`.
pub fn parse_error_body(body: &str) -> Option<(Option<String>, String)> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error") {
        Some(Value::Object(error)) => {
            let message = error.get("message").and_then(Value::as_str)?.to_string();
            let error_type = error
                .get("type")
                .or_else(|| error.get("code"))
                .and_then(|t| match t {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
            Some((error_type, message))
        }
        Some(Value::String(message)) => Some((None, message.clone())),
        _ => value
            .get("message")
            .and_then(Value::as_str)
            .map(|message| (None, message.to_string())),
    }
}

pub fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

/// Reset values come either as unix seconds or as a relative duration such
/// as `20ms`, `1s` or `6m0s`.
pub fn parse_reset_value(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<i64>() {
        return if number > 1_000_000_000 {
            DateTime::from_timestamp(number, 0)
        } else {
            Some(now + chrono::Duration::seconds(number))
        };
    }
    parse_compound_duration(raw).map(|d| now + d)
}

fn parse_compound_duration(raw: &str) -> Option<chrono::Duration> {
    let mut total_ms: f64 = 0.0;
    let mut number = String::new();
    let mut chars = raw.chars().peekable();
    let mut parsed_any = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        let factor = match c {
            'h' => 3_600_000.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1.0
            }
            'm' => 60_000.0,
            's' => 1_000.0,
            _ => return None,
        };
        total_ms += value * factor;
        parsed_any = true;
    }

    if !number.is_empty() || !parsed_any {
        return None;
    }
    Some(chrono::Duration::milliseconds(total_ms.round() as i64))
}

pub(crate) fn numeric_vector(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

/// Canonical OpenAI-style chat body
pub fn openai_chat_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(openai_message).collect();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": request.stream,
    });

    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(openai_tool).collect());
        body["tool_choice"] = json!("auto");
    }
    body
}

fn openai_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };
    match &message.image_url {
        Some(url) => json!({
            "role": role,
            "content": [
                { "type": "text", "text": message.content },
                { "type": "image_url", "image_url": { "url": url } },
            ],
        }),
        None => json!({ "role": role, "content": message.content }),
    }
}

fn openai_tool(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

/// Chunk extraction for OpenAI-compatible streams
pub fn openai_stream_chunks(value: &Value) -> Vec<super::types::StreamingChunk> {
    use super::types::StreamingChunk;

    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return vec![StreamingChunk::failed(message)];
    }

    let mut chunks = Vec::new();
    if let Some(content) = value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
    {
        let mut chunk = StreamingChunk::content(content);
        if let Some(id) = value.get("id") {
            chunk = chunk.with_metadata("id", id.clone());
        }
        chunks.push(chunk);
    }

    if let Some(reason) = value
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
    {
        chunks.push(StreamingChunk::finished().with_metadata("finish_reason", json!(reason)));
    }
    chunks
}
