use super::provider::{
    DEFAULT_SYSTEM_PROMPT, ProviderAdapter, header_str, header_u64, looks_like_code_task,
    openai_stream_chunks, parse_reset_value,
};
use super::stream::{ByteStream, ChunkStream};
use super::types::{ChatMessage, ChatRequest, RateLimitInfo};
use chrono::Utc;
use reqwest::header::HeaderMap;

const CODE_TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_TOKENS: u32 = 2048;
const BATCH_SIZE: usize = 20;

/// Adapter for OpenAI and OpenAI-compatible endpoints.
///
/// Providers that mirror the OpenAI API (Groq, Together, local gateways)
/// reuse this adapter under their own name via [`OpenAIAdapter::named`].
#[derive(Debug, Clone)]
pub struct OpenAIAdapter {
    name: String,
}

impl OpenAIAdapter {
    pub fn new() -> Self {
        Self::named("openai")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for OpenAIAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for OpenAIAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn optimize(&self, mut request: ChatRequest) -> ChatRequest {
        if request.temperature.is_none() && looks_like_code_task(&request.prompt_text()) {
            request.temperature = Some(CODE_TEMPERATURE);
        }
        if request.max_tokens.is_none() {
            request.max_tokens = Some(DEFAULT_MAX_TOKENS);
        }
        if !request.starts_with_system() {
            request
                .messages
                .insert(0, ChatMessage::system(DEFAULT_SYSTEM_PROMPT));
        }
        request
    }

    fn parse_stream(&self, body: ByteStream) -> ChunkStream {
        ChunkStream::spawn(body, openai_stream_chunks)
    }

    fn optimal_batch_size(&self) -> usize {
        BATCH_SIZE
    }

    fn rate_limit_info(&self, headers: &HeaderMap) -> RateLimitInfo {
        RateLimitInfo {
            requests_per_minute: header_u64(headers, "x-ratelimit-limit-requests"),
            tokens_per_minute: header_u64(headers, "x-ratelimit-limit-tokens"),
            reset_time: header_str(headers, "x-ratelimit-reset-requests")
                .and_then(|raw| parse_reset_value(raw, Utc::now())),
        }
    }
}
