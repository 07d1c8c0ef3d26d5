use super::provider::{ProviderAdapter, header_u64, looks_like_creative_task, openai_stream_chunks};
use super::stream::{ByteStream, ChunkStream};
use super::types::{ChatRequest, RateLimitInfo};
use reqwest::header::HeaderMap;

const CREATIVE_TEMPERATURE: f32 = 0.8;
const DEFAULT_MAX_TOKENS: u32 = 4096;
const BATCH_SIZE: usize = 10;

/// DeepSeek speaks the OpenAI wire format but has its own tuning, header
/// names and a tighter concurrency ceiling.
#[derive(Debug, Clone)]
pub struct DeepSeekAdapter {
    name: String,
}

impl DeepSeekAdapter {
    pub fn new() -> Self {
        Self::named("deepseek")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for DeepSeekAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for DeepSeekAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn optimize(&self, mut request: ChatRequest) -> ChatRequest {
        if request.temperature.is_none() && looks_like_creative_task(&request.prompt_text()) {
            request.temperature = Some(CREATIVE_TEMPERATURE);
        }
        if request.max_tokens.is_none() {
            request.max_tokens = Some(DEFAULT_MAX_TOKENS);
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
            requests_per_minute: header_u64(headers, "x-rpm-limit"),
            tokens_per_minute: header_u64(headers, "x-tpm-limit"),
            reset_time: None,
        }
    }
}
