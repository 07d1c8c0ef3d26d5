use crate::adapter::{ChatMessage, ChatRequest, ProviderError, RateLimitInfo, ToolSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::{Duration, Instant};
use url::Url;

/// Upper bound on the raw evidence kept in a [`ProbeResult`]
pub const MAX_EVIDENCE_CHARS: usize = 512;

/// API credential. Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential(***)")
        }
    }
}

/// A provider endpoint the engine can probe. The name doubles as the key
/// into the adapter registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    pub base_url: Url,
    pub credential: Credential,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        credential: Credential,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            name: name.into(),
            base_url: Url::parse(base_url)?,
            credential,
        })
    }

    /// Join an API path onto the base URL, keeping any base path prefix
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

/// Capabilities a model claims to support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFeatures {
    pub streaming: bool,
    pub function_calling: bool,
    pub vision: bool,
    pub embeddings: bool,
}

impl Default for ModelFeatures {
    /// Undeclared capabilities are assumed present so that probing decides
    fn default() -> Self {
        Self {
            streaming: true,
            function_calling: true,
            vision: true,
            embeddings: true,
        }
    }
}

impl ModelFeatures {
    pub fn declares(&self, feature: FeatureKind) -> bool {
        match feature {
            FeatureKind::FunctionCalling => self.function_calling,
            FeatureKind::Vision => self.vision,
            FeatureKind::Embeddings => self.embeddings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub features: ModelFeatures,
}

impl Model {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            features: ModelFeatures::default(),
        }
    }

    pub fn with_features(mut self, features: ModelFeatures) -> Self {
        self.features = features;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    FunctionCalling,
    Vision,
    Embeddings,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 3] = [Self::FunctionCalling, Self::Vision, Self::Embeddings];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FunctionCalling => "function_calling",
            Self::Vision => "vision",
            Self::Embeddings => "embeddings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Existence,
    Responsiveness,
    Streaming,
    /// Transport optimization: does the endpoint compress responses
    Compression,
    Feature(FeatureKind),
}

impl ProbeKind {
    /// Streaming and the explicit feature probes form the feature ratio
    pub fn is_feature(&self) -> bool {
        matches!(self, Self::Streaming | Self::Feature(_))
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Existence => f.write_str("existence"),
            Self::Responsiveness => f.write_str("responsiveness"),
            Self::Streaming => f.write_str("streaming"),
            Self::Compression => f.write_str("compression"),
            Self::Feature(feature) => write!(f, "feature:{}", feature.as_str()),
        }
    }
}

/// A single probe to run. Built per probe and never persisted.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub provider: Provider,
    pub model: String,
    pub kind: ProbeKind,
    pub payload: ChatRequest,
    pub timeout: Duration,
}

impl ProbeRequest {
    /// Request with the standard payload for `kind`
    pub fn new(provider: Provider, model: impl Into<String>, kind: ProbeKind, timeout: Duration) -> Self {
        let model = model.into();
        let payload = default_payload(&model, kind);
        Self {
            provider,
            model,
            kind,
            payload,
            timeout,
        }
    }

    pub fn with_payload(mut self, payload: ChatRequest) -> Self {
        self.payload = payload;
        self
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.provider.name.to_lowercase(), self.model, self.kind)
    }
}

/// 1x1 PNG used by the vision probe
pub const VISION_PROBE_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8DwHwAFBQIAX8jx0gAAAABJRU5ErkJggg==";

pub const EMBEDDINGS_PROBE_INPUT: &str = "Hello world";

fn default_payload(model: &str, kind: ProbeKind) -> ChatRequest {
    match kind {
        ProbeKind::Existence => ChatRequest::new(model, ""),
        ProbeKind::Responsiveness => {
            ChatRequest::new(model, "Hello, please respond with just the word 'pong'.")
                .with_max_tokens(10)
        }
        ProbeKind::Streaming => ChatRequest::new(model, "Count from 1 to 5, separated by spaces.")
            .with_max_tokens(32)
            .streaming(true),
        ProbeKind::Compression => ChatRequest::new(model, "Say hello.").with_max_tokens(10),
        ProbeKind::Feature(FeatureKind::FunctionCalling) => {
            ChatRequest::new(model, "What is the weather like in Boston right now?")
                .with_max_tokens(128)
                .with_tool(weather_tool())
        }
        ProbeKind::Feature(FeatureKind::Vision) => {
            let mut request = ChatRequest::new(model, "").with_max_tokens(32);
            request.messages = vec![
                ChatMessage::user("What color is this image? Answer in one word.")
                    .with_image(VISION_PROBE_IMAGE),
            ];
            request
        }
        ProbeKind::Feature(FeatureKind::Embeddings) => {
            ChatRequest::new(model, EMBEDDINGS_PROBE_INPUT)
        }
    }
}

fn weather_tool() -> ToolSpec {
    ToolSpec {
        name: "get_current_weather".to_string(),
        description: "Get the current weather in a given location".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g. San Francisco, CA"
                },
                "unit": { "type": "string", "enum": ["celsius", "fahrenheit"] }
            },
            "required": ["location"]
        }),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeLatency {
    pub total: Duration,
    /// Time from dispatch to the first content-bearing chunk
    pub ttft: Option<Duration>,
}

impl ProbeLatency {
    pub fn since(started: Instant) -> Self {
        Self {
            total: started.elapsed(),
            ttft: None,
        }
    }
}

/// Outcome of one probe. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub passed: bool,
    pub status: Option<u16>,
    pub latency: ProbeLatency,
    pub error: Option<ProviderError>,
    pub evidence: String,
    #[serde(default)]
    pub rate_limit: RateLimitInfo,
    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(kind: ProbeKind, status: Option<u16>, latency: ProbeLatency, evidence: &str) -> Self {
        Self {
            kind,
            passed: true,
            status,
            latency,
            error: None,
            evidence: truncate_evidence(evidence),
            rate_limit: RateLimitInfo::default(),
            observed_at: Utc::now(),
        }
    }

    pub fn failure(
        kind: ProbeKind,
        status: Option<u16>,
        latency: ProbeLatency,
        error: ProviderError,
        evidence: &str,
    ) -> Self {
        Self {
            error: Some(error),
            passed: false,
            ..Self::success(kind, status, latency, evidence)
        }
    }

    /// The exchange worked but the response did not meet the pass criteria
    pub fn rejected(kind: ProbeKind, status: Option<u16>, latency: ProbeLatency, evidence: &str) -> Self {
        Self {
            passed: false,
            ..Self::success(kind, status, latency, evidence)
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitInfo) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Cut evidence down to [`MAX_EVIDENCE_CHARS`] on a char boundary
pub fn truncate_evidence(raw: &str) -> String {
    match raw.char_indices().nth(MAX_EVIDENCE_CHARS) {
        Some((cut, _)) => format!("{}…", &raw[..cut]),
        None => raw.to_string(),
    }
}

/// Probe thresholds and the configured feature probe set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub timeout_ms: u64,
    pub ttft_ceiling_ms: u64,
    pub total_ceiling_ms: u64,
    pub features: Vec<FeatureKind>,
    pub embedding_dimensions: Option<usize>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            ttft_ceiling_ms: 10_000,
            total_ceiling_ms: 60_000,
            features: FeatureKind::ALL.to_vec(),
            embedding_dimensions: None,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ttft_ceiling(&self) -> Duration {
        Duration::from_millis(self.ttft_ceiling_ms)
    }

    pub fn total_ceiling(&self) -> Duration {
        Duration::from_millis(self.total_ceiling_ms)
    }
}
