use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a chat message in the canonical request shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Single chat message. `image_url` carries an optional image part for
/// vision requests; adapters decide how to put it on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            image_url: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            image_url: None,
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

/// Function tool offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Tool invocation extracted from a provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Provider-neutral chat request. Optional fields left as `None` are the
/// ones an adapter may fill in during `optimize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: None,
            temperature: None,
            stream: false,
            tools: Vec::new(),
        }
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    /// Concatenated text of all user messages, used for prompt heuristics
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn starts_with_system(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == MessageRole::System)
    }
}

/// One decoded element of a streaming response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingChunk {
    pub content: String,
    pub finish: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StreamingChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Default::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            finish: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_content_bearing(&self) -> bool {
        self.error.is_none() && !self.content.is_empty()
    }
}

/// Rate-limit metadata read from response headers. Fields stay `None`
/// unless the provider actually sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub requests_per_minute: Option<u64>,
    pub tokens_per_minute: Option<u64>,
    pub reset_time: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    pub fn is_empty(&self) -> bool {
        self.requests_per_minute.is_none()
            && self.tokens_per_minute.is_none()
            && self.reset_time.is_none()
    }
}

/// Failure taxonomy shared by adapters and probes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("Not found: {message}")]
    NotFound { message: String },
    #[error("Transport error: {message}")]
    Transport { message: String },
    #[error("Parse error: {message}")]
    Parse { message: String },
    #[error("Unclassified error ({status}): {message}")]
    Unclassified {
        status: u16,
        error_type: Option<String>,
        message: String,
    },
}

impl ProviderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Short stable label, handy for logs and event payloads
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NotFound { .. } => "not_found",
            Self::Transport { .. } => "transport_error",
            Self::Parse { .. } => "parse_error",
            Self::Unclassified { .. } => "unclassified",
        }
    }
}
