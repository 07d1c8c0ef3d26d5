pub mod anthropic;
pub mod deepseek;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod types;

#[cfg(test)]
pub mod tests;

pub use anthropic::AnthropicAdapter;
pub use deepseek::DeepSeekAdapter;
pub use openai::OpenAIAdapter;
pub use provider::{DEFAULT_SYSTEM_PROMPT, ProviderAdapter, classify_status, parse_error_body};
pub use registry::{AdapterFamily, AdapterRegistry, UnknownProvider, adapter_for_family};
pub use stream::{ByteStream, ChunkStream};
pub use types::*;
