use super::anthropic::AnthropicAdapter;
use super::deepseek::DeepSeekAdapter;
use super::openai::OpenAIAdapter;
use super::provider::ProviderAdapter;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Lookup of an unregistered provider name. Recoverable: callers report it
/// rather than treating it as a defect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No adapter registered for provider '{0}'")]
pub struct UnknownProvider(pub String);

/// Provider family known to [`adapter_for_family`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterFamily {
    OpenAI,
    DeepSeek,
    Anthropic,
}

impl std::str::FromStr for AdapterFamily {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" => Ok(Self::OpenAI),
            "deepseek" => Ok(Self::DeepSeek),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Build an adapter of the given family registered under a custom name
pub fn adapter_for_family(family: AdapterFamily, name: &str) -> Arc<dyn ProviderAdapter> {
    match family {
        AdapterFamily::OpenAI => Arc::new(OpenAIAdapter::named(name)),
        AdapterFamily::DeepSeek => Arc::new(DeepSeekAdapter::named(name)),
        AdapterFamily::Anthropic => Arc::new(AnthropicAdapter::named(name)),
    }
}

/// Name-keyed adapter lookup, safe for concurrent registration and reads.
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<DashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in provider families
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(OpenAIAdapter::new()));
        registry.register(Arc::new(DeepSeekAdapter::new()));
        registry.register(Arc::new(AnthropicAdapter::new()));
        registry
    }

    /// Register an adapter under its lowercased name. Last write wins; the
    /// replaced adapter is returned.
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) -> Option<Arc<dyn ProviderAdapter>> {
        let key = adapter.name().to_lowercase();
        let previous = self.adapters.insert(key.clone(), adapter);
        if previous.is_some() {
            info!("Replaced adapter for provider '{}'", key);
        } else {
            debug!("Registered adapter for provider '{}'", key);
        }
        previous
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, UnknownProvider> {
        self.adapters
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| UnknownProvider(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(&name.to_lowercase())
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
