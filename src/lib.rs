//! # modelprobe
//!
//! A verification engine for large-language-model endpoints. It checks that
//! models exposed by third-party providers are reachable, responsive and
//! feature-compliant, and turns those observations into a comparable
//! 0-100 capability score.
//!
//! ## Architecture Overview
//!
//! - **[`adapter`]**: Provider adapters and the name-keyed adapter registry
//! - **[`probe`]**: Probe client issuing existence, responsiveness, streaming,
//!   compression and feature exchanges
//! - **[`scoring`]**: Pure score calculator and capability categories
//! - **[`orchestrator`]**: Per-model verification with result history
//! - **[`cache`]**: Fast in-process tier in front of an optional distributed tier
//! - **[`notify`]**: Bounded notification queue with Slack, Matrix, Telegram
//!   and email delivery
//! - **[`engine`]**: Owns and wires every component
//!
//! ## Features
//!
//! ### 🔌 Provider Adapters
//! - **OpenAI-compatible, DeepSeek and Anthropic** request shaping
//! - **Error classification**: 401, 429, 404 and 5xx map to typed errors
//! - **Rate-limit headers** read from every probe response
//! - **Runtime registration** of adapters under any provider name
//!
//! ### 🔍 Probing
//! - **Deadlines on every exchange**, including streamed ones
//! - **Time to first token** measured on cancellable SSE streams
//! - **Feature probes** for function calling, vision and embeddings
//!
//! ### 💾 Caching and History
//! - **Per-key serialization**: concurrent callers share one verification
//! - **TTL cache** with background expiry and optional Redis tier
//! - **Result store** kept in memory or as JSON documents on disk
//!
//! ### 📣 Notifications
//! - **Severity routing** across configured channels
//! - **Backpressure**: producers wait a bounded time, then get `QueueFull`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modelprobe::{EngineConfig, VerificationEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = VerificationEngine::new(EngineConfig::default()).await?;
//!
//!     let result = engine.verify("deepseek", "deepseek-chat", false).await?;
//!     println!("Score: {} ({})", result.score, result.category);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Provider adapter contract and the adapter registry.
///
/// Each adapter shapes requests for one provider family, parses its
/// streaming wire format and classifies its error payloads.
pub mod adapter;

/// Probe client and probe data model.
pub mod probe;

/// Capability scoring.
pub mod scoring;

/// Verification orchestration and the result store collaborator.
pub mod orchestrator;

/// Multi-level result cache.
pub mod cache;

/// Verification events and the in-process event bus.
pub mod events;

/// Notification dispatch over chat, bot and email channels.
pub mod notify;

/// Engine construction and lifecycle.
pub mod engine;

/// Environment constants and path utilities.
///
/// Centralizes all hardcoded paths and file names used by configuration
/// discovery and result storage.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use adapter::{AdapterRegistry, ProviderAdapter, ProviderError};
pub use cli::{ConfigDiscovery, EngineConfig};
pub use engine::{EngineError, VerificationEngine};
pub use events::{Event, EventBus, EventHandler, EventType, Severity};
pub use orchestrator::{VerificationOrchestrator, VerificationResult};
pub use probe::{Model, ProbeClient, ProbeKind, ProbeResult, Provider};
pub use scoring::{CapabilityCategory, ScoreCalculator};
