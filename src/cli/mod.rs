//! CLI-specific functionality for modelprobe
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, ExecutionMode, HistoryConfig, VerifyConfig};
pub use config::{
    ConfigDiscovery, ConfigError, EngineConfig, ModelEntry, ProviderEntry, StoreSettings,
};
