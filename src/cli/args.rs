//! Command line argument parsing
//!
//! Subcommands:
//! - `verify`: Verify one model of a configured provider
//! - `discover`: List the models a provider exposes
//! - `providers`: List configured providers and their adapters
//! - `history`: Show stored verification results
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default user configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Verify(VerifyConfig),
    Discover {
        provider: String,
        config_override: Option<PathBuf>,
    },
    Providers {
        config_override: Option<PathBuf>,
    },
    History(HistoryConfig),
    ShowConfig,
    InitConfig,
}

#[derive(Debug, PartialEq, Eq)]
pub struct VerifyConfig {
    pub provider: String,
    pub models: Vec<String>,
    pub force: bool,
    pub json: bool,
    pub config_override: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HistoryConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub limit: usize,
    pub json: bool,
    pub config_override: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "modelprobe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verify that LLM endpoints are reachable, responsive and feature-compliant")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Verify one or more models of a provider
    Verify {
        /// Provider name as configured
        #[arg(short = 'p', long = "provider")]
        provider: String,
        /// Model id (can be used multiple times)
        #[arg(short = 'm', long = "model", required = true)]
        models: Vec<String>,
        /// Ignore cached results and probe again
        #[arg(short = 'f', long = "force")]
        force: bool,
        /// Print results as JSON
        #[arg(long = "json")]
        json: bool,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// List models exposed by a provider
    Discover {
        #[arg(short = 'p', long = "provider")]
        provider: String,
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// List configured providers
    Providers {
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Show stored verification results, newest first
    History {
        #[arg(short = 'p', long = "provider")]
        provider: Option<String>,
        #[arg(short = 'm', long = "model")]
        model: Option<String>,
        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: usize,
        #[arg(long = "json")]
        json: bool,
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Create ~/.modelprobe/config.toml with defaults
    InitConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Verify {
                provider,
                models,
                force,
                json,
                config,
            }) => {
                if models.iter().any(|m| m.trim().is_empty()) {
                    return Err("Model ids must not be empty".to_string());
                }
                Ok(ExecutionMode::Verify(VerifyConfig {
                    provider: provider.clone(),
                    models: models.clone(),
                    force: *force,
                    json: *json,
                    config_override: config.clone(),
                }))
            }
            Some(Commands::Discover { provider, config }) => Ok(ExecutionMode::Discover {
                provider: provider.clone(),
                config_override: config.clone(),
            }),
            Some(Commands::Providers { config }) => Ok(ExecutionMode::Providers {
                config_override: config.clone(),
            }),
            Some(Commands::History {
                provider,
                model,
                limit,
                json,
                config,
            }) => Ok(ExecutionMode::History(HistoryConfig {
                provider: provider.clone(),
                model: model.clone(),
                limit: *limit,
                json: *json,
                config_override: config.clone(),
            })),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig) => Ok(ExecutionMode::InitConfig),
            None => Err(
                "No command specified. Use 'modelprobe --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}
