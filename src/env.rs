//! Environment constants and path utilities for modelprobe.
//!
//! Hardcoded file names, directory names and environment variables live here
//! so the configuration and storage layers agree on them.

use std::path::{Path, PathBuf};

/// Per-user and per-project application directory
pub const MODELPROBE_DIR_NAME: &str = ".modelprobe";

/// Configuration file name inside [`MODELPROBE_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name at a project root
pub const LOCAL_CONFIG_FILE_NAME: &str = "modelprobe.toml";

/// Directory holding stored verification results
pub const RESULTS_DIR_NAME: &str = "results";

/// System-wide configuration directory (Unix-like systems)
pub const SYSTEM_CONFIG_DIR: &str = "/etc/modelprobe";

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "modelprobe=info";

/// Environment variables read by the default provider entries
pub mod vars {
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const DEEPSEEK_API_KEY: &str = "DEEPSEEK_API_KEY";
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
}

/// `./modelprobe.toml`
pub fn project_config_file_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(LOCAL_CONFIG_FILE_NAME)
}

/// `./.modelprobe/config.toml`
pub fn local_config_file_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(MODELPROBE_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// `~/.modelprobe`
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(MODELPROBE_DIR_NAME)
}

/// `~/.modelprobe/config.toml`
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// `/etc/modelprobe/config.toml`
pub fn system_config_file_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
}

/// `~/.modelprobe/results`
pub fn user_results_dir_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(RESULTS_DIR_NAME)
}
