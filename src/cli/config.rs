//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./modelprobe.toml or ./.modelprobe/config.toml
//! 2. User config: ~/.modelprobe/config.toml
//! 3. System config: /etc/modelprobe/config.toml
//! 4. Built-in defaults

use crate::adapter::AdapterFamily;
use crate::cache::CacheConfig;
use crate::env;
use crate::notify::{NotificationSettings, smtp};
use crate::probe::{Credential, Model, ModelFeatures, ProbeSettings, Provider};
use crate::scoring::ScoringWeights;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Provider '{0}' is not configured")]
    UnknownProvider(String),
    #[error("Provider '{provider}' reads its key from ${variable}, which is not set")]
    MissingCredential { provider: String, variable: String },
}

/// A model listed under a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub features: ModelFeatures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default = "default_family")]
    pub family: String,
    pub base_url: String,
    /// Inline key. Takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

fn default_family() -> String {
    "openai-compatible".to_string()
}

impl ProviderEntry {
    pub fn family(&self) -> Result<AdapterFamily, ConfigError> {
        self.family.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "provider '{}' has unknown family '{}'",
                self.name, self.family
            ))
        })
    }

    /// Resolve the key. No key configured at all yields an empty credential.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(Credential::new(key.clone()));
        }
        match &self.api_key_env {
            Some(variable) => std_env::var(variable).map(Credential::new).map_err(|_| {
                ConfigError::MissingCredential {
                    provider: self.name.clone(),
                    variable: variable.clone(),
                }
            }),
            None => Ok(Credential::default()),
        }
    }

    pub fn to_provider(&self) -> Result<Provider, ConfigError> {
        Provider::new(self.name.clone(), &self.base_url, self.credential()?).map_err(|e| {
            ConfigError::Invalid(format!("provider '{}' base_url: {e}", self.name))
        })
    }

    /// The configured model, or one with every feature assumed present
    pub fn model(&self, id: &str) -> Model {
        self.models
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| Model::new(entry.id.clone(), self.name.clone()).with_features(entry.features))
            .unwrap_or_else(|| Model::new(id, self.name.clone()))
    }

    pub fn models(&self) -> Vec<Model> {
        self.models.iter().map(|entry| self.model(&entry.id)).collect()
    }
}

/// Where verification history is kept. Without a directory results stay
/// in memory for the life of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let provider = |name: &str, family: &str, base_url: &str, variable: &str| ProviderEntry {
            name: name.to_string(),
            family: family.to_string(),
            base_url: base_url.to_string(),
            api_key: None,
            api_key_env: Some(variable.to_string()),
            models: Vec::new(),
        };

        Self {
            providers: vec![
                provider("openai", "openai", "https://api.openai.com/v1", env::vars::OPENAI_API_KEY),
                provider("deepseek", "deepseek", "https://api.deepseek.com/v1", env::vars::DEEPSEEK_API_KEY),
                provider("anthropic", "anthropic", "https://api.anthropic.com/v1", env::vars::ANTHROPIC_API_KEY),
            ],
            probe: ProbeSettings::default(),
            cache: CacheConfig::default(),
            scoring: ScoringWeights::default(),
            notifications: NotificationSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Point an unset store at `<home>/.modelprobe/results` so history
    /// survives between runs
    pub fn with_default_store_in(mut self, home_dir: &Path) -> Self {
        if self.store.directory.is_none() {
            self.store.directory = Some(env::user_results_dir_path(home_dir));
        }
        self
    }

    /// Case-insensitive provider lookup
    pub fn provider(&self, name: &str) -> Result<&ProviderEntry, ConfigError> {
        self.providers
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.providers {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::Invalid("provider name must not be empty".into()));
            }
            if !seen.insert(entry.name.to_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' is configured twice",
                    entry.name
                )));
            }
            entry.family()?;
            url::Url::parse(&entry.base_url).map_err(|e| {
                ConfigError::Invalid(format!("provider '{}' base_url: {e}", entry.name))
            })?;
        }

        validate_probe(&self.probe)?;
        validate_cache(&self.cache)?;
        validate_notifications(&self.notifications)?;
        self.scoring.validate().map_err(ConfigError::Invalid)
    }

    pub fn update_probe(&mut self, probe: ProbeSettings) -> Result<(), ConfigError> {
        validate_probe(&probe)?;
        self.probe = probe;
        Ok(())
    }

    pub fn update_cache(&mut self, cache: CacheConfig) -> Result<(), ConfigError> {
        validate_cache(&cache)?;
        self.cache = cache;
        Ok(())
    }

    pub fn update_notifications(
        &mut self,
        notifications: NotificationSettings,
    ) -> Result<(), ConfigError> {
        validate_notifications(&notifications)?;
        self.notifications = notifications;
        Ok(())
    }

    pub fn update_scoring(&mut self, scoring: ScoringWeights) -> Result<(), ConfigError> {
        scoring.validate().map_err(ConfigError::Invalid)?;
        self.scoring = scoring;
        Ok(())
    }
}

fn validate_probe(probe: &ProbeSettings) -> Result<(), ConfigError> {
    if probe.timeout_ms == 0 || probe.ttft_ceiling_ms == 0 || probe.total_ceiling_ms == 0 {
        return Err(ConfigError::Invalid(
            "probe timeout and ceilings must be greater than zero".into(),
        ));
    }
    if probe.ttft_ceiling_ms > probe.total_ceiling_ms {
        return Err(ConfigError::Invalid(format!(
            "ttft ceiling {}ms exceeds total ceiling {}ms",
            probe.ttft_ceiling_ms, probe.total_ceiling_ms
        )));
    }
    if probe.embedding_dimensions == Some(0) {
        return Err(ConfigError::Invalid("embedding_dimensions must be positive".into()));
    }
    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.default_ttl_secs == 0 {
        return Err(ConfigError::Invalid("cache default_ttl_secs must be positive".into()));
    }
    if cache.redis_url.is_some() && cache.key_prefix.is_empty() {
        return Err(ConfigError::Invalid("cache key_prefix must be set with redis_url".into()));
    }
    Ok(())
}

fn validate_notifications(notifications: &NotificationSettings) -> Result<(), ConfigError> {
    if notifications.queue_capacity == 0 || notifications.workers == 0 {
        return Err(ConfigError::Invalid(
            "notification queue_capacity and workers must be positive".into(),
        ));
    }
    if let Some(email) = &notifications.email {
        if email.to.is_empty() {
            return Err(ConfigError::Invalid(
                "email notifications need at least one recipient".into(),
            ));
        }
        smtp::check_settings(email).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }
    Ok(())
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load an explicit file, or discover one using the hierarchy
    pub fn load(explicit: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                EngineConfig::from_toml_file(path)
            }
            None => Self::discover_config(),
        }
    }

    /// Load like [`Self::load`], then default the result store to the
    /// user's results directory
    pub fn load_with_user_store(explicit: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        let config = Self::load(explicit)?;
        Ok(match Self::get_home_dir() {
            Some(home_dir) => config.with_default_store_in(&home_dir),
            None => {
                warn!("Could not determine home directory; results are kept in memory");
                config
            }
        })
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<EngineConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return EngineConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(EngineConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::project_config_file_path(&current_dir));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(env::system_config_file_path());

        candidates
    }

    pub fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> Result<PathBuf, ConfigError> {
        let home_dir = Self::get_home_dir().ok_or_else(|| {
            ConfigError::Invalid("could not determine home directory".into())
        })?;
        Self::create_default_config_in(&home_dir)
    }

    /// Write `~/.modelprobe/config.toml` under `home_dir` unless it exists
    pub fn create_default_config_in(home_dir: &Path) -> Result<PathBuf, ConfigError> {
        let config_dir = env::user_config_dir_path(home_dir);
        let config_path = env::user_config_file_path(home_dir);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| ConfigError::Io {
                path: config_dir.clone(),
                message: e.to_string(),
            })?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if !config_path.exists() {
            EngineConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        } else {
            warn!("Configuration file already exists: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        if let Some(found) = Self::find_config_file() {
            println!("Active configuration: {:?}", found);
        } else {
            println!("Active configuration: Built-in defaults");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.providers.len(), 3);
        assert!(config.provider("OpenAI").is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized = EngineConfig::from_toml_str(&toml_string).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut original = EngineConfig::default();
        original.probe.timeout_ms = 5_000;
        original.to_toml_file(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = EngineConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(loaded.probe.timeout_ms, 5_000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [[providers]]
            name = "local"
            base_url = "http://localhost:11434/v1"
            models = [{ id = "llama3", features = { vision = false } }]

            [probe]
            timeout_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.providers.len(), 1);
        let local = config.provider("LOCAL").unwrap();
        assert_eq!(local.family().unwrap(), AdapterFamily::OpenAI);
        assert!(local.credential().unwrap().is_empty());

        let model = local.model("llama3");
        assert!(!model.features.vision);
        assert!(model.features.streaming);
        assert!(local.model("unlisted").features.vision);

        assert_eq!(config.probe.timeout_ms, 2_000);
        assert_eq!(config.probe.ttft_ceiling_ms, 10_000);
        assert_eq!(config.cache.default_ttl_secs, 3_600);
        assert_eq!(config.notifications.queue_capacity, 100);
    }

    #[test]
    fn test_validation_rejects_bad_documents() {
        let duplicate = r#"
            [[providers]]
            name = "a"
            base_url = "http://a"
            [[providers]]
            name = "A"
            base_url = "http://b"
        "#;
        assert!(matches!(
            EngineConfig::from_toml_str(duplicate),
            Err(ConfigError::Invalid(_))
        ));

        let bad_family = r#"
            [[providers]]
            name = "x"
            family = "cobol"
            base_url = "http://x"
        "#;
        assert!(EngineConfig::from_toml_str(bad_family).is_err());

        assert!(matches!(
            EngineConfig::from_toml_str("[cache]\ndefault_ttl_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("providers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_typed_updates_validate_before_applying() {
        let mut config = EngineConfig::default();

        let bad_probe = ProbeSettings {
            ttft_ceiling_ms: 90_000,
            ..ProbeSettings::default()
        };
        assert!(config.update_probe(bad_probe).is_err());
        assert_eq!(config.probe, ProbeSettings::default());

        let good_probe = ProbeSettings {
            timeout_ms: 1_000,
            ..ProbeSettings::default()
        };
        config.update_probe(good_probe.clone()).unwrap();
        assert_eq!(config.probe, good_probe);

        assert!(
            config
                .update_notifications(NotificationSettings {
                    workers: 0,
                    ..NotificationSettings::default()
                })
                .is_err()
        );
        assert!(
            config
                .update_cache(CacheConfig {
                    default_ttl_secs: 0,
                    ..CacheConfig::default()
                })
                .is_err()
        );
        assert!(
            config
                .update_scoring(ScoringWeights {
                    existence: 0.9,
                    ..ScoringWeights::default()
                })
                .is_err()
        );
    }

    #[test]
    #[serial]
    fn test_credential_resolution_from_environment() {
        let entry = ProviderEntry {
            name: "envy".into(),
            family: "openai".into(),
            base_url: "http://localhost".into(),
            api_key: None,
            api_key_env: Some("MODELPROBE_TEST_KEY".into()),
            models: Vec::new(),
        };

        unsafe { std_env::remove_var("MODELPROBE_TEST_KEY") };
        assert!(matches!(
            entry.credential(),
            Err(ConfigError::MissingCredential { .. })
        ));

        unsafe { std_env::set_var("MODELPROBE_TEST_KEY", "sk-env") };
        assert_eq!(entry.credential().unwrap().expose(), "sk-env");
        unsafe { std_env::remove_var("MODELPROBE_TEST_KEY") };

        let inline = ProviderEntry {
            api_key: Some("sk-inline".into()),
            ..entry
        };
        assert_eq!(inline.to_provider().unwrap().credential.expose(), "sk-inline");
    }

    #[test]
    fn test_create_default_config_in() {
        let home = TempDir::new().unwrap();
        let path = ConfigDiscovery::create_default_config_in(home.path()).unwrap();
        assert!(path.ends_with(".modelprobe/config.toml"));
        assert_eq!(EngineConfig::from_toml_file(&path).unwrap(), EngineConfig::default());

        // Existing files are left alone
        fs::write(&path, "[probe]\ntimeout_ms = 7").unwrap();
        ConfigDiscovery::create_default_config_in(home.path()).unwrap();
        assert_eq!(EngineConfig::from_toml_file(&path).unwrap().probe.timeout_ms, 7);
    }

    #[test]
    fn test_config_candidates() {
        let candidates = ConfigDiscovery::get_config_candidates();

        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].file_name().unwrap(), "modelprobe.toml");
    }

    #[test]
    fn test_default_store_lands_in_user_results_dir() {
        let home = TempDir::new().unwrap();
        let config = EngineConfig::default().with_default_store_in(home.path());
        assert_eq!(
            config.store.directory,
            Some(home.path().join(".modelprobe").join("results"))
        );

        // An explicit directory wins
        let explicit = EngineConfig {
            store: StoreSettings {
                directory: Some(PathBuf::from("/srv/results")),
            },
            ..EngineConfig::default()
        }
        .with_default_store_in(home.path());
        assert_eq!(explicit.store.directory, Some(PathBuf::from("/srv/results")));
    }

    #[test]
    fn test_remote_smtp_auth_rejected() {
        let toml = r#"
[notifications.email]
smtp_host = "smtp.example.com"
username = "alerts"
password = "secret"
from = "probe@example.com"
to = ["ops@example.com"]
"#;
        assert!(matches!(
            EngineConfig::from_toml_str(toml),
            Err(ConfigError::Invalid(message)) if message.contains("TLS")
        ));
        assert!(EngineConfig::from_toml_str(&toml.replace("smtp.example.com", "localhost")).is_ok());
    }

    #[test]
    fn test_redis_needs_key_prefix() {
        let toml = "[cache]\nredis_url = \"redis://localhost\"\nkey_prefix = \"\"";
        assert!(matches!(
            EngineConfig::from_toml_str(toml),
            Err(ConfigError::Invalid(_))
        ));
    }
}
