use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MnemeConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// `"stdio"` or `"http"`.
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"local"` (ONNX Runtime) or `"openai"` (OpenAI-compatible HTTP API).
    pub provider: String,
    pub model: String,
    /// Output size of the configured model. Stored and query vectors must agree.
    pub dimensions: usize,
    pub cache_dir: String,
    pub api_base: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Upper bound on one remote embedding request, in seconds.
    pub request_timeout_secs: u64,
}

/// Search defaults.
///
/// - `default_limit` replaces a requested limit of 0.
/// - `mmr_lambda` replaces an MMR lambda of 0. 1.0 ranks purely by relevance,
///   values toward 0 weigh diversity more heavily.
/// - `mmr_pool_multiplier` sizes the candidate pool fetched for MMR queries as
///   `limit * mmr_pool_multiplier`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub mmr_lambda: f32,
    pub mmr_pool_multiplier: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 7437,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mneme_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_mneme_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            dimensions: 384,
            cache_dir,
            api_base: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            mmr_lambda: 0.5,
            mmr_pool_multiplier: 2,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.default_limit > 0, "search.default_limit must be at least 1");
        anyhow::ensure!(
            self.mmr_lambda > 0.0 && self.mmr_lambda <= 1.0,
            "search.mmr_lambda must be in (0, 1], got {}",
            self.mmr_lambda
        );
        anyhow::ensure!(
            self.mmr_pool_multiplier >= 1,
            "search.mmr_pool_multiplier must be at least 1"
        );
        Ok(())
    }
}

/// Returns `~/.mneme/`, or `./.mneme` when no home directory is known.
pub fn default_mneme_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mneme")
}

/// Returns the default config file path: `~/.mneme/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mneme_dir().join("config.toml")
}

impl MnemeConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemeConfig::default()
        };

        config.apply_env_overrides();
        config.search.validate().context("invalid [search] config")?;
        anyhow::ensure!(
            config.embedding.dimensions > 0,
            "embedding.dimensions must be at least 1"
        );
        anyhow::ensure!(
            config.embedding.request_timeout_secs > 0,
            "embedding.request_timeout_secs must be at least 1"
        );
        Ok(config)
    }

    /// Apply environment variable overrides (MNEME_DB, MNEME_LOG_LEVEL, MNEME_TRANSPORT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEME_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEME_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEME_TRANSPORT") {
            self.server.transport = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
