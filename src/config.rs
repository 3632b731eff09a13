//! TOML configuration parsing and validation.
//!
//! A single [`Config`] is loaded once at startup by [`load_config`] and
//! passed by reference into the store, embedding provider, and commands.
//! Nothing else reads process-wide settings, apart from the API key
//! variable whose *name* is configured in `[embedding]`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use policy_index_core::embedding::DEFAULT_MIN_CHARS;
use policy_index_core::search::{BoostPolicy, SearchOptions, DEFAULT_POLICY_BONUS};

/// Missing or invalid configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Reuse stored vectors when content and model are unchanged.
    #[serde(default = "default_true")]
    pub reuse_embeddings: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            min_chars: DEFAULT_MIN_CHARS,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            reuse_embeddings: true,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_min_chars() -> usize {
    DEFAULT_MIN_CHARS
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_true")]
    pub boost_policy_sources: bool,
    #[serde(default = "default_policy_boost")]
    pub policy_boost: f64,
    #[serde(default = "default_policy_source_types")]
    pub policy_source_types: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            threshold: default_threshold(),
            boost_policy_sources: true,
            policy_boost: default_policy_boost(),
            policy_source_types: default_policy_source_types(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_threshold() -> f64 {
    0.5
}
fn default_policy_boost() -> f64 {
    DEFAULT_POLICY_BONUS
}
fn default_policy_source_types() -> Vec<String> {
    BoostPolicy::default().policy_source_types
}

impl RetrievalConfig {
    pub fn boost_policy(&self) -> BoostPolicy {
        BoostPolicy {
            policy_source_types: self.policy_source_types.clone(),
            bonus: self.policy_boost,
        }
    }

    /// Search options from config defaults, with per-query overrides.
    ///
    /// Overrides are held to the same bounds as the config values.
    pub fn search_options(
        &self,
        limit: Option<usize>,
        threshold: Option<f64>,
        no_boost: bool,
    ) -> Result<SearchOptions, ConfigError> {
        let options = SearchOptions {
            limit: limit.unwrap_or(self.limit),
            threshold: threshold.unwrap_or(self.threshold),
            boost_policy_sources: self.boost_policy_sources && !no_boost,
            source_types: Vec::new(),
        };
        check_limit(options.limit)?;
        check_threshold(options.threshold)?;
        Ok(options)
    }
}

fn check_limit(limit: usize) -> Result<(), ConfigError> {
    if limit < 1 {
        return Err(ConfigError::Invalid("retrieval.limit must be >= 1".into()));
    }
    Ok(())
}

fn check_threshold(threshold: f64) -> Result<(), ConfigError> {
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Invalid(
            "retrieval.threshold must be in [-1.0, 1.0]".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// A named dataset: a file or directory of JSON / JSON Lines records.
#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub path: PathBuf,
    /// Applied to records that omit `source_type`.
    #[serde(default)]
    pub source_type: Option<String>,
    /// Used when `path` is a directory.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string(), "**/*.jsonl".to_string()]
}

impl Config {
    /// Parse and validate a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_limit(self.retrieval.limit)?;
        check_threshold(self.retrieval.threshold)?;
        if self.retrieval.policy_boost.is_nan() || self.retrieval.policy_boost < 0.0 {
            return Err(ConfigError::Invalid(
                "retrieval.policy_boost must be >= 0".into(),
            ));
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                    other
                )))
            }
        }

        if self.embedding.is_enabled() && self.embedding.provider != "local" {
            if self.embedding.dims.unwrap_or(0) == 0 {
                return Err(ConfigError::Invalid(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.model.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
        }

        for (name, ds) in &self.datasets {
            if ds.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "datasets.{}.path must not be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Read, parse, and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_toml(&content)
}
