//! TOML configuration.
//!
//! Every section is optional; a missing config file means all defaults.
//! CLI flags override whatever is loaded here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Hugging Face identifier of the default dense encoder.
pub const DEFAULT_ENCODER: &str = "sentence-transformers/all-MiniLM-L6-v2";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub embedding: EmbeddingConfig,
    pub training: TrainingConfig,
    pub prediction: PredictionConfig,
    pub server: ServerConfig,
}

/// Locations of the corpus and every artifact the pipeline reads or writes.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub dataset: PathBuf,
    pub embeddings: PathBuf,
    pub labels: PathBuf,
    pub model: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("ml_pipeline/dataset.json"),
            embeddings: PathBuf::from("ml_pipeline/text_embeddings.json"),
            labels: PathBuf::from("ml_pipeline/processed/labels.csv"),
            model: PathBuf::from("ml_pipeline/model_text.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `auto`, `dense` or `lexical`.
    pub backend: String,
    pub model: String,
    pub batch_size: usize,
    pub max_seq_len: usize,
    pub max_features: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            model: DEFAULT_ENCODER.to_string(),
            batch_size: 64,
            max_seq_len: 256,
            max_features: 2048,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_ratio: f64,
    pub seed: u64,
    pub max_iter: usize,
    pub learning_rate: f32,
    /// Inverse regularization strength.
    pub c: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            seed: 42,
            max_iter: 1000,
            learning_rate: 0.5,
            c: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PredictionConfig {
    pub top_k_service: usize,
    pub top_k_cli: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            top_k_service: 5,
            top_k_cli: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist. A file that exists but fails to parse is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Range checks shared by [`load_config`] and CLI overrides.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    match config.embedding.backend.as_str() {
        "auto" | "dense" | "lexical" => {}
        other => return Err(ConfigError::UnknownBackend(other.to_string())),
    }
    if config.embedding.batch_size == 0 {
        return Err(ConfigError::Invalid("embedding.batch_size must be > 0".into()));
    }
    if config.embedding.max_features == 0 {
        return Err(ConfigError::Invalid(
            "embedding.max_features must be > 0".into(),
        ));
    }
    if config.embedding.max_seq_len == 0 {
        return Err(ConfigError::Invalid("embedding.max_seq_len must be > 0".into()));
    }
    if !(config.training.test_ratio > 0.0 && config.training.test_ratio < 1.0) {
        return Err(ConfigError::Invalid(
            "training.test_ratio must be in (0.0, 1.0)".into(),
        ));
    }
    if config.training.c <= 0.0 {
        return Err(ConfigError::Invalid("training.c must be > 0".into()));
    }
    if config.prediction.top_k_service == 0 || config.prediction.top_k_cli == 0 {
        return Err(ConfigError::Invalid("prediction top-k must be >= 1".into()));
    }
    Ok(())
}
