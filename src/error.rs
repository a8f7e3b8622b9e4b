//! Typed error taxonomy.
//!
//! Each pipeline concern has its own error enum so callers can tell a
//! deployment problem (missing artifact, wrong backend) apart from bad input.
//! Commands wrap these in [`anyhow::Error`]; the HTTP layer downcasts
//! [`PredictError`] to pick a status code.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("unknown embedding backend '{0}' (expected auto, dense or lexical)")]
    UnknownBackend(String),
}

/// The corpus document could not be turned into entries.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to parse corpus {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no entries found in {0}; check the JSON structure")]
    NoEntries(PathBuf),
}

/// Failures while reading, writing or joining persisted artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(PathBuf),
    #[error("embedding table is inconsistent: {rows} rows but {filenames} filenames")]
    RowMismatch { rows: usize, filenames: usize },
    #[error("missing label for filename: {0}")]
    MissingLabel(String),
    #[error("labels file {0} must have a `filename,label` header")]
    BadLabelsHeader(PathBuf),
}

/// Embedding capability errors.
///
/// These mean the deployment is missing something it needs, not that a
/// request was malformed.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("no embedding backend available: {0}")]
    Unavailable(String),
    #[error("embedding backend produces {backend} columns but the classifier expects {classifier}")]
    DimensionMismatch { backend: usize, classifier: usize },
    #[error("embedding artifact fingerprint {loaded} does not match the one used for training ({trained})")]
    FingerprintMismatch { loaded: String, trained: String },
    #[error("dense encoder failed: {0}")]
    Encoder(String),
}

/// Per-request prediction errors.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("provide text or id")]
    MissingInput,
    #[error("id not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
