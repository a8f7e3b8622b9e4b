//! Embedding backend abstraction and implementations.
//!
//! Defines the [`EmbeddingBackend`] trait and its two implementations:
//! - **[`LexicalBackend`]**: TF-IDF over the canonical texts; has fitted
//!   state that must be persisted to reproduce the vector space.
//! - **`DenseBackend`**: frozen transformer encoder, mean-pooled over the
//!   attention mask (cargo feature `dense-encoder`). "Fitting" it is a no-op;
//!   only a reference (model name, width) is persisted.
//!
//! # Backend Selection
//!
//! [`BackendKind::from_config`] resolves `embedding.backend`:
//!
//! | Config Value | Backend |
//! |-------------|----------|
//! | `"dense"` | dense encoder (error if not compiled in) |
//! | `"lexical"` | TF-IDF |
//! | `"auto"` | dense when compiled in, else TF-IDF |
//!
//! # Persistence
//!
//! Training writes exactly one artifact next to the embedding table:
//! [`VECTORIZER_FILE`] for lexical or [`ENCODER_FILE`] for dense. The other
//! file is removed so [`load_backend`] can never pick up a stale one. Each
//! artifact is identified by the SHA-256 of its bytes; the classifier
//! records that fingerprint and the prediction service checks it at startup.

pub mod lexical;
#[cfg(feature = "dense-encoder")]
mod local_tract;

use anyhow::{Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, EmbeddingError};
use lexical::TfidfVectorizer;

/// Fitted TF-IDF state, relative to the embedding table's directory.
pub const VECTORIZER_FILE: &str = "vectorizer.json";
/// Dense encoder reference, relative to the embedding table's directory.
pub const ENCODER_FILE: &str = "encoder.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Dense,
    Lexical,
}

impl BackendKind {
    /// Resolve the configured backend name.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        match config.backend.as_str() {
            "dense" => Ok(BackendKind::Dense),
            "lexical" => Ok(BackendKind::Lexical),
            "auto" if dense_runtime_available() => Ok(BackendKind::Dense),
            "auto" => Ok(BackendKind::Lexical),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Dense => "dense",
            BackendKind::Lexical => "lexical",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether this build carries the dense encoder runtime.
pub fn dense_runtime_available() -> bool {
    cfg!(feature = "dense-encoder")
}

/// Trait for embedding backends.
pub trait EmbeddingBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    /// Model identifier (`"tfidf"` or the encoder's Hugging Face name).
    fn model_name(&self) -> &str;
    /// Output width.
    fn dims(&self) -> usize;
    /// Embed a batch; row `i` corresponds to `texts[i]`.
    fn embed(&self, texts: &[String]) -> Result<Array2<f32>, EmbeddingError>;
    /// Serialized state needed to reproduce this backend.
    fn artifact_bytes(&self) -> Result<Vec<u8>>;
}

/// Embed a single text as a one-row matrix.
pub fn embed_one(backend: &dyn EmbeddingBackend, text: &str) -> Result<Array2<f32>, EmbeddingError> {
    backend.embed(&[text.to_string()])
}

/// Identity of the backend used to produce a set of vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub model: String,
    pub dims: usize,
    /// SHA-256 of the persisted artifact bytes.
    pub fingerprint: String,
}

/// Hex SHA-256 of an artifact's bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============ Lexical Backend ============

pub struct LexicalBackend {
    vectorizer: TfidfVectorizer,
}

impl LexicalBackend {
    pub fn fit(texts: &[String], max_features: usize) -> Self {
        let vectorizer = TfidfVectorizer::fit(texts, max_features);
        tracing::info!(
            vocabulary = vectorizer.dims(),
            max_features,
            "fitted TF-IDF vectorizer"
        );
        Self { vectorizer }
    }

    pub fn from_vectorizer(vectorizer: TfidfVectorizer) -> Self {
        Self { vectorizer }
    }
}

impl EmbeddingBackend for LexicalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Lexical
    }
    fn model_name(&self) -> &str {
        "tfidf"
    }
    fn dims(&self) -> usize {
        self.vectorizer.dims()
    }
    fn embed(&self, texts: &[String]) -> Result<Array2<f32>, EmbeddingError> {
        Ok(self.vectorizer.transform(texts))
    }
    fn artifact_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.vectorizer)?)
    }
}

// ============ Dense Backend ============

/// What gets persisted for a dense backend: the encoder is frozen, so its
/// name and shape are enough to reload the same vector space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseEncoderRef {
    pub model: String,
    pub dims: usize,
    pub max_seq_len: usize,
}

#[cfg(feature = "dense-encoder")]
pub struct DenseBackend {
    reference: DenseEncoderRef,
    encoder: local_tract::TractEncoder,
}

#[cfg(feature = "dense-encoder")]
impl DenseBackend {
    pub fn load(model: &str, max_seq_len: usize, batch_size: usize) -> Result<Self> {
        let encoder = local_tract::TractEncoder::load(model, max_seq_len, batch_size)?;
        let reference = DenseEncoderRef {
            model: model.to_string(),
            dims: encoder.dims(),
            max_seq_len,
        };
        Ok(Self { reference, encoder })
    }
}

#[cfg(feature = "dense-encoder")]
impl EmbeddingBackend for DenseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dense
    }
    fn model_name(&self) -> &str {
        &self.reference.model
    }
    fn dims(&self) -> usize {
        self.reference.dims
    }
    fn embed(&self, texts: &[String]) -> Result<Array2<f32>, EmbeddingError> {
        self.encoder.embed(texts)
    }
    fn artifact_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.reference)?)
    }
}

fn load_dense(
    model: &str,
    max_seq_len: usize,
    batch_size: usize,
) -> Result<Box<dyn EmbeddingBackend>> {
    #[cfg(feature = "dense-encoder")]
    {
        let backend = DenseBackend::load(model, max_seq_len, batch_size)
            .map_err(|e| EmbeddingError::Encoder(format!("{:#}", e)))?;
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "dense-encoder"))]
    {
        let _ = (max_seq_len, batch_size);
        Err(EmbeddingError::Unavailable(format!(
            "dense encoder '{}' requested but this build lacks --features dense-encoder",
            model
        ))
        .into())
    }
}

// ============ Fit / Persist / Load ============

/// Build the backend used for training over `texts`.
///
/// Lexical backends are fitted on `texts`; dense backends ignore them.
pub fn fit_backend(
    kind: BackendKind,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Box<dyn EmbeddingBackend>> {
    tracing::info!(backend = %kind, texts = texts.len(), "preparing embedding backend");
    match kind {
        BackendKind::Lexical => Ok(Box::new(LexicalBackend::fit(texts, config.max_features))),
        BackendKind::Dense => load_dense(&config.model, config.max_seq_len, config.batch_size),
    }
}

/// Directory holding the backend artifact for an embedding table at `table`.
pub fn artifact_dir(table: &Path) -> PathBuf {
    match table.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn artifact_file(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Lexical => VECTORIZER_FILE,
        BackendKind::Dense => ENCODER_FILE,
    }
}

/// Write the backend's artifact into `dir` and remove any artifact of the
/// other kind. Returns the identity recorded alongside the vectors.
pub fn persist_backend(backend: &dyn EmbeddingBackend, dir: &Path) -> Result<BackendInfo> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let bytes = backend.artifact_bytes()?;
    let path = dir.join(artifact_file(backend.kind()));
    std::fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    let stale_kind = match backend.kind() {
        BackendKind::Lexical => BackendKind::Dense,
        BackendKind::Dense => BackendKind::Lexical,
    };
    let stale = dir.join(artifact_file(stale_kind));
    if stale.exists() {
        std::fs::remove_file(&stale)
            .with_context(|| format!("Failed to remove stale {}", stale.display()))?;
        tracing::info!(path = %stale.display(), "removed stale embedding artifact");
    }

    tracing::info!(path = %path.display(), backend = %backend.kind(), "saved embedding artifact");
    Ok(BackendInfo {
        kind: backend.kind(),
        model: backend.model_name().to_string(),
        dims: backend.dims(),
        fingerprint: fingerprint(&bytes),
    })
}

/// Where a loaded backend came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Reloaded from the artifact written at training time.
    Persisted,
    /// No artifact found; the configured dense encoder was loaded instead and
    /// may not match the space the classifier was trained in.
    Unverified,
}

pub struct LoadedBackend {
    pub backend: Box<dyn EmbeddingBackend>,
    pub provenance: Provenance,
    /// Present when `provenance` is `Persisted`.
    pub fingerprint: Option<String>,
}

/// Load the backend persisted in `dir`.
///
/// Prefers [`VECTORIZER_FILE`], then [`ENCODER_FILE`]. With neither present
/// the configured dense encoder is loaded as [`Provenance::Unverified`]; if
/// the dense runtime is missing too, fails with [`EmbeddingError::Unavailable`].
pub fn load_backend(dir: &Path, config: &EmbeddingConfig) -> Result<LoadedBackend> {
    load_backend_with(dir, config, dense_runtime_available())
}

fn load_backend_with(
    dir: &Path,
    config: &EmbeddingConfig,
    dense_available: bool,
) -> Result<LoadedBackend> {
    let vectorizer_path = dir.join(VECTORIZER_FILE);
    if vectorizer_path.exists() {
        let bytes = std::fs::read(&vectorizer_path)
            .with_context(|| format!("Failed to read {}", vectorizer_path.display()))?;
        let vectorizer: TfidfVectorizer = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", vectorizer_path.display()))?;
        tracing::info!(path = %vectorizer_path.display(), dims = vectorizer.dims(), "loaded TF-IDF vectorizer");
        return Ok(LoadedBackend {
            backend: Box::new(LexicalBackend::from_vectorizer(vectorizer)),
            provenance: Provenance::Persisted,
            fingerprint: Some(fingerprint(&bytes)),
        });
    }

    let encoder_path = dir.join(ENCODER_FILE);
    if encoder_path.exists() {
        let bytes = std::fs::read(&encoder_path)
            .with_context(|| format!("Failed to read {}", encoder_path.display()))?;
        let reference: DenseEncoderRef = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", encoder_path.display()))?;
        let backend = load_dense(&reference.model, reference.max_seq_len, config.batch_size)?;
        if backend.dims() != reference.dims {
            return Err(EmbeddingError::Encoder(format!(
                "encoder '{}' now produces {} columns, artifact recorded {}",
                reference.model,
                backend.dims(),
                reference.dims
            ))
            .into());
        }
        return Ok(LoadedBackend {
            backend,
            provenance: Provenance::Persisted,
            fingerprint: Some(fingerprint(&bytes)),
        });
    }

    if !dense_available {
        return Err(EmbeddingError::Unavailable(format!(
            "no {} in {} and no dense encoder runtime in this build",
            VECTORIZER_FILE,
            dir.display()
        ))
        .into());
    }

    tracing::warn!(
        dir = %dir.display(),
        model = %config.model,
        "no persisted embedding artifact; falling back to an unverified dense encoder"
    );
    Ok(LoadedBackend {
        backend: load_dense(&config.model, config.max_seq_len, config.batch_size)?,
        provenance: Provenance::Unverified,
        fingerprint: None,
    })
}
