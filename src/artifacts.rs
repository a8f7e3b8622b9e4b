//! Persisted training inputs: the embedding table and the labels file.
//!
//! The embedding table is JSON:
//!
//! ```json
//! { "embeddings": [[0.1, 0.0, ...], ...], "filenames": ["A1", ...], "backend": { ... } }
//! ```
//!
//! `embeddings` and `filenames` have the same length and order. `backend`
//! records which embedding artifact produced the rows.
//!
//! The labels file is CSV with a `filename,label` header. When a filename
//! appears more than once the last row wins, matching how the corpus index
//! treats duplicate ids.

use anyhow::{Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::embedding::BackendInfo;
use crate::error::ArtifactError;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    pub embeddings: Array2<f32>,
    pub filenames: Vec<String>,
    pub backend: Option<BackendInfo>,
}

#[derive(Serialize, Deserialize)]
struct EmbeddingTableFile {
    embeddings: Vec<Vec<f32>>,
    filenames: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<BackendInfo>,
}

impl EmbeddingTable {
    pub fn new(
        embeddings: Array2<f32>,
        filenames: Vec<String>,
        backend: Option<BackendInfo>,
    ) -> Result<Self, ArtifactError> {
        if embeddings.nrows() != filenames.len() {
            return Err(ArtifactError::RowMismatch {
                rows: embeddings.nrows(),
                filenames: filenames.len(),
            });
        }
        Ok(Self {
            embeddings,
            filenames,
            backend,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = EmbeddingTableFile {
            embeddings: self.embeddings.outer_iter().map(|r| r.to_vec()).collect(),
            filenames: self.filenames.clone(),
            backend: self.backend.clone(),
        };
        let json = serde_json::to_vec(&file)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write embeddings: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ArtifactError::NotFound(path.to_path_buf()).into());
        }
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read embeddings: {}", path.display()))?;
        let file: EmbeddingTableFile = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse embeddings: {}", path.display()))?;

        let rows = file.embeddings.len();
        let cols = file.embeddings.first().map_or(0, Vec::len);
        if let Some((i, row)) = file.embeddings.iter().enumerate().find(|(_, r)| r.len() != cols) {
            anyhow::bail!(
                "ragged embeddings in {}: row {} has {} columns, expected {}",
                path.display(),
                i,
                row.len(),
                cols
            );
        }
        let flat: Vec<f32> = file.embeddings.into_iter().flatten().collect();
        let embeddings = Array2::from_shape_vec((rows, cols), flat)?;
        Ok(Self::new(embeddings, file.filenames, file.backend)?)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.embeddings.dim()
    }
}

/// Write `filename,label` rows.
pub fn write_labels(path: &Path, rows: &[(String, String)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to open labels file: {}", path.display()))?;
    writer.write_record(["filename", "label"])?;
    for (filename, label) in rows {
        writer.write_record([filename, label])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a labels file into a filename → label map (last row wins).
pub fn read_labels(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Err(ArtifactError::NotFound(path.to_path_buf()).into());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open labels file: {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let filename_col = headers.iter().position(|h| h == "filename");
    let label_col = headers.iter().position(|h| h == "label");
    let (Some(filename_col), Some(label_col)) = (filename_col, label_col) else {
        return Err(ArtifactError::BadLabelsHeader(path.to_path_buf()).into());
    };

    let mut labels = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let filename = record.get(filename_col).unwrap_or_default();
        let label = record.get(label_col).unwrap_or_default();
        labels.insert(filename.to_string(), label.to_string());
    }
    Ok(labels)
}

/// Label every embedded row. Any filename without a label is a hard error.
pub fn join_labels(
    filenames: &[String],
    labels: &HashMap<String, String>,
) -> Result<Vec<String>, ArtifactError> {
    filenames
        .iter()
        .map(|f| {
            labels
                .get(f)
                .cloned()
                .ok_or_else(|| ArtifactError::MissingLabel(f.clone()))
        })
        .collect()
}
