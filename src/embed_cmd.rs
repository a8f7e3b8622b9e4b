use anyhow::Result;

use crate::artifacts::{write_labels, EmbeddingTable};
use crate::canonical::resolve_entries;
use crate::config::Config;
use crate::corpus::load_corpus;
use crate::embedding::{self, BackendInfo, BackendKind};

/// What [`generate_embeddings`] produced.
#[derive(Debug, Clone)]
pub struct EmbedSummary {
    pub entries: usize,
    pub dims: usize,
    pub backend: BackendInfo,
}

/// Corpus → embedding table, labels file and backend artifact.
///
/// Reads `paths.dataset`; writes `paths.embeddings`, `paths.labels` and the
/// backend artifact next to the embeddings.
pub fn generate_embeddings(config: &Config) -> Result<EmbedSummary> {
    let entries = load_corpus(&config.paths.dataset)?;
    let resolved = resolve_entries(&entries);
    let texts: Vec<String> = resolved.iter().map(|r| r.text.clone()).collect();

    let kind = BackendKind::from_config(&config.embedding)?;
    let backend = embedding::fit_backend(kind, &config.embedding, &texts)?;
    let matrix = backend.embed(&texts)?;

    let dir = embedding::artifact_dir(&config.paths.embeddings);
    let info = embedding::persist_backend(backend.as_ref(), &dir)?;

    let ids: Vec<String> = resolved.iter().map(|r| r.id.clone()).collect();
    let table = EmbeddingTable::new(matrix, ids, Some(info.clone()))?;
    table.save(&config.paths.embeddings)?;

    let rows: Vec<(String, String)> = resolved
        .into_iter()
        .map(|r| (r.id, r.label))
        .collect();
    write_labels(&config.paths.labels, &rows)?;

    let (entries, dims) = table.shape();
    Ok(EmbedSummary {
        entries,
        dims,
        backend: info,
    })
}

/// CLI entry point for `cfml embed`.
pub async fn run_embed(config: &Config) -> Result<()> {
    let owned = config.clone();
    let summary = tokio::task::spawn_blocking(move || generate_embeddings(&owned)).await??;

    println!("embed");
    println!("  backend: {} ({})", summary.backend.kind, summary.backend.model);
    println!("  embeddings: ({}, {}) -> {}", summary.entries, summary.dims, config.paths.embeddings.display());
    println!("  labels -> {}", config.paths.labels.display());
    Ok(())
}
