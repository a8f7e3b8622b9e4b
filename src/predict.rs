//! Prediction over a trained model.
//!
//! A [`Predictor`] is built once at startup and is read-only afterwards, so
//! the HTTP layer can share it behind an `Arc` and call it from concurrent
//! requests. Building one checks that the embedding backend still matches
//! the one the classifier was trained on:
//!
//! - the backend's output width equals the classifier's input width
//! - a persisted artifact's fingerprint equals the one recorded in the model
//! - a lexical model is never paired with an unverified dense fallback
//!
//! Any failure here is fatal; nothing is served from a mismatched space.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::canonical::canonical_text;
use crate::classifier::{ModelArtifact, TrainableClassifier};
use crate::config::Config;
use crate::corpus::CatalogIndex;
use crate::embedding::{self, embed_one, BackendKind, LoadedBackend, Provenance};
use crate::error::{EmbeddingError, PredictError};
use crate::models::{Prediction, Ranked};

/// A prediction request: a catalog id, free text, or both.
///
/// Empty strings count as absent. When both are given the id wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl PredictQuery {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: None,
        }
    }

    pub fn by_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: Some(text.into()),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

pub struct Predictor {
    model: ModelArtifact,
    catalog: CatalogIndex,
    backend: LoadedBackend,
    model_path: PathBuf,
}

impl Predictor {
    /// Load the model, catalog and embedding backend named by `config`.
    pub fn load(config: &Config) -> Result<Self> {
        let model = ModelArtifact::load(&config.paths.model)?;
        let catalog = CatalogIndex::load_or_empty(&config.paths.dataset)?;
        let dir = embedding::artifact_dir(&config.paths.embeddings);
        let backend = embedding::load_backend(&dir, &config.embedding)
            .context("Failed to load embedding backend")?;

        tracing::info!(
            model = %config.paths.model.display(),
            classes = model.classifier.classes().len(),
            catalog = catalog.len(),
            backend = %backend.backend.kind(),
            "predictor loaded"
        );
        Self::from_parts(model, catalog, backend, config.paths.model.clone())
    }

    /// Assemble a predictor from already-loaded parts, running the
    /// consistency checks.
    pub fn from_parts(
        model: ModelArtifact,
        catalog: CatalogIndex,
        backend: LoadedBackend,
        model_path: PathBuf,
    ) -> Result<Self> {
        check_consistency(&model, &backend)?;
        Ok(Self {
            model,
            catalog,
            backend,
            model_path,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn provenance(&self) -> Provenance {
        self.backend.provenance
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.backend.kind()
    }

    /// Pick the text to embed for `query`.
    pub fn resolve_text(&self, query: &PredictQuery) -> Result<String, PredictError> {
        if let Some(id) = non_empty(&query.id) {
            let entry = self
                .catalog
                .get(id)
                .ok_or_else(|| PredictError::NotFound(id.to_string()))?;
            let text = canonical_text(entry);
            return Ok(if text.is_empty() { id.to_string() } else { text });
        }
        match non_empty(&query.text) {
            Some(text) => Ok(text.to_string()),
            None => Err(PredictError::MissingInput),
        }
    }

    /// Classify `query`, returning the best label and up to `top_k` ranked
    /// classes.
    pub fn predict(&self, query: &PredictQuery, top_k: usize) -> Result<Prediction, PredictError> {
        let text = self.resolve_text(query)?;
        let x = embed_one(self.backend.backend.as_ref(), &text)?;

        let clf = &self.model.classifier;
        let prediction = clf
            .predict(x.view())
            .into_iter()
            .next()
            .ok_or_else(|| PredictError::Internal(anyhow::anyhow!("classifier returned no rows")))?;

        let top = match clf.predict_proba(x.view()) {
            Some(proba) => {
                let row: Vec<f32> = proba.row(0).to_vec();
                rank_top_k(clf.classes(), &row, top_k)
            }
            None => vec![Ranked {
                label: prediction.clone(),
                p: 1.0,
            }],
        };

        tracing::debug!(prediction = %prediction, "prediction served");
        Ok(Prediction {
            prediction,
            top,
            text,
        })
    }
}

fn check_consistency(model: &ModelArtifact, loaded: &LoadedBackend) -> Result<(), EmbeddingError> {
    let backend_dims = loaded.backend.dims();
    let classifier_dims = model.classifier.n_features();
    if backend_dims != classifier_dims {
        return Err(EmbeddingError::DimensionMismatch {
            backend: backend_dims,
            classifier: classifier_dims,
        });
    }

    let Some(trained) = &model.backend else {
        tracing::warn!("model does not record its embedding backend; skipping fingerprint check");
        return Ok(());
    };

    match loaded.provenance {
        Provenance::Persisted => {
            let current = loaded.fingerprint.as_deref().unwrap_or_default();
            if current != trained.fingerprint {
                return Err(EmbeddingError::FingerprintMismatch {
                    loaded: current.to_string(),
                    trained: trained.fingerprint.clone(),
                });
            }
        }
        Provenance::Unverified => {
            if trained.kind == BackendKind::Lexical {
                return Err(EmbeddingError::Unavailable(format!(
                    "model was trained on lexical vectors but {} is missing",
                    embedding::VECTORIZER_FILE
                )));
            }
            tracing::warn!(
                trained_model = %trained.model,
                loaded_model = %loaded.backend.model_name(),
                "embedding backend is unverified; predictions may come from a different vector space"
            );
        }
    }
    Ok(())
}

/// The `k` most probable classes, best first. Ties keep class order.
pub fn rank_top_k(classes: &[String], proba: &[f32], k: usize) -> Vec<Ranked> {
    let mut order: Vec<usize> = (0..classes.len().min(proba.len())).collect();
    order.sort_by(|&a, &b| proba[b].total_cmp(&proba[a]));
    order
        .into_iter()
        .take(k)
        .map(|i| Ranked {
            label: classes[i].clone(),
            p: f64::from(proba[i]),
        })
        .collect()
}

/// CLI entry point for `cfml predict`.
pub async fn run_predict(config: &Config, query: PredictQuery) -> Result<()> {
    let owned = config.clone();
    let top_k = config.prediction.top_k_cli;
    let prediction = tokio::task::spawn_blocking(move || -> Result<Prediction> {
        let predictor = Predictor::load(&owned)?;
        Ok(predictor.predict(&query, top_k)?)
    })
    .await??;

    println!("Input text: {}", prediction.text);
    println!("Prediction: {}", prediction.prediction);
    println!("Top probabilities:");
    for r in &prediction.top {
        println!("  {}: {:.3}", r.label, r.p);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LogisticRegression;
    use crate::config::{EmbeddingConfig, TrainingConfig};
    use crate::embedding::{fit_backend, persist_backend, BackendInfo, LexicalBackend};
    use crate::models::Entry;
    use serde_json::json;

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn entry(v: serde_json::Value) -> Entry {
        match v {
            serde_json::Value::Object(m) => Entry::new(m),
            _ => unreachable!(),
        }
    }

    /// Fits a lexical backend and classifier in `dir`, returning the parts.
    fn fixture(dir: &Path) -> (ModelArtifact, CatalogIndex, BackendInfo) {
        let texts = labels(&[
            "1 cent Spain copper",
            "1 cent Spain bronze",
            "2 euro Italy bimetallic",
            "2 euro Italy commemorative",
        ]);
        let y = labels(&["1 cent", "1 cent", "2 euro", "2 euro"]);
        let backend = fit_backend(BackendKind::Lexical, &EmbeddingConfig::default(), &texts).unwrap();
        let info = persist_backend(backend.as_ref(), dir).unwrap();
        let x = backend.embed(&texts).unwrap();
        let mut clf = LogisticRegression::new(&TrainingConfig::default());
        clf.fit(x.view(), &y).unwrap();

        let catalog = CatalogIndex::build(vec![
            entry(json!({"id": "es-1", "denominacion": "1 cent", "pais": "Spain"})),
            entry(json!({"id": "it-2", "denominacion": "2 euro", "pais": "Italy"})),
        ]);
        (ModelArtifact::new(clf, Some(info.clone())), catalog, info)
    }

    fn predictor(dir: &Path) -> Predictor {
        let (model, catalog, _) = fixture(dir);
        let loaded = embedding::load_backend(dir, &EmbeddingConfig::default()).unwrap();
        Predictor::from_parts(model, catalog, loaded, dir.join("model.json")).unwrap()
    }

    #[test]
    fn test_rank_top_k() {
        let classes = labels(&["a", "b", "c"]);
        let ranked = rank_top_k(&classes, &[0.2, 0.5, 0.3], 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].label, "b");
        assert_eq!(ranked[1].label, "c");
        assert_eq!(rank_top_k(&classes, &[0.2, 0.5, 0.3], 10).len(), 3);
    }

    #[test]
    fn test_predict_by_text() {
        let dir = tempfile::tempdir().unwrap();
        let p = predictor(dir.path());
        let out = p.predict(&PredictQuery::by_text("2 euro Italy"), 5).unwrap();
        assert_eq!(out.prediction, "2 euro");
        assert_eq!(out.text, "2 euro Italy");
        assert_eq!(out.top.len(), 2);
        assert!(out.top[0].p >= out.top[1].p);
    }

    #[test]
    fn test_predict_by_id_uses_canonical_text() {
        let dir = tempfile::tempdir().unwrap();
        let p = predictor(dir.path());
        let out = p.predict(&PredictQuery::by_id("es-1"), 5).unwrap();
        assert_eq!(out.text, "1 cent Spain");
        assert_eq!(out.prediction, "1 cent");
    }

    #[test]
    fn test_id_wins_over_text() {
        let dir = tempfile::tempdir().unwrap();
        let p = predictor(dir.path());
        let query = PredictQuery {
            id: Some("es-1".into()),
            text: Some("2 euro Italy".into()),
        };
        assert_eq!(p.predict(&query, 3).unwrap().text, "1 cent Spain");
    }

    #[test]
    fn test_missing_input_and_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let p = predictor(dir.path());
        let empty = PredictQuery {
            id: Some(String::new()),
            text: Some(String::new()),
        };
        assert!(matches!(p.predict(&empty, 5), Err(PredictError::MissingInput)));
        assert!(matches!(
            p.predict(&PredictQuery::by_id("nope"), 5),
            Err(PredictError::NotFound(id)) if id == "nope"
        ));
        // still serving afterwards
        assert!(p.predict(&PredictQuery::by_text("cent"), 5).is_ok());
    }

    #[test]
    fn test_fingerprint_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (model, catalog, _) = fixture(dir.path());
        // retrain the vectorizer on different texts; same width is not enough
        let other = fit_backend(
            BackendKind::Lexical,
            &EmbeddingConfig::default(),
            &labels(&["1 cent Spain copper", "2 euro Italy bimetallic"]),
        )
        .unwrap();
        persist_backend(other.as_ref(), dir.path()).unwrap();
        let loaded = embedding::load_backend(dir.path(), &EmbeddingConfig::default()).unwrap();
        let err = Predictor::from_parts(model, catalog, loaded, dir.path().join("m.json"))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<EmbeddingError>(),
            Some(EmbeddingError::DimensionMismatch { .. }) | Some(EmbeddingError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut model, catalog, _) = fixture(dir.path());
        model.backend = None;
        let narrow = fit_backend(
            BackendKind::Lexical,
            &EmbeddingConfig::default(),
            &labels(&["cent"]),
        )
        .unwrap();
        persist_backend(narrow.as_ref(), dir.path()).unwrap();
        let loaded = embedding::load_backend(dir.path(), &EmbeddingConfig::default()).unwrap();
        let err = Predictor::from_parts(model, catalog, loaded, dir.path().join("m.json"))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<EmbeddingError>(),
            Some(EmbeddingError::DimensionMismatch { backend: 1, .. })
        ));
    }

    /// Wrap a freshly fitted lexical backend as if no artifact had been found.
    fn unverified() -> LoadedBackend {
        let texts = labels(&[
            "1 cent Spain copper",
            "1 cent Spain bronze",
            "2 euro Italy bimetallic",
            "2 euro Italy commemorative",
        ]);
        LoadedBackend {
            backend: Box::new(LexicalBackend::fit(&texts, 2048)),
            provenance: Provenance::Unverified,
            fingerprint: None,
        }
    }

    #[test]
    fn test_lexical_model_with_unverified_backend_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (model, catalog, info) = fixture(dir.path());
        assert_eq!(info.kind, BackendKind::Lexical);

        let err = Predictor::from_parts(model, catalog, unverified(), dir.path().join("m.json"))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<EmbeddingError>(),
            Some(EmbeddingError::Unavailable(msg)) if msg.contains(embedding::VECTORIZER_FILE)
        ));
    }

    #[test]
    fn test_dense_model_with_unverified_backend_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut model, catalog, info) = fixture(dir.path());
        model.backend = Some(BackendInfo {
            kind: BackendKind::Dense,
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dims: info.dims,
            fingerprint: "0".repeat(64),
        });

        let p = Predictor::from_parts(model, catalog, unverified(), dir.path().join("m.json"))
            .unwrap();
        assert_eq!(p.provenance(), Provenance::Unverified);
        assert!(p.predict(&PredictQuery::by_text("2 euro Italy"), 5).is_ok());
    }
}
