//! Trainable classifier seam and the default implementation.
//!
//! The pipeline only talks to [`TrainableClassifier`]; [`LogisticRegression`]
//! is a multinomial (softmax) logistic regression with an L2 penalty fitted
//! by full-batch gradient descent.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::TrainingConfig;
use crate::embedding::BackendInfo;
use crate::error::ArtifactError;

pub trait TrainableClassifier {
    fn fit(&mut self, x: ArrayView2<f32>, y: &[String]) -> Result<()>;
    fn predict(&self, x: ArrayView2<f32>) -> Vec<String>;
    /// Per-class probabilities, columns ordered as [`classes`](Self::classes).
    /// `None` when the classifier has no probability estimate.
    fn predict_proba(&self, x: ArrayView2<f32>) -> Option<Array2<f32>>;
    fn classes(&self) -> &[String];
    /// Input width seen at fit time.
    fn n_features(&self) -> usize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    classes: Vec<String>,
    /// `(n_features, n_classes)`.
    weights: Array2<f32>,
    bias: Array1<f32>,
    c: f32,
    max_iter: usize,
    learning_rate: f32,
    tol: f32,
}

impl LogisticRegression {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            classes: Vec::new(),
            weights: Array2::zeros((0, 0)),
            bias: Array1::zeros(0),
            c: config.c,
            max_iter: config.max_iter,
            learning_rate: config.learning_rate,
            tol: 1e-4,
        }
    }

    fn softmax_rows(mut logits: Array2<f32>) -> Array2<f32> {
        for mut row in logits.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        logits
    }

    fn probabilities(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let logits = x.dot(&self.weights) + &self.bias;
        Self::softmax_rows(logits)
    }
}

impl TrainableClassifier for LogisticRegression {
    fn fit(&mut self, x: ArrayView2<f32>, y: &[String]) -> Result<()> {
        let (n, d) = x.dim();
        if n == 0 {
            bail!("cannot fit a classifier on zero samples");
        }
        if n != y.len() {
            bail!("{} samples but {} labels", n, y.len());
        }

        let mut classes: Vec<String> = y.to_vec();
        classes.sort();
        classes.dedup();
        let k = classes.len();

        let mut targets = Array2::<f32>::zeros((n, k));
        for (i, label) in y.iter().enumerate() {
            // classes is sorted and contains every label
            let j = classes.binary_search(label).unwrap_or_default();
            targets[[i, j]] = 1.0;
        }

        self.classes = classes;
        self.weights = Array2::zeros((d, k));
        self.bias = Array1::zeros(k);

        let n_f = n as f32;
        let l2 = 1.0 / (self.c * n_f);
        let mut iterations = 0;
        for iter in 0..self.max_iter {
            iterations = iter + 1;
            let residual = self.probabilities(x) - &targets;
            let grad_w = x.t().dot(&residual) / n_f + &self.weights * l2;
            let grad_b = residual.sum_axis(Axis(0)) / n_f;

            let max_grad = grad_w
                .iter()
                .chain(grad_b.iter())
                .fold(0.0f32, |m, g| m.max(g.abs()));

            self.weights.scaled_add(-self.learning_rate, &grad_w);
            self.bias.scaled_add(-self.learning_rate, &grad_b);

            if max_grad < self.tol {
                break;
            }
        }
        tracing::debug!(iterations, classes = k, features = d, "logistic regression fitted");
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f32>) -> Vec<String> {
        let proba = self.probabilities(x);
        proba
            .rows()
            .into_iter()
            .map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |acc, (j, &p)| if p > acc.1 { (j, p) } else { acc })
                    .0;
                self.classes.get(best).cloned().unwrap_or_default()
            })
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<f32>) -> Option<Array2<f32>> {
        Some(self.probabilities(x))
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.weights.nrows()
    }
}

/// Everything persisted for a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub classifier: LogisticRegression,
    /// Identity of the embedding artifact the classifier was trained on.
    #[serde(default)]
    pub backend: Option<BackendInfo>,
    pub trained_at: DateTime<Utc>,
    pub version: String,
}

impl ModelArtifact {
    pub fn new(classifier: LogisticRegression, backend: Option<BackendInfo>) -> Self {
        Self {
            classifier,
            backend,
            trained_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write model: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ArtifactError::NotFound(path.to_path_buf()).into());
        }
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read model: {}", path.display()))?;
        let artifact = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse model: {}", path.display()))?;
        Ok(artifact)
    }
}
