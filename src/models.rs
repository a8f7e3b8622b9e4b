//! Core data types shared by the pipeline stages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One catalog record as found in the corpus.
///
/// Fields are kept as raw JSON values; [`crate::canonical`] decides how each
/// one is rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub fields: Map<String, Value>,
}

impl Entry {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// An entry after identifier resolution, with its canonical text and label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub id: String,
    pub text: String,
    pub label: String,
}

/// One ranked class returned by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranked {
    pub label: String,
    pub p: f64,
}

/// The result of a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: String,
    pub top: Vec<Ranked>,
    /// The text that was actually embedded.
    pub text: String,
}
