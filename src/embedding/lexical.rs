//! TF-IDF vectorizer used as the lexical embedding backend.
//!
//! Tokenization and weighting:
//! - lower-case, tokens match `\b\w\w+\b` (Unicode word chars, length ≥ 2)
//! - vocabulary capped at `max_features` terms by corpus term frequency,
//!   ties broken alphabetically; columns are assigned alphabetically
//! - smoothed IDF: `ln((1 + n) / (1 + df)) + 1`
//! - raw term counts × IDF, then L2-normalized per row
//!
//! The fitted state is plain data and serializes to JSON; reloading it
//! reproduces the exact same vector space.

use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("static token pattern"))
}

/// Split text into lower-cased tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    /// Term → column index.
    pub vocabulary: BTreeMap<String, usize>,
    /// IDF weight per column.
    pub idf: Vec<f32>,
    pub max_features: usize,
}

impl TfidfVectorizer {
    /// Fit vocabulary and IDF weights on `documents`.
    pub fn fit(documents: &[String], max_features: usize) -> Self {
        let mut term_freq: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(doc);
            let mut seen = HashSet::new();
            for tok in tokens {
                *term_freq.entry(tok.clone()).or_insert(0) += 1;
                if seen.insert(tok.clone()) {
                    *doc_freq.entry(tok).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(&String, &usize)> = term_freq.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(max_features);

        let mut kept: Vec<String> = ranked.into_iter().map(|(t, _)| t.clone()).collect();
        kept.sort();

        let n_docs = documents.len() as f32;
        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(kept.len());
        for (idx, term) in kept.into_iter().enumerate() {
            let df = doc_freq.get(&term).copied().unwrap_or(0) as f32;
            idf.push(((1.0 + n_docs) / (1.0 + df)).ln() + 1.0);
            vocabulary.insert(term, idx);
        }

        Self {
            vocabulary,
            idf,
            max_features,
        }
    }

    /// Output width.
    pub fn dims(&self) -> usize {
        self.idf.len()
    }

    /// Transform one document. Tokens outside the vocabulary are ignored;
    /// a document with no known tokens maps to the zero vector.
    pub fn transform_one(&self, document: &str) -> Vec<f32> {
        let mut row = vec![0.0f32; self.dims()];
        for tok in tokenize(document) {
            if let Some(&idx) = self.vocabulary.get(&tok) {
                row[idx] += 1.0;
            }
        }
        for (v, w) in row.iter_mut().zip(&self.idf) {
            *v *= w;
        }
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut row {
                *v /= norm;
            }
        }
        row
    }

    /// Transform a batch into a `(texts.len(), dims)` matrix.
    pub fn transform(&self, texts: &[String]) -> Array2<f32> {
        let dims = self.dims();
        let mut out = Array2::<f32>::zeros((texts.len(), dims));
        for (i, text) in texts.iter().enumerate() {
            let row = self.transform_one(text);
            out.row_mut(i)
                .iter_mut()
                .zip(row)
                .for_each(|(dst, v)| *dst = v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<String> {
        vec![
            "1 cent Spain copper".to_string(),
            "2 euro Italy bimetallic".to_string(),
            "1 cent Italy copper".to_string(),
        ]
    }

    #[test]
    fn test_tokenize_drops_single_chars_and_lowercases() {
        assert_eq!(tokenize("1 Cent ESPAÑA, a b"), vec!["cent", "españa"]);
    }

    #[test]
    fn test_vocabulary_is_alphabetical() {
        let v = TfidfVectorizer::fit(&docs(), 100);
        let terms: Vec<&String> = v.vocabulary.keys().collect();
        assert_eq!(
            terms,
            vec!["bimetallic", "cent", "copper", "euro", "italy", "spain"]
        );
        assert_eq!(v.vocabulary["bimetallic"], 0);
        assert_eq!(v.vocabulary["spain"], 5);
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let v = TfidfVectorizer::fit(&docs(), 3);
        // cent, copper, italy occur twice; everything else once.
        let terms: Vec<&String> = v.vocabulary.keys().collect();
        assert_eq!(terms, vec!["cent", "copper", "italy"]);
        assert_eq!(v.dims(), 3);
    }

    #[test]
    fn test_smoothed_idf() {
        let v = TfidfVectorizer::fit(&docs(), 100);
        let cent = v.idf[v.vocabulary["cent"]];
        let spain = v.idf[v.vocabulary["spain"]];
        assert!((cent - ((4.0f32 / 3.0).ln() + 1.0)).abs() < 1e-6);
        assert!((spain - ((4.0f32 / 2.0).ln() + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_rows_are_unit_norm_and_unknown_is_zero() {
        let v = TfidfVectorizer::fit(&docs(), 100);
        let m = v.transform(&["cent spain".to_string(), "zzz qqq".to_string()]);
        assert_eq!(m.shape(), &[2, 6]);
        let norm: f32 = m.row(0).iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(m.row(1).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_reload_reproduces_vectors() {
        let v = TfidfVectorizer::fit(&docs(), 100);
        let json = serde_json::to_string(&v).unwrap();
        let restored: TfidfVectorizer = serde_json::from_str(&json).unwrap();
        assert_eq!(v, restored);
        assert_eq!(
            v.transform_one("2 euro Italy"),
            restored.transform_one("2 euro Italy")
        );
    }
}
