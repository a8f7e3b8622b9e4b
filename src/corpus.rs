//! Corpus loading.
//!
//! A corpus is a JSON document that may be shaped several ways: a flat list
//! of entries, a list of wrapper objects holding entries under a container
//! key, a single wrapper object, or a single entry. [`classify`] resolves the
//! shape once into a [`CorpusShape`]; [`flatten`] turns that into entries.
//!
//! # Duplication
//!
//! A list element that is itself an entry *and* holds sub-entries under
//! `items` or `data` contributes both itself and its children
//! ([`ItemShape::LeafWithContainers`]). An element listing the same children
//! under two container keys contributes them twice. Both are kept as-is and
//! logged at debug level.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use crate::canonical::resolve_id;
use crate::error::CorpusError;
use crate::models::Entry;

/// Keys whose list values hold entries, in lookup order.
pub const CONTAINER_KEYS: [&str; 4] = ["monedas", "entradas", "items", "data"];

/// Presence of any of these makes an object an entry.
const LEAF_KEYS: [&str; 3] = ["id", "pais", "denominacion"];

/// An object carrying one of these is never a leaf inside a list.
const WRAPPER_ONLY_KEYS: [&str; 2] = ["monedas", "entradas"];

/// Shape of a list element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemShape {
    /// A plain entry.
    Leaf,
    /// A wrapper whose listed container keys hold entries.
    Wrapper(Vec<&'static str>),
    /// An entry that also holds sub-entries under `items` / `data`.
    LeafWithContainers(Vec<&'static str>),
    /// Not an object, or an object matching nothing.
    Ignored,
}

/// Shape of the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusShape {
    Sequence(Vec<ItemShape>),
    Wrapper(Vec<&'static str>),
    Leaf,
    Unrecognized,
}

fn containers_of(obj: &Map<String, Value>) -> Vec<&'static str> {
    CONTAINER_KEYS
        .iter()
        .copied()
        .filter(|k| matches!(obj.get(*k), Some(Value::Array(_))))
        .collect()
}

fn looks_like_entry(obj: &Map<String, Value>) -> bool {
    LEAF_KEYS.iter().any(|k| obj.contains_key(*k))
}

fn classify_item(item: &Value) -> ItemShape {
    let Value::Object(obj) = item else {
        return ItemShape::Ignored;
    };
    let containers = containers_of(obj);
    let is_leaf =
        looks_like_entry(obj) && !WRAPPER_ONLY_KEYS.iter().any(|k| obj.contains_key(*k));

    match (is_leaf, containers.is_empty()) {
        (true, true) => ItemShape::Leaf,
        (true, false) => ItemShape::LeafWithContainers(containers),
        (false, false) => ItemShape::Wrapper(containers),
        (false, true) => ItemShape::Ignored,
    }
}

/// Resolve the shape of a parsed corpus document.
pub fn classify(root: &Value) -> CorpusShape {
    match root {
        Value::Array(items) => CorpusShape::Sequence(items.iter().map(classify_item).collect()),
        Value::Object(obj) => {
            let containers = containers_of(obj);
            let children: usize = containers
                .iter()
                .filter_map(|k| obj.get(*k).and_then(Value::as_array))
                .map(Vec::len)
                .sum();
            if children > 0 {
                CorpusShape::Wrapper(containers)
            } else if looks_like_entry(obj) {
                CorpusShape::Leaf
            } else {
                CorpusShape::Unrecognized
            }
        }
        _ => CorpusShape::Unrecognized,
    }
}

fn extend_from_containers(out: &mut Vec<Entry>, obj: &Map<String, Value>, keys: &[&str]) {
    for key in keys {
        let Some(Value::Array(children)) = obj.get(*key) else {
            continue;
        };
        for (i, child) in children.iter().enumerate() {
            match child {
                Value::Object(fields) => out.push(Entry::new(fields.clone())),
                other => tracing::warn!(
                    container = *key,
                    position = i,
                    kind = json_kind(other),
                    "skipping non-object corpus child"
                ),
            }
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Flatten `root` into entries according to `shape`.
///
/// A wrapper root with non-empty containers never also counts as a leaf. Within a
/// list, container children come before the element itself.
pub fn flatten(root: &Value, shape: &CorpusShape) -> Vec<Entry> {
    let mut out = Vec::new();
    match (root, shape) {
        (Value::Array(items), CorpusShape::Sequence(shapes)) => {
            for (item, item_shape) in items.iter().zip(shapes) {
                let Value::Object(obj) = item else { continue };
                match item_shape {
                    ItemShape::Leaf => out.push(Entry::new(obj.clone())),
                    ItemShape::Wrapper(keys) => extend_from_containers(&mut out, obj, keys),
                    ItemShape::LeafWithContainers(keys) => {
                        tracing::debug!(
                            containers = ?keys,
                            "entry also lists sub-entries; keeping both"
                        );
                        extend_from_containers(&mut out, obj, keys);
                        out.push(Entry::new(obj.clone()));
                    }
                    ItemShape::Ignored => {}
                }
            }
        }
        (Value::Object(obj), CorpusShape::Wrapper(keys)) => {
            extend_from_containers(&mut out, obj, keys);
        }
        (Value::Object(obj), CorpusShape::Leaf) => out.push(Entry::new(obj.clone())),
        _ => {}
    }
    out
}

/// Collect entries from an already parsed document.
pub fn collect_entries(root: &Value) -> Vec<Entry> {
    flatten(root, &classify(root))
}

/// Read and flatten a corpus file. An empty result is an error.
pub fn load_corpus(path: &Path) -> Result<Vec<Entry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let root: Value = serde_json::from_str(&content).map_err(|source| CorpusError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = collect_entries(&root);
    if entries.is_empty() {
        return Err(CorpusError::NoEntries(path.to_path_buf()).into());
    }
    tracing::info!(path = %path.display(), entries = entries.len(), "loaded corpus");
    Ok(entries)
}

/// Identifier → entry lookup built once from the loaded corpus.
///
/// Duplicate identifiers resolve last-wins.
#[derive(Debug, Default, Clone)]
pub struct CatalogIndex {
    by_id: HashMap<String, Entry>,
}

impl CatalogIndex {
    pub fn build(entries: Vec<Entry>) -> Self {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            let id = resolve_id(&entry, i);
            if by_id.insert(id.clone(), entry).is_some() {
                tracing::debug!(%id, "duplicate entry id, keeping the later one");
            }
        }
        Self { by_id }
    }

    /// Load the corpus at `path`; a missing file gives an empty index.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "dataset not found, id lookups will fail");
            return Ok(Self::default());
        }
        Ok(Self::build(load_corpus(path)?))
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
