//! Canonical text, identifier and label derivation.
//!
//! The canonical text is the only thing the embedding backends ever see, so
//! it must come out byte-identical for the same entry at training and at
//! inference time.

use serde_json::Value;

use crate::models::{Entry, ResolvedEntry};

/// Fields concatenated into the canonical text, in order. `tags` follows.
pub const TEXT_FIELDS: [&str; 9] = [
    "denominacion",
    "pais",
    "anio_emision",
    "anio_inicio",
    "anio_fin",
    "anverso",
    "reverso",
    "descripcion",
    "curiosidad",
];

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a single JSON value as text.
fn render(v: &Value) -> String {
    match v {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => join_rendered(items),
        Value::Object(_) => v.to_string(),
    }
}

fn join_rendered(items: &[Value]) -> String {
    items.iter().map(render).collect::<Vec<_>>().join(" ")
}

/// Build the canonical text of an entry.
///
/// Sequence-valued fields always contribute (their elements space-joined,
/// possibly empty); scalar fields contribute only when truthy. Returns an
/// empty string when nothing contributes.
pub fn canonical_text(entry: &Entry) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(TEXT_FIELDS.len() + 1);

    for key in TEXT_FIELDS {
        match entry.get(key) {
            Some(Value::Array(items)) => parts.push(join_rendered(items)),
            Some(v) if is_truthy(v) => parts.push(render(v)),
            _ => {}
        }
    }

    if let Some(Value::Array(tags)) = entry.get("tags") {
        parts.push(join_rendered(tags));
    }

    parts.join(" ").trim().to_string()
}

fn truthy_string(entry: &Entry, key: &str) -> Option<String> {
    entry.get(key).filter(|v| is_truthy(v)).map(render)
}

/// Resolve the identifier of the entry at ingestion position `position`:
/// `id`, else `indice`, else `entry_NNNNNN`.
pub fn resolve_id(entry: &Entry, position: usize) -> String {
    truthy_string(entry, "id")
        .or_else(|| truthy_string(entry, "indice"))
        .unwrap_or_else(|| format!("entry_{:06}", position))
}

/// Class label: `denominacion`, else `pais`, else the resolved id.
pub fn label_for(entry: &Entry, id: &str) -> String {
    truthy_string(entry, "denominacion")
        .or_else(|| truthy_string(entry, "pais"))
        .unwrap_or_else(|| id.to_string())
}

/// Resolve every entry in ingestion order. Empty texts fall back to the id.
pub fn resolve_entries(entries: &[Entry]) -> Vec<ResolvedEntry> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let id = resolve_id(entry, i);
            let text = canonical_text(entry);
            let text = if text.is_empty() { id.clone() } else { text };
            let label = label_for(entry, &id);
            ResolvedEntry { id, text, label }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::collect_entries;
    use serde_json::json;

    fn entry(v: Value) -> Entry {
        match v {
            Value::Object(m) => Entry::new(m),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_scenario_single_wrapped_coin() {
        let entries =
            collect_entries(&json!({"monedas": [{"id": "A1", "pais": "Spain", "denominacion": "1 cent"}]}));
        let resolved = resolve_entries(&entries);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "A1");
        assert_eq!(resolved[0].text, "1 cent Spain");
        assert_eq!(resolved[0].label, "1 cent");
    }

    #[test]
    fn test_field_order_and_tags() {
        let e = entry(json!({
            "tags": ["bimetallic", "commemorative"],
            "curiosidad": "rare",
            "pais": "Italy",
            "denominacion": "2 euro",
            "anio_emision": 2002,
            "anverso": ["Dante", "Alighieri"]
        }));
        assert_eq!(
            canonical_text(&e),
            "2 euro Italy 2002 Dante Alighieri rare bimetallic commemorative"
        );
    }

    #[test]
    fn test_falsy_scalars_skipped() {
        let e = entry(json!({"denominacion": "", "pais": "Peru", "anio_fin": 0, "reverso": null}));
        assert_eq!(canonical_text(&e), "Peru");
    }

    #[test]
    fn test_pure() {
        let e = entry(json!({"denominacion": "5 pesetas", "descripcion": "Franco", "tags": ["x"]}));
        assert_eq!(canonical_text(&e), canonical_text(&e));
    }

    #[test]
    fn test_id_fallbacks() {
        let with_indice = entry(json!({"indice": 17, "pais": "Chile"}));
        assert_eq!(resolve_id(&with_indice, 3), "17");

        let bare = entry(json!({"pais": "Chile"}));
        assert_eq!(resolve_id(&bare, 3), "entry_000003");

        let empty_id = entry(json!({"id": "", "indice": "I-9"}));
        assert_eq!(resolve_id(&empty_id, 0), "I-9");
    }

    #[test]
    fn test_empty_text_falls_back_to_id() {
        let entries = vec![entry(json!({"id": "ONLY-ID"})), entry(json!({"foo": "bar"}))];
        let resolved = resolve_entries(&entries);
        assert_eq!(resolved[0].text, "ONLY-ID");
        assert_eq!(resolved[0].label, "ONLY-ID");
        assert_eq!(resolved[1].id, "entry_000001");
        assert_eq!(resolved[1].text, "entry_000001");
    }

    #[test]
    fn test_non_empty_field_gives_non_empty_text() {
        for key in TEXT_FIELDS {
            let e = entry(json!({ key: "value" }));
            assert!(!canonical_text(&e).is_empty(), "{} produced empty text", key);
        }
        let tags_only = entry(json!({"tags": ["gold"]}));
        assert_eq!(canonical_text(&tags_only), "gold");
    }

    #[test]
    fn test_label_prefers_denominacion_then_pais() {
        let e = entry(json!({"id": "Z", "pais": "Japan"}));
        assert_eq!(label_for(&e, "Z"), "Japan");
        let e = entry(json!({"id": "Z", "pais": "Japan", "denominacion": "100 yen"}));
        assert_eq!(label_for(&e, "Z"), "100 yen");
    }
}
