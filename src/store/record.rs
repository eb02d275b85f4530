//! The flattened record shape stored in `unified_data`, mirroring the
//! original system's DuckDB table of the same name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single ingested record: file metadata plus a flattened data map and an
/// optional embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Stable identifier, unique within a `(file_path, sub_id)` pair.
    pub record_id: String,
    /// Source file path, relative to the ingestion root.
    pub file_path: String,
    /// Source file name (final path component).
    pub file_name: String,
    /// File type, derived from the extension (`json`, `csv`, `text`, ...).
    pub file_type: String,
    /// RFC3339 timestamp of when this record was produced.
    pub processed_at: chrono::DateTime<chrono::Utc>,
    /// Index of this record within the records produced from its source
    /// file (a file may yield many records, e.g. one per chunk or CSV row).
    pub sub_id: i64,
    /// Flattened record payload.
    pub data: BTreeMap<String, Value>,
    /// Optional embedding vector, present only for records an embedder ran over.
    pub vector: Option<Vec<f32>>,
}

impl Record {
    /// Recursively flatten a nested JSON value into a flat key/value map.
    ///
    /// Composite values (objects, arrays) are JSON-stringified into the
    /// parent key *and* recursively flattened under a `{key}_`-prefixed
    /// namespace, matching the original flattening semantics: both the
    /// compact and expanded representations are kept.
    #[must_use]
    pub fn flatten_value(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    let flat_key = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}{key}")
                    };
                    match v {
                        Value::Object(_) | Value::Array(_) => {
                            out.insert(flat_key.clone(), Value::String(v.to_string()));
                            Self::flatten_value(v, &format!("{flat_key}_"), out);
                        }
                        _ => {
                            out.insert(flat_key, v.clone());
                        }
                    }
                }
            }
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    let flat_key = format!("{prefix}{idx}");
                    match item {
                        Value::Object(_) | Value::Array(_) => {
                            out.insert(flat_key.clone(), Value::String(item.to_string()));
                            Self::flatten_value(item, &format!("{flat_key}_"), out);
                        }
                        _ => {
                            out.insert(flat_key, item.clone());
                        }
                    }
                }
            }
            other => {
                out.insert(prefix.trim_end_matches('_').to_string(), other.clone());
            }
        }
    }

    /// Flatten a raw JSON object into the record's `data` field.
    #[must_use]
    pub fn flatten_record(raw: &Value) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        Self::flatten_value(raw, "", &mut out);
        out
    }

    /// Build the text blob fed to an embedder: `"key: value"` pairs for
    /// scalar fields, space-joined and truncated to 512 characters.
    #[must_use]
    pub fn vector_text(&self) -> String {
        let mut parts = Vec::new();
        for (key, value) in &self.data {
            match value {
                Value::String(s) => parts.push(format!("{key}: {s}")),
                Value::Number(n) => parts.push(format!("{key}: {n}")),
                Value::Bool(b) => parts.push(format!("{key}: {b}")),
                _ => {}
            }
        }
        let joined = parts.join(" ");
        if joined.chars().count() > 512 {
            joined.chars().take(512).collect()
        } else {
            joined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_keeps_both_stringified_and_expanded_nested_fields() {
        let raw = json!({
            "title": "doc",
            "meta": {"author": "a", "tags": ["x", "y"]}
        });
        let flat = Record::flatten_record(&raw);
        assert_eq!(flat.get("title").unwrap(), "doc");
        assert!(flat.contains_key("meta"));
        assert_eq!(flat.get("meta_author").unwrap(), "a");
        assert!(flat.contains_key("meta_tags"));
        assert_eq!(flat.get("meta_tags_0").unwrap(), "x");
        assert_eq!(flat.get("meta_tags_1").unwrap(), "y");
    }

    #[test]
    fn vector_text_truncates_to_512_chars() {
        let mut data = BTreeMap::new();
        data.insert("body".to_string(), Value::String("a".repeat(1000)));
        let record = Record {
            record_id: "r1".to_string(),
            file_path: "f".to_string(),
            file_name: "f".to_string(),
            file_type: "text".to_string(),
            processed_at: chrono::Utc::now(),
            sub_id: 0,
            data,
            vector: None,
        };
        assert_eq!(record.vector_text().chars().count(), 512);
    }
}
