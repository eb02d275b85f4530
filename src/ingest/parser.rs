//! File parsing facade (C2): dispatches on extension, flattens each source
//! record, chunks free text, and attaches an embedding vector per record.
//!
//! Grounded on `processor.py::FileParser`. Binary/unsupported files fall
//! back to a metadata-only record, matching `_parse_binary`.

use crate::error::IngestError;
use crate::store::record::Record;
use chrono::Utc;
use serde_json::Value;
use std::path::Path;

/// Produces an embedding vector for a chunk of text.
///
/// Grounded on the teacher's pluggable-embedding pattern (`fastembed`
/// feature with a deterministic fallback) rather than hard-requiring a
/// model download.
pub trait Embedder: Send + Sync {
    /// Embed `text`, returning a fixed-dimension vector.
    fn embed(&self, text: &str) -> Vec<f32>;
    /// Dimensionality of vectors this embedder produces.
    fn dim(&self) -> usize;
}

/// Deterministic, dependency-free embedder used when no semantic embedding
/// backend is configured. Not semantically meaningful beyond "same text in,
/// same vector out" — a stand-in so the rest of the pipeline (index,
/// threshold, dedup) can be exercised without a model.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Construct a hash embedder producing vectors of dimension `dim`.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for (idx, byte) in text.bytes().enumerate() {
            let slot = idx % self.dim;
            vector[slot] += f32::from(byte) / 255.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(feature = "fastembed-embeddings")]
pub mod fastembed_backend {
    //! Semantic embedder backed by `fastembed`, used when the
    //! `fastembed-embeddings` feature is enabled.

    use super::Embedder;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Embedder backed by a local ONNX BGE-M3 model via `fastembed`.
    pub struct FastEmbedEmbedder {
        model: Mutex<TextEmbedding>,
        dim: usize,
    }

    impl FastEmbedEmbedder {
        /// Initialize the embedder, downloading model weights if necessary.
        ///
        /// # Errors
        /// Returns an error if the model cannot be initialized.
        pub fn try_new() -> Result<Self, fastembed::Error> {
            let model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::BGEM3).with_show_download_progress(false),
            )?;
            Ok(Self { model: Mutex::new(model), dim: 1024 })
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            let mut model = match self.model.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            model
                .embed(vec![text.to_string()], None)
                .ok()
                .and_then(|mut embeddings| embeddings.pop())
                .unwrap_or_else(|| vec![0.0; self.dim])
        }

        fn dim(&self) -> usize {
            self.dim
        }
    }
}

/// Classify a file's type from its extension, matching the original's
/// dispatch table.
#[must_use]
pub fn classify_file_type(path: &Path) -> String {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "json" => "json",
        "csv" => "csv",
        "tsv" => "tsv",
        "md" | "markdown" => "markdown",
        "xml" => "xml",
        "txt" | "log" => "text",
        other if other.is_empty() => "binary",
        _ => "binary",
    }
    .to_string()
}

/// Parse a single source file into zero or more flattened, embedded records.
pub fn parse_file(
    path: &Path,
    embedder: &dyn Embedder,
) -> Result<Vec<Record>, IngestError> {
    let file_type = classify_file_type(path);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_path = path.to_string_lossy().to_string();

    match file_type.as_str() {
        "json" => parse_json(path, &file_path, &file_name, embedder),
        "csv" => parse_csv(path, &file_path, &file_name, b',', embedder),
        "tsv" => parse_csv(path, &file_path, &file_name, b'\t', embedder),
        "markdown" | "text" => parse_text(path, &file_path, &file_name, &file_type, embedder),
        "xml" => parse_xml_as_text(path, &file_path, &file_name, embedder),
        _ => parse_binary(path, &file_path, &file_name),
    }
}

/// Read `path` as UTF-8, falling back to a byte-as-char (Latin-1-style)
/// decode if it isn't valid UTF-8 — matching the original's
/// `read_file_content`'s UTF-8-then-latin-1 fallback.
pub(crate) fn read_to_string_lossy(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    Ok(String::from_utf8(bytes.clone()).unwrap_or_else(|_| {
        bytes.iter().map(|&b| b as char).collect()
    }))
}

fn embed_and_build(
    data: serde_json::Map<String, Value>,
    file_path: &str,
    file_name: &str,
    file_type: &str,
    sub_id: i64,
    embedder: &dyn Embedder,
) -> Record {
    let flat = Record::flatten_record(&Value::Object(data));
    let mut record = Record {
        record_id: format!("{file_path}:{sub_id}"),
        file_path: file_path.to_string(),
        file_name: file_name.to_string(),
        file_type: file_type.to_string(),
        processed_at: Utc::now(),
        sub_id,
        data: flat,
        vector: None,
    };
    let text = record.vector_text();
    if !text.is_empty() {
        record.vector = Some(embedder.embed(&text));
    }
    record
}

fn parse_json(
    path: &Path,
    file_path: &str,
    file_name: &str,
    embedder: &dyn Embedder,
) -> Result<Vec<Record>, IngestError> {
    let content = read_to_string_lossy(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| IngestError::Parse {
        path: file_path.to_string(),
        file_type: "json".to_string(),
        message: e.to_string(),
    })?;
    let rows: Vec<Value> = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| {
            let obj = match row {
                Value::Object(map) => map,
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
            };
            embed_and_build(obj, file_path, file_name, "json", idx as i64, embedder)
        })
        .collect())
}

fn parse_csv(
    path: &Path,
    file_path: &str,
    file_name: &str,
    delimiter: u8,
    embedder: &dyn Embedder,
) -> Result<Vec<Record>, IngestError> {
    let file_type = if delimiter == b'\t' { "tsv" } else { "csv" };
    let content = read_to_string_lossy(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| IngestError::Parse {
            path: file_path.to_string(),
            file_type: file_type.to_string(),
            message: e.to_string(),
        })?
        .clone();
    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row = result.map_err(|e| IngestError::Parse {
            path: file_path.to_string(),
            file_type: file_type.to_string(),
            message: e.to_string(),
        })?;
        let mut obj = serde_json::Map::new();
        for (header, value) in headers.iter().zip(row.iter()) {
            obj.insert(header.to_string(), Value::String(value.to_string()));
        }
        records.push(embed_and_build(
            obj,
            file_path,
            file_name,
            file_type,
            idx as i64,
            embedder,
        ));
    }
    Ok(records)
}

fn parse_text(
    path: &Path,
    file_path: &str,
    file_name: &str,
    file_type: &str,
    embedder: &dyn Embedder,
) -> Result<Vec<Record>, IngestError> {
    let content = read_to_string_lossy(path)?;
    let chunks = crate::ingest::chunk::split_text_into_chunks(&content);
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(idx, chunk)| {
            let mut obj = serde_json::Map::new();
            obj.insert("content".to_string(), Value::String(chunk));
            embed_and_build(obj, file_path, file_name, file_type, idx as i64, embedder)
        })
        .collect())
}

fn parse_xml_as_text(
    path: &Path,
    file_path: &str,
    file_name: &str,
    embedder: &dyn Embedder,
) -> Result<Vec<Record>, IngestError> {
    parse_text(path, file_path, file_name, "xml", embedder)
}

fn parse_binary(
    path: &Path,
    file_path: &str,
    file_name: &str,
) -> Result<Vec<Record>, IngestError> {
    let metadata = std::fs::metadata(path).map_err(|source| IngestError::Io {
        path: file_path.to_string(),
        source,
    })?;
    let mut obj = serde_json::Map::new();
    obj.insert("size".to_string(), Value::from(metadata.len()));
    obj.insert("mime_type".to_string(), Value::String("application/octet-stream".to_string()));
    let flat = Record::flatten_record(&Value::Object(obj));
    Ok(vec![Record {
        record_id: format!("{file_path}:0"),
        file_path: file_path.to_string(),
        file_name: file_name.to_string(),
        file_type: "binary".to_string(),
        processed_at: Utc::now(),
        sub_id: 0,
        data: flat,
        vector: None,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn classify_extensions() {
        assert_eq!(classify_file_type(Path::new("a.json")), "json");
        assert_eq!(classify_file_type(Path::new("a.csv")), "csv");
        assert_eq!(classify_file_type(Path::new("a.tsv")), "tsv");
        assert_eq!(classify_file_type(Path::new("a.md")), "markdown");
        assert_eq!(classify_file_type(Path::new("a.log")), "text");
        assert_eq!(classify_file_type(Path::new("a.bin")), "binary");
    }

    #[test]
    fn parse_json_array_yields_one_record_per_element() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, r#"[{{"a": 1}}, {{"a": 2}}]"#).unwrap();
        let embedder = HashEmbedder::default();
        let records = parse_file(file.path(), &embedder).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sub_id, 0);
        assert_eq!(records[1].sub_id, 1);
    }

    #[test]
    fn parse_csv_uses_header_as_keys() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "name,age").unwrap();
        writeln!(file, "alice,30").unwrap();
        let embedder = HashEmbedder::default();
        let records = parse_file(file.path(), &embedder).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.get("name").unwrap(), "alice");
    }

    #[test]
    fn parse_tsv_uses_tab_delimiter_and_header_keys() {
        let mut file = NamedTempFile::with_suffix(".tsv").unwrap();
        writeln!(file, "name\tage").unwrap();
        writeln!(file, "alice\t30").unwrap();
        let embedder = HashEmbedder::default();
        let records = parse_file(file.path(), &embedder).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_type, "tsv");
        assert_eq!(records[0].data.get("name").unwrap(), "alice");
        assert_eq!(records[0].data.get("age").unwrap(), "30");
    }

    #[test]
    fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        assert_eq!(embedder.embed("same text"), embedder.embed("same text"));
    }
}
