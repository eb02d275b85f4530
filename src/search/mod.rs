//! Hybrid structured + vector search engine (C5).
//!
//! Grounded on `search.py::SearchEngine`: structured queries dispatch on
//! query shape (keyword substring, file type, date range) and vector
//! queries embed a reference text and search the in-memory index.

use crate::error::SearchError;
use crate::index::{FlatIndex, VectorHit};
use crate::ingest::parser::Embedder;
use crate::store::UnifiedStore;
use crate::store::record::Record;

/// A single structured query condition.
#[derive(Debug, Clone)]
pub enum StructuredQuery {
    /// Substring match against any field's rendered value.
    Keyword { keyword: String },
    /// Exact match against the record's file type.
    FileType { file_type: String },
    /// Inclusive range over `processed_at`.
    DateRange { start: String, end: String },
}

/// A single vector-similarity query condition.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    /// Natural-language text to embed and search with.
    pub reference_text: String,
    /// Minimum similarity score required for a hit to be kept.
    pub similarity_threshold: f32,
    /// Maximum number of hits to return.
    pub top_k: usize,
}

/// Result of a structured query: the matching records.
pub type StructuredHit = Record;

/// Default row limit for keyword/file-type queries, matching the original's
/// `LIMIT 10` for those query shapes (date-range queries are unlimited).
const DEFAULT_LIMIT: i64 = 10;

/// Combines the unified store, the in-memory vector index, and an embedder
/// into a single search facade.
pub struct SearchEngine<'a> {
    store: &'a UnifiedStore,
    index: &'a FlatIndex,
    embedder: &'a dyn Embedder,
}

impl<'a> SearchEngine<'a> {
    /// Construct a search engine over the given store, vector index, and embedder.
    #[must_use]
    pub fn new(store: &'a UnifiedStore, index: &'a FlatIndex, embedder: &'a dyn Embedder) -> Self {
        Self { store, index, embedder }
    }

    /// Execute a structured query against the unified store.
    pub fn execute_structured_query(
        &self,
        query: &StructuredQuery,
    ) -> Result<Vec<StructuredHit>, SearchError> {
        let hits = match query {
            StructuredQuery::Keyword { keyword } => {
                self.store.query_text(keyword, DEFAULT_LIMIT)?
            }
            StructuredQuery::FileType { file_type } => {
                self.store.query_file_type(file_type, DEFAULT_LIMIT)?
            }
            StructuredQuery::DateRange { start, end } => {
                self.store.query_date_range(start, end)?
            }
        };
        Ok(hits)
    }

    /// Embed `reference_text` and search the vector index for its `top_k`
    /// nearest neighbors. Does not apply a similarity threshold; that
    /// filtering happens during plan execution (C8), after fingerprinting
    /// but before dedup, matching the original's ordering.
    pub fn execute_vector_search(
        &self,
        reference_text: &str,
        top_k: usize,
    ) -> Result<Vec<VectorHit>, SearchError> {
        if reference_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(reference_text);
        Ok(self.index.search(&query_vector, top_k))
    }
}

/// Parse a free-form query string into a [`StructuredQuery`], matching the
/// original's `file:(\w+)` / `date:(...)` prefix dispatch, falling back to a
/// plain keyword match.
#[must_use]
pub fn parse_structured_query(raw: &str) -> StructuredQuery {
    let trimmed = raw.trim();
    if let Some(file_type) = trimmed.strip_prefix("file:") {
        return StructuredQuery::FileType {
            file_type: file_type.trim().to_string(),
        };
    }
    if let Some(range) = trimmed.strip_prefix("date:") {
        if let Some((start, end)) = range.split_once("..") {
            return StructuredQuery::DateRange {
                start: start.trim().to_string(),
                end: end.trim().to_string(),
            };
        }
    }
    StructuredQuery::Keyword {
        keyword: trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parser::HashEmbedder;
    use serde_json::json;

    fn sample_record(path: &str, content: &str) -> Record {
        Record {
            record_id: format!("{path}:0"),
            file_path: path.to_string(),
            file_name: path.to_string(),
            file_type: "text".to_string(),
            processed_at: chrono::Utc::now(),
            sub_id: 0,
            data: Record::flatten_record(&json!({"content": content})),
            vector: None,
        }
    }

    #[test]
    fn parses_file_and_date_and_keyword_prefixes() {
        matches!(parse_structured_query("file:json"), StructuredQuery::FileType { .. });
        matches!(
            parse_structured_query("date:2024-01-01..2024-12-31"),
            StructuredQuery::DateRange { .. }
        );
        matches!(parse_structured_query("hello"), StructuredQuery::Keyword { .. });
    }

    #[test]
    fn structured_keyword_query_matches_substring() {
        let mut store = UnifiedStore::open_in_memory().unwrap();
        store
            .replace_records_for_paths(
                &["a.txt".to_string()],
                &[sample_record("a.txt", "the quick fox")],
            )
            .unwrap();
        let index = FlatIndex::new(64);
        let embedder = HashEmbedder::default();
        let engine = SearchEngine::new(&store, &index, &embedder);
        let hits = engine
            .execute_structured_query(&StructuredQuery::Keyword {
                keyword: "quick".to_string(),
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn vector_search_on_empty_reference_text_returns_nothing() {
        let store = UnifiedStore::open_in_memory().unwrap();
        let index = FlatIndex::new(64);
        let embedder = HashEmbedder::default();
        let engine = SearchEngine::new(&store, &index, &embedder);
        let hits = engine.execute_vector_search("   ", 5).unwrap();
        assert!(hits.is_empty());
    }
}
