//! Query intent parsing (C6): turns a free-form query into structured and
//! vector search conditions.
//!
//! Grounded on `core/parser.py::IntentParser`: keyword extraction and
//! reference-text extraction run concurrently, each retried independently,
//! with a TTL+LRU cache in front and a neutral fallback template on total
//! failure.

use crate::config::{DEFAULT_SEARCH_TOP_K, DEFAULT_SIMILARITY_THRESHOLD};
use crate::llm::dispatcher::ReasoningEngine;
use crate::llm::Dispatcher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::warn;

/// A structured search condition derived from a keyword.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredCondition {
    /// The keyword to match.
    pub keyword: String,
}

/// A vector search condition derived from a reference text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorCondition {
    /// Reference text to embed and search with.
    pub reference_text: String,
    /// Minimum similarity required to keep a hit.
    pub similarity_threshold: f32,
    /// Maximum hits to return.
    pub top_k: usize,
}

/// The parsed intent behind a query: structured and vector conditions ready
/// to be turned into a [`crate::plan::SearchPlan`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    /// The original, unmodified query text.
    pub original_query: String,
    /// Structured (keyword) conditions.
    pub structured_conditions: Vec<StructuredCondition>,
    /// Vector (semantic) conditions.
    pub vector_conditions: Vec<VectorCondition>,
}

impl Intent {
    /// A neutral fallback intent used when parsing fails entirely: treats
    /// the whole query as a single keyword and a single reference text.
    #[must_use]
    pub fn fallback(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            structured_conditions: vec![StructuredCondition { keyword: query.to_string() }],
            vector_conditions: vec![VectorCondition {
                reference_text: query.to_string(),
                similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
                top_k: DEFAULT_SEARCH_TOP_K,
            }],
        }
    }
}

struct CacheEntry {
    intent: Intent,
    inserted_at: Instant,
}

/// TTL + max-size LRU-ish cache of parsed intents, keyed by raw query text.
/// Grounded on `core/cache.py::QueryCache`.
pub struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
}

impl QueryCache {
    /// Construct a cache with the given capacity and entry lifetime.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self { entries: HashMap::new(), max_size, ttl }
    }

    /// Fetch a cached intent for `query`, evicting it first if expired.
    pub fn get(&mut self, query: &str) -> Option<Intent> {
        let expired = self
            .entries
            .get(query)
            .is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            self.entries.remove(query);
            return None;
        }
        self.entries.get(query).map(|e| e.intent.clone())
    }

    /// Store `intent` under `query`, evicting the oldest entry first if the
    /// cache is at capacity.
    pub fn store(&mut self, query: String, intent: Intent) {
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&query) {
            if let Some(oldest_key) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest_key);
            }
        }
        self.entries.insert(query, CacheEntry { intent, inserted_at: Instant::now() });
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_CACHE_MAX_SIZE,
            Duration::from_secs(crate::config::DEFAULT_CACHE_TTL_SECS),
        )
    }
}

const KEYWORD_EXTRACT_PROMPT: &str = "Extract up to five short search keywords from the user's \
query. Respond with JSON of the form {\"keywords\": [\"...\"]} and nothing else.";
const REFERENCE_TEXT_EXTRACT_PROMPT: &str = "Extract up to three short reference passages that \
capture the semantic intent of the user's query, suitable for embedding similarity search. \
Respond with JSON of the form {\"reference_texts\": [\"...\"]} and nothing else.";

/// Turns free-form queries into [`Intent`]s via two concurrent LLM calls.
pub struct IntentParser<'a> {
    dispatcher: &'a Dispatcher,
    model: String,
    cache: QueryCache,
}

impl<'a> IntentParser<'a> {
    /// Construct an intent parser bound to `model`.
    #[must_use]
    pub fn new(dispatcher: &'a Dispatcher, model: impl Into<String>) -> Self {
        Self { dispatcher, model: model.into(), cache: QueryCache::default() }
    }

    /// Parse `query`, checking the cache first and falling back to
    /// [`Intent::fallback`] if both extraction calls fail after retries.
    pub async fn parse_query(&mut self, query: &str) -> Intent {
        if let Some(cached) = self.cache.get(query) {
            return cached;
        }

        let keywords_fut = self.extract_keywords(query);
        let reference_texts_fut = self.extract_reference_texts(query);
        let (keywords, reference_texts) = tokio::join!(keywords_fut, reference_texts_fut);

        let structured_conditions = keywords
            .map(|ks| ks.into_iter().map(|keyword| StructuredCondition { keyword }).collect())
            .unwrap_or_default();
        let vector_conditions = reference_texts
            .map(|texts| {
                texts
                    .into_iter()
                    .map(|reference_text| VectorCondition {
                        reference_text,
                        similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
                        top_k: DEFAULT_SEARCH_TOP_K,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if structured_conditions.is_empty() && vector_conditions.is_empty() {
            return Intent::fallback(query);
        }

        let intent = Intent {
            original_query: query.to_string(),
            structured_conditions,
            vector_conditions,
        };
        self.cache.store(query.to_string(), intent.clone());
        intent
    }

    async fn extract_keywords(&self, query: &str) -> Option<Vec<String>> {
        let engine = ReasoningEngine::new(self.dispatcher, self.model.clone());
        for attempt in 0..3u32 {
            engine.clear_history();
            engine.set_system_prompt(KEYWORD_EXTRACT_PROMPT);
            engine.add_user_message(query);
            match engine.get_response(0.1, Some(256)).await {
                Ok(response) => {
                    if let Some(keywords) = parse_json_field(&response, "keywords") {
                        return Some(keywords);
                    }
                    warn!(attempt, "keyword extraction returned malformed JSON");
                }
                Err(err) => warn!(attempt, error = %err, "keyword extraction call failed"),
            }
            if attempt < 2 {
                sleep(Duration::from_secs(1)).await;
            }
        }
        None
    }

    async fn extract_reference_texts(&self, query: &str) -> Option<Vec<String>> {
        let engine = ReasoningEngine::new(self.dispatcher, self.model.clone());
        for attempt in 0..3u32 {
            engine.clear_history();
            engine.set_system_prompt(REFERENCE_TEXT_EXTRACT_PROMPT);
            engine.add_user_message(query);
            match engine.get_response(0.1, Some(256)).await {
                Ok(response) => {
                    if let Some(texts) = parse_json_field(&response, "reference_texts") {
                        return Some(texts);
                    }
                    warn!(attempt, "reference text extraction returned malformed JSON");
                }
                Err(err) => warn!(attempt, error = %err, "reference text extraction call failed"),
            }
            if attempt < 2 {
                sleep(Duration::from_secs(1)).await;
            }
        }
        None
    }
}

fn parse_json_field(raw: &str, field: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let array = value.get(field)?.as_array()?;
    Some(
        array
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_treats_query_as_both_keyword_and_reference() {
        let intent = Intent::fallback("find invoices");
        assert_eq!(intent.structured_conditions.len(), 1);
        assert_eq!(intent.vector_conditions.len(), 1);
        assert_eq!(intent.structured_conditions[0].keyword, "find invoices");
    }

    #[test]
    fn cache_evicts_oldest_entry_at_capacity() {
        let mut cache = QueryCache::new(2, Duration::from_secs(60));
        cache.store("a".to_string(), Intent::fallback("a"));
        std::thread::sleep(Duration::from_millis(5));
        cache.store("b".to_string(), Intent::fallback("b"));
        std::thread::sleep(Duration::from_millis(5));
        cache.store("c".to_string(), Intent::fallback("c"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn cache_expires_entries_past_ttl() {
        let mut cache = QueryCache::new(10, Duration::from_millis(1));
        cache.store("a".to_string(), Intent::fallback("a"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn parse_json_field_extracts_string_array() {
        let parsed = parse_json_field(r#"{"keywords": ["a", "b"]}"#, "keywords").unwrap();
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);
    }
}
