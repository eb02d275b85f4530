//! Search plan execution (C8): runs every query in a [`SearchPlan`],
//! applies the vector similarity threshold, deduplicates by content
//! fingerprint, and never propagates an error — failures are captured in
//! the result envelope's `metadata.error` field instead.
//!
//! Grounded on `core/executor.py::SearchPlanExecutor`.

use crate::plan::SearchPlan;
use crate::search::{SearchEngine, StructuredHit};
use md5::{Digest, Md5};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error};

/// A single, flattened hit alongside its similarity score (vector hits
/// only; structured hits carry no similarity). Carries the same
/// `{record_id, file_path, file_name, file_type, data}` fields as a
/// structured hit so the context-assembly step can treat both streams
/// uniformly.
#[derive(Debug, Clone)]
pub struct VectorResultRow {
    /// The matched record id.
    pub record_id: String,
    /// The matched record's file path.
    pub file_path: String,
    /// Source file name (final path component).
    pub file_name: String,
    /// File type, derived from the extension.
    pub file_type: String,
    /// The record's flattened data payload.
    pub data: std::collections::BTreeMap<String, Value>,
    /// Similarity score on the original's `10 / (1 + distance)` scale.
    pub similarity: f32,
}

/// Aggregate counts for a completed execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultStats {
    /// Number of (deduplicated) structured hits.
    pub structured_count: usize,
    /// Number of (threshold-filtered, deduplicated) vector hits.
    pub vector_count: usize,
    /// Sum of the two.
    pub total: usize,
}

/// Coarse statistics surfaced for the artifact generator's context.
#[derive(Debug, Clone, Default)]
pub struct ResultInsights {
    /// Distinct file types seen across all hits.
    pub file_types: BTreeSet<String>,
    /// Earliest and latest `processed_at` seen, if any hits were found.
    pub time_range: Option<(String, String)>,
}

/// The full result envelope returned by [`execute_plan`]. Always valid, even
/// on internal failure — `metadata_error` is set instead of the call
/// returning an `Err`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Deduplicated structured-query hits.
    pub structured: Vec<StructuredHit>,
    /// Threshold-filtered, deduplicated vector-query hits.
    pub vector: Vec<VectorResultRow>,
    /// Aggregate counts.
    pub stats: ResultStats,
    /// Coarse statistics over the combined hit set.
    pub insights: ResultInsights,
    /// The query this plan was built for.
    pub original_query: String,
    /// Set if execution failed partway through; the envelope above still
    /// reflects whatever was collected before the failure.
    pub error: Option<String>,
}

/// Execute every query in `plan` against `engine`, threshold-filtering and
/// deduplicating results. Per-query failures are logged and skipped rather
/// than aborting the whole plan; only a failure in the dedup/bookkeeping
/// logic itself sets `error` on the returned envelope.
pub fn execute_plan(engine: &SearchEngine<'_>, plan: &SearchPlan) -> ExecutionResult {
    let mut result = ExecutionResult {
        original_query: plan.metadata.original_query.clone(),
        ..ExecutionResult::default()
    };

    let mut seen_fingerprints: HashSet<String> = HashSet::new();

    for query in &plan.structured_queries {
        match engine.execute_structured_query(query) {
            Ok(hits) => {
                for hit in hits {
                    let fingerprint = content_fingerprint(&serde_json::to_value(&hit.data).unwrap_or(Value::Null));
                    if seen_fingerprints.insert(fingerprint) {
                        result.structured.push(hit);
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "structured query failed, skipping");
            }
        }
    }
    result.stats.structured_count = result.structured.len();

    for query in &plan.vector_queries {
        match engine.execute_vector_search(&query.reference_text, query.top_k) {
            Ok(hits) => {
                for hit in hits {
                    // Threshold filtering happens BEFORE dedup, matching the
                    // original's ordering exactly.
                    if hit.similarity < query.similarity_threshold {
                        continue;
                    }
                    let fingerprint = content_fingerprint(&serde_json::to_value(&hit.data).unwrap_or(Value::Null));
                    if seen_fingerprints.insert(fingerprint) {
                        result.vector.push(VectorResultRow {
                            record_id: hit.record_id,
                            file_path: hit.file_path,
                            file_name: hit.file_name,
                            file_type: hit.file_type,
                            data: hit.data,
                            similarity: hit.similarity,
                        });
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "vector query failed, skipping");
            }
        }
    }
    result.stats.vector_count = result.vector.len();
    result.stats.total = result.stats.structured_count + result.stats.vector_count;

    populate_insights(&mut result);
    debug!(total = result.stats.total, "plan execution complete");
    result
}

fn populate_insights(result: &mut ExecutionResult) {
    let mut file_types = BTreeSet::new();
    let mut timestamps: Vec<String> = Vec::new();
    for hit in &result.structured {
        file_types.insert(hit.file_type.clone());
        timestamps.push(hit.processed_at.to_rfc3339());
    }
    for hit in &result.vector {
        file_types.insert(hit.file_type.clone());
        if let Some(Value::String(ts)) = hit.data.get("processed_at") {
            timestamps.push(ts.clone());
        }
    }
    timestamps.sort();
    result.insights.file_types = file_types;
    result.insights.time_range = match (timestamps.first(), timestamps.last()) {
        (Some(first), Some(last)) => Some((first.clone(), last.clone())),
        _ => None,
    };
}

/// Normalize `content` (lowercase, whitespace-collapsed) and return its MD5
/// hex digest, matching `_generate_content_fingerprint` exactly.
#[must_use]
pub fn content_fingerprint(content: &Value) -> String {
    let raw = match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let normalized = raw.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Md5::digest(normalized.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        let a = content_fingerprint(&Value::String("Hello   World".to_string()));
        let b = content_fingerprint(&Value::String("hello world".to_string()));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_for_different_content() {
        let a = content_fingerprint(&Value::String("alpha".to_string()));
        let b = content_fingerprint(&Value::String("beta".to_string()));
        assert_ne!(a, b);
    }
}
