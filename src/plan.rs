//! Search planning (C7): a pure function turning a parsed [`Intent`] into a
//! concrete [`SearchPlan`] of structured and vector queries.
//!
//! Grounded on `core/planner.py::SearchPlanner`.

use crate::error::PlanError;
use crate::intent::Intent;
use crate::search::{StructuredQuery, VectorQuery};
use serde::{Deserialize, Serialize};

/// Human-readable step names recorded in a plan, in the original's order:
/// structured first, then vector.
pub const STEP_STRUCTURED_QUERY: &str = "structured_query";
/// See [`STEP_STRUCTURED_QUERY`].
pub const STEP_VECTOR_QUERY: &str = "vector_query";

/// Metadata describing how and when a plan was generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// When the plan was generated.
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// The original query this plan was built for.
    pub original_query: String,
}

/// A concrete, executable search plan.
pub struct SearchPlan {
    /// Ordered list of step names this plan executes.
    pub steps: Vec<String>,
    /// Structured (keyword/file-type/date) queries to run.
    pub structured_queries: Vec<StructuredQuery>,
    /// Vector (semantic) queries to run.
    pub vector_queries: Vec<VectorQuery>,
    /// Generation metadata.
    pub metadata: PlanMetadata,
}

/// Build a [`SearchPlan`] from a parsed [`Intent`].
///
/// Each structured condition becomes a keyword query; each vector condition
/// becomes a vector query, dropped if its reference text is empty. Returns
/// [`PlanError::NoValidPlan`] if neither kind of query could be built,
/// matching the original's `steps`-must-be-non-empty invariant.
pub fn build_search_plan(intent: &Intent) -> Result<SearchPlan, PlanError> {
    let structured_queries: Vec<StructuredQuery> = intent
        .structured_conditions
        .iter()
        .filter(|c| !c.keyword.trim().is_empty())
        .map(|c| StructuredQuery::Keyword { keyword: c.keyword.clone() })
        .collect();

    let vector_queries: Vec<VectorQuery> = intent
        .vector_conditions
        .iter()
        .filter(|c| !c.reference_text.trim().is_empty())
        .map(|c| VectorQuery {
            reference_text: c.reference_text.clone(),
            similarity_threshold: c.similarity_threshold,
            top_k: c.top_k,
        })
        .collect();

    let mut steps = Vec::new();
    if !structured_queries.is_empty() {
        steps.push(STEP_STRUCTURED_QUERY.to_string());
    }
    if !vector_queries.is_empty() {
        steps.push(STEP_VECTOR_QUERY.to_string());
    }

    if steps.is_empty() {
        return Err(PlanError::NoValidPlan);
    }

    Ok(SearchPlan {
        steps,
        structured_queries,
        vector_queries,
        metadata: PlanMetadata {
            generated_at: chrono::Utc::now(),
            original_query: intent.original_query.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_intent_produces_both_steps() {
        let intent = Intent::fallback("find invoices");
        let plan = build_search_plan(&intent).unwrap();
        assert_eq!(plan.steps, vec![STEP_STRUCTURED_QUERY, STEP_VECTOR_QUERY]);
    }

    #[test]
    fn empty_intent_is_rejected() {
        let intent = Intent {
            original_query: "x".to_string(),
            structured_conditions: vec![],
            vector_conditions: vec![],
        };
        assert!(matches!(build_search_plan(&intent), Err(PlanError::NoValidPlan)));
    }

    #[test]
    fn blank_conditions_are_filtered_out() {
        let intent = Intent {
            original_query: "x".to_string(),
            structured_conditions: vec![crate::intent::StructuredCondition { keyword: "  ".to_string() }],
            vector_conditions: vec![crate::intent::VectorCondition {
                reference_text: String::new(),
                similarity_threshold: 0.6,
                top_k: 5,
            }],
        };
        assert!(matches!(build_search_plan(&intent), Err(PlanError::NoValidPlan)));
    }
}
