//! Checkpoint state machine (C11): the ten named steps a task iteration
//! passes through, and the resume-bucket logic for reentering a crashed or
//! cancelled task.
//!
//! Grounded on `services/alchemy_service.py::DataMindAlchemy`'s
//! `_current_step` transitions and `resume_process` dispatch.

use serde::{Deserialize, Serialize};

/// A named step in the iteration lifecycle, recorded at every checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// The task is being set up: directories created, state loaded.
    Initialization,
    /// Source data is being located/validated ahead of ingestion.
    PrepareSourceData,
    /// The corpus is being ingested into the unified store.
    ProcessData,
    /// The LLM dispatcher, search engine, and vector index are being built.
    InitializeComponents,
    /// The query workflow (intent → plan → search → artifact) is running.
    ExecuteWorkflow,
    /// Sub-step of `ExecuteWorkflow`: the query's intent is being parsed.
    ParseIntent,
    /// Sub-step of `ExecuteWorkflow`: a search plan is being built.
    BuildPlan,
    /// Sub-step of `ExecuteWorkflow`: the plan is being executed.
    ExecuteSearch,
    /// Sub-step of `ExecuteWorkflow`: the HTML artifact is being generated.
    GenerateArtifact,
    /// The task iteration has completed and is being finalized.
    Finalize,
}

impl Step {
    /// All steps, in execution order.
    pub const ALL: [Step; 10] = [
        Step::Initialization,
        Step::PrepareSourceData,
        Step::ProcessData,
        Step::InitializeComponents,
        Step::ExecuteWorkflow,
        Step::ParseIntent,
        Step::BuildPlan,
        Step::ExecuteSearch,
        Step::GenerateArtifact,
        Step::Finalize,
    ];

    /// Where a crashed/cancelled task resumed from this step should restart.
    ///
    /// Steps at or before `ProcessData` have no durable partial state worth
    /// keeping, so resumption restarts from source-data preparation.
    /// `InitializeComponents` and later resume from `ParseIntent`, since
    /// ingestion is already durable in the store by that point.
    #[must_use]
    pub fn resume_point(self) -> ResumePoint {
        match self {
            Step::Initialization | Step::PrepareSourceData | Step::ProcessData => {
                ResumePoint::RestartFromSourceData
            }
            Step::InitializeComponents
            | Step::ExecuteWorkflow
            | Step::ParseIntent
            | Step::BuildPlan
            | Step::ExecuteSearch
            | Step::GenerateArtifact => ResumePoint::ResumeWorkflowFromParseIntent,
            Step::Finalize => ResumePoint::AlreadyComplete,
        }
    }

    /// The step's wire name, as recorded in `checkpoint.json`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Initialization => "initialization",
            Step::PrepareSourceData => "prepare_source_data",
            Step::ProcessData => "process_data",
            Step::InitializeComponents => "initialize_components",
            Step::ExecuteWorkflow => "execute_workflow",
            Step::ParseIntent => "parse_intent",
            Step::BuildPlan => "build_plan",
            Step::ExecuteSearch => "execute_search",
            Step::GenerateArtifact => "generate_artifact",
            Step::Finalize => "finalize",
        }
    }
}

/// Where resumption should begin, given the step a checkpoint was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// Restart ingestion and the whole workflow from scratch.
    RestartFromSourceData,
    /// Skip ingestion; resume the query workflow from intent parsing.
    ResumeWorkflowFromParseIntent,
    /// The task already finished; nothing to resume.
    AlreadyComplete,
}

/// A durable snapshot of an iteration's progress, written after every step
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The task this checkpoint belongs to.
    pub task_id: String,
    /// The step the task had reached when this checkpoint was written.
    pub current_step: Step,
    /// The iteration number in progress, if any.
    pub iteration: u32,
    /// The query being processed, if the workflow has started.
    pub query: Option<String>,
    /// When this checkpoint was written.
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl Checkpoint {
    /// Construct a checkpoint for `task_id` at `step`.
    #[must_use]
    pub fn new(task_id: impl Into<String>, step: Step, iteration: u32, query: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            current_step: step,
            iteration,
            query,
            saved_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_steps_restart_from_source_data() {
        assert_eq!(Step::Initialization.resume_point(), ResumePoint::RestartFromSourceData);
        assert_eq!(Step::PrepareSourceData.resume_point(), ResumePoint::RestartFromSourceData);
        assert_eq!(Step::ProcessData.resume_point(), ResumePoint::RestartFromSourceData);
    }

    #[test]
    fn later_steps_resume_from_parse_intent() {
        assert_eq!(Step::InitializeComponents.resume_point(), ResumePoint::ResumeWorkflowFromParseIntent);
        assert_eq!(Step::GenerateArtifact.resume_point(), ResumePoint::ResumeWorkflowFromParseIntent);
    }

    #[test]
    fn finalize_is_already_complete() {
        assert_eq!(Step::Finalize.resume_point(), ResumePoint::AlreadyComplete);
    }

    #[test]
    fn step_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Step::ParseIntent).unwrap();
        assert_eq!(json, "\"parse_intent\"");
    }
}
