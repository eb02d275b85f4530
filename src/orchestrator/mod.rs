//! Task iteration orchestrator (C11): owns a task's working directory,
//! steps it through the checkpointed lifecycle, and can chain iterations
//! via the artifact generator's suggested follow-up query.
//!
//! Grounded on `services/alchemy_service.py::DataMindAlchemy`.

pub mod checkpoint;
pub mod events;

use crate::artifact::ArtifactGenerator;
use crate::config::AlchemyConfig;
use crate::error::OrchestratorError;
use crate::ingest::parser::Embedder;
use crate::index::FlatIndex;
use crate::intent::IntentParser;
use crate::llm::Dispatcher;
use crate::plan::build_search_plan;
use crate::retrieval::{execute_plan, ExecutionResult};
use crate::search::SearchEngine;
use crate::store::UnifiedStore;
use checkpoint::{Checkpoint, ResumePoint, Step};
use events::{AlchemyEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Default cap on how many chained self-optimization iterations a single
/// `run_with_followups` call will perform, to bound recursive growth.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// The outcome of a single completed iteration.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    /// The iteration number that was produced.
    pub iteration: u32,
    /// The query this iteration answered.
    pub query: String,
    /// Aggregate hit counts from the retrieval step.
    pub total_hits: usize,
    /// The follow-up query suggested by the artifact generator, if any.
    pub suggested_followup: Option<String>,
}

/// One entry in [`AlchemyTask`]'s `iterations` list: a task-root-relative
/// summary of a single iteration, distinct from the artifact-side
/// `artifacts/status.json`'s own `IterationInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based, monotonic, never reused.
    pub iteration: u32,
    /// When this iteration completed.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The query this iteration answered.
    pub query: String,
    /// Free-form context carried into this iteration, if any.
    pub context: Option<String>,
    /// Task-root-relative path to this iteration's directory.
    pub path: String,
    /// Task-root-relative paths to this iteration's produced artifacts.
    pub artifacts: Vec<String>,
    /// Follow-up queries suggested after this iteration, if any.
    pub optimization_suggestions: Vec<String>,
}

/// `status.json` at the task root: the full cross-run iteration history for
/// a task, distinct from `artifacts/status.json`'s artifact-focused record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlchemyTask {
    /// The task's unique id.
    pub alchemy_id: String,
    /// When the task was first created.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the task was last updated.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// The most recent iteration number.
    pub latest_iteration: u32,
    /// The query the task was originally created for.
    pub original_query: String,
    /// Every recorded iteration, oldest first.
    pub iterations: Vec<IterationRecord>,
    /// The task's current lifecycle status, as a step name.
    pub status: String,
    /// Human-assigned tags.
    pub tags: Vec<String>,
    /// Whether the task has been archived.
    pub is_archived: bool,
}

impl AlchemyTask {
    fn new(alchemy_id: &str, original_query: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            alchemy_id: alchemy_id.to_string(),
            created_at: now,
            updated_at: now,
            latest_iteration: 0,
            original_query: original_query.to_string(),
            iterations: Vec::new(),
            status: Step::Initialization.as_str().to_string(),
            tags: Vec::new(),
            is_archived: false,
        }
    }
}

/// Per-task working directory layout, mirroring the original's
/// `alchemy_{id}/` tree.
pub struct TaskLayout {
    /// The task's root working directory.
    pub root: PathBuf,
}

impl TaskLayout {
    /// Build the layout for `task_id` under `work_dir`.
    #[must_use]
    pub fn new(work_dir: &Path, task_id: &str) -> Self {
        Self { root: work_dir.join(format!("alchemy_{task_id}")) }
    }

    /// Ensure the task's root directory exists.
    pub fn ensure(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Path to this task's checkpoint file.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    /// Path to this task's resume-info file: duplicates the latest
    /// checkpoint for quick discovery by the registry.
    #[must_use]
    pub fn resume_info_path(&self) -> PathBuf {
        self.root.join("resume_info.json")
    }

    /// Path to this task's root `status.json` (the [`AlchemyTask`] record).
    #[must_use]
    pub fn status_path(&self) -> PathBuf {
        self.root.join("status.json")
    }

    /// Path to iteration `iteration`'s directory, `iterations/iter{N}/`.
    #[must_use]
    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.root.join("iterations").join(format!("iter{iteration}"))
    }

    /// Path to iteration `iteration`'s own checkpoint snapshot.
    #[must_use]
    pub fn iteration_checkpoint_path(&self, iteration: u32) -> PathBuf {
        self.iteration_dir(iteration).join("checkpoint.json")
    }

    /// Path to iteration `iteration`'s copy of the generated artifact.
    #[must_use]
    pub fn iteration_output_path(&self, iteration: u32) -> PathBuf {
        self.iteration_dir(iteration).join("output").join(format!("artifact_iter{iteration}.html"))
    }

    /// Task-root-relative path to iteration `iteration`'s directory, for
    /// recording in an [`IterationRecord`].
    #[must_use]
    pub fn iteration_relative_dir(iteration: u32) -> String {
        format!("iterations/iter{iteration}")
    }

    /// Task-root-relative path to iteration `iteration`'s artifact copy.
    #[must_use]
    pub fn iteration_relative_output(iteration: u32) -> String {
        format!("iterations/iter{iteration}/output/artifact_iter{iteration}.html")
    }
}

/// Contents of the workspace-wide `resume_info.json`, tracking whichever
/// task was checkpointed most recently across the whole workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GlobalResumeInfo {
    task_id: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

/// Orchestrates the ingest → intent → plan → search → artifact pipeline for
/// a single task, with checkpointing, resumption, and cooperative
/// cancellation.
pub struct Orchestrator<'a> {
    config: &'a AlchemyConfig,
    dispatcher: &'a Dispatcher,
    store: UnifiedStore,
    index: FlatIndex,
    embedder: &'a dyn Embedder,
    layout: TaskLayout,
    task_id: String,
    events: EventBus,
    cancellation_requested: AtomicBool,
}

impl<'a> Orchestrator<'a> {
    /// Construct an orchestrator for `task_id`, opening (or creating) its
    /// unified store and preparing its working directory.
    pub fn new(
        config: &'a AlchemyConfig,
        dispatcher: &'a Dispatcher,
        embedder: &'a dyn Embedder,
        task_id: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        let task_id = task_id.into();
        let layout = TaskLayout::new(&config.work_dir, &task_id);
        layout.ensure()?;

        let db_path = layout.root.join("unified.db");
        let store = UnifiedStore::open(db_path)?;
        let index = FlatIndex::new(embedder.dim());

        Ok(Self {
            config,
            dispatcher,
            store,
            index,
            embedder,
            layout,
            task_id,
            events: EventBus::default(),
            cancellation_requested: AtomicBool::new(false),
        })
    }

    /// Subscribe to this orchestrator's lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<AlchemyEvent> {
        self.events.subscribe()
    }

    /// Request cooperative cancellation; checked at the next step boundary.
    pub fn request_cancellation(&self) {
        self.cancellation_requested.store(true, Ordering::SeqCst);
        self.events.publish(AlchemyEvent::CancellationRequested { task_id: self.task_id.clone() });
    }

    fn check_cancellation(&self, step: Step) -> Result<(), OrchestratorError> {
        if self.cancellation_requested.load(Ordering::SeqCst) {
            self.save_checkpoint(step, 0, None)?;
            self.events.publish(AlchemyEvent::ProcessCancelled { task_id: self.task_id.clone() });
            return Err(OrchestratorError::Cancelled { step: step.as_str().to_string() });
        }
        Ok(())
    }

    fn save_checkpoint(&self, step: Step, iteration: u32, query: Option<String>) -> Result<(), OrchestratorError> {
        let checkpoint = Checkpoint::new(self.task_id.clone(), step, iteration, query);
        fs::write(self.layout.checkpoint_path(), serde_json::to_string_pretty(&checkpoint)?)?;
        self.write_resume_info(&checkpoint)?;
        self.events.publish(AlchemyEvent::ProcessCheckpoint {
            task_id: self.task_id.clone(),
            step: step.as_str().to_string(),
        });
        Ok(())
    }

    /// Duplicate `checkpoint` into this task's `resume_info.json`, and
    /// update the workspace-wide `resume_info.json` that tracks whichever
    /// task was checkpointed most recently.
    fn write_resume_info(&self, checkpoint: &Checkpoint) -> Result<(), OrchestratorError> {
        fs::write(self.layout.resume_info_path(), serde_json::to_string_pretty(checkpoint)?)?;
        let global_path = self.config.work_dir.join("resume_info.json");
        let global = GlobalResumeInfo {
            task_id: self.task_id.clone(),
            updated_at: checkpoint.saved_at,
        };
        fs::write(global_path, serde_json::to_string_pretty(&global)?)?;
        Ok(())
    }

    /// Load the most recent checkpoint for this task, if one exists.
    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>, OrchestratorError> {
        let path = self.layout.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Ingest `source_dir` into the task's store, refreshing the in-memory
    /// vector index from whatever the store now holds.
    pub fn ingest_source(&mut self, source_dir: &Path) -> Result<(), OrchestratorError> {
        self.check_cancellation(Step::PrepareSourceData)?;
        self.save_checkpoint(Step::PrepareSourceData, 0, None)?;

        self.check_cancellation(Step::ProcessData)?;
        crate::ingest::ingest_directory(&mut self.store, source_dir, self.embedder)?;
        self.save_checkpoint(Step::ProcessData, 0, None)?;

        self.check_cancellation(Step::InitializeComponents)?;
        self.rebuild_index()?;
        self.save_checkpoint(Step::InitializeComponents, 0, None)?;
        Ok(())
    }

    fn rebuild_index(&mut self) -> Result<(), OrchestratorError> {
        let records = self.store.load_vectors()?;
        self.index = FlatIndex::new(self.embedder.dim());
        for record in records {
            if let Some(vector) = record.vector.clone() {
                self.index.insert(
                    record.record_id.clone(),
                    record.file_path.clone(),
                    record.file_name.clone(),
                    record.file_type.clone(),
                    record.data.clone(),
                    vector,
                );
            }
        }
        Ok(())
    }

    /// Materialize `iterations/iter{iteration}/`: a copy of the just-written
    /// artifact under `output/`, and a snapshot of the current checkpoint.
    /// Other per-iteration subtrees the original keeps (`source_data/`,
    /// `data/unified_storage.*`, `data/file_cache.*`) are not replicated
    /// per-iteration here — the task keeps one shared store across its
    /// iterations rather than a full copy per step.
    fn materialize_iteration(&self, iteration: u32, query: &str) -> Result<(), OrchestratorError> {
        let iter_dir = self.layout.iteration_dir(iteration);
        let output_dir = iter_dir.join("output");
        fs::create_dir_all(&output_dir)?;

        let artifact_path = self.layout.root.join("artifacts").join("artifact.html");
        if artifact_path.exists() {
            fs::copy(&artifact_path, self.layout.iteration_output_path(iteration))?;
        }

        let checkpoint = Checkpoint::new(self.task_id.clone(), Step::GenerateArtifact, iteration, Some(query.to_string()));
        fs::write(self.layout.iteration_checkpoint_path(iteration), serde_json::to_string_pretty(&checkpoint)?)?;
        Ok(())
    }

    /// Load-or-init the task-root `status.json`, append this iteration's
    /// record, and persist it.
    fn record_iteration(
        &self,
        iteration: u32,
        query: &str,
        suggested_followup: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let mut task = self.load_or_init_task_status(query)?;
        task.latest_iteration = iteration;
        task.updated_at = chrono::Utc::now();
        task.status = Step::Finalize.as_str().to_string();
        task.iterations.push(IterationRecord {
            iteration,
            timestamp: chrono::Utc::now(),
            query: query.to_string(),
            context: None,
            path: TaskLayout::iteration_relative_dir(iteration),
            artifacts: vec![TaskLayout::iteration_relative_output(iteration)],
            optimization_suggestions: suggested_followup.into_iter().collect(),
        });
        fs::write(self.layout.status_path(), serde_json::to_string_pretty(&task)?)?;
        Ok(())
    }

    fn load_or_init_task_status(&self, original_query: &str) -> Result<AlchemyTask, OrchestratorError> {
        let path = self.layout.status_path();
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if let Ok(task) = serde_json::from_str(&raw) {
                return Ok(task);
            }
        }
        Ok(AlchemyTask::new(&self.task_id, original_query))
    }

    /// Run a single iteration of the query workflow for `query`, starting
    /// from intent parsing.
    pub async fn run_iteration(&mut self, query: &str) -> Result<IterationOutcome, OrchestratorError> {
        self.events.publish(AlchemyEvent::ProcessStarted { task_id: self.task_id.clone() });
        self.check_cancellation(Step::ExecuteWorkflow)?;
        self.save_checkpoint(Step::ExecuteWorkflow, 0, Some(query.to_string()))?;

        self.check_cancellation(Step::ParseIntent)?;
        let mut intent_parser = IntentParser::new(self.dispatcher, self.config.generator_model.clone());
        let intent = intent_parser.parse_query(query).await;
        self.save_checkpoint(Step::ParseIntent, 0, Some(query.to_string()))?;
        self.events.publish(AlchemyEvent::IntentParsed { task_id: self.task_id.clone() });

        self.check_cancellation(Step::BuildPlan)?;
        let plan = build_search_plan(&intent)?;
        self.save_checkpoint(Step::BuildPlan, 0, Some(query.to_string()))?;
        self.events.publish(AlchemyEvent::PlanBuilt { task_id: self.task_id.clone() });

        self.check_cancellation(Step::ExecuteSearch)?;
        let engine = SearchEngine::new(&self.store, &self.index, self.embedder);
        let result: ExecutionResult = execute_plan(&engine, &plan);
        self.save_checkpoint(Step::ExecuteSearch, 0, Some(query.to_string()))?;
        self.events.publish(AlchemyEvent::SearchExecuted {
            task_id: self.task_id.clone(),
            total_hits: result.stats.total,
        });

        self.check_cancellation(Step::GenerateArtifact)?;
        let generator = ArtifactGenerator::new(self.dispatcher, self.config.reasoning_model.clone(), &self.layout.root)?;
        let (iteration, suggested_followup) = generator
            .generate_artifact(&self.task_id, query, &result)
            .await?;
        self.save_checkpoint(Step::GenerateArtifact, iteration, Some(query.to_string()))?;
        self.events.publish(AlchemyEvent::ArtifactGenerated {
            task_id: self.task_id.clone(),
            iteration,
        });
        if let Some(followup) = &suggested_followup {
            self.events.publish(AlchemyEvent::OptimizationSuggested {
                task_id: self.task_id.clone(),
                query: followup.clone(),
            });
        }

        self.materialize_iteration(iteration, query)?;
        self.record_iteration(iteration, query, suggested_followup.clone())?;

        self.save_checkpoint(Step::Finalize, iteration, Some(query.to_string()))?;
        self.events.publish(AlchemyEvent::ProcessCompleted { task_id: self.task_id.clone() });

        Ok(IterationOutcome {
            iteration,
            query: query.to_string(),
            total_hits: result.stats.total,
            suggested_followup,
        })
    }

    /// Run the initial query, then chain up to `max_iterations` additional
    /// iterations by feeding each iteration's suggested follow-up query
    /// back into [`run_iteration`], stopping early if no follow-up is
    /// suggested. This is the orchestrator's recursive self-optimization
    /// loop.
    pub async fn run_with_followups(
        &mut self,
        query: &str,
        max_iterations: u32,
    ) -> Result<Vec<IterationOutcome>, OrchestratorError> {
        let mut outcomes = Vec::new();
        let mut current_query = query.to_string();
        for _ in 0..max_iterations.max(1) {
            let outcome = self.run_iteration(&current_query).await?;
            let next_query = outcome.suggested_followup.clone();
            outcomes.push(outcome);
            match next_query {
                Some(q) => current_query = q,
                None => break,
            }
        }
        Ok(outcomes)
    }

    /// Resume a previously interrupted task, dispatching on the last
    /// recorded checkpoint's step, per [`Step::resume_point`].
    pub async fn resume(&mut self, source_dir: &Path) -> Result<Option<IterationOutcome>, OrchestratorError> {
        let checkpoint = self
            .load_checkpoint()?
            .ok_or_else(|| OrchestratorError::NoCheckpoint(self.task_id.clone()))?;

        match checkpoint.current_step.resume_point() {
            ResumePoint::RestartFromSourceData => {
                self.ingest_source(source_dir)?;
                match checkpoint.query {
                    Some(query) => Ok(Some(self.run_iteration(&query).await?)),
                    None => Ok(None),
                }
            }
            ResumePoint::ResumeWorkflowFromParseIntent => {
                self.rebuild_index()?;
                match checkpoint.query {
                    Some(query) => Ok(Some(self.run_iteration(&query).await?)),
                    None => Ok(None),
                }
            }
            ResumePoint::AlreadyComplete => {
                info!(task_id = %self.task_id, "task already completed, nothing to resume");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::checkpoint::Step;
    use super::*;

    #[test]
    fn task_layout_paths_are_scoped_under_work_dir() {
        let layout = TaskLayout::new(Path::new("work"), "abc123");
        assert_eq!(layout.root, PathBuf::from("work/alchemy_abc123"));
        assert_eq!(layout.checkpoint_path(), PathBuf::from("work/alchemy_abc123/checkpoint.json"));
    }

    #[test]
    fn checkpoint_roundtrips_through_json() {
        let checkpoint = Checkpoint::new("t1", Step::ParseIntent, 2, Some("q".to_string()));
        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.current_step, Step::ParseIntent);
        assert_eq!(back.iteration, 2);
    }

    #[test]
    fn task_layout_iteration_paths_are_scoped_under_task_root() {
        let layout = TaskLayout::new(Path::new("work"), "abc123");
        assert_eq!(
            layout.iteration_checkpoint_path(2),
            PathBuf::from("work/alchemy_abc123/iterations/iter2/checkpoint.json")
        );
        assert_eq!(
            layout.iteration_output_path(2),
            PathBuf::from("work/alchemy_abc123/iterations/iter2/output/artifact_iter2.html")
        );
        assert_eq!(layout.resume_info_path(), PathBuf::from("work/alchemy_abc123/resume_info.json"));
        assert_eq!(layout.status_path(), PathBuf::from("work/alchemy_abc123/status.json"));
        assert_eq!(TaskLayout::iteration_relative_dir(2), "iterations/iter2");
        assert_eq!(
            TaskLayout::iteration_relative_output(2),
            "iterations/iter2/output/artifact_iter2.html"
        );
    }

    #[test]
    fn alchemy_task_roundtrips_through_json() {
        let task = AlchemyTask::new("t1", "find invoices");
        let json = serde_json::to_string(&task).unwrap();
        let back: AlchemyTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.alchemy_id, "t1");
        assert_eq!(back.original_query, "find invoices");
        assert_eq!(back.latest_iteration, 0);
        assert!(back.iterations.is_empty());
    }
}
