//! Cross-task registry (C12): a workspace-level index of every task ever
//! run, with tagging, archiving, CSV export, and resumable-task discovery.
//!
//! Grounded on `services/alchemy_manager.py::AlchemyManager`. The index
//! file is protected by an advisory file lock (`fs2`) across its
//! read-modify-write cycle, since multiple CLI invocations may race against
//! the same workspace.

use crate::error::RegistryError;
use crate::orchestrator::checkpoint::{Checkpoint, ResumePoint};
use crate::orchestrator::AlchemyTask;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// A single task's registry entry (`TaskSummary` in the task's own words).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    /// The task's unique id.
    pub task_id: String,
    /// Human-assigned tags.
    pub tags: Vec<String>,
    /// Whether the task has been archived.
    pub archived: bool,
    /// When the task was first registered.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the task's entry was last updated.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// The original query the task was created for, if known.
    pub original_query: Option<String>,
    /// Absolute path to the task's working directory.
    pub work_dir: PathBuf,
    /// The task's most recent iteration number.
    #[serde(default)]
    pub latest_iteration: u32,
    /// The most recent query the task was run with.
    #[serde(default)]
    pub latest_query: Option<String>,
    /// Up to 5 of the task's most recent artifact relpaths, oldest first.
    #[serde(default)]
    pub artifact_relpaths: Vec<String>,
}

/// The on-disk index: a map of task id to entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    tasks: BTreeMap<String, TaskEntry>,
}

/// Handle to the cross-task registry index.
pub struct TaskRegistry {
    index_path: PathBuf,
    workspace_root: PathBuf,
}

impl TaskRegistry {
    /// Construct a registry rooted at `workspace_root`, whose index lives
    /// at `workspace_root/data_alchemy/_index/alchemy_index.json`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let index_path = workspace_root.join("data_alchemy").join("_index").join("alchemy_index.json");
        Self { index_path, workspace_root }
    }

    fn with_locked_index<T>(
        &self,
        f: impl FnOnce(&mut Index) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(self.lock_path())?;
        lock_file.lock_exclusive()?;

        let mut index = self.load_index()?;
        let result = f(&mut index);
        if result.is_ok() {
            self.save_index(&index)?;
        }
        lock_file.unlock()?;
        result
    }

    fn lock_path(&self) -> PathBuf {
        self.index_path.with_extension("json.lock")
    }

    fn load_index(&self) -> Result<Index, RegistryError> {
        if !self.index_path.exists() {
            return Ok(Index::default());
        }
        let raw = fs::read_to_string(&self.index_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_index(&self, index: &Index) -> Result<(), RegistryError> {
        fs::write(&self.index_path, serde_json::to_string_pretty(index)?)?;
        Ok(())
    }

    /// Scan the workspace root for directories with a `status.json`, adding
    /// a new entry for each not yet present in the index and updating the
    /// summary of each that already is.
    pub fn scan_existing_tasks(&self) -> Result<usize, RegistryError> {
        let entries = fs::read_dir(&self.workspace_root)?;
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let status_path = path.join("status.json");
            let Ok(raw) = fs::read_to_string(&status_path) else { continue };
            let Ok(task): Result<AlchemyTask, _> = serde_json::from_str(&raw) else { continue };
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let task_id = name.strip_prefix("alchemy_").unwrap_or(name).to_string();
            found.push((task_id, path, task));
        }

        self.with_locked_index(|index| {
            let mut discovered = 0usize;
            for (task_id, work_dir, task) in found {
                let mut artifacts: Vec<String> =
                    task.iterations.iter().flat_map(|it| it.artifacts.clone()).collect();
                if artifacts.len() > 5 {
                    artifacts = artifacts.split_off(artifacts.len() - 5);
                }
                let latest_query = task
                    .iterations
                    .last()
                    .map(|it| it.query.clone())
                    .or_else(|| Some(task.original_query.clone()));

                let existing_tags = index.tasks.get(&task_id).map(|e| e.tags.clone());
                if existing_tags.is_none() {
                    discovered += 1;
                }
                index.tasks.insert(
                    task_id.clone(),
                    TaskEntry {
                        task_id,
                        tags: existing_tags.unwrap_or_else(|| task.tags.clone()),
                        archived: task.is_archived,
                        created_at: task.created_at,
                        updated_at: task.updated_at,
                        original_query: Some(task.original_query.clone()),
                        work_dir,
                        latest_iteration: task.latest_iteration,
                        latest_query,
                        artifact_relpaths: artifacts,
                    },
                );
            }
            Ok(discovered)
        })
    }

    /// Register a new task entry, or overwrite an existing one with the
    /// same id.
    pub fn register_task(&self, entry: TaskEntry) -> Result<(), RegistryError> {
        self.with_locked_index(|index| {
            index.tasks.insert(entry.task_id.clone(), entry);
            Ok(())
        })
    }

    /// Update an existing task's `original_query`, bumping `updated_at`.
    pub fn update_task(&self, task_id: &str, original_query: Option<String>) -> Result<(), RegistryError> {
        self.with_locked_index(|index| {
            let task = index
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))?;
            if original_query.is_some() {
                task.original_query = original_query;
            }
            task.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    /// Remove a task entry entirely (does not touch its working directory).
    pub fn delete_task(&self, task_id: &str) -> Result<(), RegistryError> {
        self.with_locked_index(|index| {
            index
                .tasks
                .remove(task_id)
                .map(|_| ())
                .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))
        })
    }

    /// Mark a task as archived.
    pub fn archive_task(&self, task_id: &str) -> Result<(), RegistryError> {
        self.set_archived(task_id, true)
    }

    /// Clear a task's archived flag.
    pub fn unarchive_task(&self, task_id: &str) -> Result<(), RegistryError> {
        self.set_archived(task_id, false)
    }

    fn set_archived(&self, task_id: &str, archived: bool) -> Result<(), RegistryError> {
        self.with_locked_index(|index| {
            let task = index
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))?;
            task.archived = archived;
            task.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    /// Fetch a single task entry by id.
    pub fn get_task(&self, task_id: &str) -> Result<TaskEntry, RegistryError> {
        let index = self.load_index()?;
        index
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))
    }

    /// Fetch every registered task, oldest-id-first.
    pub fn get_all_tasks(&self) -> Result<Vec<TaskEntry>, RegistryError> {
        let index = self.load_index()?;
        Ok(index.tasks.into_values().collect())
    }

    /// Find tasks whose id, tags, or original query contain `query`
    /// (case-insensitively).
    pub fn search_tasks(&self, query: &str) -> Result<Vec<TaskEntry>, RegistryError> {
        let needle = query.to_lowercase();
        let all = self.get_all_tasks()?;
        Ok(all
            .into_iter()
            .filter(|t| {
                t.task_id.to_lowercase().contains(&needle)
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
                    || t.original_query
                        .as_deref()
                        .is_some_and(|q| q.to_lowercase().contains(&needle))
            })
            .collect())
    }

    /// Add a tag to a task, if not already present.
    pub fn tag_task(&self, task_id: &str, tag: &str) -> Result<(), RegistryError> {
        self.with_locked_index(|index| {
            let task = index
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))?;
            if !task.tags.iter().any(|t| t == tag) {
                task.tags.push(tag.to_string());
            }
            task.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    /// Remove a tag from a task, if present.
    pub fn untag_task(&self, task_id: &str, tag: &str) -> Result<(), RegistryError> {
        self.with_locked_index(|index| {
            let task = index
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))?;
            task.tags.retain(|t| t != tag);
            task.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    /// Export every task entry to CSV at `path`, with a UTF-8 BOM prefix
    /// for compatibility with spreadsheet tools that assume one.
    pub fn export_tasks_to_csv(&self, path: &Path) -> Result<(), RegistryError> {
        let tasks = self.get_all_tasks()?;
        let mut buffer: Vec<u8> = vec![0xEF, 0xBB, 0xBF];
        {
            let mut writer = csv::Writer::from_writer(&mut buffer);
            writer.write_record(["task_id", "tags", "archived", "created_at", "updated_at", "original_query"])?;
            for task in &tasks {
                writer.write_record([
                    task.task_id.as_str(),
                    &task.tags.join(";"),
                    &task.archived.to_string(),
                    &task.created_at.to_rfc3339(),
                    &task.updated_at.to_rfc3339(),
                    task.original_query.as_deref().unwrap_or(""),
                ])?;
            }
            writer.flush().map_err(|e| RegistryError::Csv(csv::Error::from(e)))?;
        }
        fs::write(path, buffer)?;
        Ok(())
    }

    /// List every non-archived task with a `resume_info.json` indicating it
    /// can be resumed (i.e. did not reach `Finalize`), sorted by
    /// `updated_at` descending.
    pub fn get_resumable_tasks(&self) -> Result<Vec<TaskEntry>, RegistryError> {
        let all = self.get_all_tasks()?;
        let mut resumable = Vec::new();
        for task in all {
            if task.archived {
                continue;
            }
            if self.is_resumable(&task)? {
                resumable.push(task);
            }
        }
        resumable.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(resumable)
    }

    /// The most recently updated resumable task, if any.
    pub fn get_latest_resumable_task(&self) -> Result<Option<TaskEntry>, RegistryError> {
        let resumable = self.get_resumable_tasks()?;
        Ok(resumable.into_iter().next())
    }

    /// A task is resumable when it has a `resume_info.json` (duplicating its
    /// latest checkpoint) whose step has not reached `Finalize`.
    fn is_resumable(&self, task: &TaskEntry) -> Result<bool, RegistryError> {
        let resume_info_path = task.work_dir.join("resume_info.json");
        if !resume_info_path.exists() {
            return Ok(false);
        }
        let raw = fs::read_to_string(resume_info_path)?;
        let checkpoint: Checkpoint = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(_) => return Ok(false),
        };
        Ok(checkpoint.current_step.resume_point() != ResumePoint::AlreadyComplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_entry(id: &str, work_dir: PathBuf) -> TaskEntry {
        let now = chrono::Utc::now();
        TaskEntry {
            task_id: id.to_string(),
            tags: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
            original_query: Some("find invoices".to_string()),
            work_dir,
            latest_iteration: 0,
            latest_query: None,
            artifact_relpaths: Vec::new(),
        }
    }

    #[test]
    fn register_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        registry.register_task(sample_entry("t1", dir.path().join("alchemy_t1"))).unwrap();
        let fetched = registry.get_task("t1").unwrap();
        assert_eq!(fetched.task_id, "t1");
    }

    #[test]
    fn tag_and_untag_round_trip() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        registry.register_task(sample_entry("t1", dir.path().join("alchemy_t1"))).unwrap();
        registry.tag_task("t1", "important").unwrap();
        assert_eq!(registry.get_task("t1").unwrap().tags, vec!["important".to_string()]);
        registry.untag_task("t1", "important").unwrap();
        assert!(registry.get_task("t1").unwrap().tags.is_empty());
    }

    #[test]
    fn archive_then_unarchive() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        registry.register_task(sample_entry("t1", dir.path().join("alchemy_t1"))).unwrap();
        registry.archive_task("t1").unwrap();
        assert!(registry.get_task("t1").unwrap().archived);
        registry.unarchive_task("t1").unwrap();
        assert!(!registry.get_task("t1").unwrap().archived);
    }

    #[test]
    fn search_matches_tag_and_query() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        registry.register_task(sample_entry("t1", dir.path().join("alchemy_t1"))).unwrap();
        registry.tag_task("t1", "finance").unwrap();
        assert_eq!(registry.search_tasks("finance").unwrap().len(), 1);
        assert_eq!(registry.search_tasks("invoices").unwrap().len(), 1);
        assert_eq!(registry.search_tasks("nonexistent").unwrap().len(), 0);
    }

    #[test]
    fn unknown_task_operations_error() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        assert!(matches!(registry.get_task("missing"), Err(RegistryError::UnknownTask(_))));
    }

    #[test]
    fn csv_export_starts_with_utf8_bom() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        registry.register_task(sample_entry("t1", dir.path().join("alchemy_t1"))).unwrap();
        let out_path = dir.path().join("export.csv");
        registry.export_tasks_to_csv(&out_path).unwrap();
        let bytes = fs::read(&out_path).unwrap();
        assert_eq!(&bytes[..3], [0xEF, 0xBB, 0xBF]);
    }

    #[test]
    fn index_lives_under_data_alchemy_index() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        assert_eq!(
            registry.index_path,
            dir.path().join("data_alchemy").join("_index").join("alchemy_index.json")
        );
    }

    fn write_status_json(task_dir: &Path, task: &AlchemyTask) {
        fs::create_dir_all(task_dir).unwrap();
        fs::write(task_dir.join("status.json"), serde_json::to_string_pretty(task).unwrap()).unwrap();
    }

    fn sample_task(alchemy_id: &str, query: &str) -> AlchemyTask {
        let now = chrono::Utc::now();
        AlchemyTask {
            alchemy_id: alchemy_id.to_string(),
            created_at: now,
            updated_at: now,
            latest_iteration: 1,
            original_query: query.to_string(),
            iterations: vec![crate::orchestrator::IterationRecord {
                iteration: 1,
                timestamp: now,
                query: query.to_string(),
                context: None,
                path: "iterations/iter1".to_string(),
                artifacts: vec!["iterations/iter1/output/artifact_iter1.html".to_string()],
                optimization_suggestions: Vec::new(),
            }],
            status: "finalize".to_string(),
            tags: Vec::new(),
            is_archived: false,
        }
    }

    #[test]
    fn scan_existing_tasks_adds_new_and_updates_existing_summaries() {
        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());
        let task_dir = dir.path().join("alchemy_t1");
        write_status_json(&task_dir, &sample_task("t1", "find invoices"));

        assert_eq!(registry.scan_existing_tasks().unwrap(), 1);
        let entry = registry.get_task("t1").unwrap();
        assert_eq!(entry.latest_iteration, 1);
        assert_eq!(entry.latest_query.as_deref(), Some("find invoices"));
        assert_eq!(entry.artifact_relpaths.len(), 1);

        registry.tag_task("t1", "finance").unwrap();

        let mut updated = sample_task("t1", "find invoices");
        updated.latest_iteration = 2;
        updated.iterations.push(crate::orchestrator::IterationRecord {
            iteration: 2,
            timestamp: chrono::Utc::now(),
            query: "find older invoices".to_string(),
            context: None,
            path: "iterations/iter2".to_string(),
            artifacts: vec!["iterations/iter2/output/artifact_iter2.html".to_string()],
            optimization_suggestions: Vec::new(),
        });
        write_status_json(&task_dir, &updated);

        assert_eq!(registry.scan_existing_tasks().unwrap(), 0);
        let refreshed = registry.get_task("t1").unwrap();
        assert_eq!(refreshed.latest_iteration, 2);
        assert_eq!(refreshed.latest_query.as_deref(), Some("find older invoices"));
        assert_eq!(refreshed.artifact_relpaths.len(), 2);
        assert_eq!(refreshed.tags, vec!["finance".to_string()]);
    }

    #[test]
    fn resumable_tasks_require_resume_info_and_sort_by_updated_at_descending() {
        use crate::orchestrator::checkpoint::Step;

        let dir = tempdir().unwrap();
        let registry = TaskRegistry::new(dir.path());

        let older_dir = dir.path().join("alchemy_older");
        fs::create_dir_all(&older_dir).unwrap();
        let newer_dir = dir.path().join("alchemy_newer");
        fs::create_dir_all(&newer_dir).unwrap();

        let older_checkpoint = Checkpoint::new("older", Step::ParseIntent, 1, None);
        fs::write(older_dir.join("resume_info.json"), serde_json::to_string_pretty(&older_checkpoint).unwrap()).unwrap();
        let newer_checkpoint = Checkpoint::new("newer", Step::ParseIntent, 1, None);
        fs::write(newer_dir.join("resume_info.json"), serde_json::to_string_pretty(&newer_checkpoint).unwrap()).unwrap();

        let mut older_entry = sample_entry("older", older_dir);
        older_entry.updated_at = chrono::Utc::now() - chrono::Duration::hours(1);
        registry.register_task(older_entry).unwrap();
        let mut newer_entry = sample_entry("newer", newer_dir);
        newer_entry.updated_at = chrono::Utc::now();
        registry.register_task(newer_entry).unwrap();

        let resumable = registry.get_resumable_tasks().unwrap();
        assert_eq!(resumable.len(), 2);
        assert_eq!(resumable[0].task_id, "newer");
        assert_eq!(resumable[1].task_id, "older");
        assert_eq!(registry.get_latest_resumable_task().unwrap().unwrap().task_id, "newer");
    }
}
