//! Command-line argument definitions, in the teacher's clap-derive style.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Query-to-artifact alchemy pipeline.
#[derive(Debug, Parser)]
#[command(name = "alchemy", version, about, long_about = None)]
pub struct Cli {
    /// Path to the workspace root holding task directories and the registry index.
    #[arg(long, global = true, env = "WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a query against a task, ingesting `--source` first if given.
    Run {
        /// The task id to run under; generated from the current timestamp if omitted.
        #[arg(long)]
        task_id: Option<String>,
        /// The natural-language query to answer.
        query: String,
        /// Directory to ingest before running the query.
        #[arg(long)]
        source: Option<PathBuf>,
        /// Maximum number of chained follow-up iterations to run.
        #[arg(long, default_value_t = 1)]
        max_iterations: u32,
    },
    /// Resume a previously interrupted task from its last checkpoint.
    Resume {
        /// The task id to resume. Resumes the most recently updated resumable task if omitted.
        task_id: Option<String>,
        /// Directory to re-ingest if resumption restarts from source data.
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// List every registered task.
    List {
        /// Only show archived tasks.
        #[arg(long)]
        archived: bool,
    },
    /// Show a single task's details.
    Show {
        /// The task id to show.
        task_id: String,
    },
    /// Search tasks by id, tag, or original query text.
    Search {
        /// The search text.
        query: String,
    },
    /// Update a task's recorded original query.
    Describe {
        /// The task id to update.
        task_id: String,
        /// The new original-query text.
        query: String,
    },
    /// Add a tag to a task.
    Tag {
        /// The task id to tag.
        task_id: String,
        /// The tag to add.
        tag: String,
    },
    /// Remove a tag from a task.
    Untag {
        /// The task id to untag.
        task_id: String,
        /// The tag to remove.
        tag: String,
    },
    /// Mark a task as archived.
    Archive {
        /// The task id to archive.
        task_id: String,
    },
    /// Clear a task's archived flag.
    Unarchive {
        /// The task id to unarchive.
        task_id: String,
    },
    /// Remove a task's registry entry (does not delete its working directory).
    Delete {
        /// The task id to delete.
        task_id: String,
    },
    /// Export every registered task to a CSV file.
    Export {
        /// Destination CSV path.
        #[arg(long, default_value = "tasks.csv")]
        output: PathBuf,
    },
    /// Scan the workspace for task directories not yet present in the registry.
    Scan,
    /// List tasks that can be resumed (did not reach the finalize step).
    Resumable,
}
