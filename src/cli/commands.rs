//! Command implementations, dispatched from [`super::parser::Commands`].

use crate::cli::parser::Commands;
use crate::config::AlchemyConfig;
use crate::error::AlchemyError;
use crate::ingest::parser::{Embedder, HashEmbedder};
use crate::llm::Dispatcher;
use crate::orchestrator::Orchestrator;
use crate::registry::{TaskEntry, TaskRegistry};
use chrono::Utc;
use std::path::PathBuf;
use tracing::info;

#[cfg(feature = "fastembed-embeddings")]
fn build_embedder() -> Box<dyn Embedder> {
    match crate::ingest::parser::fastembed_backend::FastEmbedEmbedder::try_new() {
        Ok(embedder) => Box::new(embedder),
        Err(err) => {
            tracing::warn!(error = %err, "fastembed initialization failed, falling back to hash embedder");
            Box::new(HashEmbedder::default())
        }
    }
}

#[cfg(not(feature = "fastembed-embeddings"))]
fn build_embedder() -> Box<dyn Embedder> {
    Box::new(HashEmbedder::default())
}

fn generate_task_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Execute a parsed CLI command.
pub async fn run(command: Commands, config: &AlchemyConfig) -> Result<(), AlchemyError> {
    let registry = TaskRegistry::new(&config.work_dir);

    match command {
        Commands::Run { task_id, query, source, max_iterations } => {
            let task_id = task_id.unwrap_or_else(generate_task_id);
            let dispatcher = Dispatcher::from_config(config)?;
            let embedder = build_embedder();
            let mut orchestrator = Orchestrator::new(config, &dispatcher, embedder.as_ref(), &task_id)?;

            if let Some(source) = &source {
                orchestrator.ingest_source(source)?;
            }

            let outcomes = orchestrator.run_with_followups(&query, max_iterations).await?;

            registry.register_task(TaskEntry {
                task_id: task_id.clone(),
                tags: Vec::new(),
                archived: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                original_query: Some(query.clone()),
                work_dir: config.work_dir.join(format!("alchemy_{task_id}")),
                latest_iteration: outcomes.last().map(|o| o.iteration).unwrap_or(0),
                latest_query: outcomes.last().map(|o| o.query.clone()),
                artifact_relpaths: Vec::new(),
            })?;

            for outcome in &outcomes {
                println!(
                    "iteration {} for query {:?}: {} hits, followup: {:?}",
                    outcome.iteration, outcome.query, outcome.total_hits, outcome.suggested_followup
                );
            }
            Ok(())
        }

        Commands::Resume { task_id, source } => {
            let task_id = match task_id {
                Some(id) => id,
                None => registry
                    .get_latest_resumable_task()?
                    .map(|t| t.task_id)
                    .ok_or_else(|| AlchemyError::Config("no resumable tasks found".to_string()))?,
            };
            let dispatcher = Dispatcher::from_config(config)?;
            let embedder = build_embedder();
            let mut orchestrator = Orchestrator::new(config, &dispatcher, embedder.as_ref(), &task_id)?;
            let source = source.unwrap_or_else(|| PathBuf::from("."));
            match orchestrator.resume(&source).await? {
                Some(outcome) => println!("resumed task {task_id}: iteration {} produced", outcome.iteration),
                None => println!("task {task_id} had nothing to resume"),
            }
            Ok(())
        }

        Commands::List { archived } => {
            let tasks = registry.get_all_tasks()?;
            for task in tasks.into_iter().filter(|t| t.archived == archived || !archived) {
                println!("{}\t{}\t{:?}", task.task_id, task.archived, task.original_query);
            }
            Ok(())
        }

        Commands::Show { task_id } => {
            let task = registry.get_task(&task_id)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }

        Commands::Search { query } => {
            for task in registry.search_tasks(&query)? {
                println!("{}\t{:?}", task.task_id, task.original_query);
            }
            Ok(())
        }

        Commands::Describe { task_id, query } => {
            registry.update_task(&task_id, Some(query))?;
            info!(task_id, "updated task description");
            Ok(())
        }

        Commands::Tag { task_id, tag } => {
            registry.tag_task(&task_id, &tag)?;
            Ok(())
        }

        Commands::Untag { task_id, tag } => {
            registry.untag_task(&task_id, &tag)?;
            Ok(())
        }

        Commands::Archive { task_id } => {
            registry.archive_task(&task_id)?;
            Ok(())
        }

        Commands::Unarchive { task_id } => {
            registry.unarchive_task(&task_id)?;
            Ok(())
        }

        Commands::Delete { task_id } => {
            registry.delete_task(&task_id)?;
            Ok(())
        }

        Commands::Export { output } => {
            registry.export_tasks_to_csv(&output)?;
            println!("exported tasks to {}", output.display());
            Ok(())
        }

        Commands::Scan => {
            let discovered = registry.scan_existing_tasks()?;
            println!("discovered {discovered} new task(s)");
            Ok(())
        }

        Commands::Resumable => {
            for task in registry.get_resumable_tasks()? {
                println!("{}\t{:?}", task.task_id, task.original_query);
            }
            Ok(())
        }
    }
}
