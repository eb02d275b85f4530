//! Crate-wide error type.
//!
//! Each subsystem defines its own error enum; [`AlchemyError`] wraps them so
//! the orchestrator and CLI can propagate a single type with `?`.

use thiserror::Error;

/// Errors from the ingestion pipeline (file cache, parser facade, chunking).
#[derive(Debug, Error)]
pub enum IngestError {
    /// The source path could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A structured source file (json/csv/xml/...) failed to parse.
    #[error("failed to parse {path} as {file_type}: {message}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Extension-derived file type.
        file_type: String,
        /// Parser error detail.
        message: String,
    },
}

/// Errors from the unified structured+vector store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite database returned an error.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A record field failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors from the search engine (C5).
#[derive(Debug, Error)]
pub enum SearchError {
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The embedder failed to produce a vector.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Errors from planning a search (C7).
#[derive(Debug, Error)]
pub enum PlanError {
    /// Neither structured nor vector queries could be synthesized from the intent.
    #[error("no valid plan could be built from the given intent")]
    NoValidPlan,
}

/// Errors from the LLM dispatch layer (C10).
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key was configured for the requested model.
    #[error("no API key configured for model {model}")]
    ApiKeyMissing {
        /// Model name that has no keys.
        model: String,
    },
    /// The requested model is not registered.
    #[error("model not registered: {0}")]
    UnknownModel(String),
    /// Local models are not implemented by this dispatcher.
    #[error("local model inference is not supported: {0}")]
    LocalModelUnsupported(String),
    /// A transport or API-level failure occurred, after exhausting retries.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Error detail from the provider.
        message: String,
    },
    /// The response stream ended unexpectedly or produced a malformed chunk.
    #[error("stream error: {message}")]
    Stream {
        /// Error detail.
        message: String,
    },
    /// The model's JSON output could not be parsed after all retries.
    #[error("malformed JSON response after {attempts} attempts: {message}")]
    MalformedJson {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message.
        message: String,
    },
}

/// Errors from the iteration orchestrator (C11).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The cooperative cancellation flag was observed at a step boundary.
    #[error("iteration cancelled at step {step}")]
    Cancelled {
        /// The step at which cancellation was observed.
        step: String,
    },
    /// No search plan could be synthesized; the iteration halts without an artifact.
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),
    /// The underlying store failed in a way that must abort the iteration.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Filesystem layout for the task could not be prepared.
    #[error("task directory error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization of task/iteration metadata failed.
    #[error("metadata serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// No checkpoint was found to resume from.
    #[error("no checkpoint found for task {0}")]
    NoCheckpoint(String),
    /// Ingestion failed while preparing source data.
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Errors from the cross-task registry (C12).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Filesystem error while scanning or updating the index.
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The index file failed to (de)serialize.
    #[error("registry serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The requested task id is not present in the index.
    #[error("unknown task: {0}")]
    UnknownTask(String),
    /// CSV export failed.
    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),
}

/// Top-level crate error, composed from each subsystem's error type.
#[derive(Debug, Error)]
pub enum AlchemyError {
    /// Ingestion failure.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Search failure.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// Planning failure.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// LLM dispatch failure.
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// Orchestration failure.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Generic I/O failure not attributable to a specific subsystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}
