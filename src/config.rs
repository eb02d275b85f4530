//! Runtime configuration, resolved from environment variables.
//!
//! Mirrors the teacher's `agent::config::AgentConfig` pattern: a builder
//! struct with sane defaults, populated by `from_env()`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Default base URL used when no provider-specific base is set.
pub const DEFAULT_LLM_API_BASE: &str = "https://api.openai.com/v1";
/// Default generator model, used for intent parsing and plan-adjacent calls.
pub const DEFAULT_GENERATOR_MODEL: &str = "gpt-4o-mini";
/// Default reasoning model, used for artifact generation (streaming, reasoning_content aware).
pub const DEFAULT_REASONING_MODEL: &str = "gpt-4o-mini";
/// Default embedding model name (informational; actual embedding path is feature-gated).
pub const DEFAULT_EMBEDDING_MODEL: &str = "bge-m3";
/// Default top-k for vector search.
pub const DEFAULT_SEARCH_TOP_K: usize = 5;
/// Default similarity threshold for vector search.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;
/// Default maximum concurrent LLM requests.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default number of retries for a non-streaming LLM call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default intent-cache capacity.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;
/// Default intent-cache entry time-to-live, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Credentials and endpoint for a single registered model.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    /// Whether this model is served remotely via an OpenAI-compatible API, or
    /// would be run locally (unsupported by this dispatcher; kept for parity
    /// with the original model registry's shape).
    pub model_type: ModelType,
    /// Base URL for API-backed models.
    pub api_base: String,
    /// Rotation pool of API keys for this model.
    pub api_keys: Vec<String>,
}

/// Where a registered model's inference actually happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Served by an OpenAI-compatible HTTP API.
    Api,
    /// Would run in-process; this dispatcher does not implement it.
    Local,
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone)]
pub struct AlchemyConfig {
    /// Registered models, keyed by model name.
    pub models: HashMap<String, ModelEntry>,
    /// Model used for intent parsing (keyword/reference-text extraction).
    pub generator_model: String,
    /// Model used for artifact generation (streaming reasoning model).
    pub reasoning_model: String,
    /// Path to the SQLite database backing the unified store.
    pub db_path: PathBuf,
    /// Root directory under which per-task work directories are created.
    pub work_dir: PathBuf,
    /// Default top-k for vector search.
    pub search_top_k: usize,
    /// Default similarity threshold for vector search.
    pub similarity_threshold: f32,
    /// Maximum concurrent LLM requests across the process.
    pub max_concurrency: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Retry budget for non-streaming LLM calls.
    pub max_retries: u32,
}

impl AlchemyConfig {
    /// Resolve configuration from environment variables, falling back to defaults.
    ///
    /// Recognized variables: `LLM_API_KEY`, `LLM_API_BASE`, `GENERATOR_MODEL`,
    /// `REASONING_MODEL`, `EMBEDDING_MODEL`, `DB_PATH`, `WORK_DIR`,
    /// `SEARCH_TOP_K`, `SIMILARITY_THRESHOLD`, `MAX_CONCURRENCY`,
    /// `LLM_TIMEOUT_SECS`, `LLM_MAX_RETRIES`.
    #[must_use]
    pub fn from_env() -> Self {
        let generator_model =
            env::var("GENERATOR_MODEL").unwrap_or_else(|_| DEFAULT_GENERATOR_MODEL.to_string());
        let reasoning_model =
            env::var("REASONING_MODEL").unwrap_or_else(|_| DEFAULT_REASONING_MODEL.to_string());
        let api_base =
            env::var("LLM_API_BASE").unwrap_or_else(|_| DEFAULT_LLM_API_BASE.to_string());

        let api_keys: Vec<String> = env::var("LLM_API_KEY")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut models = HashMap::new();
        for model_name in [generator_model.clone(), reasoning_model.clone()] {
            models.entry(model_name).or_insert_with(|| ModelEntry {
                model_type: ModelType::Api,
                api_base: api_base.clone(),
                api_keys: api_keys.clone(),
            });
        }

        let default_data_dir = dirs::data_local_dir()
            .map(|d| d.join("alchemy"))
            .unwrap_or_else(|| PathBuf::from("."));
        let db_path = env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir.join("alchemy.db"));
        let work_dir = env::var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir.join("work_dir"));

        let search_top_k = env::var("SEARCH_TOP_K")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SEARCH_TOP_K);
        let similarity_threshold = env::var("SIMILARITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
        let max_concurrency = env::var("MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);
        let timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_retries = env::var("LLM_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        Self {
            models,
            generator_model,
            reasoning_model,
            db_path,
            work_dir,
            search_top_k,
            similarity_threshold,
            max_concurrency,
            timeout_secs,
            max_retries,
        }
    }

    /// Register or replace a model entry.
    pub fn register_model(&mut self, name: impl Into<String>, entry: ModelEntry) {
        self.models.insert(name.into(), entry);
    }
}

impl Default for AlchemyConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        // SAFETY for tests: env access is process-global but this test doesn't mutate it.
        let cfg = AlchemyConfig {
            models: HashMap::new(),
            generator_model: DEFAULT_GENERATOR_MODEL.to_string(),
            reasoning_model: DEFAULT_REASONING_MODEL.to_string(),
            db_path: PathBuf::from("alchemy.db"),
            work_dir: PathBuf::from("work_dir"),
            search_top_k: DEFAULT_SEARCH_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        };
        assert_eq!(cfg.search_top_k, 5);
        assert!((cfg.similarity_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn register_model_overwrites_existing_entry() {
        let mut cfg = AlchemyConfig {
            models: HashMap::new(),
            generator_model: DEFAULT_GENERATOR_MODEL.to_string(),
            reasoning_model: DEFAULT_REASONING_MODEL.to_string(),
            db_path: PathBuf::from("alchemy.db"),
            work_dir: PathBuf::from("work_dir"),
            search_top_k: DEFAULT_SEARCH_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        };
        cfg.register_model(
            "m1",
            ModelEntry {
                model_type: ModelType::Api,
                api_base: "https://example.invalid".to_string(),
                api_keys: vec!["k1".to_string()],
            },
        );
        assert_eq!(cfg.models.len(), 1);
        cfg.register_model(
            "m1",
            ModelEntry {
                model_type: ModelType::Api,
                api_base: "https://example.invalid".to_string(),
                api_keys: vec!["k2".to_string()],
            },
        );
        assert_eq!(cfg.models["m1"].api_keys, vec!["k2".to_string()]);
    }
}
