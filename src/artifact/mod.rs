//! HTML artifact generation (C9): builds an LLM prompt from retrieved
//! context, streams a reasoning-model response, extracts the HTML payload,
//! and maintains the iteration/version bookkeeping around it.
//!
//! Grounded on `core/artifact.py::ArtifactGenerator`.

use crate::ingest::parser::read_to_string_lossy;
use crate::llm::dispatcher::ReasoningEngine;
use crate::llm::Dispatcher;
use crate::retrieval::ExecutionResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const HTML_SYSTEM_PROMPT: &str = "You are generating a single self-contained HTML artifact that \
presents the supplied context to the user. Respond with the HTML document only.";
const OPTIMIZATION_SYSTEM_PROMPT: &str = "Given the original query and the artifact you just \
produced, suggest one focused follow-up query that would deepen or refine the user's research. \
Wrap your answer in <answer>...</answer> tags.";

/// One versioned snapshot recorded in `versions_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactVersion {
    /// 1-based version number.
    pub version: u32,
    /// When this version was captured.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The query that produced this version.
    pub query: String,
    /// Path to the snapshot file, relative to the task directory.
    pub path: String,
}

/// `versions_info.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VersionsInfo {
    /// The most recently recorded version number.
    pub latest_version: u32,
    /// All recorded versions, oldest first.
    pub versions: Vec<ArtifactVersion>,
}

/// One entry in `status.json`'s `iterations` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationInfo {
    /// 1-based iteration number.
    pub iteration: u32,
    /// The query this iteration was generated for.
    pub query: String,
    /// When this iteration completed.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The suggested follow-up query, if one was produced.
    pub optimization_query: Option<String>,
}

/// `context_files.json` contents: the audit record of every source path
/// that fed a generated artifact's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFilesAudit {
    /// Every distinct file path referenced by the result set, in sorted order.
    pub file_paths: Vec<String>,
    /// `file_paths.len()`.
    pub total_count: usize,
    /// When this audit record was generated.
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// `status.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStatus {
    /// Task identifier this status belongs to.
    pub artifact_id: String,
    /// When the artifact was first created.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the artifact was last updated.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// The most recent iteration number.
    pub latest_iteration: u32,
    /// The query the artifact was originally generated for.
    pub original_query: String,
    /// Every recorded iteration, oldest first.
    pub iterations: Vec<IterationInfo>,
}

impl ArtifactStatus {
    fn new(artifact_id: &str, original_query: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            artifact_id: artifact_id.to_string(),
            created_at: now,
            updated_at: now,
            latest_iteration: 0,
            original_query: original_query.to_string(),
            iterations: Vec::new(),
        }
    }
}

/// Generates and iteratively refines an HTML artifact within a task's
/// working directory.
pub struct ArtifactGenerator<'a> {
    dispatcher: &'a Dispatcher,
    model: String,
    artifacts_dir: PathBuf,
    artifact_versions_dir: PathBuf,
}

impl<'a> ArtifactGenerator<'a> {
    /// Construct a generator rooted at `task_dir`, creating its
    /// `artifacts/` and `artifacts/artifact_versions/` subdirectories.
    pub fn new(
        dispatcher: &'a Dispatcher,
        model: impl Into<String>,
        task_dir: &Path,
    ) -> std::io::Result<Self> {
        let artifacts_dir = task_dir.join("artifacts");
        let artifact_versions_dir = artifacts_dir.join("artifact_versions");
        fs::create_dir_all(&artifact_versions_dir)?;
        Ok(Self {
            dispatcher,
            model: model.into(),
            artifacts_dir,
            artifact_versions_dir,
        })
    }

    fn status_path(&self) -> PathBuf {
        self.artifacts_dir.join("status.json")
    }

    fn artifact_path(&self) -> PathBuf {
        self.artifacts_dir.join("artifact.html")
    }

    fn versions_info_path(&self) -> PathBuf {
        self.artifact_versions_dir.join("versions_info.json")
    }

    fn context_files_audit_path(&self) -> PathBuf {
        self.artifacts_dir.join("context_files.json")
    }

    fn load_or_init_status(&self, artifact_id: &str, original_query: &str) -> std::io::Result<ArtifactStatus> {
        let path = self.status_path();
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if let Ok(status) = serde_json::from_str(&raw) {
                return Ok(status);
            }
        }
        Ok(ArtifactStatus::new(artifact_id, original_query))
    }

    fn save_status(&self, status: &ArtifactStatus) -> std::io::Result<()> {
        fs::write(self.status_path(), serde_json::to_string_pretty(status)?)
    }

    fn load_or_init_versions_info(&self) -> VersionsInfo {
        fs::read_to_string(self.versions_info_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_versions_info(&self, info: &VersionsInfo) -> std::io::Result<()> {
        fs::write(self.versions_info_path(), serde_json::to_string_pretty(info)?)
    }

    /// Build the context block fed to the HTML prompt: one
    /// `[file name]: ...\n[file content begin]\n...\n[file content end]`
    /// section per context file.
    #[must_use]
    pub fn build_context_block(files: &[(String, String)]) -> String {
        files
            .iter()
            .map(|(name, content)| {
                format!("[file name]: {name}\n[file content begin]\n{content}\n[file content end]\n")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Expand the result envelope into a list of `(relative_path, content)`
    /// context files for [`build_context_block`]: every distinct `file_path`
    /// referenced by a structured or vector hit is read from disk (UTF-8,
    /// falling back to a Latin-1-style byte decode), deduplicated, and the
    /// full union of paths is persisted to `context_files.json` for audit,
    /// following `context_preparation.py::prepare_context_files`. Paths that
    /// no longer exist on disk are silently skipped, matching the original.
    pub fn context_files_from_results(&self, result: &ExecutionResult) -> std::io::Result<Vec<(String, String)>> {
        let mut all_paths: BTreeSet<String> = BTreeSet::new();
        for hit in &result.structured {
            all_paths.insert(hit.file_path.clone());
        }
        for hit in &result.vector {
            all_paths.insert(hit.file_path.clone());
        }

        let mut files = Vec::new();
        for path in &all_paths {
            let source = Path::new(path);
            if !source.exists() {
                continue;
            }
            match read_to_string_lossy(source) {
                Ok(content) => files.push((path.clone(), content)),
                Err(err) => warn!(path, error = %err, "failed to read context file"),
            }
        }

        let audit = ContextFilesAudit {
            file_paths: all_paths.into_iter().collect(),
            total_count: files.len(),
            generated_at: chrono::Utc::now(),
        };
        fs::write(self.context_files_audit_path(), serde_json::to_string_pretty(&audit)?)?;

        Ok(files)
    }

    /// Generate (or regenerate) the artifact for `query`, given the
    /// retrieved context. Returns the iteration number produced and the
    /// suggested follow-up query, if any.
    pub async fn generate_artifact(
        &self,
        artifact_id: &str,
        query: &str,
        result: &ExecutionResult,
    ) -> std::io::Result<(u32, Option<String>)> {
        let mut status = self.load_or_init_status(artifact_id, query)?;
        let iteration = status.latest_iteration + 1;

        let context_files = self.context_files_from_results(result)?;
        let context_block = Self::build_context_block(&context_files);

        let engine = ReasoningEngine::new(self.dispatcher, self.model.clone());
        engine.set_system_prompt(HTML_SYSTEM_PROMPT);
        engine.add_user_message(format!(
            "Query: {query}\n\nContext:\n{context_block}"
        ));

        let html = match engine.get_stream_response().await {
            Ok(raw) => extract_html_content(&raw).unwrap_or_else(|| error_html(query, "model response did not contain an HTML document")),
            Err(err) => {
                warn!(error = %err, "artifact generation call failed");
                error_html(query, &err.to_string())
            }
        };

        self.promote_existing_artifact(query, iteration)?;
        fs::write(self.artifact_path(), &html)?;

        let optimization_query = self.get_optimization_query(query, &html).await;

        status.latest_iteration = iteration;
        status.updated_at = chrono::Utc::now();
        status.iterations.push(IterationInfo {
            iteration,
            query: query.to_string(),
            timestamp: chrono::Utc::now(),
            optimization_query: optimization_query.clone(),
        });
        self.save_status(&status)?;

        Ok((iteration, optimization_query))
    }

    fn promote_existing_artifact(&self, query: &str, _next_iteration: u32) -> std::io::Result<()> {
        let current = self.artifact_path();
        if !current.exists() {
            return Ok(());
        }
        let mut info = self.load_or_init_versions_info();
        let version = info.latest_version + 1;
        let snapshot_name = format!("artifact_v{version}.html");
        fs::copy(&current, self.artifact_versions_dir.join(&snapshot_name))?;
        info.latest_version = version;
        info.versions.push(ArtifactVersion {
            version,
            timestamp: chrono::Utc::now(),
            query: query.to_string(),
            path: format!("artifact_versions/{snapshot_name}"),
        });
        self.save_versions_info(&info)
    }

    async fn get_optimization_query(&self, original_query: &str, artifact_html: &str) -> Option<String> {
        let engine = ReasoningEngine::new(self.dispatcher, self.model.clone());
        engine.set_system_prompt(OPTIMIZATION_SYSTEM_PROMPT);
        engine.add_user_message(format!(
            "Original query: {original_query}\n\nGenerated artifact:\n{artifact_html}"
        ));
        let response = engine.get_stream_response().await.ok()?;
        if let Some(answer) = extract_answer_tag(&response) {
            return Some(answer);
        }
        let trimmed = response
            .trim()
            .trim_matches(|c| c == '`' || c == '"' || c == '\'')
            .trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Extract the HTML document from a raw LLM response, via the original's
/// three-branch algorithm:
/// 1. The response, trimmed, already starts with `<!DOCTYPE html>`/`<html`.
/// 2. A fenced ` ```html ` (or bare ` ``` `) code block is present; its
///    content is checked against the same doctype/html prefix.
/// 3. Neither matched: fall back to a regex search for the first
///    well-formed `<tag>...</tag>` pair.
///
/// Returns `None` if no HTML could be located by any branch.
#[must_use]
pub fn extract_html_content(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if starts_with_html(trimmed) {
        return Some(trimmed.to_string());
    }

    for marker in ["```html", "```HTML", "```"] {
        if let Some(pos) = raw.find(marker) {
            let after = &raw[pos + marker.len()..];
            let after = after.trim_start();
            if let Some(close_pos) = after.find("```") {
                let mut code_part = after[..close_pos].trim_start();
                for lang_tag in ["html\n", "HTML\n", "html", "HTML"] {
                    if let Some(stripped) = code_part.strip_prefix(lang_tag) {
                        code_part = stripped;
                        break;
                    }
                }
                let code_part = code_part.trim();
                if starts_with_html(code_part) {
                    return Some(code_part.to_string());
                }
                if let Some(tag_match) = find_tag_pair(code_part) {
                    return Some(tag_match);
                }
            }
        }
    }

    find_tag_pair(raw)
}

fn starts_with_html(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.starts_with("<!doctype html>") || lower.starts_with("<html")
}

fn find_tag_pair(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)<(?P<tag>[a-z]+)[^>]*>.*?</(?P<close>[a-z]+)>").ok()?;
    for capture in re.captures_iter(text) {
        if capture.name("tag").map(|m| m.as_str()) == capture.name("close").map(|m| m.as_str()) {
            let whole = capture.get(0)?;
            return Some(text[whole.start()..].to_string());
        }
    }
    None
}

fn extract_answer_tag(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)<answer>\s*(.*?)\s*</answer>").ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn error_html(query: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><title>Artifact generation failed</title></head>\n\
<body><h1>Artifact generation failed</h1><p>Query: {query}</p><p>{message}</p></body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_raw_doctype() {
        let raw = "<!DOCTYPE html>\n<html><body>hi</body></html>";
        assert_eq!(extract_html_content(raw).unwrap(), raw);
    }

    #[test]
    fn extract_fenced_html_block() {
        let raw = "Here you go:\n```html\n<html><body>hi</body></html>\n```\nThanks";
        let extracted = extract_html_content(raw).unwrap();
        assert!(extracted.starts_with("<html>"));
    }

    #[test]
    fn extract_falls_back_to_tag_pair_regex() {
        let raw = "Sure, here's a div: <div>content</div> hope that helps";
        let extracted = extract_html_content(raw).unwrap();
        assert!(extracted.starts_with("<div>"));
    }

    #[test]
    fn extract_returns_none_when_nothing_matches() {
        assert!(extract_html_content("no html here at all").is_none());
    }

    #[test]
    fn extract_answer_tag_pulls_inner_text() {
        let raw = "preamble <answer>refine the search</answer> trailing";
        assert_eq!(extract_answer_tag(raw).unwrap(), "refine the search");
    }

    #[test]
    fn build_context_block_wraps_each_file() {
        let files = vec![("a.txt".to_string(), "hello".to_string())];
        let block = ArtifactGenerator::build_context_block(&files);
        assert!(block.contains("[file name]: a.txt"));
        assert!(block.contains("hello"));
    }

    #[test]
    fn context_files_from_results_reads_structured_and_vector_paths_and_writes_audit() {
        use crate::config::AlchemyConfig;
        use crate::llm::Dispatcher;
        use crate::retrieval::{ExecutionResult, VectorResultRow};
        use crate::store::record::Record;
        use std::collections::{BTreeMap, HashMap};

        let task_dir = tempfile::tempdir().unwrap();
        let structured_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(structured_file.path(), "structured body").unwrap();
        let vector_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(vector_file.path(), "vector body").unwrap();

        let result = ExecutionResult {
            structured: vec![Record {
                record_id: "r1".to_string(),
                file_path: structured_file.path().to_string_lossy().to_string(),
                file_name: "s.txt".to_string(),
                file_type: "text".to_string(),
                processed_at: chrono::Utc::now(),
                sub_id: 0,
                data: BTreeMap::new(),
                vector: None,
            }],
            vector: vec![VectorResultRow {
                record_id: "r2".to_string(),
                file_path: vector_file.path().to_string_lossy().to_string(),
                file_name: "v.txt".to_string(),
                file_type: "text".to_string(),
                data: BTreeMap::new(),
                similarity: 9.0,
            }],
            ..ExecutionResult::default()
        };

        let config = AlchemyConfig { models: HashMap::new(), ..AlchemyConfig::from_env() };
        let dispatcher = Dispatcher::from_config(&config).unwrap();
        let generator = ArtifactGenerator::new(&dispatcher, "m", task_dir.path()).unwrap();

        let files = generator.context_files_from_results(&result).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|(_, c)| c == "structured body"));
        assert!(files.iter().any(|(_, c)| c == "vector body"));

        let audit_raw = std::fs::read_to_string(generator.context_files_audit_path()).unwrap();
        let audit: ContextFilesAudit = serde_json::from_str(&audit_raw).unwrap();
        assert_eq!(audit.total_count, 2);
        assert_eq!(audit.file_paths.len(), 2);
    }
}
