//! Configuration management for NoteFlow.
//!
//! All tunables are environment-driven with sensible defaults so the service
//! can start with nothing but a model endpoint configured. A `.env` file is
//! loaded by the binary before settings are read.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_max_concurrent_tasks() -> usize {
    10
}
fn default_task_timeout_s() -> u64 {
    300
}
fn default_min_notes_threshold() -> usize {
    3
}
fn default_confidence_threshold() -> f64 {
    0.60
}
fn default_max_content_length() -> usize {
    2000
}
fn default_max_tags_per_content() -> usize {
    5
}
fn default_cache_max_entries() -> usize {
    10_000
}
fn default_cache_ttl_s() -> u64 {
    86_400
}
fn default_task_retention_ttl_s() -> u64 {
    3_600
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_s() -> u64 {
    1
}
fn default_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model_name() -> String {
    "qwen2.5:14b-instruct".to_string()
}

/// How long a queued task may wait for a concurrency slot.
pub const QUEUE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parallelism bound for per-note fan-out inside one multi-note task.
pub const PER_TASK_FANOUT_LIMIT: usize = 4;

/// Hard cap on notes accepted per multi-note workflow.
pub const MAX_NOTES_PER_WORKFLOW: usize = 64;

/// Hard cap on submitted image size.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// How many existing tag names are offered to the tag model.
pub const MAX_EXISTING_TAGS: usize = 200;

/// Model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// OpenAI-compatible endpoint base URL (`MODEL_ENDPOINT_URL`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token (`MODEL_API_KEY`); optional for local endpoints.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used for OCR (`OCR_MODEL_NAME`).
    #[serde(default = "default_model_name")]
    pub ocr_model: String,
    /// Model used for text correction (`CORRECTION_MODEL_NAME`).
    #[serde(default = "default_model_name")]
    pub correction_model: String,
    /// Model used for summarization (`SUMMARY_MODEL_NAME`).
    #[serde(default = "default_model_name")]
    pub summary_model: String,
    /// Model used for tag generation (`TAG_MODEL_NAME`).
    #[serde(default = "default_model_name")]
    pub tag_model: String,
    /// Retry attempts for transient model failures (`AI_MAX_RETRIES`).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in seconds (`AI_RETRY_BASE_S`).
    #[serde(default = "default_retry_base_s")]
    pub retry_base_s: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            ocr_model: default_model_name(),
            correction_model: default_model_name(),
            summary_model: default_model_name(),
            tag_model: default_model_name(),
            max_retries: default_max_retries(),
            retry_base_s: default_retry_base_s(),
        }
    }
}

impl ModelSettings {
    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_s)
    }
}

/// Top-level service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Concurrent running tasks (`MAX_CONCURRENT_TASKS`).
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Per-task wall-clock deadline in seconds (`TASK_TIMEOUT_S`).
    #[serde(default = "default_task_timeout_s")]
    pub task_timeout_s: u64,
    /// Note count below which multi-note input takes the single-summary
    /// path (`MIN_NOTES_THRESHOLD`).
    #[serde(default = "default_min_notes_threshold")]
    pub min_notes_threshold: usize,
    /// Mean-similarity acceptance threshold (`CONFIDENCE_THRESHOLD`).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Maximum characters of note text sent to a model (`MAX_CONTENT_LENGTH`).
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    /// Tag cap per stored content (`MAX_TAGS_PER_CONTENT`).
    #[serde(default = "default_max_tags_per_content")]
    pub max_tags_per_content: usize,
    /// Result cache entry bound (`CACHE_MAX_ENTRIES`).
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Result cache entry age bound in seconds (`CACHE_TTL_S`).
    #[serde(default = "default_cache_ttl_s")]
    pub cache_ttl_s: u64,
    /// How long terminal tasks stay queryable in seconds
    /// (`TASK_RETENTION_TTL_S`).
    #[serde(default = "default_task_retention_ttl_s")]
    pub task_retention_ttl_s: u64,
    /// Model endpoint configuration.
    #[serde(default)]
    pub model: ModelSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_s: default_task_timeout_s(),
            min_notes_threshold: default_min_notes_threshold(),
            confidence_threshold: default_confidence_threshold(),
            max_content_length: default_max_content_length(),
            max_tags_per_content: default_max_tags_per_content(),
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_s: default_cache_ttl_s(),
            task_retention_ttl_s: default_task_retention_ttl_s(),
            model: ModelSettings::default(),
        }
    }
}

/// Read an environment variable, parsing into `T` and falling back to the
/// provided default on absence, emptiness, or parse failure.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Settings {
    /// Load settings from the environment.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        let model_defaults = ModelSettings::default();

        let model = ModelSettings {
            endpoint: env_string("MODEL_ENDPOINT_URL").unwrap_or(model_defaults.endpoint),
            api_key: env_string("MODEL_API_KEY"),
            ocr_model: env_string("OCR_MODEL_NAME").unwrap_or(model_defaults.ocr_model),
            correction_model: env_string("CORRECTION_MODEL_NAME")
                .unwrap_or(model_defaults.correction_model),
            summary_model: env_string("SUMMARY_MODEL_NAME").unwrap_or(model_defaults.summary_model),
            tag_model: env_string("TAG_MODEL_NAME").unwrap_or(model_defaults.tag_model),
            max_retries: env_parse("AI_MAX_RETRIES", model_defaults.max_retries),
            retry_base_s: env_parse("AI_RETRY_BASE_S", model_defaults.retry_base_s),
        };

        Self {
            max_concurrent_tasks: env_parse("MAX_CONCURRENT_TASKS", defaults.max_concurrent_tasks),
            task_timeout_s: env_parse("TASK_TIMEOUT_S", defaults.task_timeout_s),
            min_notes_threshold: env_parse("MIN_NOTES_THRESHOLD", defaults.min_notes_threshold),
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            max_content_length: env_parse("MAX_CONTENT_LENGTH", defaults.max_content_length),
            max_tags_per_content: env_parse("MAX_TAGS_PER_CONTENT", defaults.max_tags_per_content),
            cache_max_entries: env_parse("CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            cache_ttl_s: env_parse("CACHE_TTL_S", defaults.cache_ttl_s),
            task_retention_ttl_s: env_parse("TASK_RETENTION_TTL_S", defaults.task_retention_ttl_s),
            model,
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_s)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_s)
    }

    pub fn task_retention_ttl(&self) -> Duration {
        Duration::from_secs(self.task_retention_ttl_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_concurrent_tasks, 10);
        assert_eq!(settings.task_timeout_s, 300);
        assert_eq!(settings.min_notes_threshold, 3);
        assert!((settings.confidence_threshold - 0.60).abs() < f64::EPSILON);
        assert_eq!(settings.max_content_length, 2000);
        assert_eq!(settings.max_tags_per_content, 5);
        assert_eq!(settings.cache_max_entries, 10_000);
        assert_eq!(settings.cache_ttl_s, 86_400);
        assert_eq!(settings.task_retention_ttl_s, 3_600);
        assert_eq!(settings.model.max_retries, 3);
        assert_eq!(settings.model.retry_base(), Duration::from_secs(1));
    }

    #[test]
    fn test_env_parse_fallback() {
        assert_eq!(env_parse("NOTEFLOW_TEST_UNSET_VAR", 7usize), 7);
        std::env::set_var("NOTEFLOW_TEST_BAD_VAR", "not-a-number");
        assert_eq!(env_parse("NOTEFLOW_TEST_BAD_VAR", 7usize), 7);
        std::env::remove_var("NOTEFLOW_TEST_BAD_VAR");
    }
}
