//! HTTP model client.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint. Each semantic
//! operation has a latency budget; the effective per-attempt timeout is the
//! smaller of that budget and the remaining task deadline.

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ModelSettings;
use crate::tasks::NoteSummary;
use crate::utils::sniff_image_type;

use super::prompts::{self, render, SummaryTemplate};
use super::retry::RetryPolicy;

/// Errors from model operations.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Failed to reach the endpoint (DNS, connect, reset, request timeout).
    #[error("connection error: {0}")]
    Connection(String),
    /// The endpoint answered with an error status.
    #[error("model API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    /// Explicit rate limiting, possibly with a retry-after hint.
    #[error("rate limited by model endpoint")]
    RateLimited { retry_after: Option<std::time::Duration> },
    /// The request itself was rejected (auth, payload, validation).
    #[error("invalid model request: {0}")]
    InvalidRequest(String),
    /// The model answered but the response could not be interpreted.
    #[error("failed to parse model response: {0}")]
    Parse(String),
    /// The remaining task deadline cannot accommodate another attempt.
    #[error("task deadline exceeded during model call")]
    DeadlineExceeded,
}

impl ModelError {
    /// Whether a retry might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidRequest(_) | Self::Parse(_) | Self::DeadlineExceeded => false,
        }
    }

    /// Server-provided backoff hint, when present.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Tag suggestions as returned by the tag model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagSuggestions {
    /// Names reused from the provided existing set.
    #[serde(default)]
    pub existing: Vec<String>,
    /// Newly minted tags with model confidence.
    #[serde(default)]
    pub new: Vec<NewTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTag {
    pub name: String,
    pub confidence: f64,
}

/// The four semantic model operations. The pipeline depends on this trait
/// so tests can substitute a scripted backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Extract text from a note image.
    async fn ocr(
        &self,
        image: &[u8],
        prompt: Option<&str>,
        deadline: Instant,
    ) -> Result<String, ModelError>;

    /// Correct OCR noise in text without changing meaning.
    async fn correct(&self, text: &str, deadline: Instant) -> Result<String, ModelError>;

    /// Summarize text into a structured artifact.
    async fn summarize(
        &self,
        text: &str,
        title: &str,
        template: SummaryTemplate,
        deadline: Instant,
    ) -> Result<NoteSummary, ModelError>;

    /// Suggest tags for a stored artifact, preferring existing names.
    async fn generate_tags(
        &self,
        summary: &NoteSummary,
        knowledge_text: &str,
        existing: &[String],
        deadline: Instant,
    ) -> Result<TagSuggestions, ModelError>;
}

/// Per-operation latency budgets.
fn ocr_budget() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}
fn correct_budget() -> std::time::Duration {
    std::time::Duration::from_secs(45)
}
fn summarize_budget() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}
fn tags_budget() -> std::time::Duration {
    std::time::Duration::from_secs(45)
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// HTTP implementation of [`ModelBackend`].
pub struct ModelClient {
    settings: ModelSettings,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ModelClient {
    pub fn new(settings: ModelSettings) -> Self {
        let retry = RetryPolicy::new(settings.max_retries, settings.retry_base());
        // No global client timeout; each request carries its own budget.
        let client = reqwest::Client::new();
        Self {
            settings,
            retry,
            client,
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Probe the endpoint (model listing) to check availability.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.settings.endpoint.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// One chat-completions attempt with the given per-attempt timeout.
    async fn attempt(
        &self,
        model: &str,
        content: ChatContent,
        timeout: std::time::Duration,
    ) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: 0.3,
        };

        let url = format!(
            "{}/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        );
        let mut builder = self.client.post(&url).timeout(timeout).json(&request);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(|e| {
            ModelError::Connection(e.to_string())
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(ModelError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(ModelError::InvalidRequest(format!(
                    "HTTP {status}: {message}"
                )));
            }
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ModelError::Parse("empty model response".to_string()));
        }
        Ok(content)
    }

    /// Call the model with retry, bounded by the operation budget and the
    /// task deadline.
    async fn call(
        &self,
        model: &str,
        budget: std::time::Duration,
        deadline: Instant,
        make_content: impl Fn() -> ChatContent,
    ) -> Result<String, ModelError> {
        self.retry
            .run(deadline, || {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let timeout = budget.min(remaining);
                let content = make_content();
                async move {
                    if timeout.is_zero() {
                        return Err(ModelError::DeadlineExceeded);
                    }
                    self.attempt(model, content, timeout).await
                }
            })
            .await
    }
}

#[async_trait]
impl ModelBackend for ModelClient {
    async fn ocr(
        &self,
        image: &[u8],
        prompt: Option<&str>,
        deadline: Instant,
    ) -> Result<String, ModelError> {
        let mime = sniff_image_type(image)
            .map(|t| t.mime())
            .ok_or_else(|| ModelError::InvalidRequest("unsupported image type".to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let data_url = format!("data:{mime};base64,{encoded}");
        let instruction = prompt
            .map(str::to_string)
            .or_else(|| prompts::prompt("ocr").map(str::to_string))
            .unwrap_or_default();

        debug!(model = %self.settings.ocr_model, bytes = image.len(), "ocr call");
        let text = self
            .call(&self.settings.ocr_model, ocr_budget(), deadline, || {
                ChatContent::Parts(vec![
                    ContentPart::Text {
                        text: instruction.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url.clone(),
                        },
                    },
                ])
            })
            .await?;
        Ok(text.trim().to_string())
    }

    async fn correct(&self, text: &str, deadline: Instant) -> Result<String, ModelError> {
        let template = prompts::prompt("correction").unwrap_or_default();
        let rendered = render(template, &[("content", text)]);

        debug!(model = %self.settings.correction_model, "correction call");
        let corrected = self
            .call(
                &self.settings.correction_model,
                correct_budget(),
                deadline,
                || ChatContent::Text(rendered.clone()),
            )
            .await?;
        Ok(corrected.trim().to_string())
    }

    async fn summarize(
        &self,
        text: &str,
        title: &str,
        template: SummaryTemplate,
        deadline: Instant,
    ) -> Result<NoteSummary, ModelError> {
        let rendered = render(template.text(), &[("title", title), ("content", text)]);

        debug!(model = %self.settings.summary_model, template = template.name(), "summary call");
        let raw = self
            .call(
                &self.settings.summary_model,
                summarize_budget(),
                deadline,
                || ChatContent::Text(rendered.clone()),
            )
            .await?;
        parse_json_response(&raw)
    }

    async fn generate_tags(
        &self,
        summary: &NoteSummary,
        knowledge_text: &str,
        existing: &[String],
        deadline: Instant,
    ) -> Result<TagSuggestions, ModelError> {
        let summary_json =
            serde_json::to_string(summary).map_err(|e| ModelError::Parse(e.to_string()))?;
        let template = prompts::prompt("tags").unwrap_or_default();
        let rendered = render(
            template,
            &[
                ("existing_tags", &existing.join(", ")),
                ("summary", &summary_json),
                ("content", knowledge_text),
            ],
        );

        debug!(model = %self.settings.tag_model, existing = existing.len(), "tag call");
        let raw = self
            .call(&self.settings.tag_model, tags_budget(), deadline, || {
                ChatContent::Text(rendered.clone())
            })
            .await?;
        parse_json_response(&raw)
    }
}

/// Parse a JSON object out of a model response, tolerating code fences and
/// surrounding prose.
fn parse_json_response<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, ModelError> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(ModelError::Parse(format!(
        "response is not the expected JSON object: {}",
        crate::utils::truncate_chars(trimmed, 200)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let summary: NoteSummary = parse_json_response(
            r#"{"title": "T", "topic": "physics", "content_markdown": "c", "keywords": ["a"]}"#,
        )
        .unwrap();
        assert_eq!(summary.title, "T");
        assert_eq!(summary.keywords, vec!["a"]);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"title\": \"T\", \"topic\": \"t\", \"content_markdown\": \"c\"}\n```";
        let summary: NoteSummary = parse_json_response(raw).unwrap();
        assert_eq!(summary.topic, "t");
        // keywords defaults when the model omits it
        assert!(summary.keywords.is_empty());
    }

    #[test]
    fn test_parse_json_with_prose() {
        let raw = "Here you go: {\"existing\": [\"physics\"], \"new\": []} hope it helps";
        let tags: TagSuggestions = parse_json_response(raw).unwrap();
        assert_eq!(tags.existing, vec!["physics"]);
        assert!(tags.new.is_empty());
    }

    #[test]
    fn test_parse_garbage_fails() {
        let result: Result<NoteSummary, _> = parse_json_response("no json here");
        assert!(matches!(result, Err(ModelError::Parse(_))));
    }

    #[test]
    fn test_retryability() {
        assert!(ModelError::Connection("reset".into()).is_retryable());
        assert!(ModelError::RateLimited { retry_after: None }.is_retryable());
        assert!(ModelError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ModelError::InvalidRequest("bad".into()).is_retryable());
        assert!(!ModelError::Api {
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(!ModelError::DeadlineExceeded.is_retryable());
    }
}
