//! Pipeline orchestrator.
//!
//! Validates submissions, allocates tasks, and drives them through their
//! workflow: acquire a concurrency slot, consult the result cache, run the
//! stages under the task deadline, and land the terminal transition. One
//! spawned worker owns each task from gate acquisition to terminal state.

mod multi_note;
mod similarity;
mod smart_note;
mod tags;

pub use similarity::{cosine_similarity, tokenize};
pub use tags::{normalize_suggestions, TagGenerator};

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::{ContentCache, ContentHash};
use crate::config::{Settings, MAX_IMAGE_BYTES, MAX_NOTES_PER_WORKFLOW, QUEUE_WAIT_TIMEOUT};
use crate::llm::{ModelBackend, ModelError};
use crate::repository::ContentRepository;
use crate::tasks::{
    ConcurrencyGate, NoteInput, Stage, TaskEntry, TaskError, TaskInput, TaskKind, TaskRegistry,
};
use crate::utils::sniff_image_type;

/// Map a model failure to the task error taxonomy.
fn model_error(err: ModelError) -> TaskError {
    match err {
        ModelError::DeadlineExceeded => TaskError::timeout("model call exceeded task deadline"),
        other => TaskError::model_unavailable(other.to_string()),
    }
}

/// Cooperative cancellation check, polled between stages and at model-call
/// boundaries.
fn ensure_active(entry: &Arc<TaskEntry>) -> Result<(), TaskError> {
    if entry.is_cancel_requested() {
        Err(TaskError::cancelled())
    } else {
        Ok(())
    }
}

/// Shared pipeline services. Construct once at startup and pass through;
/// cloning shares all underlying state.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) settings: Settings,
    pub(crate) model: Arc<dyn ModelBackend>,
    pub(crate) repository: Arc<dyn ContentRepository>,
    pub(crate) tags: TagGenerator,
    registry: Arc<TaskRegistry>,
    gate: ConcurrencyGate,
    cache: Arc<ContentCache>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        model: Arc<dyn ModelBackend>,
        repository: Arc<dyn ContentRepository>,
    ) -> Self {
        Self::with_queue_wait(settings, model, repository, QUEUE_WAIT_TIMEOUT)
    }

    /// Construction with an explicit queue-wait budget (tests shrink it).
    pub fn with_queue_wait(
        settings: Settings,
        model: Arc<dyn ModelBackend>,
        repository: Arc<dyn ContentRepository>,
        queue_wait: Duration,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new(settings.task_retention_ttl()));
        let gate = ConcurrencyGate::new(settings.max_concurrent_tasks, queue_wait);
        let cache = Arc::new(ContentCache::new(
            settings.cache_max_entries,
            settings.cache_ttl(),
        ));
        let tags = TagGenerator::new(
            model.clone(),
            repository.clone(),
            settings.max_tags_per_content,
        );
        Self {
            settings,
            model,
            repository,
            tags,
            registry,
            gate,
            cache,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Submit a raw-text smart note. Returns the task id.
    pub fn submit_smart_note_text(
        &self,
        owner: Uuid,
        text: String,
        title: Option<String>,
        public: bool,
    ) -> Result<Uuid, TaskError> {
        if text.trim().is_empty() {
            return Err(TaskError::invalid_input("note text is empty"));
        }
        let input = TaskInput::Text {
            text,
            title,
            public,
        };
        Ok(self.spawn_task(TaskKind::SmartNote, owner, input))
    }

    /// Submit a note image for OCR. Returns the task id.
    pub fn submit_smart_note_image(
        &self,
        owner: Uuid,
        bytes: Vec<u8>,
        title: Option<String>,
        public: bool,
    ) -> Result<Uuid, TaskError> {
        if bytes.is_empty() {
            return Err(TaskError::invalid_input("image payload is empty"));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(TaskError::invalid_input(format!(
                "image exceeds {} bytes",
                MAX_IMAGE_BYTES
            )));
        }
        if sniff_image_type(&bytes).is_none() {
            return Err(TaskError::invalid_input("unsupported image type"));
        }
        let input = TaskInput::Image {
            bytes,
            title,
            public,
        };
        Ok(self.spawn_task(TaskKind::SmartNote, owner, input))
    }

    /// Submit a multi-note summary workflow. Returns the task id.
    pub fn submit_multi_summary(
        &self,
        owner: Uuid,
        notes: Vec<NoteInput>,
        min_notes_threshold: Option<usize>,
    ) -> Result<Uuid, TaskError> {
        if notes.is_empty() {
            return Err(TaskError::invalid_input("no notes submitted"));
        }
        if notes.len() > MAX_NOTES_PER_WORKFLOW {
            return Err(TaskError::invalid_input(format!(
                "more than {} notes submitted",
                MAX_NOTES_PER_WORKFLOW
            )));
        }
        if notes.iter().any(|n| n.content.trim().is_empty()) {
            return Err(TaskError::invalid_input("a note has empty content"));
        }
        let input = TaskInput::Notes {
            notes,
            min_notes_threshold,
        };
        Ok(self.spawn_task(TaskKind::MultiSummary, owner, input))
    }

    fn spawn_task(&self, kind: TaskKind, owner: Uuid, input: TaskInput) -> Uuid {
        let entry = self.registry.create(kind, owner, input);
        let id = entry.id;
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run_task(entry).await;
        });
        id
    }

    /// Worker routine owning one task: slot, cache, stages, terminal state.
    async fn run_task(self, entry: Arc<TaskEntry>) {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                entry.fail(TaskError::capacity_exceeded());
                return;
            }
        };
        if entry.is_cancel_requested() {
            entry.fail(TaskError::cancelled());
            return;
        }

        entry.mark_running();
        let deadline = Instant::now() + self.settings.task_timeout();

        // Cache short-circuit. Image inputs have no hash and always run.
        let hash = cache_key(&entry);
        if let Some(hash) = hash {
            if let Some(result) = self.cache.get(&hash) {
                info!(task_id = %entry.id, "content cache hit");
                entry.record_intermediate(
                    Stage::CacheHit,
                    json!({ "hash": hex::encode(hash) }),
                    true,
                );
                entry.complete(result);
                return;
            }
        }

        let driven = tokio::time::timeout_at(deadline, async {
            match entry.kind {
                TaskKind::SmartNote => smart_note::run(&self, &entry, deadline).await,
                TaskKind::MultiSummary => multi_note::run(&self, &entry, deadline).await,
            }
        })
        .await;

        match driven {
            Ok(Ok(result)) => {
                if let Some(hash) = hash {
                    self.cache.insert(hash, result.clone());
                }
                entry.complete(result);
            }
            Ok(Err(err)) => {
                if err.code == crate::tasks::ErrorCode::Internal {
                    error!(task_id = %entry.id, error = %err, "task failed internally");
                } else {
                    info!(task_id = %entry.id, error = %err, "task failed");
                }
                entry.fail(err);
            }
            Err(_) => {
                info!(task_id = %entry.id, "task deadline exceeded");
                entry.fail(TaskError::timeout("task deadline exceeded"));
            }
        }
    }
}

/// Content hash for cacheable inputs; `None` for images.
fn cache_key(entry: &Arc<TaskEntry>) -> Option<ContentHash> {
    match &*entry.input() {
        TaskInput::Text { text, title, .. } => {
            Some(ContentCache::hash_text(title.as_deref(), text))
        }
        TaskInput::Notes { notes, .. } => Some(ContentCache::hash_notes(notes)),
        TaskInput::Image { .. } => None,
    }
}
