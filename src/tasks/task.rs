//! Task data model: kinds, statuses, inputs, results, and progress events.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// The two pipeline workflows a task can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SmartNote,
    MultiSummary,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmartNote => "smart_note",
            Self::MultiSummary => "multi_summary",
        }
    }
}

/// Task lifecycle states. `Pending → Running → terminal`; terminal states
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// Error classification surfaced on failed tasks and SSE error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    CapacityExceeded,
    ModelUnavailable,
    Timeout,
    Cancelled,
    PersistenceFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::ModelUnavailable => "model_unavailable",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::PersistenceFailed => "persistence_failed",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified task failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn capacity_exceeded() -> Self {
        Self::new(ErrorCode::CapacityExceeded, "capacity exceeded")
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ModelUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "cancelled")
    }

    pub fn persistence_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PersistenceFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// Intermediate artifact keys, in stage order. The derived ordering drives
/// the replay order for late bus subscribers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CacheHit,
    OcrText,
    CorrectedText,
    Summary,
    PerNoteSummary,
    ComprehensiveSummary,
    ConfidenceScores,
    ContentId,
    Tags,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::OcrText => "ocr_text",
            Self::CorrectedText => "corrected_text",
            Self::Summary => "summary",
            Self::PerNoteSummary => "per_note_summary",
            Self::ComprehensiveSummary => "comprehensive_summary",
            Self::ConfidenceScores => "confidence_scores",
            Self::ContentId => "content_id",
            Self::Tags => "tags",
        }
    }
}

/// One note within a multi-note submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInput {
    pub title: String,
    pub content: String,
}

/// Raw task payload. Never serialized back to clients.
#[derive(Debug, Clone)]
pub enum TaskInput {
    /// An image to OCR.
    Image {
        bytes: Vec<u8>,
        title: Option<String>,
        public: bool,
    },
    /// Raw text; skips the OCR stage.
    Text {
        text: String,
        title: Option<String>,
        public: bool,
    },
    /// An ordered list of notes for the multi-note workflow.
    Notes {
        notes: Vec<NoteInput>,
        min_notes_threshold: Option<usize>,
    },
}

/// Structured summary produced by the summarization model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub title: String,
    pub topic: String,
    pub content_markdown: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A tag attached to stored content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagAssociation {
    pub name: String,
    pub confidence: f64,
    pub is_new: bool,
}

/// Final artifact of the smart-note pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartNoteResult {
    pub ocr_result: String,
    pub corrected_result: String,
    pub summary: NoteSummary,
    pub content_id: i64,
    pub tags: Vec<TagAssociation>,
}

/// How a multi-note summary was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Single,
    MultiWorkflow,
    MultiWorkflowCorrected,
}

/// Final artifact of the multi-note workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub title: String,
    pub topic: String,
    pub content_markdown: String,
    pub confidence_scores: Vec<f64>,
    pub processing_method: ProcessingMethod,
}

/// Terminal result of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskResult {
    SmartNote(SmartNoteResult),
    Summary(SummaryResult),
}

/// Events published to a task's progress bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Snapshot of progress and lifecycle state.
    Status {
        progress: u8,
        current_step: Option<String>,
        status: TaskStatus,
    },
    /// A stage artifact, published as soon as the stage produces it.
    Intermediate { stage: Stage, payload: Value },
    /// Terminal success, carrying the full result.
    Complete { result: TaskResult },
    /// Terminal failure.
    Error { error: TaskError },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// One pipeline invocation.
///
/// Observable fields mutate only through registry-mediated transitions that
/// also publish the corresponding bus event.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub owner: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub input: Arc<TaskInput>,
    pub intermediates: BTreeMap<Stage, Value>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: Uuid, owner: Uuid, kind: TaskKind, input: TaskInput) -> Self {
        Self {
            id,
            owner,
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: None,
            input: Arc::new(input),
            intermediates: BTreeMap::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Read-only view of a task for API responses. Excludes the raw input
/// payload; oversized intermediates are elided by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub owner: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub intermediates: BTreeMap<Stage, Value>,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(TaskError::capacity_exceeded().code.as_str(), "capacity_exceeded");
        assert_eq!(
            TaskError::cancelled().to_string(),
            "cancelled: cancelled"
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent::Status {
            progress: 30,
            current_step: Some("error_correction".to_string()),
            status: TaskStatus::Running,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["progress"], 30);
        assert_eq!(json["current_step"], "error_correction");
        assert_eq!(json["status"], "running");

        let event = ProgressEvent::Intermediate {
            stage: Stage::OcrText,
            payload: serde_json::json!({"text": "hi"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "ocr_text");
    }

    #[test]
    fn test_stage_replay_order() {
        // BTreeMap iteration over stages must match pipeline stage order.
        let mut stages = vec![
            Stage::Tags,
            Stage::OcrText,
            Stage::ConfidenceScores,
            Stage::Summary,
            Stage::CorrectedText,
        ];
        stages.sort();
        assert_eq!(
            stages,
            vec![
                Stage::OcrText,
                Stage::CorrectedText,
                Stage::Summary,
                Stage::ConfidenceScores,
                Stage::Tags,
            ]
        );
    }
}
