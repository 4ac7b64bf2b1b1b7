//! Smart-note pipeline: OCR → correction → summarization → persistence with
//! tag generation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::time::Instant;
use tracing::warn;

use crate::llm::SummaryTemplate;
use crate::tasks::{
    SmartNoteResult, Stage, TaskEntry, TaskError, TaskInput, TaskResult,
};
use crate::utils::truncate_chars;

use super::{ensure_active, model_error, Orchestrator};

pub const STAGE_OCR: &str = "ocr_recognition";
pub const STAGE_CORRECTION: &str = "error_correction";
pub const STAGE_SUMMARY: &str = "note_summary";
pub const STAGE_SAVE: &str = "save_to_database";

/// Drive all stages and produce the terminal result. The caller owns the
/// terminal transition and the deadline clock.
pub(super) async fn run(
    orchestrator: &Orchestrator,
    entry: &Arc<TaskEntry>,
    deadline: Instant,
) -> Result<TaskResult, TaskError> {
    let input = entry.input();
    let max_len = orchestrator.settings.max_content_length;

    let (ocr_text, title, public) = match &*input {
        TaskInput::Image {
            bytes,
            title,
            public,
        } => {
            entry.set_stage(STAGE_OCR, 5);
            ensure_active(entry)?;
            let text = orchestrator
                .model
                .ocr(bytes, None, deadline)
                .await
                .map_err(model_error)?;
            entry.record_intermediate(Stage::OcrText, json!({ "text": text }), true);
            (text, title.clone(), *public)
        }
        TaskInput::Text {
            text,
            title,
            public,
        } => {
            // Text input skips OCR entirely; the raw text becomes the OCR
            // artifact so downstream stages are uniform.
            entry.record_intermediate(
                Stage::OcrText,
                json!({ "text": text, "skipped": true }),
                true,
            );
            (text.clone(), title.clone(), *public)
        }
        TaskInput::Notes { .. } => {
            return Err(TaskError::internal("multi-note input in smart-note task"));
        }
    };

    entry.set_stage(STAGE_CORRECTION, 30);
    ensure_active(entry)?;
    let corrected = orchestrator
        .model
        .correct(truncate_chars(&ocr_text, max_len), deadline)
        .await
        .map_err(model_error)?;
    entry.record_intermediate(Stage::CorrectedText, json!({ "text": corrected }), true);

    entry.set_stage(STAGE_SUMMARY, 55);
    ensure_active(entry)?;
    let title_text = title.unwrap_or_default();
    let summary = orchestrator
        .model
        .summarize(
            truncate_chars(&corrected, max_len),
            &title_text,
            SummaryTemplate::SingleNote,
            deadline,
        )
        .await
        .map_err(model_error)?;
    entry.record_intermediate(
        Stage::Summary,
        serde_json::to_value(&summary).unwrap_or_default(),
        true,
    );

    entry.set_stage(STAGE_SAVE, 80);
    ensure_active(entry)?;
    let content_id = orchestrator
        .repository
        .store_content(entry.owner, &corrected, &summary, &summary.content_markdown)
        .await
        .map_err(|e| TaskError::persistence_failed(e.to_string()))?;
    entry.record_intermediate(Stage::ContentId, json!({ "content_id": content_id }), true);

    if public {
        orchestrator
            .repository
            .set_content_public(content_id, &summary.title, &summary.topic, Utc::now())
            .await
            .map_err(|e| TaskError::persistence_failed(e.to_string()))?;
    }

    // Tag generation is best-effort: a failure downgrades to a warning and
    // the task still completes with empty tags.
    let tags = match orchestrator
        .tags
        .attach_tags(
            entry.owner,
            content_id,
            &summary,
            &summary.content_markdown,
            deadline,
        )
        .await
    {
        Ok(tags) => tags,
        Err(err) => {
            warn!(task_id = %entry.id, content_id, error = %err, "tag generation failed");
            Vec::new()
        }
    };
    entry.record_intermediate(
        Stage::Tags,
        serde_json::to_value(&tags).unwrap_or_default(),
        true,
    );

    Ok(TaskResult::SmartNote(SmartNoteResult {
        ocr_result: ocr_text,
        corrected_result: corrected,
        summary,
        content_id,
        tags,
    }))
}
