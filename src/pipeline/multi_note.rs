//! Multi-note summary workflow: fan-out per-note summaries, merge them into
//! a comprehensive summary, score its confidence, and correct once when the
//! confidence falls short.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::config::PER_TASK_FANOUT_LIMIT;
use crate::llm::SummaryTemplate;
use crate::tasks::{
    NoteInput, NoteSummary, ProcessingMethod, Stage, SummaryResult, TaskEntry, TaskError,
    TaskInput, TaskResult,
};
use crate::utils::truncate_chars;

use super::similarity::cosine_similarity;
use super::{ensure_active, model_error, Orchestrator};

pub const STAGE_SINGLE: &str = "single_summary";
pub const STAGE_FANOUT: &str = "per_note_summaries";
pub const STAGE_COMPREHENSIVE: &str = "comprehensive_summary";
pub const STAGE_CONFIDENCE: &str = "confidence_scoring";
pub const STAGE_CORRECTION_PASS: &str = "summary_correction";

pub(super) async fn run(
    orchestrator: &Orchestrator,
    entry: &Arc<TaskEntry>,
    deadline: Instant,
) -> Result<TaskResult, TaskError> {
    let input = entry.input();
    let (notes, threshold_override) = match &*input {
        TaskInput::Notes {
            notes,
            min_notes_threshold,
        } => (notes.clone(), *min_notes_threshold),
        _ => return Err(TaskError::internal("smart-note input in multi-note task")),
    };

    let threshold = threshold_override.unwrap_or(orchestrator.settings.min_notes_threshold);
    if notes.len() < threshold {
        run_single(orchestrator, entry, &notes, deadline).await
    } else {
        run_workflow(orchestrator, entry, &notes, deadline).await
    }
}

/// Below the note threshold: one summarization call over the concatenated
/// notes.
async fn run_single(
    orchestrator: &Orchestrator,
    entry: &Arc<TaskEntry>,
    notes: &[NoteInput],
    deadline: Instant,
) -> Result<TaskResult, TaskError> {
    entry.set_stage(STAGE_SINGLE, 10);
    ensure_active(entry)?;

    let concatenated = notes
        .iter()
        .map(|n| n.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let title = joined_titles(notes);

    let summary = orchestrator
        .model
        .summarize(
            truncate_chars(&concatenated, orchestrator.settings.max_content_length),
            &title,
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

    // One score: the summary against the full concatenated input.
    let score = cosine_similarity(&summary.content_markdown, &concatenated);
    entry.record_intermediate(Stage::ConfidenceScores, json!([score]), true);

    Ok(TaskResult::Summary(SummaryResult {
        title: summary.title,
        topic: summary.topic,
        content_markdown: summary.content_markdown,
        confidence_scores: vec![score],
        processing_method: ProcessingMethod::Single,
    }))
}

/// At or above the note threshold: fan-out, merge, score, and conditionally
/// correct.
async fn run_workflow(
    orchestrator: &Orchestrator,
    entry: &Arc<TaskEntry>,
    notes: &[NoteInput],
    deadline: Instant,
) -> Result<TaskResult, TaskError> {
    entry.set_stage(STAGE_FANOUT, 10);
    ensure_active(entry)?;
    let per_note = fan_out(orchestrator, entry, notes, deadline).await?;

    entry.set_stage(STAGE_COMPREHENSIVE, 60);
    ensure_active(entry)?;
    let joined = per_note
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Note {}: {}\n{}", i + 1, s.title, s.content_markdown))
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut comprehensive = orchestrator
        .model
        .summarize(
            &joined,
            &joined_titles(notes),
            SummaryTemplate::Comprehensive,
            deadline,
        )
        .await
        .map_err(model_error)?;
    entry.record_intermediate(
        Stage::ComprehensiveSummary,
        serde_json::to_value(&comprehensive).unwrap_or_default(),
        true,
    );
    entry.set_progress(75);

    entry.set_stage(STAGE_CONFIDENCE, 75);
    let mut scores = score_against(&comprehensive, &per_note);
    entry.record_intermediate(Stage::ConfidenceScores, json!(scores.clone()), true);

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let threshold = orchestrator.settings.confidence_threshold;
    debug!(task_id = %entry.id, mean, threshold, "confidence decision");

    // At most one correction pass; a mean exactly at the threshold accepts.
    let processing_method = if mean >= threshold {
        ProcessingMethod::MultiWorkflow
    } else {
        entry.set_stage(STAGE_CORRECTION_PASS, 85);
        ensure_active(entry)?;
        comprehensive.content_markdown = orchestrator
            .model
            .correct(&comprehensive.content_markdown, deadline)
            .await
            .map_err(model_error)?;
        scores = score_against(&comprehensive, &per_note);
        entry.record_intermediate(Stage::ConfidenceScores, json!(scores.clone()), true);
        ProcessingMethod::MultiWorkflowCorrected
    };

    Ok(TaskResult::Summary(SummaryResult {
        title: comprehensive.title,
        topic: comprehensive.topic,
        content_markdown: comprehensive.content_markdown,
        confidence_scores: scores,
        processing_method,
    }))
}

/// Summarize every note in parallel, bounded by the fan-out limit. Per-note
/// events are published as results arrive (possibly out of input order, each
/// carrying its index); the returned summaries preserve input order.
async fn fan_out(
    orchestrator: &Orchestrator,
    entry: &Arc<TaskEntry>,
    notes: &[NoteInput],
    deadline: Instant,
) -> Result<Vec<NoteSummary>, TaskError> {
    let total = notes.len();
    let limit = Arc::new(Semaphore::new(PER_TASK_FANOUT_LIMIT));
    let (tx, mut rx) = mpsc::channel(total);

    for (index, note) in notes.iter().enumerate() {
        let model = orchestrator.model.clone();
        let limit = limit.clone();
        let tx = tx.clone();
        let title = note.title.clone();
        let content = truncate_chars(&note.content, orchestrator.settings.max_content_length)
            .to_string();
        tokio::spawn(async move {
            let _permit = match limit.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let result = model
                .summarize(&content, &title, SummaryTemplate::PerNote, deadline)
                .await;
            // Receiver gone means the task already failed or was cancelled.
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut slots: Vec<Option<NoteSummary>> = vec![None; total];
    let mut completed = 0usize;
    while completed < total {
        ensure_active(entry)?;
        let (index, result) = rx
            .recv()
            .await
            .ok_or_else(|| TaskError::internal("fan-out workers dropped"))?;
        let summary = result.map_err(model_error)?;
        entry.record_intermediate(
            Stage::PerNoteSummary,
            json!({
                "index": index,
                "total": total,
                "summary": serde_json::to_value(&summary).unwrap_or_default(),
            }),
            false,
        );
        slots[index] = Some(summary);
        completed += 1;
        // Fan-out spans the 10–60 progress band proportionally.
        let progress = 10 + ((completed * 50) / total) as u8;
        entry.set_progress(progress);
    }

    Ok(slots.into_iter().flatten().collect())
}

fn score_against(comprehensive: &NoteSummary, per_note: &[NoteSummary]) -> Vec<f64> {
    per_note
        .iter()
        .map(|s| cosine_similarity(&comprehensive.content_markdown, &s.content_markdown))
        .collect()
}

fn joined_titles(notes: &[NoteInput]) -> String {
    let titles: Vec<&str> = notes
        .iter()
        .map(|n| n.title.trim())
        .filter(|t| !t.is_empty())
        .collect();
    titles.join(", ")
}
