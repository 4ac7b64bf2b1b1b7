//! In-memory task registry.
//!
//! Process-wide map of task id to live task state. All observable mutation
//! goes through [`TaskEntry`] transition methods, which update the state and
//! publish the matching bus event under one lock so snapshots and event
//! streams never disagree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::bus::{ProgressBus, ProgressSubscription};
use super::task::{
    ProgressEvent, Stage, Task, TaskError, TaskInput, TaskKind, TaskResult, TaskSnapshot,
    TaskStatus,
};

/// Intermediates larger than this are elided from snapshots.
const SNAPSHOT_INTERMEDIATE_LIMIT: usize = 64 * 1024;

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation signal set; the worker will observe it cooperatively.
    Accepted,
    /// The task already reached a terminal state.
    AlreadyTerminal,
    /// No such task.
    NotFound,
}

/// A live task: state, bus, and cancellation flag.
pub struct TaskEntry {
    pub id: Uuid,
    pub kind: TaskKind,
    pub owner: Uuid,
    state: Mutex<Task>,
    bus: ProgressBus,
    cancel_requested: AtomicBool,
}

impl TaskEntry {
    fn new(kind: TaskKind, owner: Uuid, input: TaskInput) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            kind,
            owner,
            state: Mutex::new(Task::new(id, owner, kind, input)),
            bus: ProgressBus::new(),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Shared handle to the raw input payload.
    pub fn input(&self) -> Arc<TaskInput> {
        self.state.lock().unwrap().input.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().unwrap().status
    }

    pub fn result(&self) -> Option<TaskResult> {
        self.state.lock().unwrap().result.clone()
    }

    /// Whether cooperative cancellation has been requested. Polled between
    /// stages and at model-call boundaries.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Set the cancellation signal if the task is not yet terminal.
    pub fn request_cancel(&self) -> CancelOutcome {
        let state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }
        self.cancel_requested.store(true, Ordering::Release);
        CancelOutcome::Accepted
    }

    /// Transition `pending → running`.
    pub fn mark_running(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return;
        }
        state.status = TaskStatus::Running;
        state.started_at = Some(Utc::now());
        self.bus.publish(ProgressEvent::Status {
            progress: state.progress,
            current_step: state.current_step.clone(),
            status: state.status,
        });
    }

    /// Enter a stage: update the step label and progress, publish a status
    /// event carrying both.
    pub fn set_stage(&self, step: &str, progress: u8) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return;
        }
        state.current_step = Some(step.to_string());
        state.progress = state.progress.max(progress);
        self.bus.publish(ProgressEvent::Status {
            progress: state.progress,
            current_step: state.current_step.clone(),
            status: state.status,
        });
    }

    /// Advance progress within the current stage (monotone).
    pub fn set_progress(&self, progress: u8) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return;
        }
        state.progress = state.progress.max(progress);
        self.bus.publish(ProgressEvent::Status {
            progress: state.progress,
            current_step: state.current_step.clone(),
            status: state.status,
        });
    }

    /// Publish a stage artifact. When `retain` is set the artifact is also
    /// stored in the intermediate map (and replayed to late subscribers);
    /// transient artifacts such as indexed per-note summaries are
    /// publish-only.
    pub fn record_intermediate(&self, stage: Stage, payload: Value, retain: bool) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return;
        }
        if retain {
            state.intermediates.insert(stage, payload.clone());
        }
        self.bus.publish(ProgressEvent::Intermediate { stage, payload });
    }

    /// Terminal success. Sets progress to 100 and publishes the one terminal
    /// event.
    pub fn complete(&self, result: TaskResult) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return;
        }
        state.status = TaskStatus::Completed;
        state.progress = 100;
        state.result = Some(result.clone());
        state.completed_at = Some(Utc::now());
        self.bus.publish(ProgressEvent::Complete { result });
    }

    /// Terminal failure. The status is derived from the error code; the
    /// `error` field is set for failures and timeouts (a cancelled task
    /// reports only through its terminal event).
    pub fn fail(&self, error: TaskError) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return;
        }
        state.status = match error.code {
            super::task::ErrorCode::Cancelled => TaskStatus::Cancelled,
            super::task::ErrorCode::Timeout => TaskStatus::TimedOut,
            _ => TaskStatus::Failed,
        };
        if state.status != TaskStatus::Cancelled {
            state.error = Some(error.clone());
        }
        state.completed_at = Some(Utc::now());
        self.bus.publish(ProgressEvent::Error { error });
    }

    /// Subscribe to the task's event stream. Late subscribers are seeded
    /// with a synthesized status, the retained intermediates in stage order,
    /// and the terminal event when the task already finished.
    pub fn subscribe(&self) -> ProgressSubscription {
        let state = self.state.lock().unwrap();
        let mut burst = Vec::with_capacity(state.intermediates.len() + 2);
        burst.push(ProgressEvent::Status {
            progress: state.progress,
            current_step: state.current_step.clone(),
            status: state.status,
        });
        for (stage, payload) in &state.intermediates {
            burst.push(ProgressEvent::Intermediate {
                stage: *stage,
                payload: payload.clone(),
            });
        }
        if state.status.is_terminal() {
            burst.push(match (&state.result, &state.error, state.status) {
                (Some(result), _, _) => ProgressEvent::Complete {
                    result: result.clone(),
                },
                (_, Some(error), _) => ProgressEvent::Error {
                    error: error.clone(),
                },
                (_, _, TaskStatus::Cancelled) => ProgressEvent::Error {
                    error: TaskError::cancelled(),
                },
                _ => ProgressEvent::Error {
                    error: TaskError::internal("task ended without result"),
                },
            });
        }
        self.bus.subscribe_with(burst)
    }

    /// Snapshot for API responses: no input payload, oversized intermediates
    /// elided.
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock().unwrap();
        let intermediates = state
            .intermediates
            .iter()
            .filter(|(_, v)| v.to_string().len() <= SNAPSHOT_INTERMEDIATE_LIMIT)
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        TaskSnapshot {
            id: state.id,
            owner: state.owner,
            kind: state.kind,
            status: state.status,
            progress: state.progress,
            current_step: state.current_step.clone(),
            intermediates,
            error: state.error.clone(),
            created_at: state.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
        }
    }

    fn terminal_age(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap();
        if !state.status.is_terminal() {
            return None;
        }
        let completed = state.completed_at?;
        (Utc::now() - completed).to_std().ok()
    }
}

/// Thread-safe map of live tasks with TTL-based cleanup.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Uuid, Arc<TaskEntry>>>,
    retention_ttl: Duration,
}

impl TaskRegistry {
    pub fn new(retention_ttl: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            retention_ttl,
        }
    }

    /// Construct a task in `pending` and register it.
    pub fn create(&self, kind: TaskKind, owner: Uuid, input: TaskInput) -> Arc<TaskEntry> {
        let entry = Arc::new(TaskEntry::new(kind, owner, input));
        self.tasks.lock().unwrap().insert(entry.id, entry.clone());
        debug!(task_id = %entry.id, kind = kind.as_str(), "task created");
        entry
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<TaskEntry>> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    /// Snapshot read of a single task.
    pub fn snapshot(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.get(id).map(|entry| entry.snapshot())
    }

    /// Snapshots of all tasks belonging to `owner`, optionally filtered by
    /// status, newest first.
    pub fn list(&self, owner: Uuid, status: Option<TaskStatus>) -> Vec<TaskSnapshot> {
        let entries: Vec<_> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.owner == owner)
            .cloned()
            .collect();
        let mut snapshots: Vec<_> = entries
            .iter()
            .map(|e| e.snapshot())
            .filter(|s| status.map(|wanted| s.status == wanted).unwrap_or(true))
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self, id: Uuid) -> CancelOutcome {
        match self.get(id) {
            Some(entry) => entry.request_cancel(),
            None => CancelOutcome::NotFound,
        }
    }

    /// Remove tasks whose terminal age exceeds the retention TTL. Returns
    /// the number removed.
    pub fn sweep(&self) -> usize {
        let expired: Vec<Uuid> = {
            let tasks = self.tasks.lock().unwrap();
            tasks
                .values()
                .filter(|e| {
                    e.terminal_age()
                        .map(|age| age >= self.retention_ttl)
                        .unwrap_or(false)
                })
                .map(|e| e.id)
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }
        let mut tasks = self.tasks.lock().unwrap();
        for id in &expired {
            tasks.remove(id);
        }
        info!(removed = expired.len(), "swept expired tasks");
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }

    /// Spawn the periodic cleanup sweeper.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::task::{ProcessingMethod, SummaryResult};

    fn text_input() -> TaskInput {
        TaskInput::Text {
            text: "hello".into(),
            title: None,
            public: false,
        }
    }

    fn summary_result() -> TaskResult {
        TaskResult::Summary(SummaryResult {
            title: "t".into(),
            topic: "physics".into(),
            content_markdown: "c".into(),
            confidence_scores: vec![1.0],
            processing_method: ProcessingMethod::Single,
        })
    }

    #[tokio::test]
    async fn test_create_and_snapshot() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        let snapshot = registry.snapshot(entry.id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(snapshot.progress, 0);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_completed_iff_progress_100_iff_result() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::MultiSummary, Uuid::nil(), text_input());
        entry.mark_running();
        entry.set_stage("note_summary", 55);

        let snapshot = entry.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Running);
        assert!(snapshot.progress < 100);
        assert!(entry.result().is_none());

        entry.complete(summary_result());
        let snapshot = entry.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.progress, 100);
        assert!(entry.result().is_some());
    }

    #[tokio::test]
    async fn test_terminal_states_are_absorbing() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        entry.mark_running();
        entry.fail(TaskError::timeout("deadline exceeded"));
        assert_eq!(entry.status(), TaskStatus::TimedOut);

        // Late transitions are ignored.
        entry.complete(summary_result());
        entry.set_progress(99);
        assert_eq!(entry.status(), TaskStatus::TimedOut);
        assert!(entry.result().is_none());
        assert!(entry.snapshot().progress < 100);
    }

    #[tokio::test]
    async fn test_cancel_outcomes() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());

        assert_eq!(registry.cancel(entry.id), CancelOutcome::Accepted);
        assert!(entry.is_cancel_requested());

        entry.fail(TaskError::cancelled());
        assert_eq!(entry.status(), TaskStatus::Cancelled);
        assert_eq!(registry.cancel(entry.id), CancelOutcome::AlreadyTerminal);
        assert_eq!(registry.cancel(Uuid::new_v4()), CancelOutcome::NotFound);

        // Cancelled tasks carry no error field; the terminal event does.
        assert!(entry.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        entry.mark_running();
        entry.set_progress(55);
        entry.set_progress(30);
        assert_eq!(entry.snapshot().progress, 55);
    }

    #[tokio::test]
    async fn test_late_subscriber_replay() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        entry.mark_running();
        entry.record_intermediate(
            Stage::OcrText,
            serde_json::json!({"text": "hi"}),
            true,
        );
        entry.record_intermediate(
            Stage::CorrectedText,
            serde_json::json!({"text": "hi"}),
            true,
        );
        entry.complete(summary_result());

        let mut sub = entry.subscribe();
        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        // Synthesized status, two intermediates in stage order, terminal.
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ProgressEvent::Status { .. }));
        assert!(
            matches!(&events[1], ProgressEvent::Intermediate { stage: Stage::OcrText, .. })
        );
        assert!(matches!(
            &events[2],
            ProgressEvent::Intermediate { stage: Stage::CorrectedText, .. }
        ));
        assert!(events[3].is_terminal());
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        let mut sub = entry.subscribe();
        entry.mark_running();
        entry.complete(summary_result());
        entry.fail(TaskError::internal("ignored"));

        let mut terminal_count = 0;
        let mut last_is_terminal = false;
        while let Some(event) = sub.recv().await {
            last_is_terminal = event.is_terminal();
            if last_is_terminal {
                terminal_count += 1;
            }
        }
        assert_eq!(terminal_count, 1);
        assert!(last_is_terminal);
    }

    #[tokio::test]
    async fn test_snapshot_elides_oversized_intermediates() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let entry = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        entry.mark_running();
        entry.record_intermediate(
            Stage::OcrText,
            serde_json::json!({"text": "x".repeat(70 * 1024)}),
            true,
        );
        entry.record_intermediate(Stage::Summary, serde_json::json!({"ok": true}), true);

        let snapshot = entry.snapshot();
        assert!(!snapshot.intermediates.contains_key(&Stage::OcrText));
        assert!(snapshot.intermediates.contains_key(&Stage::Summary));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_terminal_tasks() {
        let registry = TaskRegistry::new(Duration::ZERO);
        let running = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        running.mark_running();
        let done = registry.create(TaskKind::SmartNote, Uuid::nil(), text_input());
        done.complete(summary_result());

        assert_eq!(registry.sweep(), 1);
        assert!(registry.get(done.id).is_none());
        assert!(registry.get(running.id).is_some());
    }

    #[tokio::test]
    async fn test_list_filters_by_owner_and_status() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let owner = Uuid::new_v4();
        let mine = registry.create(TaskKind::SmartNote, owner, text_input());
        registry.create(TaskKind::SmartNote, Uuid::new_v4(), text_input());
        assert_eq!(registry.list(owner, None).len(), 1);

        mine.complete(summary_result());
        assert_eq!(registry.list(owner, Some(TaskStatus::Completed)).len(), 1);
        assert!(registry.list(owner, Some(TaskStatus::Running)).is_empty());
    }
}
