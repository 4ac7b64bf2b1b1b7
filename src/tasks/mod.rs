//! Task orchestration core: task state machine, registry, progress bus, and
//! the concurrency gate.
//!
//! Everything here is in-memory and process-local. Tasks are created by the
//! pipeline orchestrator, driven by a worker, observed over the bus, and
//! garbage-collected by the registry sweeper after a retention period.

mod bus;
mod gate;
mod registry;
mod task;

pub use bus::{ProgressBus, ProgressSubscription, BUS_CAPACITY};
pub use gate::{ConcurrencyGate, GateClosed};
pub use registry::{CancelOutcome, TaskEntry, TaskRegistry};
pub use task::{
    ErrorCode, NoteInput, NoteSummary, ProcessingMethod, ProgressEvent, SmartNoteResult, Stage,
    SummaryResult, TagAssociation, Task, TaskError, TaskInput, TaskKind, TaskResult, TaskSnapshot,
    TaskStatus,
};
