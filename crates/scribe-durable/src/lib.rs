//! # Durable job execution core
//!
//! A SQLite-backed job queue and typed-handler worker for chained,
//! idempotently replayable workflows.
//!
//! ## Architecture
//!
//! ```text
//! submit ──> [ jobs table ] <── claim/complete/fail ── Worker
//!                 ^                                      │
//!                 │                                  dispatcher per type,
//!            chain fan-out                           concurrency(type) slots
//!                 │                                      │
//!                 └──────────── handlers <───────────────┘
//! ```
//!
//! Jobs carry free-form JSON payloads; the reserved `_workflow` envelope
//! threads a chain of successor job types and a shared run id through a
//! workflow instance. Errors are transient by default and retried with
//! exponential backoff; handlers opt into permanent failure explicitly.
//! Whatever is `running` when the process dies is re-queued at next boot.

pub mod chain;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod worker;

pub use chain::{spawn_successors, submit_root};
pub use queue::{
    ClaimedJob, FailureOutcome, InMemoryJobStore, JobRecord, JobState, JobStore, QueueError,
    SqliteJobStore,
};
pub use recovery::{recover_at_boot, RecoveryReport, DEFAULT_OVERDUE_THRESHOLD};
pub use registry::{HandlerError, HandlerRegistry, HandlerResult, JobContext, JobHandler};
pub use retry::RetryPolicy;
pub use worker::{Worker, WorkerConfig};
