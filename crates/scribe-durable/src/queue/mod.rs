//! Persistent job queue

mod memory;
mod sqlite;
mod store;

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;
pub use store::{
    ClaimedJob, FailureOutcome, JobRecord, JobState, JobStore, QueueError,
};
