// Storage layer: three SQLite datastores
//
// main          - dossiers, uploads, blobs, documents
// trace         - content-addressed step trace (idempotent replay)
// observability - heartbeats, audit events
//
// Each store opens its own file with a single-connection write pool so the
// job queue, step bookkeeping, and liveness writes never contend.

pub mod db;
pub mod main_store;
pub mod models;
pub mod observability;
pub mod trace;

pub use db::{ensure_column, open_pool};
pub use main_store::Database;
pub use models::*;
pub use observability::{
    spawn_heartbeat_writer, AuditEventRow, HealthStatus, HeartbeatRow, ObservabilityStore,
    SnapshotFn, DEFAULT_HEARTBEAT_INTERVAL,
};
pub use trace::{CompleteOutcome, StartOutcome, TraceRow, TraceStore};
