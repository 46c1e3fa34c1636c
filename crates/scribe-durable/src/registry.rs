//! Handler registry: job-type string -> handler fn + concurrency cap
//!
//! Registration is append-only and happens before `Worker::start`; the
//! worker snapshots the registry when its dispatchers spawn.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::queue::JobStore;

/// Error returned by a job handler.
///
/// Errors are transient by default; a handler opts into permanent failure
/// with the `permanent` constructor. Permanent jobs are never retried and
/// their successors are never submitted.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Retried with backoff until the job's attempt budget runs out
    #[error("{0}")]
    Transient(String),

    /// Terminal: unrecoverable decode, policy block, bad payload
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(msg: impl std::fmt::Display) -> Self {
        HandlerError::Transient(msg.to_string())
    }

    pub fn permanent(msg: impl std::fmt::Display) -> Self {
        HandlerError::Permanent(msg.to_string())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        // Transient by default; handlers wrap with `permanent` explicitly
        HandlerError::Transient(format!("{e:#}"))
    }
}

/// Result of one handler invocation
pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// Context handed to every handler invocation
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub job_type: String,
    /// Attempt count for this execution (1-based)
    pub attempt: u32,
    /// Queue handle for chain fan-out
    pub queue: Arc<dyn JobStore>,
    /// Flips to true on worker shutdown; handlers should return a transient
    /// error promptly when they observe it
    pub shutdown: watch::Receiver<bool>,
}

impl JobContext {
    /// True once graceful shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Boxed async handler fn
pub type JobHandler = Arc<
    dyn Fn(
            JobContext,
            serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>
        + Send
        + Sync,
>;

/// Maps job types to handlers and per-type concurrency caps.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, JobHandler>,
    concurrency: HashMap<String, usize>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `job_type`. Last registration wins.
    pub fn register<F, Fut>(&mut self, job_type: &str, handler: F)
    where
        F: Fn(JobContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |ctx, payload| Box::pin(handler(ctx, payload)));
        self.handlers.insert(job_type.to_string(), handler);
    }

    /// Raise (or lower) the concurrency cap for `job_type`.
    ///
    /// Takes effect when the worker next starts its dispatchers.
    pub fn set_concurrency(&mut self, job_type: &str, concurrency: usize) {
        self.concurrency
            .insert(job_type.to_string(), concurrency.max(1));
    }

    /// Concurrency cap for `job_type`; defaults to 1 (serial per type).
    pub fn concurrency(&self, job_type: &str) -> usize {
        self.concurrency.get(job_type).copied().unwrap_or(1)
    }

    /// All registered job types.
    pub fn job_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn get(&self, job_type: &str) -> Option<JobHandler> {
        self.handlers.get(job_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_concurrency_is_serial() {
        let mut registry = HandlerRegistry::new();
        registry.register("a", |_ctx, _payload| async { Ok(serde_json::json!({})) });

        assert_eq!(registry.concurrency("a"), 1);
        registry.set_concurrency("a", 8);
        assert_eq!(registry.concurrency("a"), 8);
    }

    #[test]
    fn test_concurrency_floor() {
        let mut registry = HandlerRegistry::new();
        registry.set_concurrency("a", 0);
        assert_eq!(registry.concurrency("a"), 1);
    }

    #[test]
    fn test_job_types_lists_registered() {
        let mut registry = HandlerRegistry::new();
        registry.register("a", |_ctx, _payload| async { Ok(serde_json::json!({})) });
        registry.register("b", |_ctx, _payload| async { Ok(serde_json::json!({})) });

        let mut types = registry.job_types();
        types.sort();
        assert_eq!(types, vec!["a", "b"]);
    }

    #[test]
    fn test_transient_by_default() {
        let err: HandlerError = anyhow::anyhow!("network hiccup").into();
        assert!(!err.is_permanent());
        assert!(HandlerError::permanent("bad pdf").is_permanent());
    }
}
