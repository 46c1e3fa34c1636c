//! Worker: one dispatcher loop per registered job type
//!
//! Each dispatcher claims up to its free slots, launches handlers on the
//! runtime, and finalizes jobs as they return. Polling backs off
//! exponentially while the queue is empty and snaps back to the minimum
//! interval as soon as a claim returns work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::queue::{FailureOutcome, JobStore, QueueError};
use crate::registry::{HandlerError, HandlerRegistry, JobContext, JobHandler};
use crate::retry::RetryPolicy;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval right after a non-empty claim
    pub poll_min_interval: Duration,

    /// Poll interval ceiling while idle
    pub poll_max_interval: Duration,

    /// Idle backoff multiplier
    pub poll_backoff_multiplier: f64,

    /// Backoff curve for transient handler failures
    pub retry: RetryPolicy,

    /// Fixed safety backoff applied when a handler panics
    pub panic_backoff: Duration,

    /// How long shutdown waits for in-flight handlers
    pub shutdown_grace: Duration,

    /// In-process retries for complete/fail_* storage errors
    pub finalize_attempts: u32,

    /// Delay between finalize retries
    pub finalize_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_min_interval: Duration::from_millis(100),
            poll_max_interval: Duration::from_secs(5),
            poll_backoff_multiplier: 1.5,
            retry: RetryPolicy::exponential(),
            panic_backoff: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            finalize_attempts: 3,
            finalize_retry_delay: Duration::from_millis(250),
        }
    }
}

impl WorkerConfig {
    pub fn with_poll_intervals(mut self, min: Duration, max: Duration) -> Self {
        self.poll_min_interval = min;
        self.poll_max_interval = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_panic_backoff(mut self, backoff: Duration) -> Self {
        self.panic_backoff = backoff;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Adaptive poll interval: min after work, exponential toward max when idle
struct PollBackoff {
    current: Duration,
    min: Duration,
    max: Duration,
    multiplier: f64,
}

impl PollBackoff {
    fn new(config: &WorkerConfig) -> Self {
        Self {
            current: config.poll_min_interval,
            min: config.poll_min_interval,
            max: config.poll_max_interval,
            multiplier: config.poll_backoff_multiplier,
        }
    }

    fn reset(&mut self) {
        self.current = self.min;
    }

    fn increase(&mut self) {
        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = next.min(self.max);
    }
}

/// Runs registered handlers against the queue until shutdown.
pub struct Worker {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    dispatchers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            registry: Arc::new(registry),
            config,
            shutdown_tx,
            shutdown_rx,
            dispatchers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawn one dispatcher per registered job type.
    pub fn start(&self) {
        let mut job_types = self.registry.job_types();
        job_types.sort();

        let mut handles = self.dispatchers.lock().unwrap_or_else(|e| e.into_inner());
        if !handles.is_empty() {
            warn!("Worker already started, ignoring");
            return;
        }
        info!(types = ?job_types, "Starting worker dispatchers");

        for job_type in job_types {
            let handler = match self.registry.get(&job_type) {
                Some(h) => h,
                None => continue,
            };
            let concurrency = self.registry.concurrency(&job_type);

            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let shutdown_rx = self.shutdown_rx.clone();

            handles.push(tokio::spawn(run_dispatcher(
                store, job_type, handler, concurrency, config, shutdown_rx,
            )));
        }
    }

    /// Graceful shutdown: stop claiming, await in-flight handlers up to the
    /// grace period, abort whatever is left. Rows still `running` after a
    /// forced exit are picked up by boot recovery.
    pub async fn shutdown(&self) {
        info!("Worker shutdown requested");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.dispatchers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("Dispatcher did not drain within grace period, aborting");
                handle.abort();
            }
        }
        info!("Worker stopped");
    }

    /// Subscribe to the worker's shutdown signal (for auxiliary loops).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

async fn run_dispatcher(
    store: Arc<dyn JobStore>,
    job_type: String,
    handler: JobHandler,
    concurrency: usize,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(job_type = %job_type, concurrency, "Dispatcher started");

    let slots = Arc::new(Semaphore::new(concurrency));
    let mut backoff = PollBackoff::new(&config);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let free = slots.available_permits();
        if free == 0 {
            if wait_or_shutdown(&mut shutdown_rx, backoff.current).await {
                break;
            }
            continue;
        }

        match store.claim(&job_type, free).await {
            Ok(jobs) if !jobs.is_empty() => {
                backoff.reset();
                for job in jobs {
                    let permit = match Arc::clone(&slots).try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    let ctx = JobContext {
                        job_id: job.id,
                        job_type: job.job_type.clone(),
                        attempt: job.attempts,
                        queue: Arc::clone(&store),
                        shutdown: shutdown_rx.clone(),
                    };
                    let handler = Arc::clone(&handler);
                    let store = Arc::clone(&store);
                    let config = config.clone();

                    tokio::spawn(async move {
                        let job_id = job.id;
                        let attempt = job.attempts;
                        let payload = job.payload;

                        // Contain panics: the handler runs on its own task
                        // and the JoinError is mapped to a transient failure.
                        let joined =
                            tokio::spawn(async move { handler(ctx, payload).await }).await;

                        finalize(&*store, &config, job_id, attempt, joined).await;
                        drop(permit);
                    });
                }
            }
            Ok(_) => {
                backoff.increase();
            }
            Err(e) => {
                error!(job_type = %job_type, "Claim failed: {}", e);
                backoff.increase();
            }
        }

        if wait_or_shutdown(&mut shutdown_rx, backoff.current).await {
            break;
        }
    }

    // Drain: wait for in-flight handlers before exiting so shutdown can
    // await this dispatcher instead of tracking every job task.
    let _ = slots.acquire_many(concurrency as u32).await;
    debug!(job_type = %job_type, "Dispatcher exited");
}

/// Sleep for `interval`; returns true when shutdown fired instead.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = shutdown_rx.changed() => true,
    }
}

async fn finalize(
    store: &dyn JobStore,
    config: &WorkerConfig,
    job_id: Uuid,
    attempt: u32,
    joined: Result<Result<serde_json::Value, HandlerError>, tokio::task::JoinError>,
) {
    let outcome = match joined {
        Ok(Ok(result)) => {
            retry_finalize(config, || {
                let result = result.clone();
                async move { store.complete(job_id, result).await }
            })
            .await
        }
        Ok(Err(HandlerError::Permanent(msg))) => {
            warn!(%job_id, attempt, "Handler failed permanently: {}", msg);
            retry_finalize(config, || {
                let msg = msg.clone();
                async move { store.fail_permanent(job_id, &msg).await }
            })
            .await
        }
        Ok(Err(HandlerError::Transient(msg))) => {
            let delay = config.retry.delay_after_attempt(attempt);
            debug!(%job_id, attempt, delay_ms = delay.as_millis() as u64,
                   "Handler failed transiently: {}", msg);
            retry_finalize(config, || {
                let msg = msg.clone();
                async move {
                    store
                        .fail_transient(job_id, &msg, delay)
                        .await
                        .map(log_exhausted(job_id))
                }
            })
            .await
        }
        Err(join_err) => {
            // Panic or abnormal termination: fixed safety backoff
            let msg = format!("handler aborted: {join_err}");
            let backoff = config.panic_backoff;
            error!(%job_id, attempt, "{}", msg);
            retry_finalize(config, || {
                let msg = msg.clone();
                async move {
                    store
                        .fail_transient(job_id, &msg, backoff)
                        .await
                        .map(log_exhausted(job_id))
                }
            })
            .await
        }
    };

    if let Err(e) = outcome {
        // The job stays `running` and is re-queued by boot recovery
        error!(%job_id, "Failed to finalize job after retries: {}", e);
    }
}

fn log_exhausted(job_id: Uuid) -> impl FnOnce(FailureOutcome) {
    move |outcome| {
        if matches!(outcome, FailureOutcome::ExhaustedRetries) {
            warn!(%job_id, "Retries exhausted, job failed");
        }
    }
}

/// Bounded in-process retry for finalize-path storage errors.
async fn retry_finalize<T, F, Fut>(config: &WorkerConfig, mut op: F) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, QueueError>>,
{
    let tries = config.finalize_attempts.max(1);
    let mut last = None;
    for i in 0..tries {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                last = Some(e);
                if i + 1 < tries {
                    tokio::time::sleep(config.finalize_retry_delay).await;
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| QueueError::Database("finalize retry underflow".into())))
}
