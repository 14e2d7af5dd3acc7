use crate::executor::TaskExecutor;
use crate::metrics::WorkerMetrics;
use std::sync::Arc;
use std::time::Instant;
use task_pipeline_core::{
    KeyGenerator, ResultStore, ResultStoreExt, Task, TaskResult, UuidKeyGenerator,
    ERRORED_COUNTER, PROCESSED_COUNTER,
};
use tracing::{debug, error, info, warn};

/// Terminal outcome of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Result stored under `key` and the processed counter incremented
    Processed { key: String },
    Errored { reason: String },
}

impl Outcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, Outcome::Processed { .. })
    }
}

/// Turns one delivered payload into a stored result and a counter update
#[derive(Clone)]
pub struct TaskProcessor {
    store: Arc<dyn ResultStore>,
    keys: Arc<dyn KeyGenerator>,
    executor: TaskExecutor,
    metrics: Arc<WorkerMetrics>,
    worker_id: String,
}

impl TaskProcessor {
    pub fn new(
        store: Arc<dyn ResultStore>,
        executor: TaskExecutor,
        metrics: Arc<WorkerMetrics>,
        worker_id: impl Into<String>,
    ) -> Self {
        TaskProcessor {
            store,
            keys: Arc::new(UuidKeyGenerator),
            executor,
            metrics,
            worker_id: worker_id.into(),
        }
    }

    pub fn with_key_generator(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    /// Process a raw delivery payload. Never panics on bad input and never
    /// retries; every call ends in exactly one counter increment.
    ///
    /// The result is written before the processed counter. If that increment
    /// fails, the record is rewritten as `Failed` and the error counter is
    /// incremented instead.
    pub async fn process(&self, payload: &[u8]) -> Outcome {
        let _in_flight = self.metrics.in_flight();
        let started = Instant::now();

        let outcome = self.run(payload).await;

        self.metrics
            .task_duration
            .observe(started.elapsed().as_secs_f64());
        outcome
    }

    async fn run(&self, payload: &[u8]) -> Outcome {
        let task = match Task::from_bytes(payload) {
            Ok(task) => task,
            Err(e) => {
                warn!("Discarding malformed task ({} bytes): {}", payload.len(), e);
                return self.record_error(format!("malformed payload: {}", e)).await;
            }
        };

        let key = self.keys.next_key();
        debug!("Received task {}", key);

        if let Err(reason) = self.executor.execute(&task).await {
            error!("Task {} failed: {}", key, reason);
            let failed = TaskResult::failed(task, reason.clone()).with_worker(&self.worker_id);
            if let Err(e) = self.store.put_result(&key, &failed).await {
                warn!("Could not store failed result for {}: {}", key, e);
            }
            return self.record_error(reason).await;
        }

        let result = TaskResult::completed(task).with_worker(&self.worker_id);
        if let Err(e) = self.store.put_result(&key, &result).await {
            error!("Failed to store result for {}: {}", key, e);
            return self.record_error(e.to_string()).await;
        }

        if let Err(e) = self.store.incr(PROCESSED_COUNTER).await {
            error!("Failed to count {} as processed: {}", key, e);
            // Counted as errored, so the stored record must not say Completed
            let failed = TaskResult::failed(result.original_payload, e.to_string())
                .with_worker(&self.worker_id);
            if let Err(e) = self.store.put_result(&key, &failed).await {
                warn!("Could not mark {} as failed: {}", key, e);
            }
            return self.record_error(e.to_string()).await;
        }

        self.metrics.tasks_processed.inc();
        info!("Task {} completed", key);
        Outcome::Processed { key }
    }

    /// Count a delivery as errored in the store and locally
    pub async fn record_error(&self, reason: impl Into<String>) -> Outcome {
        let reason = reason.into();
        self.metrics.tasks_errors.inc();
        if let Err(e) = self.store.incr(ERRORED_COUNTER).await {
            error!("Failed to count error: {}", e);
        }
        Outcome::Errored { reason }
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }
}
