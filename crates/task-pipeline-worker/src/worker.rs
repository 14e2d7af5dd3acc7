use crate::{
    config::WorkerConfig,
    executor::TaskExecutor,
    handler::TaskHandler,
    metrics::WorkerMetrics,
    processor::{Outcome, TaskProcessor},
};
use task_pipeline_core::{Broker, Delivery, KeyGenerator, ResultStore, Subscription};

use anyhow::Context;
use serde::Serialize;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use tracing::{info, warn, error, debug};

/// Lifecycle of a worker; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Subscribed,
    Draining,
    Stopped,
}

/// Per-instance totals returned when the worker stops. Every delivery the
/// worker received ends up in exactly one of the two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub processed: u64,
    pub errored: u64,
}

/// Queue-group consumer that processes each delivery in its own task
pub struct Worker {
    config: WorkerConfig,
    worker_id: String,
    broker: Arc<dyn Broker>,
    processor: TaskProcessor,
    state: watch::Sender<WorkerState>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn Broker>,
        store: Arc<dyn ResultStore>,
        handler: Arc<dyn TaskHandler>,
    ) -> anyhow::Result<Self> {
        let worker_id = config.generate_worker_id();
        let metrics = Arc::new(WorkerMetrics::new()?);
        let executor = TaskExecutor::new(handler).with_timeout(config.handler_timeout());
        let processor = TaskProcessor::new(store, executor, metrics, worker_id.clone());
        let (state, _) = watch::channel(WorkerState::Starting);

        Ok(Worker {
            config,
            worker_id,
            broker,
            processor,
            state,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_key_generator(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.processor = self.processor.with_key_generator(keys);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.processor.metrics().clone()
    }

    /// Watch lifecycle transitions
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Token that starts draining when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Begin draining
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run until shutdown, then drain and close the broker connection.
    ///
    /// Only the initial subscribe is fatal; per-message failures are counted.
    pub async fn run(&self) -> anyhow::Result<WorkerSummary> {
        info!(
            "Starting worker {} on {} (group: {}, max in flight: {})",
            self.worker_id, self.config.subject, self.config.group, self.config.max_in_flight
        );

        let mut subscription = self
            .broker
            .subscribe(&self.config.subject, Some(self.config.group.as_str()))
            .await
            .with_context(|| format!("failed to subscribe to {}", self.config.subject))?;

        self.state.send_replace(WorkerState::Subscribed);
        info!("Worker {} subscribed", self.worker_id);

        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut handlers: JoinSet<Outcome> = JoinSet::new();
        let mut summary = WorkerSummary::default();
        let mut ended = false;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    self.settle(joined, &mut summary).await;
                }

                permit = permits.clone().acquire_owned() => {
                    let permit = permit.context("handler semaphore closed")?;

                    // Holding a permit before pulling keeps excess deliveries
                    // in the subscription buffer.
                    let delivery = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => break,
                        delivery = subscription.next() => delivery,
                    };

                    let Some(delivery) = delivery else {
                        error!("Subscription on {} ended unexpectedly", self.config.subject);
                        ended = true;
                        break;
                    };

                    self.spawn(&mut handlers, permit, delivery);
                }
            }
        }

        if !ended {
            subscription.drain().await;
        }
        self.state.send_replace(WorkerState::Draining);
        info!("Worker {} draining {} in-flight tasks", self.worker_id, handlers.len());

        self.drain(&mut subscription, &permits, &mut handlers, &mut summary).await?;

        self.broker.close().await;
        self.state.send_replace(WorkerState::Stopped);

        info!(
            "Worker {} stopped: {} processed, {} errored",
            self.worker_id, summary.processed, summary.errored
        );
        Ok(summary)
    }

    fn spawn(
        &self,
        handlers: &mut JoinSet<Outcome>,
        permit: OwnedSemaphorePermit,
        delivery: Delivery,
    ) {
        let processor = self.processor.clone();
        handlers.spawn(async move {
            let _permit = permit;
            processor.process(&delivery.payload).await
        });
    }

    /// Process what the subscription still holds, then wait for every handler.
    /// With a drain timeout, whatever is left at the deadline is aborted or
    /// discarded and counted as errored.
    async fn drain(
        &self,
        subscription: &mut Subscription,
        permits: &Arc<Semaphore>,
        handlers: &mut JoinSet<Outcome>,
        summary: &mut WorkerSummary,
    ) -> anyhow::Result<()> {
        let Some(limit) = self.config.drain_timeout() else {
            return self.flush(subscription, permits, handlers, summary).await;
        };

        let flushed = self.flush(subscription, permits, handlers, summary);
        if let Ok(result) = tokio::time::timeout(limit, flushed).await {
            return result;
        }

        warn!(
            "Drain timeout of {:?} exceeded, aborting {} handlers",
            limit,
            handlers.len()
        );
        handlers.abort_all();
        while let Some(joined) = handlers.join_next().await {
            self.settle(joined, summary).await;
        }

        let discarded = subscription.unsubscribe().await;
        if discarded > 0 {
            warn!("{} deliveries were not started before the drain timeout", discarded);
        }
        for _ in 0..discarded {
            summary.errored += 1;
            self.processor.record_error("not started before drain timeout").await;
        }
        Ok(())
    }

    async fn flush(
        &self,
        subscription: &mut Subscription,
        permits: &Arc<Semaphore>,
        handlers: &mut JoinSet<Outcome>,
        summary: &mut WorkerSummary,
    ) -> anyhow::Result<()> {
        let mut open = true;
        while open || !handlers.is_empty() {
            tokio::select! {
                biased;

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    self.settle(joined, summary).await;
                }

                permit = permits.clone().acquire_owned(), if open => {
                    let permit = permit.context("handler semaphore closed")?;
                    match subscription.next().await {
                        Some(delivery) => self.spawn(handlers, permit, delivery),
                        None => open = false,
                    }
                }
            }
        }
        Ok(())
    }

    async fn settle(&self, joined: Result<Outcome, JoinError>, summary: &mut WorkerSummary) {
        match joined {
            Ok(Outcome::Processed { key }) => {
                debug!("Settled {}", key);
                summary.processed += 1;
            }
            Ok(Outcome::Errored { reason }) => {
                debug!("Settled with error: {}", reason);
                summary.errored += 1;
            }
            Err(e) if e.is_panic() => {
                error!("Handler panicked: {}", e);
                summary.errored += 1;
                self.processor.record_error("handler panicked").await;
            }
            Err(e) => {
                warn!("Handler aborted: {}", e);
                summary.errored += 1;
                self.processor.record_error("handler aborted during drain").await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{CompleteHandler, HandlerResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use task_pipeline_core::{MemoryBroker, Task, ERRORED_COUNTER, PROCESSED_COUNTER};
    use task_pipeline_store::MemoryStore;

    struct PanicHandler;

    #[async_trait]
    impl TaskHandler for PanicHandler {
        async fn execute(&self, task: &Task) -> HandlerResult {
            if task.payload()["explode"] == json!(true) {
                panic!("handler exploded");
            }
            Ok(())
        }
    }

    async fn wait_for(store: &MemoryStore, total: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let done = store.counter(PROCESSED_COUNTER).await.unwrap()
                + store.counter(ERRORED_COUNTER).await.unwrap();
            if done >= total {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "timed out at {}/{}", done, total);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MemoryStore::new());
        let worker = Arc::new(
            Worker::new(
                WorkerConfig::default(),
                Arc::new(broker.connect()),
                store,
                Arc::new(CompleteHandler),
            )
            .unwrap(),
        );

        let mut state = worker.state();
        assert_eq!(*state.borrow(), WorkerState::Starting);

        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        state.wait_for(|s| *s == WorkerState::Subscribed).await.unwrap();
        worker.shutdown();
        state.wait_for(|s| *s == WorkerState::Stopped).await.unwrap();

        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary, WorkerSummary::default());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MemoryStore::new());
        let worker = Arc::new(
            Worker::new(
                WorkerConfig::default(),
                Arc::new(broker.connect()),
                store.clone(),
                Arc::new(PanicHandler),
            )
            .unwrap(),
        );

        let mut state = worker.state();
        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });
        state.wait_for(|s| *s == WorkerState::Subscribed).await.unwrap();

        let publisher = broker.connect();
        for explode in [true, false, true, false] {
            let payload = Task::new(json!({ "explode": explode })).to_bytes().unwrap();
            publisher.publish("tasks", payload).await.unwrap();
        }

        wait_for(&store, 4).await;
        worker.shutdown();
        let summary = running.await.unwrap().unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.errored, 2);
        assert_eq!(store.counter(ERRORED_COUNTER).await.unwrap(), 2);
        assert_eq!(worker.metrics().tasks_in_flight.get(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_fatal() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        conn.close().await;

        let worker = Worker::new(
            WorkerConfig::default(),
            Arc::new(conn),
            Arc::new(MemoryStore::new()),
            Arc::new(CompleteHandler),
        )
        .unwrap();

        assert!(worker.run().await.is_err());
        assert_eq!(*worker.state().borrow(), WorkerState::Starting);
    }
}
