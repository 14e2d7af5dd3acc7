use serde::{Deserialize, Serialize};
use std::sync::Arc;
use task_pipeline_core::{Broker, PipelineError, Result, Task, DEFAULT_SUBJECT, MAX_PAYLOAD_SIZE};
use tracing::{debug, info};

/// Acknowledgement returned once the broker accepted a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub status: String,
    pub payload: Task,
}

impl Submission {
    fn queued(payload: Task) -> Self {
        Submission {
            status: "queued".to_string(),
            payload,
        }
    }
}

/// Publishes tasks on the task subject.
///
/// The broker is optional so an ingestion surface can start before the
/// broker is reachable and answer with `Unavailable` in the meantime.
#[derive(Clone)]
pub struct Producer {
    broker: Option<Arc<dyn Broker>>,
    subject: String,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_subject(broker, DEFAULT_SUBJECT)
    }

    pub fn with_subject(broker: Arc<dyn Broker>, subject: impl Into<String>) -> Self {
        Producer {
            broker: Some(broker),
            subject: subject.into(),
        }
    }

    pub fn without_broker() -> Self {
        Producer {
            broker: None,
            subject: DEFAULT_SUBJECT.to_string(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn broker(&self) -> Option<&Arc<dyn Broker>> {
        self.broker.as_ref()
    }

    /// Serialize and publish a task.
    ///
    /// Resolves after the broker's publish acknowledgement, not after a
    /// worker has processed the task. Identical payloads are never merged.
    pub async fn submit(&self, task: Task) -> Result<Submission> {
        let broker = match &self.broker {
            Some(broker) if broker.is_connected() => broker,
            _ => return Err(PipelineError::Unavailable("Queue not available".to_string())),
        };

        let bytes = task.to_bytes()?;
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(PipelineError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: bytes.len(),
            });
        }

        debug!("Publishing {} bytes on {}", bytes.len(), self.subject);
        broker.publish(&self.subject, bytes).await?;
        info!("Task queued on {}", self.subject);

        Ok(Submission::queued(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use task_pipeline_core::MemoryBroker;

    #[tokio::test]
    async fn test_submit_publishes_serialized_task() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        let mut sub = conn.subscribe("tasks", Some("workers")).await.unwrap();

        let producer = Producer::new(Arc::new(conn));
        let submission = producer
            .submit(Task::new(json!({"job": "resize", "id": 42})))
            .await
            .unwrap();

        assert_eq!(submission.status, "queued");
        assert_eq!(submission.payload.payload(), &json!({"job": "resize", "id": 42}));

        let delivery = sub.next().await.unwrap();
        let task = Task::from_bytes(&delivery.payload).unwrap();
        assert_eq!(task, submission.payload);
    }

    #[tokio::test]
    async fn test_duplicate_submissions_are_not_merged() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        let mut sub = conn.subscribe("tasks", None).await.unwrap();

        let producer = Producer::new(Arc::new(conn));
        producer.submit(Task::new(json!({"n": 1}))).await.unwrap();
        producer.submit(Task::new(json!({"n": 1}))).await.unwrap();

        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_some());
    }

    #[tokio::test]
    async fn test_submit_without_broker_is_unavailable() {
        let producer = Producer::without_broker();
        let err = producer.submit(Task::new(json!({}))).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_submit_on_closed_connection_is_unavailable() {
        let broker = MemoryBroker::new();
        let conn = Arc::new(broker.connect());
        conn.close().await;

        let producer = Producer::new(conn);
        let err = producer.submit(Task::new(json!({}))).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(Arc::new(broker.connect()));

        let big = "x".repeat(MAX_PAYLOAD_SIZE + 1);
        let err = producer.submit(Task::new(json!({ "blob": big }))).await.unwrap_err();
        assert!(matches!(err, PipelineError::PayloadTooLarge { .. }));
    }
}
