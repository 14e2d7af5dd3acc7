use serde::{Deserialize, Serialize};
use std::sync::Arc;
use task_pipeline_core::{Broker, BrokerStatus, ResultStore, ERRORED_COUNTER, PROCESSED_COUNTER};
use tracing::warn;

/// Point-in-time pipeline status.
///
/// A field whose read failed is `None` and its name is listed in `degraded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub store_size: Option<u64>,
    pub processed_count: Option<u64>,
    pub errored_count: Option<u64>,
    pub broker_status: BrokerStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

/// Read-only view over the result store counters
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn ResultStore>,
    broker: Option<Arc<dyn Broker>>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn ResultStore>, broker: Option<Arc<dyn Broker>>) -> Self {
        StatusReporter { store, broker }
    }

    pub async fn report(&self) -> StatusReport {
        let (size, processed, errored) = tokio::join!(
            self.store.size(),
            self.store.counter(PROCESSED_COUNTER),
            self.store.counter(ERRORED_COUNTER),
        );

        let mut degraded = Vec::new();
        let mut field = |name: &str, result: task_pipeline_core::Result<u64>| match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Status read of {} failed: {}", name, e);
                degraded.push(name.to_string());
                None
            }
        };

        let store_size = field("store_size", size);
        let processed_count = field("processed_count", processed);
        let errored_count = field("errored_count", errored);

        let broker_status = self
            .broker
            .as_ref()
            .map(|broker| broker.status())
            .unwrap_or(BrokerStatus::Disconnected);

        StatusReport {
            store_size,
            processed_count,
            errored_count,
            broker_status,
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use task_pipeline_core::{MemoryBroker, PipelineError};

    #[derive(Default)]
    struct CountingStore {
        fail_size: bool,
        processed: u64,
    }

    #[async_trait]
    impl ResultStore for CountingStore {
        async fn put(&self, _key: &str, _value: Vec<u8>) -> task_pipeline_core::Result<()> {
            Ok(())
        }

        async fn get(&self, _key: &str) -> task_pipeline_core::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn incr(&self, _counter: &str) -> task_pipeline_core::Result<u64> {
            Ok(1)
        }

        async fn counter(&self, counter: &str) -> task_pipeline_core::Result<u64> {
            if counter == PROCESSED_COUNTER {
                Ok(self.processed)
            } else {
                Ok(0)
            }
        }

        async fn size(&self) -> task_pipeline_core::Result<u64> {
            if self.fail_size {
                Err(PipelineError::StoreRead("size unavailable".to_string()))
            } else {
                Ok(3)
            }
        }
    }

    #[tokio::test]
    async fn test_absent_counters_read_as_zero() {
        let reporter = StatusReporter::new(Arc::new(CountingStore::default()), None);
        let report = reporter.report().await;

        assert_eq!(report.processed_count, Some(0));
        assert_eq!(report.errored_count, Some(0));
        assert_eq!(report.store_size, Some(3));
        assert_eq!(report.broker_status, BrokerStatus::Disconnected);
        assert!(report.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_failed_read_degrades_single_field() {
        let store = CountingStore {
            fail_size: true,
            processed: 5,
        };
        let broker = MemoryBroker::new();
        let conn: Arc<dyn Broker> = Arc::new(broker.connect());
        let reporter = StatusReporter::new(Arc::new(store), Some(conn));
        let report = reporter.report().await;

        assert_eq!(report.store_size, None);
        assert_eq!(report.processed_count, Some(5));
        assert_eq!(report.broker_status, BrokerStatus::Connected);
        assert_eq!(report.degraded, vec!["store_size".to_string()]);
    }

    #[test]
    fn test_report_json_shape() {
        let report = StatusReport {
            store_size: Some(2),
            processed_count: Some(1),
            errored_count: None,
            broker_status: BrokerStatus::Connected,
            degraded: vec!["errored_count".to_string()],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["broker_status"], "connected");
        assert!(value["errored_count"].is_null());
    }
}
