use crate::handler::{HandlerResult, TaskHandler};
use std::sync::Arc;
use std::time::Duration;
use task_pipeline_core::Task;
use tokio::time::timeout;
use tracing::{debug, error};

/// Runs the handler, optionally bounded by a timeout
#[derive(Clone)]
pub struct TaskExecutor {
    handler: Arc<dyn TaskHandler>,
    timeout: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        TaskExecutor {
            handler,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(&self, task: &Task) -> HandlerResult {
        let Some(limit) = self.timeout else {
            return self.handler.execute(task).await;
        };

        match timeout(limit, self.handler.execute(task)).await {
            Ok(result) => {
                debug!("Handler finished within {:?}", limit);
                result
            }
            Err(_) => {
                error!("Handler timed out after {:?}", limit);
                Err(format!("Task execution timed out after {:?}", limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{CompleteHandler, SleepHandler};
    use serde_json::json;

    #[tokio::test]
    async fn test_executor_success() {
        let executor = TaskExecutor::new(Arc::new(CompleteHandler));
        assert!(executor.execute(&Task::new(json!({"a": 1}))).await.is_ok());
    }

    #[tokio::test]
    async fn test_executor_timeout() {
        let executor = TaskExecutor::new(Arc::new(SleepHandler::new(2000)))
            .with_timeout(Some(Duration::from_millis(50)));

        let result = executor.execute(&Task::new(json!({}))).await;
        assert!(result.unwrap_err().contains("timed out"));
    }
}
