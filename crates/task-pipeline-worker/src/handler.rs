use async_trait::async_trait;
use std::time::Duration;
use task_pipeline_core::Task;

/// Outcome of running a handler; the error text ends up in the stored result
pub type HandlerResult = Result<(), String>;

/// Work performed for each delivered task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task) -> HandlerResult;
}

/// Accepts every task as-is
pub struct CompleteHandler;

#[async_trait]
impl TaskHandler for CompleteHandler {
    async fn execute(&self, _task: &Task) -> HandlerResult {
        Ok(())
    }
}

/// Simulates work by sleeping before completing
pub struct SleepHandler {
    duration: Duration,
}

impl SleepHandler {
    pub fn new(duration_ms: u64) -> Self {
        SleepHandler {
            duration: Duration::from_millis(duration_ms),
        }
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(&self, _task: &Task) -> HandlerResult {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}
