use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied task payload.
///
/// The pipeline never looks inside it: it is encoded by the producer,
/// decoded once by the worker that receives it, and copied verbatim into
/// the stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task(Value);

impl Task {
    pub fn new(payload: Value) -> Self {
        Task(payload)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }

    pub fn into_payload(self) -> Value {
        self.0
    }

    /// Serialize task to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Deserialize task from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Task(serde_json::from_slice(bytes)?))
    }
}

impl From<Value> for Task {
    fn from(payload: Value) -> Self {
        Task(payload)
    }
}

/// Terminal outcome of one delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    Completed,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Completed => "Completed",
            ResultStatus::Failed => "Failed",
        }
    }
}

/// Record written to the result store once a task reaches a terminal state.
/// Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: ResultStatus,

    pub original_payload: Task,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Worker that produced this result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn completed(task: Task) -> Self {
        TaskResult {
            status: ResultStatus::Completed,
            original_payload: task,
            error: None,
            worker_id: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(task: Task, error: impl Into<String>) -> Self {
        TaskResult {
            status: ResultStatus::Failed,
            original_payload: task,
            error: Some(error.into()),
            worker_id: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
