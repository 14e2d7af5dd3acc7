pub mod worker;
pub mod handler;
pub mod executor;
pub mod processor;
pub mod metrics;
pub mod config;

pub use worker::{Worker, WorkerState, WorkerSummary};
pub use handler::{CompleteHandler, SleepHandler, TaskHandler};
pub use processor::{Outcome, TaskProcessor};
pub use metrics::WorkerMetrics;
pub use config::WorkerConfig;
