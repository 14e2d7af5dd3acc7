mod task;
mod error;
pub mod broker;
pub mod keys;
pub mod memory;
pub mod router;
pub mod store;

pub use task::{Task, TaskResult, ResultStatus};
pub use error::{PipelineError, Result};
pub use broker::{Broker, BrokerStatus, Delivery, Subscription, SubscriptionHandle, DEFAULT_GROUP, DEFAULT_SUBJECT};
pub use keys::{KeyGenerator, UuidKeyGenerator, ERRORED_COUNTER, PROCESSED_COUNTER, TASK_KEY_PREFIX};
pub use memory::{MemoryBroker, MemoryConnection};
pub use router::QueueGroupRouter;
pub use store::{ResultStore, ResultStoreExt};

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
