use crate::{Result, TaskResult};
use async_trait::async_trait;

/// Shared key/value store holding task results and pipeline counters.
///
/// Every operation touches a single key and must be atomic in the backing
/// store. In particular [`incr`](ResultStore::incr) is a store-side
/// increment: concurrent callers never lose an update.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Increment a counter and return its new value
    async fn incr(&self, counter: &str) -> Result<u64>;

    /// Current counter value, 0 if it was never incremented
    async fn counter(&self, counter: &str) -> Result<u64>;

    /// Approximate number of keys (results and counters)
    async fn size(&self) -> Result<u64>;
}

/// Typed access to stored [`TaskResult`]s
#[async_trait]
pub trait ResultStoreExt: ResultStore {
    async fn put_result(&self, key: &str, result: &TaskResult) -> Result<()> {
        let bytes = result.to_bytes()?;
        self.put(key, bytes).await
    }

    async fn get_result(&self, key: &str) -> Result<Option<TaskResult>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(TaskResult::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl<S: ResultStore + ?Sized> ResultStoreExt for S {}
