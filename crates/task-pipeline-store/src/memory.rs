use async_trait::async_trait;
use dashmap::DashMap;
use task_pipeline_core::{ResultStore, Result};

/// In-memory result store.
///
/// Values and counters live in separate sharded maps; each operation holds
/// the shard lock of its key only, which makes single-key updates atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Vec<u8>>,
    counters: DashMap<String, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn incr(&self, counter: &str) -> Result<u64> {
        let mut entry = self.counters.entry(counter.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn counter(&self, counter: &str) -> Result<u64> {
        Ok(self.counters.get(counter).map(|v| *v).unwrap_or(0))
    }

    async fn size(&self) -> Result<u64> {
        Ok((self.values.len() + self.counters.len()) as u64)
    }
}
