use crate::{Result, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::path::PathBuf;
use std::sync::Arc;
use task_pipeline_core::ResultStore;
use tracing::{debug, info};

/// Configuration for the RocksDB store
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    pub data_dir: PathBuf,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        RocksStoreConfig {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Column family names
const CF_RESULTS: &str = "results";
const CF_COUNTERS: &str = "counters";

/// Persistent result store using RocksDB
pub struct RocksStore {
    db: Arc<DB>,
    // Serializes counter read-modify-write inside the store process
    counter_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create the store
    pub fn open(config: RocksStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db_path = config.data_dir.join("results");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_RESULTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_COUNTERS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, db_path, cf_descriptors)?;

        info!("Opened result store at {:?}", config.data_dir);

        Ok(RocksStore {
            db: Arc::new(db),
            counter_lock: Mutex::new(()),
        })
    }

    fn put_value(&self, key: &str, value: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_RESULTS)
            .ok_or(StoreError::MissingColumnFamily(CF_RESULTS))?;
        self.db.put_cf(cf, key.as_bytes(), value)?;
        debug!("Stored {}", key);
        Ok(())
    }

    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self
            .db
            .cf_handle(CF_RESULTS)
            .ok_or(StoreError::MissingColumnFamily(CF_RESULTS))?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn read_counter(&self, key: &str) -> Result<u64> {
        let cf = self
            .db
            .cf_handle(CF_COUNTERS)
            .ok_or(StoreError::MissingColumnFamily(CF_COUNTERS))?;

        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => decode_counter(key, &bytes),
            None => Ok(0),
        }
    }

    fn increment(&self, key: &str) -> Result<u64> {
        let cf = self
            .db
            .cf_handle(CF_COUNTERS)
            .ok_or(StoreError::MissingColumnFamily(CF_COUNTERS))?;

        let _guard = self.counter_lock.lock();
        let current = match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => decode_counter(key, &bytes)?,
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(cf, key.as_bytes(), next.to_be_bytes())?;
        Ok(next)
    }

    /// RocksDB's own estimate across both column families
    fn estimate_keys(&self) -> Result<u64> {
        let mut total = 0;
        for cf_name in [CF_RESULTS, CF_COUNTERS] {
            let cf = self
                .db
                .cf_handle(cf_name)
                .ok_or(StoreError::MissingColumnFamily(cf_name))?;
            total += self
                .db
                .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
                .unwrap_or(0);
        }
        Ok(total)
    }
}

fn decode_counter(key: &str, bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StoreError::CorruptCounter {
        key: key.to_string(),
        len: bytes.len(),
    })?;
    Ok(u64::from_be_bytes(raw))
}

#[async_trait]
impl ResultStore for RocksStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> task_pipeline_core::Result<()> {
        self.put_value(key, &value).map_err(StoreError::into_write)
    }

    async fn get(&self, key: &str) -> task_pipeline_core::Result<Option<Vec<u8>>> {
        self.get_value(key).map_err(StoreError::into_read)
    }

    async fn incr(&self, counter: &str) -> task_pipeline_core::Result<u64> {
        self.increment(counter).map_err(StoreError::into_write)
    }

    async fn counter(&self, counter: &str) -> task_pipeline_core::Result<u64> {
        self.read_counter(counter).map_err(StoreError::into_read)
    }

    async fn size(&self) -> task_pipeline_core::Result<u64> {
        self.estimate_keys().map_err(StoreError::into_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(temp_dir: &TempDir) -> RocksStore {
        RocksStore::open(RocksStoreConfig {
            data_dir: temp_dir.path().to_path_buf(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        store.put("task:1", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get("task:1").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(store.get("task:2").await.unwrap(), None);
        assert!(store.size().await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_counters_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = open(&temp_dir);
            assert_eq!(store.counter("metric_processed_count").await.unwrap(), 0);
            assert_eq!(store.incr("metric_processed_count").await.unwrap(), 1);
            assert_eq!(store.incr("metric_processed_count").await.unwrap(), 2);
        }

        let store = open(&temp_dir);
        assert_eq!(store.counter("metric_processed_count").await.unwrap(), 2);
        assert_eq!(store.counter("metric_errored_count").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open(&temp_dir));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        store.incr("hits").await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.counter("hits").await.unwrap(), 800);
    }

    #[test]
    fn test_corrupt_counter() {
        assert!(matches!(
            decode_counter("hits", &[1, 2, 3]),
            Err(StoreError::CorruptCounter { len: 3, .. })
        ));
        assert_eq!(decode_counter("hits", &7u64.to_be_bytes()).unwrap(), 7);
    }
}
